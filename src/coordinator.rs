// coordinator.rs

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::matrix::MatrixSource;
use crate::queue::{result_channel, ResultCollector, ResultRow, WorkQueue};
use crate::worker::{ScanWorker, StopReason, WorkerSummary};
use indicatif::ProgressBar;
use log::{error, info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Progress hook called from the coordinator thread as result rows arrive.
pub trait ScanProgress {
    fn start(&self, _total_loci: usize) {}
    fn locus_done(&self) {}
    fn finish(&self) {}
}

/// No progress reporting.
impl ScanProgress for () {}

impl ScanProgress for ProgressBar {
    fn start(&self, total_loci: usize) {
        self.set_length(total_loci as u64);
    }

    fn locus_done(&self) {
        self.inc(1);
    }

    fn finish(&self) {
        match self.length() {
            Some(len) if self.position() < len => {
                self.abandon_with_message(format!("Stopped after {} of {} loci.", self.position(), len))
            }
            _ => self.finish_with_message("Scan complete."),
        }
    }
}

/// Aggregated worker accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    pub loci_scheduled: usize,
    pub loci_processed: usize,
    pub loci_skipped: usize,
    pub chunks: usize,
    pub elapsed: Duration,
    pub stopped_by_deadline: bool,
    pub workers: Vec<WorkerSummary>,
}

/// Both result tables, sorted by locus index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResults {
    pub covariates: Vec<String>,
    pub default_rows: Vec<ResultRow>,
    /// Empty when no permutations were requested.
    pub adjusted_rows: Vec<ResultRow>,
    pub summary: ScanSummary,
}

/// Runs the whole scan: fills the work queue, runs `config.workers` workers
/// against `source` and collects their rows.
pub fn run_scan<S, P>(config: &ScanConfig, source: &S, progress: &P) -> Result<ScanResults>
where
    S: MatrixSource,
    P: ScanProgress + ?Sized,
{
    config.validate()?;
    let started = Instant::now();

    let available = source.locus_count()?;
    let total_loci = config.max_loci.map_or(available, |m| m.min(available));
    let queue = WorkQueue::populate(total_loci, config.chunk_size);
    info!(
        "Scanning {} loci in {} chunks of {} with {} workers, {} permutations per test.",
        total_loci,
        queue.len(),
        config.chunk_size,
        config.workers,
        config.n_permutations
    );
    progress.start(total_loci);

    let (sender, receiver) = result_channel();
    let mut collector = ResultCollector::new();

    let (collect_outcome, joined) = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.workers)
            .map(|worker_id| {
                let queue = queue.clone();
                let sender = sender.clone();
                thread::Builder::new()
                    .name(format!("scan-worker-{}", worker_id))
                    .spawn_scoped(scope, move || {
                        ScanWorker::new(worker_id, config, source, total_loci).run(&queue, &sender)
                    })
            })
            .collect();
        // Only worker clones may keep the channel open.
        drop(sender);

        let mut collect_outcome = Ok(());
        for message in receiver.iter() {
            match collector.accept(message) {
                Ok(true) => progress.locus_done(),
                Ok(false) => {}
                Err(e) => {
                    collect_outcome = Err(e);
                    break;
                }
            }
        }
        // Workers notice the closed channel on their next send.
        drop(receiver);

        let joined: Vec<Result<WorkerSummary>> = handles
            .into_iter()
            .enumerate()
            .map(|(worker_id, spawned)| match spawned {
                Ok(handle) => handle.join().unwrap_or(Err(ScanError::WorkerPanicked(worker_id))),
                Err(source) => Err(ScanError::WorkerSpawn { worker_id, source }),
            })
            .collect();
        (collect_outcome, joined)
    });
    progress.finish();
    collect_outcome?;

    let mut summary = ScanSummary {
        loci_scheduled: total_loci,
        ..ScanSummary::default()
    };
    let mut first_error = None;
    for outcome in joined {
        match outcome {
            Ok(worker) => {
                summary.loci_processed += worker.loci_processed;
                summary.loci_skipped += worker.loci_skipped;
                summary.chunks += worker.chunks;
                summary.stopped_by_deadline |= worker.stop_reason == StopReason::Deadline;
                summary.workers.push(worker);
            }
            Err(e) => {
                error!("Worker failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let (covariates, default_rows, adjusted_rows) = collector.finish();
    summary.elapsed = started.elapsed();

    if summary.stopped_by_deadline {
        warn!(
            "Deadline reached: {} of {} loci processed.",
            summary.loci_processed, total_loci
        );
    }
    if summary.loci_skipped > 0 {
        warn!(
            "{} loci skipped because genotype and expression row names differed.",
            summary.loci_skipped
        );
    }
    info!(
        "Scan finished in {:.2?}: {} default rows, {} adjusted rows.",
        summary.elapsed,
        default_rows.len(),
        adjusted_rows.len()
    );

    Ok(ScanResults {
        covariates,
        default_rows,
        adjusted_rows,
        summary,
    })
}

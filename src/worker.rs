// worker.rs

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::matrix::{LabeledMatrix, LocusChunk, MatrixSource};
use crate::model::Model;
use crate::permutation::PermutationCorrector;
use crate::queue::{ResultMessage, ResultRow, ResultSender, WorkQueue};
use crate::stats::compare_models;
use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1, Axis};
use std::time::{Duration, Instant};

/// Technical covariates (always in the null model) split from the covariates
/// under test.
#[derive(Debug, Clone)]
pub struct CovariateSets {
    pub technical: LabeledMatrix,
    pub general: LabeledMatrix,
}

impl CovariateSets {
    /// Removes `technical_names` from `covariates`. Every technical name must
    /// be present; the remaining rows keep their table order.
    pub fn partition(covariates: &LabeledMatrix, technical_names: &[String]) -> Result<Self> {
        let mut tech_rows = Vec::with_capacity(technical_names.len());
        for name in technical_names {
            let idx = covariates
                .row_index(name)
                .ok_or_else(|| ScanError::MissingTechnicalCovariate(name.clone()))?;
            tech_rows.push(idx);
        }
        let general_rows: Vec<usize> = (0..covariates.nrows())
            .filter(|i| !tech_rows.contains(i))
            .collect();

        let pick = |rows: &[usize]| LabeledMatrix {
            row_names: rows.iter().map(|&i| covariates.row_names[i].clone()).collect(),
            sample_names: covariates.sample_names.clone(),
            values: covariates.values.select(Axis(0), rows),
        };

        Ok(Self {
            technical: pick(&tech_rows),
            general: pick(&general_rows),
        })
    }

    pub fn general_names(&self) -> &[String] {
        &self.general.row_names
    }
}

/// Per-locus output: always a default row, an adjusted row only when
/// permutations ran.
#[derive(Debug, Clone, PartialEq)]
pub struct LocusResult {
    pub default: ResultRow,
    pub adjusted: Option<ResultRow>,
    pub n_samples: usize,
    pub permutation_time: Duration,
}

/// Runs the nested-model comparison for every general covariate at one locus.
///
/// Samples with a missing genotype are dropped from every vector first.
pub fn analyse_locus(
    locus_index: usize,
    locus_id: &str,
    genotype: ArrayView1<f64>,
    expression: ArrayView1<f64>,
    covariates: &CovariateSets,
    corrector: &PermutationCorrector,
) -> LocusResult {
    let mask: Vec<usize> = genotype
        .iter()
        .enumerate()
        .filter(|(_, g)| !g.is_nan())
        .map(|(i, _)| i)
        .collect();

    let g = genotype.select(Axis(0), &mask);
    let y = expression.select(Axis(0), &mask);
    let technical = covariates.technical.values.select(Axis(1), &mask);
    let general = covariates.general.values.select(Axis(1), &mask);

    let mut null_model = Model::new();
    for (name, row) in covariates.technical.row_names.iter().zip(technical.rows()) {
        null_model.insert(name.clone(), &row * &g);
    }
    let null_fit = null_model.fit(y.view());

    let n_covs = general.nrows();
    let mut z_scores = Vec::with_capacity(n_covs);
    let mut adj_z_scores = Vec::with_capacity(n_covs);
    let mut permutation_time = Duration::ZERO;
    let mut rng = corrector.rng_for_locus(locus_index);

    for (name, row) in covariates.general.row_names.iter().zip(general.rows()) {
        let interaction: Array1<f64> = &row * &g;
        let alt_fit = null_model
            .with_regressor(name.clone(), interaction.clone())
            .fit(y.view());
        let comparison = compare_models(&null_fit, &alt_fit);
        z_scores.push(comparison.z_score);

        if corrector.is_enabled() {
            let perm_start = Instant::now();
            let outcome = corrector.correct(
                &mut rng,
                &null_model,
                &null_fit,
                name,
                interaction.view(),
                y.view(),
                comparison.p_value,
            );
            adj_z_scores.push(outcome.adj_z_score);
            permutation_time += perm_start.elapsed();
        }
    }

    let adjusted = corrector.is_enabled().then(|| ResultRow {
        locus_index,
        locus_id: locus_id.to_string(),
        z_scores: adj_z_scores,
    });

    LocusResult {
        default: ResultRow {
            locus_index,
            locus_id: locus_id.to_string(),
            z_scores,
        },
        adjusted,
        n_samples: mask.len(),
        permutation_time,
    }
}

/// Why a worker left its loop. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Deadline,
    QueueEmpty,
    InputExhausted,
    ResultChannelClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub chunks: usize,
    pub loci_processed: usize,
    pub loci_skipped: usize,
    pub locus_time: Duration,
    pub permutation_time: Duration,
    pub stop_reason: StopReason,
}

impl WorkerSummary {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            chunks: 0,
            loci_processed: 0,
            loci_skipped: 0,
            locus_time: Duration::ZERO,
            permutation_time: Duration::ZERO,
            stop_reason: StopReason::QueueEmpty,
        }
    }

    pub fn mean_locus_time(&self) -> Duration {
        match self.loci_processed {
            0 => Duration::ZERO,
            n => Duration::from_secs_f64(self.locus_time.as_secs_f64() / n as f64),
        }
    }
}

/// One scan worker. Owns nothing shared except read access to the config and
/// the matrix source.
pub struct ScanWorker<'a, S: MatrixSource> {
    worker_id: usize,
    config: &'a ScanConfig,
    source: &'a S,
    locus_limit: usize,
    corrector: PermutationCorrector,
}

impl<'a, S: MatrixSource> ScanWorker<'a, S> {
    /// `locus_limit` caps the global locus index this worker will touch.
    pub fn new(worker_id: usize, config: &'a ScanConfig, source: &'a S, locus_limit: usize) -> Self {
        Self {
            worker_id,
            config,
            source,
            locus_limit,
            corrector: PermutationCorrector::new(config.n_permutations, config.permutation_seed),
        }
    }

    pub fn run(&self, queue: &WorkQueue, results: &ResultSender) -> Result<WorkerSummary> {
        let started = Instant::now();
        info!("Worker {} started.", self.worker_id);
        let mut summary = WorkerSummary::new(self.worker_id);

        let covariates = self.source.load_covariates()?;
        let sets = CovariateSets::partition(&covariates, &self.config.technical_covariates)?;

        let header = ResultMessage::Header {
            worker_id: self.worker_id,
            covariates: sets.general_names().to_vec(),
        };
        if results.send(header).is_err() {
            summary.stop_reason = StopReason::ResultChannelClosed;
            return Ok(summary);
        }

        let stop_reason = loop {
            if self.config.deadline_passed() {
                break StopReason::Deadline;
            }
            let Some(start) = queue.pop() else {
                break StopReason::QueueEmpty;
            };
            if start >= self.locus_limit {
                break StopReason::InputExhausted;
            }
            let size = self.config.chunk_size.min(self.locus_limit - start);
            let Some(chunk) = self.source.load_chunk(start, size)? else {
                break StopReason::InputExhausted;
            };
            summary.chunks += 1;
            debug!(
                "Worker {}: loci {}..{} ({} loaded)",
                self.worker_id,
                start,
                start + size,
                chunk.len()
            );
            if let Some(reason) = self.process_chunk(&chunk, &sets, results, &mut summary) {
                break reason;
            }
        };
        summary.stop_reason = stop_reason;

        info!(
            "Worker {} stopped ({:?}) after {:.2?}: {} chunks, {} loci, {} skipped, mean {:.2?}/locus, {:.2?} in permutations.",
            self.worker_id,
            summary.stop_reason,
            started.elapsed(),
            summary.chunks,
            summary.loci_processed,
            summary.loci_skipped,
            summary.mean_locus_time(),
            summary.permutation_time
        );
        Ok(summary)
    }

    /// Returns a stop reason only if the coordinator went away.
    fn process_chunk(
        &self,
        chunk: &LocusChunk,
        sets: &CovariateSets,
        results: &ResultSender,
        summary: &mut WorkerSummary,
    ) -> Option<StopReason> {
        for i in 0..chunk.len() {
            let locus_index = chunk.start + i;
            let locus_id = &chunk.genotype.row_names[i];
            match chunk.expression.row_names.get(i) {
                Some(expr_id) if expr_id == locus_id => {}
                other => {
                    warn!(
                        "Worker {}: locus {} genotype row '{}' does not match expression row '{}', skipping.",
                        self.worker_id,
                        locus_index,
                        locus_id,
                        other.map_or("<none>", |s| s.as_str())
                    );
                    summary.loci_skipped += 1;
                    if results.send(ResultMessage::Skipped { locus_index }).is_err() {
                        return Some(StopReason::ResultChannelClosed);
                    }
                    continue;
                }
            }

            let locus_start = Instant::now();
            let result = analyse_locus(
                locus_index,
                locus_id,
                chunk.genotype.values.row(i),
                chunk.expression.values.row(i),
                sets,
                &self.corrector,
            );
            summary.loci_processed += 1;
            summary.locus_time += locus_start.elapsed();
            summary.permutation_time += result.permutation_time;

            if results.send(ResultMessage::Default(result.default)).is_err() {
                return Some(StopReason::ResultChannelClosed);
            }
            if let Some(adjusted) = result.adjusted {
                if results.send(ResultMessage::Adjusted(adjusted)).is_err() {
                    return Some(StopReason::ResultChannelClosed);
                }
            }
        }
        None
    }
}

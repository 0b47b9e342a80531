// queue.rs
//
// Work distribution and result collection between the coordinator and the
// workers. The work queue is filled once and only drained; the result channel
// is many-to-one.

use crate::error::{Result, ScanError};
use flume::{Receiver, RecvTimeoutError, Sender};
use log::debug;
use std::time::Duration;

/// How long a worker waits on an empty queue before concluding there is no
/// more work.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Pre-populated queue of chunk start offsets.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    receiver: Receiver<usize>,
    timeout: Duration,
}

impl WorkQueue {
    /// One entry per chunk: `0, chunk_size, 2 * chunk_size, ...` below
    /// `total_loci`.
    pub fn populate(total_loci: usize, chunk_size: usize) -> Self {
        Self::from_offsets(chunk_offsets(total_loci, chunk_size))
    }

    pub fn from_offsets(offsets: impl IntoIterator<Item = usize>) -> Self {
        let (sender, receiver) = flume::unbounded();
        for offset in offsets {
            // The receiver is alive in this scope.
            let _ = sender.send(offset);
        }
        // Producer is done; an empty queue now reads as disconnected.
        drop(sender);
        Self {
            receiver,
            timeout: DEFAULT_POP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Next chunk start, or `None` when the queue is exhausted.
    pub fn pop(&self) -> Option<usize> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(start) => Some(start),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Chunk start offsets covering `total_loci`; `ceil(total_loci / chunk_size)`
/// entries, strictly increasing.
pub fn chunk_offsets(total_loci: usize, chunk_size: usize) -> Vec<usize> {
    if chunk_size == 0 {
        return Vec::new();
    }
    (0..total_loci).step_by(chunk_size).collect()
}

/// One per-locus output line.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub locus_index: usize,
    pub locus_id: String,
    /// One value per covariate, in header order. NaN marks a degenerate test.
    pub z_scores: Vec<f64>,
}

/// Messages flowing from workers to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultMessage {
    /// Covariate ordering, sent once by every worker before any rows.
    Header {
        worker_id: usize,
        covariates: Vec<String>,
    },
    Default(ResultRow),
    Adjusted(ResultRow),
    /// A locus the worker could not test; it produces no rows.
    Skipped { locus_index: usize },
}

pub type ResultSender = Sender<ResultMessage>;
pub type ResultReceiver = Receiver<ResultMessage>;

pub fn result_channel() -> (ResultSender, ResultReceiver) {
    flume::unbounded()
}

/// Single consumer side of the result channel.
///
/// The first header fixes the covariate order; every later header must match
/// it exactly.
#[derive(Debug, Default)]
pub struct ResultCollector {
    covariates: Option<Vec<String>>,
    headers_seen: usize,
    skipped: usize,
    default_rows: Vec<ResultRow>,
    adjusted_rows: Vec<ResultRow>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the message finished a locus (a default row or a
    /// skip), for progress accounting.
    pub fn accept(&mut self, message: ResultMessage) -> Result<bool> {
        match message {
            ResultMessage::Header {
                worker_id,
                covariates,
            } => {
                self.headers_seen += 1;
                match &self.covariates {
                    None => {
                        debug!("Worker {} fixed covariate order: {:?}", worker_id, covariates);
                        self.covariates = Some(covariates);
                    }
                    Some(expected) if *expected == covariates => {}
                    Some(expected) => {
                        return Err(ScanError::HeaderMismatch {
                            worker_id,
                            expected: expected.clone(),
                            found: covariates,
                        });
                    }
                }
                Ok(false)
            }
            ResultMessage::Default(row) => {
                self.default_rows.push(row);
                Ok(true)
            }
            ResultMessage::Adjusted(row) => {
                self.adjusted_rows.push(row);
                Ok(false)
            }
            ResultMessage::Skipped { locus_index } => {
                debug!("Locus {} skipped", locus_index);
                self.skipped += 1;
                Ok(true)
            }
        }
    }

    pub fn headers_seen(&self) -> usize {
        self.headers_seen
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Covariate order and both row sets, each sorted by locus index.
    pub fn finish(self) -> (Vec<String>, Vec<ResultRow>, Vec<ResultRow>) {
        let mut default_rows = self.default_rows;
        let mut adjusted_rows = self.adjusted_rows;
        default_rows.sort_by_key(|r| r.locus_index);
        adjusted_rows.sort_by_key(|r| r.locus_index);
        (self.covariates.unwrap_or_default(), default_rows, adjusted_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(i: usize) -> ResultRow {
        ResultRow {
            locus_index: i,
            locus_id: format!("rs{}", i),
            z_scores: vec![0.1 * i as f64],
        }
    }

    #[test]
    fn offsets_cover_every_locus_once() {
        assert_eq!(chunk_offsets(10, 3), vec![0, 3, 6, 9]);
        assert_eq!(chunk_offsets(9, 3), vec![0, 3, 6]);
        assert_eq!(chunk_offsets(0, 3), Vec::<usize>::new());
        assert_eq!(chunk_offsets(5, 0), Vec::<usize>::new());
        assert_eq!(chunk_offsets(7, 100).len(), 1);
    }

    #[test]
    fn queue_drains_in_order_then_reports_empty() {
        let queue = WorkQueue::populate(7, 3).with_timeout(Duration::from_millis(10));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(6));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn cloned_queues_share_entries() {
        let a = WorkQueue::populate(4, 1);
        let b = a.clone();
        let mut got = vec![a.pop().unwrap(), b.pop().unwrap(), a.pop().unwrap(), b.pop().unwrap()];
        got.sort();
        assert_eq!(got, vec![0, 1, 2, 3]);
        assert_eq!(a.pop(), None);
    }

    #[test]
    fn collector_accepts_identical_headers_and_sorts_rows() {
        let mut c = ResultCollector::new();
        let covs = vec!["CT1".to_string(), "CT2".to_string()];
        c.accept(ResultMessage::Header { worker_id: 0, covariates: covs.clone() }).unwrap();
        assert!(c.accept(ResultMessage::Default(row(4))).unwrap());
        c.accept(ResultMessage::Header { worker_id: 1, covariates: covs.clone() }).unwrap();
        assert!(c.accept(ResultMessage::Default(row(1))).unwrap());
        assert!(!c.accept(ResultMessage::Adjusted(row(4))).unwrap());
        assert_eq!(c.headers_seen(), 2);

        let (header, default_rows, adjusted_rows) = c.finish();
        assert_eq!(header, covs);
        assert_eq!(default_rows.iter().map(|r| r.locus_index).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(adjusted_rows.len(), 1);
    }

    #[test]
    fn skipped_loci_count_as_finished() {
        let mut c = ResultCollector::new();
        assert!(c.accept(ResultMessage::Skipped { locus_index: 7 }).unwrap());
        assert!(c.accept(ResultMessage::Default(row(8))).unwrap());
        assert_eq!(c.skipped(), 1);
        let (_, default_rows, _) = c.finish();
        assert_eq!(default_rows.len(), 1);
    }

    #[test]
    fn collector_rejects_differing_header() {
        let mut c = ResultCollector::new();
        c.accept(ResultMessage::Header { worker_id: 0, covariates: vec!["CT1".into()] }).unwrap();
        match c.accept(ResultMessage::Header { worker_id: 3, covariates: vec!["CT2".into()] }) {
            Err(ScanError::HeaderMismatch { worker_id, .. }) => assert_eq!(worker_id, 3),
            other => panic!("expected HeaderMismatch, got {:?}", other),
        }
    }
}

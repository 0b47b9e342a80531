// config.rs

use crate::error::{Result, ScanError};
use rand::Rng;
use std::time::{Duration, SystemTime};

/// Everything the engine needs to know about a run.
///
/// Built once by the caller and shared read-only with every worker.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub workers: usize,
    pub chunk_size: usize,
    pub n_permutations: usize,
    /// Soft cutoff, checked between chunks.
    pub deadline: SystemTime,
    pub technical_covariates: Vec<String>,
    pub permutation_seed: u64,
    /// Scan at most this many loci from the start of the tables.
    pub max_loci: Option<usize>,
}

impl ScanConfig {
    /// A configuration with no deadline pressure, no permutations and a
    /// freshly drawn seed. Callers that need reproducible permutations set
    /// or record `permutation_seed`.
    pub fn new(workers: usize, chunk_size: usize, technical_covariates: Vec<String>) -> Self {
        Self {
            workers,
            chunk_size,
            n_permutations: 0,
            deadline: far_future(),
            technical_covariates,
            permutation_seed: draw_seed(),
            max_loci: None,
        }
    }

    pub fn with_permutations(mut self, n_permutations: usize) -> Self {
        self.n_permutations = n_permutations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.permutation_seed = seed;
        self
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_runtime(self, runtime: Duration) -> Self {
        let deadline = SystemTime::now()
            .checked_add(runtime)
            .unwrap_or_else(far_future);
        self.with_deadline(deadline)
    }

    pub fn with_max_loci(mut self, max_loci: Option<usize>) -> Self {
        self.max_loci = max_loci;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ScanError::InvalidConfig("worker count must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(ScanError::InvalidConfig("chunk size must be > 0".into()));
        }
        if let Some(dup) = first_duplicate(&self.technical_covariates) {
            return Err(ScanError::InvalidConfig(format!(
                "technical covariate '{}' listed more than once",
                dup
            )));
        }
        Ok(())
    }

    pub fn deadline_passed(&self) -> bool {
        SystemTime::now() >= self.deadline
    }
}

fn far_future() -> SystemTime {
    // Roughly 100 years; far enough to never trigger.
    SystemTime::now() + Duration::from_secs(100 * 365 * 24 * 3600)
}

fn draw_seed() -> u64 {
    rand::rng().random()
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    names
        .iter()
        .enumerate()
        .find(|(i, name)| names[..*i].contains(name))
        .map(|(_, name)| name.as_str())
}

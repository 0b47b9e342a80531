//! Genome-wide interaction eQTL scanning.
//!
//! For every SNP-gene pair a null model (genotype x technical covariates) is
//! compared against an alternative that adds genotype x covariate-of-interest,
//! with an F-test converted to a z-score. Optionally the interaction term is
//! permuted to obtain an empirical, adjusted z-score. Loci are scanned in
//! chunks by a pool of independent workers pulling from a shared work queue.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod matrix;
pub mod model;
pub mod output;
pub mod permutation;
pub mod queue;
pub mod stats;
pub mod worker;

pub use config::ScanConfig;
pub use coordinator::{run_scan, ScanProgress, ScanResults, ScanSummary};
pub use error::ScanError;
pub use matrix::{InMemoryMatrixSource, LabeledMatrix, LocusChunk, MatrixSource, TsvMatrixSource};
pub use queue::{ResultMessage, ResultRow};

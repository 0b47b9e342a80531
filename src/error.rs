// error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Faults that abort a scan.
///
/// Degenerate statistics, skipped loci, exhausted input, an empty work queue
/// and the deadline are not errors; they never surface here.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path} at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Sample mismatch between {left} and {right}: {detail}")]
    SampleMismatch {
        left: String,
        right: String,
        detail: String,
    },

    #[error("Matrix is {rows}x{cols} but has {row_names} row names and {sample_names} sample names")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        row_names: usize,
        sample_names: usize,
    },

    #[error("Technical covariate '{0}' not found in covariate table")]
    MissingTechnicalCovariate(String),

    #[error("Worker {worker_id} announced covariates {found:?}, expected {expected:?}")]
    HeaderMismatch {
        worker_id: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker {worker_id}: {source}")]
    WorkerSpawn {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        ScanError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;

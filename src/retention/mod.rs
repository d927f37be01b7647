//! Age-based retention for the output directory

pub mod sweeper;

use std::path::PathBuf;
use thiserror::Error;

pub use sweeper::{sweep_directory, sweep_with, RetentionSweeper, SweepReport};

/// Failures seen during a sweep pass. None of them stop the sweeper.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Failed to list {path:?}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read metadata of {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not delete {path:?}, retrying next sweep: {source}")]
    TransientDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SweepError {
    pub fn code(&self) -> &'static str {
        match self {
            SweepError::List { .. } => "SWEEP_LIST_FAILED",
            SweepError::Metadata { .. } => "SWEEP_METADATA_FAILED",
            SweepError::TransientDelete { .. } => "TRANSIENT_DELETE_FAILURE",
        }
    }
}

//! Error types and handling
//!
//! Crate-level error type. Each layer keeps its own error enum
//! (`CaptureError`, `MergeError`) and converts into this one. Sweep
//! failures never escalate; they stay in `SweepReport`.

use crate::recorder::channel::CaptureError;
use crate::transcode::types::MergeError;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown option: {0:?}")]
    UnknownMode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl AppError {
    /// Stable code for each failure path
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::UnknownMode(_) => "UNKNOWN_MODE",
            AppError::InvalidConfig(_) => "INVALID_CONFIG",
            AppError::Capture(e) => e.code(),
            AppError::Merge(e) => e.code(),
        }
    }
}

/// Error report printed by the CLI
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

//! Error types for the runner.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors surfaced synchronously by the runner.
///
/// Failures of a running worker never show up here; they end up in the
/// job's status and error message instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Input file missing: {0}")]
    InputMissing(PathBuf),

    #[error("Worker interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("Job already exists: {0}")]
    Duplicate(String),
}

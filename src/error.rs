//! Error types for the pipeline.

use thiserror::Error;

/// Main error type for pipeline operations.
///
/// The taxonomy is deliberately small: the pipeline is a coordination layer
/// over caller-supplied data, so the only failures are programmer-misuse
/// errors raised synchronously at the mutating call site. Idempotent no-ops
/// (emitting with zero listeners, flushing an empty queue, canceling an
/// unarmed scheduler) are silent successes, not errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot derive primary key: field '{0}' is missing or record is not an object")]
    MissingPrimaryKey(String),

    #[error("primary key field '{field}' must be a string or integer, got {got}")]
    InvalidPrimaryKey { field: String, got: String },
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

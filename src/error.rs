//! Error taxonomy for the materialization engine.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors surfaced by the addressable model contract.
///
/// Stale generator results, unresolvable items, and redundant expansion
/// requests are not errors; they are dropped, skipped, or answered with
/// `Ok(false)` respectively.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The handle predates a model reset and no longer addresses anything.
    #[error("stale handle: the model was reset since this handle was issued")]
    StaleHandle,
    /// The addressed coordinates do not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The request cannot be served in the model's current state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The addressed column exceeds the generator's column count.
    #[error("column {0} out of range")]
    ColumnOutOfRange(usize),
}

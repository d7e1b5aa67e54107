//! Error types for the table store

use synapsed_crdt::CrdtError;
use thiserror::Error;

/// Type alias for Results using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the fallible (`try_*`) store operations.
///
/// Invalid writes are never errors: they are dropped, logged and reported
/// to invalid-cell and invalid-value listeners instead.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed JSON text
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON of the wrong shape
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Schema that cannot be applied
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Clock or stamp error from the mergeable layer
    #[error("CRDT error: {0}")]
    Crdt(#[from] CrdtError),
}

impl From<StoreError> for CrdtError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Crdt(error) => error,
            other => CrdtError::InvalidContent(other.to_string()),
        }
    }
}

//! Error types for clocks, stamps and mergeable content

use thiserror::Error;

/// CRDT operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrdtError {
    #[error("Invalid HLC {hlc:?}: {reason}")]
    InvalidHlc { hlc: String, reason: String },

    #[error("Invalid mergeable content: {0}")]
    InvalidContent(String),
}

impl CrdtError {
    pub(crate) fn invalid_hlc(hlc: &str, reason: impl Into<String>) -> Self {
        CrdtError::InvalidHlc {
            hlc: hlc.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for CRDT operations
pub type Result<T> = std::result::Result<T, CrdtError>;

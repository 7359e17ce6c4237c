//! Error types for checkpoint storage.

use thiserror::Error;

/// Result type alias for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors produced by checkpoint backends and payload codecs.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Backend storage failure.
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    /// `(thread_id, checkpoint_id)` already exists.
    #[error("duplicate checkpoint {thread_id}/{checkpoint_id}")]
    Duplicate {
        thread_id: String,
        checkpoint_id: String,
    },

    /// Payload could not be encoded or decoded.
    #[error("checkpoint payload codec error: {0}")]
    Codec(String),

    /// Payload written by a newer engine than this one.
    #[error("unsupported checkpoint payload schema version {0}")]
    UnsupportedVersion(u16),
}

impl From<sqlx::Error> for CheckpointError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

//! Unified error type for engine operations.

use amelia_checkpoint::CheckpointError;
use amelia_drivers::DriverError;
use amelia_graph::GraphError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AmeliaError>;

/// Main error type for the Amelia engine.
#[derive(Debug, Error)]
pub enum AmeliaError {
    /// Configuration problem (unknown profile, missing driver).
    #[error("configuration error: {0}")]
    Config(String),

    /// Database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Another workflow is active on the requested worktree.
    #[error("worktree busy: {0}")]
    WorktreeBusy(String),

    /// Entity lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Tracker integration failure.
    #[error("tracker error: {0}")]
    Tracker(String),

    /// Patch or payload validation failure.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Driver invocation failure.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Graph runtime failure.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Checkpoint storage failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for AmeliaError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

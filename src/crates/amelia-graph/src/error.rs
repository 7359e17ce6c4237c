//! Error types for graph construction and execution.

use amelia_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors produced while building or running a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph shape is invalid (missing nodes, dangling edges).
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// An edge or checkpoint referenced a node the graph does not have.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// State merge failed (reducer type mismatch, non-object updates).
    #[error("state merge error: {0}")]
    State(String),

    /// No checkpoint exists for the thread; the run was never seeded.
    #[error("no checkpoint for thread {0}")]
    MissingCheckpoint(String),

    /// Checkpoint storage failed; the current node is considered failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A node handler failed.
    #[error("node {node} failed: {message}")]
    NodeFailed { node: String, message: String },
}

impl GraphError {
    /// Build a [`GraphError::NodeFailed`] with a display-able cause.
    pub fn node_failed(node: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::NodeFailed {
            node: node.into(),
            message: message.to_string(),
        }
    }
}

//! Driver error types.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors produced by driver invocations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No driver registered under the requested name.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Child process could not be started.
    #[error("failed to spawn agent process: {0}")]
    Spawn(String),

    /// The child spoke something that is not the frame protocol.
    #[error("driver protocol error: {0}")]
    Protocol(String),

    /// Transport-level HTTP failure (connect, reset, body read).
    #[error("http transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Seconds to wait, from a `Retry-After` header.
        retry_after: Option<u64>,
    },

    /// The invocation exceeded its deadline.
    #[error("driver invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The invocation was cancelled before producing a result.
    #[error("driver invocation cancelled")]
    Cancelled,

    /// Retries exhausted; the last error is attached.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DriverError {
    /// Whether this error class may be retried (when no tool call fired).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(DriverError::Transport("reset".into()).is_transient());
        assert!(DriverError::Api { status: 429, message: "slow down".into(), retry_after: Some(2) }
            .is_transient());
        assert!(DriverError::Api { status: 503, message: "down".into(), retry_after: None }
            .is_transient());
        assert!(!DriverError::Api { status: 401, message: "bad key".into(), retry_after: None }
            .is_transient());
        assert!(!DriverError::Cancelled.is_transient());
        assert!(!DriverError::Protocol("junk".into()).is_transient());
    }
}

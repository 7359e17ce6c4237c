//! The checkpoint storage contract.
//!
//! Implementations must be `Send + Sync` and safe under concurrent use;
//! each `thread_id` forms an independent checkpoint history. A missing
//! checkpoint is `Ok(None)`, never an error.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage backend for workflow checkpoints.
///
/// `put` must be atomic: either the whole checkpoint is durable or nothing
/// is. The runtime relies on this to guarantee that a `stage_completed`
/// event is only ever emitted for a node whose post-state checkpoint
/// exists.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Write a new checkpoint. Fails on a duplicate
    /// `(thread_id, checkpoint_id)`.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// The most recently written checkpoint for a thread.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// A specific checkpoint by id.
    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints for a thread, newest first.
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Remove checkpoints of the given (terminal) threads written before
    /// the cutoff. Returns the number removed. Callers decide which
    /// threads are terminal; the store does not know workflow status.
    async fn purge(&self, thread_ids: &[String], older_than: DateTime<Utc>) -> Result<u64>;
}

//! Checkpoint record type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted snapshot of workflow execution state.
///
/// `thread_id` groups the checkpoints of one workflow; `next_nodes` names
/// the nodes scheduled to run next and is non-empty while the workflow is
/// paused at an interrupt. The payload is opaque bytes; see
/// [`crate::payload`] for the envelope the runtime uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Workflow thread this checkpoint belongs to.
    pub thread_id: String,

    /// Unique checkpoint identifier within the thread.
    pub checkpoint_id: String,

    /// Advisory parent linkage for history traversal.
    pub parent_id: Option<String>,

    /// Write timestamp.
    pub created_at: DateTime<Utc>,

    /// Opaque serialized state.
    pub payload: Vec<u8>,

    /// Nodes to execute next; empty at a terminal checkpoint.
    pub next_nodes: Vec<String>,
}

impl Checkpoint {
    /// Create a new checkpoint with a generated id.
    pub fn new(thread_id: impl Into<String>, payload: Vec<u8>, next_nodes: Vec<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: Uuid::new_v4().to_string(),
            parent_id: None,
            created_at: Utc::now(),
            payload,
            next_nodes,
        }
    }

    /// Link this checkpoint to its predecessor.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// True when no nodes remain to execute.
    pub fn is_terminal(&self) -> bool {
        self.next_nodes.is_empty()
    }
}

//! Node definitions and the execution context handed to handlers.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a node is, for introspection and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Invokes a driver-backed agent.
    Agent,
    /// Evaluates state and writes routing inputs.
    Router,
    /// Consumes a human resume command.
    Approval,
    /// Structural node with no effect.
    Noop,
}

/// Result of one node execution.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// Merge these updates and continue along the node's edges.
    Advance(Value),

    /// Pause here. `updates` is merged and persisted so the re-run can
    /// detect work already done; `payload` describes what is being asked
    /// of the human.
    Interrupt { updates: Value, payload: Value },
}

impl NodeOutcome {
    /// Advance with no state changes.
    pub fn empty() -> Self {
        Self::Advance(serde_json::json!({}))
    }
}

/// Decision returned by [`NodeContext::interrupt`].
#[derive(Debug, Clone)]
pub enum InterruptDecision {
    /// A queued resume value matched this interrupt call.
    Resumed(Value),
    /// No resume value is queued; the node should return
    /// [`NodeOutcome::Interrupt`] with this payload.
    Pending(Value),
}

struct ResumeCursor {
    values: Vec<Value>,
    index: usize,
}

/// Per-visit execution context for a node.
///
/// Holds the queued resume values for the current node visit and the
/// workflow's cancellation token. Node code must be deterministic up to
/// each interrupt call so a re-entered node consumes the same resume
/// values in the same order.
pub struct NodeContext {
    /// Workflow being executed.
    pub workflow_id: Uuid,

    /// Node being executed.
    pub node_id: String,

    /// Cancellation flag; observed at every await point.
    pub cancel: CancellationToken,

    resume: Mutex<ResumeCursor>,
}

impl NodeContext {
    pub fn new(
        workflow_id: Uuid,
        node_id: impl Into<String>,
        resume_values: Vec<Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            node_id: node_id.into(),
            cancel,
            resume: Mutex::new(ResumeCursor {
                values: resume_values,
                index: 0,
            }),
        }
    }

    /// Match this interrupt call against the queued resume values.
    ///
    /// The i-th call during a node visit consumes the i-th queued value.
    /// When the queue is exhausted the call is pending and the node should
    /// surface [`NodeOutcome::Interrupt`].
    pub fn interrupt(&self, payload: Value) -> InterruptDecision {
        let mut cursor = self.resume.lock();
        if cursor.index < cursor.values.len() {
            let value = cursor.values[cursor.index].clone();
            cursor.index += 1;
            InterruptDecision::Resumed(value)
        } else {
            InterruptDecision::Pending(payload)
        }
    }

    /// Number of resume values consumed so far in this visit.
    pub fn resumes_consumed(&self) -> usize {
        self.resume.lock().index
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("workflow_id", &self.workflow_id)
            .field("node_id", &self.node_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Behavior of a graph node.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute the node against a snapshot of the state.
    ///
    /// Returned updates are merged by the runtime through the state
    /// schema; handlers never mutate shared state directly.
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome>;
}

/// A node in the graph: identity, kind and behavior.
#[derive(Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub handler: Arc<dyn NodeHandler>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            id: id.into(),
            kind,
            handler,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

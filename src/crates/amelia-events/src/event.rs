//! Workflow event types.
//!
//! Events are insert-only records ordered per workflow by a monotonic
//! `sequence` assigned at publish time. Constructor helpers cover the
//! common shapes so call sites stay terse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verbosity level of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Debug,
    Trace,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for EventLevel {
    fn from(s: &str) -> Self {
        match s {
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

/// Family grouping for event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFamily {
    Lifecycle,
    Stage,
    Approval,
    Artifact,
    Driver,
}

/// Concrete event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Lifecycle
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    // Stage
    StageStarted,
    StageCompleted,
    // Approval
    ApprovalRequired,
    ApprovalGranted,
    ApprovalRejected,
    // Artifact
    FileCreated,
    FileModified,
    FileDeleted,
    // Driver telemetry
    AgentMessage,
    ToolCall,
    ToolResult,
    TokenUsage,
}

impl EventType {
    pub fn family(&self) -> EventFamily {
        match self {
            Self::WorkflowStarted
            | Self::WorkflowCompleted
            | Self::WorkflowFailed
            | Self::WorkflowCancelled => EventFamily::Lifecycle,
            Self::StageStarted | Self::StageCompleted => EventFamily::Stage,
            Self::ApprovalRequired | Self::ApprovalGranted | Self::ApprovalRejected => {
                EventFamily::Approval
            }
            Self::FileCreated | Self::FileModified | Self::FileDeleted => EventFamily::Artifact,
            Self::AgentMessage | Self::ToolCall | Self::ToolResult | Self::TokenUsage => {
                EventFamily::Driver
            }
        }
    }

    /// True for the exactly-once terminal lifecycle events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowCancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::StageStarted => "stage_started",
            Self::StageCompleted => "stage_completed",
            Self::ApprovalRequired => "approval_required",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalRejected => "approval_rejected",
            Self::FileCreated => "file_created",
            Self::FileModified => "file_modified",
            Self::FileDeleted => "file_deleted",
            Self::AgentMessage => "agent_message",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::TokenUsage => "token_usage",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single workflow event.
///
/// `sequence` is 0 until the bus assigns it at publish time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique event identifier
    pub event_id: Uuid,

    /// Workflow this event belongs to
    pub workflow_id: Uuid,

    /// Monotonic per-workflow sequence, assigned at publish
    pub sequence: u64,

    /// Emission timestamp
    pub timestamp: DateTime<Utc>,

    /// Verbosity level
    pub level: EventLevel,

    /// Agent that produced the event, if any
    pub agent: Option<String>,

    /// Event type
    pub event_type: EventType,

    /// Human-readable message
    pub message: String,

    /// Structured payload
    pub data: Option<serde_json::Value>,

    /// Correlation id across related events
    pub trace_id: Option<String>,

    /// Parent event id for nested telemetry
    pub parent_id: Option<String>,
}

impl Event {
    /// Create a new unsequenced event.
    pub fn new(workflow_id: Uuid, event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            workflow_id,
            sequence: 0,
            timestamp: Utc::now(),
            level: EventLevel::Info,
            agent: None,
            event_type,
            message: message.into(),
            data: None,
            trace_id: None,
            parent_id: None,
        }
    }

    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    // Lifecycle helpers

    pub fn workflow_started(workflow_id: Uuid) -> Self {
        Self::new(workflow_id, EventType::WorkflowStarted, "Workflow started")
    }

    pub fn workflow_completed(workflow_id: Uuid) -> Self {
        Self::new(workflow_id, EventType::WorkflowCompleted, "Workflow completed")
    }

    pub fn workflow_failed(workflow_id: Uuid, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            workflow_id,
            EventType::WorkflowFailed,
            format!("Workflow failed: {}", reason),
        )
        .with_data(serde_json::json!({ "reason": reason }))
    }

    pub fn workflow_cancelled(workflow_id: Uuid) -> Self {
        Self::new(workflow_id, EventType::WorkflowCancelled, "Workflow cancelled")
    }

    // Stage helpers

    pub fn stage_started(workflow_id: Uuid, node: &str) -> Self {
        Self::new(
            workflow_id,
            EventType::StageStarted,
            format!("Stage started: {}", node),
        )
        .with_agent(node)
        .with_data(serde_json::json!({ "node": node }))
    }

    pub fn stage_completed(workflow_id: Uuid, node: &str) -> Self {
        Self::new(
            workflow_id,
            EventType::StageCompleted,
            format!("Stage completed: {}", node),
        )
        .with_agent(node)
        .with_data(serde_json::json!({ "node": node }))
    }

    // Approval helpers

    pub fn approval_required(workflow_id: Uuid, node: &str, payload: serde_json::Value) -> Self {
        Self::new(
            workflow_id,
            EventType::ApprovalRequired,
            format!("Approval required at {}", node),
        )
        .with_agent(node)
        .with_data(serde_json::json!({ "node": node, "payload": payload }))
    }

    pub fn approval_granted(workflow_id: Uuid, node: &str) -> Self {
        Self::new(
            workflow_id,
            EventType::ApprovalGranted,
            format!("Approval granted at {}", node),
        )
        .with_agent(node)
        .with_data(serde_json::json!({ "node": node }))
    }

    pub fn approval_rejected(workflow_id: Uuid, node: &str, feedback: Option<&str>) -> Self {
        Self::new(
            workflow_id,
            EventType::ApprovalRejected,
            format!("Approval rejected at {}", node),
        )
        .with_agent(node)
        .with_data(serde_json::json!({ "node": node, "feedback": feedback }))
    }

    /// Short description used when logging through `tracing`.
    pub fn description(&self) -> String {
        match &self.agent {
            Some(agent) => format!("[{}] {} ({})", agent, self.message, self.event_type),
            None => format!("{} ({})", self.message, self.event_type),
        }
    }
}

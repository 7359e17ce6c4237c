//! Workflow record and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow lifecycle status. Terminal statuses are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Accepted, waiting for a concurrency slot.
    Pending,
    /// A runtime segment is executing nodes.
    InProgress,
    /// Paused at an interrupt, waiting on a human.
    Blocked,
    /// Reached END.
    Completed,
    /// A node or checkpoint write failed.
    Failed,
    /// Cancelled by the operator (or aborted at a blocker).
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Active statuses hold the worktree lock.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::Blocked)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for WorkflowStatus {
    fn from(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "blocked" => Self::Blocked,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// One orchestration run for a tracker issue against a worktree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier.
    pub id: Uuid,

    /// Tracker-defined issue reference.
    pub issue_id: String,

    /// Absolute path of the working copy; the mutual-exclusion key.
    pub worktree_path: String,

    /// Lifecycle status.
    pub status: WorkflowStatus,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Populated when status is failed.
    pub failure_reason: Option<String>,

    /// Configuration profile used for this run.
    pub profile_id: String,

    /// Cached issue JSON, fetched at submit.
    pub issue_cache: Option<String>,

    /// Cached plan JSON, written when the architect produces one.
    pub plan_cache: Option<String>,
}

impl Workflow {
    pub fn new(
        issue_id: impl Into<String>,
        worktree_path: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id: issue_id.into(),
            worktree_path: worktree_path.into(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
            profile_id: profile_id.into(),
            issue_cache: None,
            plan_cache: None,
        }
    }
}

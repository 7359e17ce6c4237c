//! Agent-signalled blockers.
//!
//! A blocker is not an error: the driver completed, but the agent hit a
//! situation that needs human input. The workflow transitions to
//! `blocked` and the approval loop takes over.

use serde::{Deserialize, Serialize};

/// Why the developer stage stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    CommandFailed,
    ValidationFailed,
    NeedsJudgment,
    UnexpectedState,
    DependencySkipped,
}

impl BlockerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandFailed => "command_failed",
            Self::ValidationFailed => "validation_failed",
            Self::NeedsJudgment => "needs_judgment",
            Self::UnexpectedState => "unexpected_state",
            Self::DependencySkipped => "dependency_skipped",
        }
    }
}

/// A situation requiring human input, recorded while `status = blocked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub step_id: String,
    pub step_description: String,
    pub blocker_type: BlockerType,
    pub error_message: String,

    #[serde(default)]
    pub attempted_actions: Vec<String>,

    #[serde(default)]
    pub suggested_resolutions: Vec<String>,
}

impl Blocker {
    pub fn new(
        step_id: impl Into<String>,
        step_description: impl Into<String>,
        blocker_type: BlockerType,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_description: step_description.into(),
            blocker_type,
            error_message: error_message.into(),
            attempted_actions: Vec::new(),
            suggested_resolutions: Vec::new(),
        }
    }

    pub fn with_attempted(mut self, actions: Vec<String>) -> Self {
        self.attempted_actions = actions;
        self
    }

    pub fn with_suggestions(mut self, resolutions: Vec<String>) -> Self {
        self.suggested_resolutions = resolutions;
        self
    }
}

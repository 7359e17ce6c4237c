//! Domain model for the orchestration engine.

pub mod blocker;
pub mod issue;
pub mod plan;
pub mod profile;
pub mod review;
pub mod token_usage;
pub mod workflow;

pub use blocker::{Blocker, BlockerType};
pub use issue::{Issue, Tracker};
pub use plan::{
    ActionType, Batch, BatchResult, Plan, RiskLevel, Step, StepResult, StepStatus,
};
pub use profile::{Profile, SandboxSettings};
pub use review::{ReviewResult, ReviewStatus};
pub use token_usage::TokenUsageRecord;
pub use workflow::{Workflow, WorkflowStatus};

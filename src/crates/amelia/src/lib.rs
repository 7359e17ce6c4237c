//! Amelia: a local agentic coding orchestrator engine.
//!
//! Given a tracker issue and a working repository, Amelia drives a
//! multi-agent pipeline (Architect → human approval → Developer →
//! Reviewer) to produce, critique and land code changes. Workflows run
//! concurrently against isolated worktrees, checkpoint after every node,
//! survive restarts, and pause at human approval gates.
//!
//! This crate is the engine root. The HTTP/WebSocket surface, dashboard
//! and CLI are separate consumers of the library-level API exposed by
//! [`Engine`] and [`scheduler::WorkflowScheduler`]:
//! `submit`, `approve`, `reject`, `cancel`, `update_state`, `replan`,
//! `snapshot`, `history`, `subscribe`.
//!
//! ```rust,ignore
//! use amelia::{Engine, EngineConfig, Profile, SubmitRequest};
//!
//! let engine = Engine::builder()
//!     .with_config(EngineConfig::from_env())
//!     .with_database_path("~/.amelia/amelia.db")
//!     .with_profile(Profile::new("default", "claude-cli", "github"))
//!     .with_tracker("github", github_tracker)
//!     .with_drivers(drivers)
//!     .build()
//!     .await?;
//! engine.recover().await?;
//!
//! let workflow = engine
//!     .submit(SubmitRequest {
//!         issue_ref: "PROJ-42".into(),
//!         worktree_path: "/work/proj-42".into(),
//!         profile_id: "default".into(),
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod repositories;
pub mod scheduler;
pub mod state;
pub mod testing;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{AmeliaError, Result};
pub use models::{
    ActionType, Batch, Blocker, BlockerType, Issue, Plan, Profile, ReviewResult, ReviewStatus,
    RiskLevel, Step, StepResult, StepStatus, TokenUsageRecord, Tracker, Workflow, WorkflowStatus,
};
pub use scheduler::{OpOutcome, SubmitRequest, WorkflowScheduler};

//! Pipeline execution state: field names, merge schema and typed access.
//!
//! The graph runtime works over a JSON object; this module declares which
//! fields the agent pipeline uses, how each one merges, and provides a
//! typed view for node code.

use crate::error::{AmeliaError, Result};
use crate::models::{Blocker, Issue, Plan, ReviewResult, StepResult};
use crate::models::profile::Profile;
use amelia_drivers::TrustLevel;
use amelia_graph::{AppendReducer, StateSchema};
use serde_json::{json, Value};
use uuid::Uuid;

/// State field names.
pub mod fields {
    pub const WORKFLOW_ID: &str = "workflow_id";
    pub const ISSUE: &str = "issue";
    pub const PROFILE: &str = "profile";
    pub const PLAN: &str = "plan";
    pub const CURRENT_NODE: &str = "current_node";
    pub const BATCH_INDEX: &str = "batch_index";
    pub const BATCH_RESULTS: &str = "batch_results";
    pub const STEP_RESULTS: &str = "step_results";
    pub const BLOCKER: &str = "blocker";
    pub const BLOCKER_RESOLUTION: &str = "blocker_resolution";
    pub const RESOLVED_STEPS: &str = "resolved_steps";
    pub const SKIPPED_STEPS: &str = "skipped_steps";
    pub const APPROVALS: &str = "approvals";
    pub const TOKEN_USAGE: &str = "token_usage";
    pub const MESSAGES: &str = "messages";
    pub const RECORDED_TOOL_CALLS: &str = "recorded_tool_calls";
    pub const PLAN_VALID: &str = "plan_valid";
    pub const PLAN_VALIDATION_ATTEMPTS: &str = "plan_validation_attempts";
    pub const VALIDATION_ERRORS: &str = "validation_errors";
    pub const LAST_APPROVAL: &str = "last_approval";
    pub const REVIEW: &str = "review";
    pub const REVISION_ROUND: &str = "revision_round";
}

/// The merge schema for pipeline state. List-shaped history fields
/// append; everything else replaces.
pub fn build_schema() -> StateSchema {
    let mut schema = StateSchema::new();
    for field in [
        fields::BATCH_RESULTS,
        fields::STEP_RESULTS,
        fields::SKIPPED_STEPS,
        fields::RESOLVED_STEPS,
        fields::APPROVALS,
        fields::TOKEN_USAGE,
        fields::MESSAGES,
        fields::RECORDED_TOOL_CALLS,
    ] {
        schema.add_field(field, Box::new(AppendReducer));
    }
    schema
}

/// The initial state seeded at submit.
pub fn initial_state(workflow_id: Uuid, issue: &Issue, profile: &Profile, worktree: &str) -> Value {
    json!({
        "workflow_id": workflow_id,
        "issue": issue,
        "profile": {
            "id": profile.id,
            "driver": profile.driver,
            "trust_level": profile.trust_level,
            "agent_models": profile.agent_models,
            "worktree": worktree,
        },
        "batch_index": 0,
        "revision_round": 0,
        "plan_validation_attempts": 0,
        "batch_results": [],
        "step_results": [],
        "skipped_steps": [],
        "resolved_steps": [],
        "approvals": [],
        "token_usage": [],
        "messages": [],
        "recorded_tool_calls": [],
        "blocker": null,
    })
}

/// Read-only typed view over the JSON state.
pub struct StateView<'a> {
    state: &'a Value,
}

impl<'a> StateView<'a> {
    pub fn new(state: &'a Value) -> Self {
        Self { state }
    }

    fn field<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .state
            .get(name)
            .cloned()
            .ok_or_else(|| AmeliaError::Invalid(format!("state field missing: {}", name)))?;
        serde_json::from_value(value)
            .map_err(|e| AmeliaError::Invalid(format!("state field {}: {}", name, e)))
    }

    fn optional_field<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.state.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| AmeliaError::Invalid(format!("state field {}: {}", name, e))),
        }
    }

    pub fn issue(&self) -> Result<Issue> {
        self.field(fields::ISSUE)
    }

    pub fn plan(&self) -> Result<Plan> {
        self.field(fields::PLAN)
    }

    pub fn maybe_plan(&self) -> Result<Option<Plan>> {
        self.optional_field(fields::PLAN)
    }

    pub fn blocker(&self) -> Result<Option<Blocker>> {
        self.optional_field(fields::BLOCKER)
    }

    pub fn review(&self) -> Result<Option<ReviewResult>> {
        self.optional_field(fields::REVIEW)
    }

    pub fn step_results(&self) -> Result<Vec<StepResult>> {
        self.optional_field(fields::STEP_RESULTS)
            .map(Option::unwrap_or_default)
    }

    pub fn batch_index(&self) -> usize {
        self.state[fields::BATCH_INDEX].as_u64().unwrap_or(0) as usize
    }

    pub fn revision_round(&self) -> u32 {
        self.state[fields::REVISION_ROUND].as_u64().unwrap_or(0) as u32
    }

    pub fn plan_validation_attempts(&self) -> u32 {
        self.state[fields::PLAN_VALIDATION_ATTEMPTS]
            .as_u64()
            .unwrap_or(0) as u32
    }

    pub fn plan_valid(&self) -> bool {
        self.state[fields::PLAN_VALID].as_bool().unwrap_or(false)
    }

    pub fn skipped_steps(&self) -> Vec<String> {
        string_list(&self.state[fields::SKIPPED_STEPS])
    }

    pub fn resolved_steps(&self) -> Vec<String> {
        string_list(&self.state[fields::RESOLVED_STEPS])
    }

    pub fn trust_level(&self) -> TrustLevel {
        self.state[fields::PROFILE]["trust_level"]
            .as_str()
            .map(TrustLevel::from)
            .unwrap_or_default()
    }

    pub fn driver_name(&self) -> Result<String> {
        self.state[fields::PROFILE]["driver"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AmeliaError::Invalid("state profile missing driver".to_string()))
    }

    pub fn worktree(&self) -> Option<&str> {
        self.state[fields::PROFILE]["worktree"].as_str()
    }

    pub fn model_for(&self, agent: &str) -> Option<String> {
        self.state[fields::PROFILE]["agent_models"][agent]
            .as_str()
            .map(String::from)
    }

    /// Feedback messages accumulated for the architect (rejections and
    /// review comments), newest last.
    pub fn feedback_messages(&self) -> Vec<String> {
        self.state[fields::MESSAGES]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m["role"] == "feedback")
                    .filter_map(|m| m["content"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

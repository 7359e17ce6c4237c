//! Shared harness for engine integration tests.

#![allow(dead_code)]

use amelia::testing::{ScriptedInvoker, ScriptedResponse, StaticTracker};
use amelia::{Engine, EngineConfig, Issue, Profile, SubmitRequest, Workflow, WorkflowStatus};
use amelia_drivers::TrustLevel;
use amelia_events::{Event, EventType};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const ISSUE_REF: &str = "ISSUE-1";

/// Engine plus the scripted invoker driving it.
pub struct Harness {
    pub engine: Engine,
    pub invoker: Arc<ScriptedInvoker>,
}

impl Harness {
    pub async fn new(trust: TrustLevel) -> Self {
        Self::with_config(trust, EngineConfig::default(), None).await
    }

    pub async fn with_config(
        trust: TrustLevel,
        config: EngineConfig,
        database_path: Option<std::path::PathBuf>,
    ) -> Self {
        let invoker = Arc::new(ScriptedInvoker::new());
        let tracker = StaticTracker::new().with_issue(
            ISSUE_REF,
            Issue::new(ISSUE_REF, "Fix the flaky widget").with_description("It wobbles."),
        );

        let mut builder = Engine::builder()
            .with_config(config)
            .with_profile(
                Profile::new("default", "scripted", "static").with_trust_level(trust),
            )
            .with_tracker("static", Arc::new(tracker))
            .with_invoker(invoker.clone());
        if let Some(path) = database_path {
            builder = builder.with_database_path(path);
        }

        Self {
            engine: builder.build().await.expect("engine builds"),
            invoker,
        }
    }

    pub async fn submit(&self, worktree: &str) -> Workflow {
        self.engine
            .submit(SubmitRequest {
                issue_ref: ISSUE_REF.to_string(),
                worktree_path: worktree.to_string(),
                profile_id: "default".to_string(),
            })
            .await
            .expect("submit succeeds")
    }

    /// Poll until the workflow reaches the expected status.
    pub async fn wait_for_status(&self, workflow_id: Uuid, status: WorkflowStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = self
                .engine
                .scheduler()
                .get(workflow_id)
                .await
                .expect("workflow lookup")
                .expect("workflow exists")
                .status;
            if current == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {:?}, workflow is {:?}",
                status,
                current
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the workflow has raised `n` approval requests and is
    /// blocked on the latest one. Use this before resuming a pause that
    /// follows an earlier pause, where polling the status alone could
    /// observe the stale `blocked`.
    pub async fn wait_for_approvals(&self, workflow_id: Uuid, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.count_events(workflow_id, EventType::ApprovalRequired) < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for approval request #{}",
                n
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.wait_for_status(workflow_id, WorkflowStatus::Blocked).await;
    }

    /// All events held for a workflow, oldest first.
    pub fn events(&self, workflow_id: Uuid) -> Vec<Event> {
        self.engine.bus().backfill(workflow_id, 0).events
    }

    pub fn count_events(&self, workflow_id: Uuid, event_type: EventType) -> usize {
        self.events(workflow_id)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Stage events of a given type for a specific node.
    pub fn count_stage_events(
        &self,
        workflow_id: Uuid,
        event_type: EventType,
        node: &str,
    ) -> usize {
        self.events(workflow_id)
            .iter()
            .filter(|e| e.event_type == event_type && e.agent.as_deref() == Some(node))
            .count()
    }
}

/// Architect output: a single-batch plan with a code step and a command
/// step.
pub fn two_step_plan() -> Value {
    json!({
        "goal": "fix the widget",
        "batches": [{
            "batch_number": 1,
            "risk_summary": "low",
            "description": "implement and verify",
            "steps": [
                {
                    "id": "s1",
                    "description": "patch the widget",
                    "action_type": "code",
                    "file_path": "src/widget.rs",
                    "risk_level": "low",
                },
                {
                    "id": "s2",
                    "description": "run the tests",
                    "action_type": "command",
                    "command": "cargo test",
                    "risk_level": "low",
                },
            ],
        }],
        "tdd_approach": "tests with the change",
        "total_estimated_minutes": 15,
    })
}

/// A plan with a three-step dependency chain s1 <- s2 <- s3.
pub fn chained_plan() -> Value {
    json!({
        "goal": "chained work",
        "batches": [{
            "batch_number": 1,
            "risk_summary": "low",
            "description": "chain",
            "steps": [
                {"id": "s1", "description": "first", "action_type": "command", "command": "step one"},
                {"id": "s2", "description": "second", "action_type": "command", "command": "step two", "depends_on": ["s1"]},
                {"id": "s3", "description": "third", "action_type": "command", "command": "step three", "depends_on": ["s2"]},
            ],
        }],
        "total_estimated_minutes": 5,
    })
}

pub fn approved_review() -> ScriptedResponse {
    ScriptedResponse::output(json!({
        "status": "approved",
        "summary": "matches the plan",
        "comments": [],
    }))
}

pub fn revision_review(comment: &str) -> ScriptedResponse {
    ScriptedResponse::output(json!({
        "status": "revision_requested",
        "summary": "needs work",
        "comments": [comment],
    }))
}

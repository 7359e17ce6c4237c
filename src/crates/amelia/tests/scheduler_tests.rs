//! Scheduler behavior: admission, concurrency, cancellation and
//! terminal-state laws.

mod common;

use amelia::testing::ScriptedResponse;
use amelia::{AmeliaError, EngineConfig, OpOutcome, WorkflowStatus};
use amelia_drivers::TrustLevel;
use amelia_events::EventType;
use common::{approved_review, two_step_plan, Harness};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn worktree_contention_rejects_second_submission() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));

    let first = harness.submit("/w/a").await;
    harness
        .wait_for_status(first.id, WorkflowStatus::Blocked)
        .await;

    // Same worktree while the first workflow is active: rejected, no
    // record created.
    let err = harness
        .engine
        .submit(amelia::SubmitRequest {
            issue_ref: common::ISSUE_REF.to_string(),
            worktree_path: "/w/a".to_string(),
            profile_id: "default".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AmeliaError::WorktreeBusy(_)));
    assert_eq!(harness.engine.scheduler().list().await.unwrap().len(), 1);

    // A different worktree is fine.
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));
    let second = harness.submit("/w/b").await;
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn concurrency_cap_holds_and_frees() {
    let config = EngineConfig::default().with_max_concurrent(2);
    let harness = Harness::with_config(TrustLevel::Autonomous, config, None).await;

    // Three slow planning invocations so workflows linger in progress.
    for _ in 0..3 {
        harness.invoker.push(
            "architect",
            ScriptedResponse::output(two_step_plan()).with_delay(Duration::from_secs(30)),
        );
    }

    let w1 = harness.submit("/w/a").await;
    let w2 = harness.submit("/w/b").await;
    let w3 = harness.submit("/w/c").await;

    harness.wait_for_status(w1.id, WorkflowStatus::InProgress).await;
    harness.wait_for_status(w2.id, WorkflowStatus::InProgress).await;

    // The third stays pending while both slots are taken.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let w3_status = harness
        .engine
        .scheduler()
        .get(w3.id)
        .await
        .unwrap()
        .unwrap()
        .status;
    assert_eq!(w3_status, WorkflowStatus::Pending);

    // Terminating one frees the slot for the third.
    harness.engine.cancel(w1.id).await.unwrap();
    harness.wait_for_status(w1.id, WorkflowStatus::Cancelled).await;
    harness.wait_for_status(w3.id, WorkflowStatus::InProgress).await;
}

#[tokio::test]
async fn cancel_pending_workflow_emits_one_terminal_event() {
    let config = EngineConfig::default().with_max_concurrent(1);
    let harness = Harness::with_config(TrustLevel::Autonomous, config, None).await;

    harness.invoker.push(
        "architect",
        ScriptedResponse::output(two_step_plan()).with_delay(Duration::from_secs(30)),
    );

    let running = harness.submit("/w/a").await;
    harness
        .wait_for_status(running.id, WorkflowStatus::InProgress)
        .await;

    // Queued behind the single slot.
    let queued = harness.submit("/w/b").await;
    assert_eq!(
        harness
            .engine
            .scheduler()
            .get(queued.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        WorkflowStatus::Pending
    );

    harness.engine.cancel(queued.id).await.unwrap();
    harness
        .wait_for_status(queued.id, WorkflowStatus::Cancelled)
        .await;

    let events = harness.events(queued.id);
    let terminal = events.iter().filter(|e| e.event_type.is_terminal()).count();
    assert_eq!(terminal, 1);
    assert_eq!(
        harness.count_events(queued.id, EventType::WorkflowCancelled),
        1
    );
    // Never started, so no workflow_started either.
    assert_eq!(harness.count_events(queued.id, EventType::WorkflowStarted), 0);

    // Cancelling again is a no-op.
    let outcome = harness.engine.cancel(queued.id).await.unwrap();
    assert!(matches!(outcome, OpOutcome::NotApplicable { .. }));
}

#[tokio::test]
async fn cancel_blocked_workflow_finalizes_immediately() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));

    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Blocked)
        .await;

    harness.engine.cancel(workflow.id).await.unwrap();
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Cancelled)
        .await;
    assert_eq!(
        harness.count_events(workflow.id, EventType::WorkflowCancelled),
        1
    );
}

#[tokio::test]
async fn double_approve_advances_exactly_once() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));
    harness
        .invoker
        .push("developer", ScriptedResponse::output(json!("patched")));
    harness
        .invoker
        .push("developer", ScriptedResponse::command(0, "ok"));
    harness.invoker.push("reviewer", approved_review());

    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Blocked)
        .await;

    let first = harness.engine.approve(workflow.id, None).await.unwrap();
    let second = harness.engine.approve(workflow.id, None).await.unwrap();
    assert_eq!(first, OpOutcome::Accepted);
    assert!(matches!(second, OpOutcome::NotApplicable { .. }));

    harness
        .wait_for_status(workflow.id, WorkflowStatus::Completed)
        .await;
    assert_eq!(
        harness.count_events(workflow.id, EventType::ApprovalGranted),
        1
    );
    assert_eq!(
        harness.count_stage_events(workflow.id, EventType::StageStarted, "developer"),
        1
    );
}

#[tokio::test]
async fn terminal_statuses_are_absorbing() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));
    harness
        .invoker
        .push("developer", ScriptedResponse::output(json!("patched")));
    harness
        .invoker
        .push("developer", ScriptedResponse::command(0, "ok"));
    harness.invoker.push("reviewer", approved_review());

    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Blocked)
        .await;
    harness.engine.approve(workflow.id, None).await.unwrap();
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Completed)
        .await;

    let events_before = harness.events(workflow.id).len();

    for outcome in [
        harness.engine.approve(workflow.id, None).await.unwrap(),
        harness.engine.reject(workflow.id, "no").await.unwrap(),
        harness.engine.cancel(workflow.id).await.unwrap(),
        harness
            .engine
            .update_state(workflow.id, json!({"note": "x"}))
            .await
            .unwrap(),
        harness.engine.replan(workflow.id).await.unwrap(),
    ] {
        assert!(matches!(outcome, OpOutcome::NotApplicable { .. }));
    }

    // No further events were emitted; snapshot and history still work.
    assert_eq!(harness.events(workflow.id).len(), events_before);
    assert!(harness.engine.snapshot(workflow.id).await.is_ok());
    assert!(!harness.engine.history(workflow.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn driver_failure_fails_the_workflow() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    // No scripted architect response: the invoker errors out.

    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Failed)
        .await;

    let record = harness
        .engine
        .scheduler()
        .get(workflow.id)
        .await
        .unwrap()
        .unwrap();
    assert!(record
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("architect"));
    assert_eq!(
        harness.count_events(workflow.id, EventType::WorkflowFailed),
        1
    );
}

#[tokio::test]
async fn replan_after_failure_restarts_from_architect() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    // First run fails (no scripted response), then replan succeeds.
    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Failed)
        .await;

    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));
    let outcome = harness.engine.replan(workflow.id).await.unwrap();
    assert_eq!(outcome, OpOutcome::Accepted);

    harness
        .wait_for_status(workflow.id, WorkflowStatus::Blocked)
        .await;
    assert_eq!(harness.invoker.call_count("architect"), 2);
}

#[tokio::test]
async fn blocker_abort_cancels_the_workflow() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));
    harness
        .invoker
        .push("developer", ScriptedResponse::output(json!("patched")));
    // s2 fails, raising a blocker.
    harness
        .invoker
        .push("developer", ScriptedResponse::command(2, "tests exploded"));

    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Blocked)
        .await;
    harness.engine.approve(workflow.id, None).await.unwrap();
    harness.wait_for_approvals(workflow.id, 2).await;

    harness
        .engine
        .approve(workflow.id, Some(json!({"action": "abort"})))
        .await
        .unwrap();
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Cancelled)
        .await;
    assert_eq!(
        harness.count_events(workflow.id, EventType::WorkflowCancelled),
        1
    );
}

#[tokio::test]
async fn usage_rows_are_recorded_per_invocation() {
    let harness = Harness::new(TrustLevel::Autonomous).await;
    harness
        .invoker
        .push("architect", ScriptedResponse::output(two_step_plan()));
    harness
        .invoker
        .push("developer", ScriptedResponse::output(json!("patched")));
    harness
        .invoker
        .push("developer", ScriptedResponse::command(0, "ok"));
    harness.invoker.push("reviewer", approved_review());

    let workflow = harness.submit("/w/a").await;
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Blocked)
        .await;
    harness.engine.approve(workflow.id, None).await.unwrap();
    harness
        .wait_for_status(workflow.id, WorkflowStatus::Completed)
        .await;

    let summary = harness.engine.usage().summary(workflow.id).await.unwrap();
    // architect + 2 developer steps + reviewer
    assert_eq!(summary.invocations, 4);
    assert_eq!(summary.input_tokens, 400);
    assert_eq!(summary.output_tokens, 80);
}

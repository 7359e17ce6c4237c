//! Workflow scheduler: admission, concurrency, lifecycle operations.
//!
//! Each workflow runs as a sequence of *segments*: a spawned task that
//! acquires a slot from the global semaphore, enters the graph runtime,
//! and ends when the workflow completes, pauses at an interrupt, fails
//! or is cancelled. Blocked workflows hold no slot: they wait on a
//! human, and `approve`/`reject`/`replan` launch the next segment.
//!
//! Admission rules:
//! - at most `max_concurrent` workflows are `in_progress` (semaphore);
//! - at most one workflow per worktree is `in_progress` or `blocked`
//!   (checked at submit, enforced by the partial unique index);
//! - pending workflows start in submission order (the semaphore queue is
//!   FIFO and segments are spawned at submit time).
//!
//! Operations on workflows in an inapplicable state return
//! [`OpOutcome::NotApplicable`] rather than an error.

use crate::config::EngineConfig;
use crate::error::{AmeliaError, Result};
use crate::events::EventRecorder;
use crate::models::{Profile, Tracker, Workflow, WorkflowStatus};
use crate::pipeline::nodes;
use crate::repositories::{EventRepository, WorkflowRepository};
use crate::state::{fields, initial_state};
use amelia_checkpoint::{Checkpoint, Checkpointer};
use amelia_events::{Event, EventSink, StreamItem, SubscriptionFilter};
use amelia_graph::{Command, GraphRuntime, RunFrame, RunOutcome, RunRequest};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A submission request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Tracker-defined issue reference.
    pub issue_ref: String,

    /// Absolute worktree path; the mutual-exclusion key.
    pub worktree_path: String,

    /// Profile to run under.
    pub profile_id: String,
}

/// Result of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// The operation was applied.
    Accepted,
    /// The workflow was not in a state where the operation applies; the
    /// operation did nothing.
    NotApplicable {
        status: WorkflowStatus,
        operation: &'static str,
    },
}

struct Inner {
    config: EngineConfig,
    workflows: WorkflowRepository,
    events: Arc<EventRecorder>,
    event_log: EventRepository,
    runtime: Arc<GraphRuntime>,
    checkpointer: Arc<dyn Checkpointer>,
    profiles: HashMap<String, Profile>,
    trackers: HashMap<String, Arc<dyn Tracker>>,
    semaphore: Arc<Semaphore>,
    /// Live segment cancellation tokens, keyed by workflow. Presence
    /// means a segment task exists (possibly still queued on the
    /// semaphore).
    runs: Mutex<HashMap<Uuid, CancellationToken>>,
}

/// The workflow scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowScheduler {
    inner: Arc<Inner>,
}

impl WorkflowScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        workflows: WorkflowRepository,
        events: Arc<EventRecorder>,
        event_log: EventRepository,
        runtime: Arc<GraphRuntime>,
        checkpointer: Arc<dyn Checkpointer>,
        profiles: HashMap<String, Profile>,
        trackers: HashMap<String, Arc<dyn Tracker>>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                workflows,
                events,
                event_log,
                runtime,
                checkpointer,
                profiles,
                trackers,
                semaphore,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Admit a new workflow. Rejected synchronously with
    /// [`AmeliaError::WorktreeBusy`] when another workflow is active on
    /// the same worktree; no record is created in that case.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Workflow> {
        let inner = &self.inner;
        let profile = inner
            .profiles
            .get(&request.profile_id)
            .cloned()
            .ok_or_else(|| AmeliaError::Config(format!("unknown profile {}", request.profile_id)))?;
        let tracker = inner
            .trackers
            .get(&profile.tracker)
            .cloned()
            .ok_or_else(|| AmeliaError::Config(format!("unknown tracker {}", profile.tracker)))?;

        if inner
            .workflows
            .active_for_worktree(&request.worktree_path)
            .await?
            .is_some()
        {
            return Err(AmeliaError::WorktreeBusy(request.worktree_path));
        }

        let issue = tracker.fetch_issue(&request.issue_ref).await?;

        let mut workflow = Workflow::new(
            &request.issue_ref,
            &request.worktree_path,
            &request.profile_id,
        );
        workflow.issue_cache = Some(serde_json::to_string(&issue)?);
        inner.workflows.insert(&workflow).await?;

        let state = initial_state(workflow.id, &issue, &profile, &request.worktree_path);
        inner.runtime.seed(workflow.id, state).await?;

        info!(
            workflow_id = %workflow.id,
            issue = %request.issue_ref,
            worktree = %request.worktree_path,
            "workflow submitted"
        );
        self.spawn_segment(workflow.id, None);
        Ok(workflow)
    }

    /// Grant the pending approval and resume execution.
    pub async fn approve(&self, workflow_id: Uuid, payload: Option<Value>) -> Result<OpOutcome> {
        self.resume_with(workflow_id, Command::approve(payload), "approve", true, None)
            .await
    }

    /// Reject the pending approval with feedback and resume execution
    /// (the pipeline routes the feedback back to the architect).
    pub async fn reject(&self, workflow_id: Uuid, feedback: impl Into<String>) -> Result<OpOutcome> {
        let feedback = feedback.into();
        self.resume_with(
            workflow_id,
            Command::reject(feedback.clone()),
            "reject",
            false,
            Some(feedback),
        )
        .await
    }

    async fn resume_with(
        &self,
        workflow_id: Uuid,
        command: Command,
        operation: &'static str,
        granted: bool,
        feedback: Option<String>,
    ) -> Result<OpOutcome> {
        let workflow = self.require_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Blocked {
            return Ok(OpOutcome::NotApplicable {
                status: workflow.status,
                operation,
            });
        }

        let paused_node = self.paused_node(workflow_id).await;

        // A second approve while the resume segment is queued or running
        // is a no-op.
        if !self.reserve_segment(workflow_id) {
            return Ok(OpOutcome::NotApplicable {
                status: workflow.status,
                operation,
            });
        }

        let event = if granted {
            Event::approval_granted(workflow_id, &paused_node)
        } else {
            Event::approval_rejected(workflow_id, &paused_node, feedback.as_deref())
        };
        self.inner.events.emit(event).await;

        self.launch_segment(workflow_id, Some(command));
        Ok(OpOutcome::Accepted)
    }

    /// Raise the cancel flag. Pending and running workflows observe it
    /// at the next suspension point; blocked workflows finalize
    /// immediately.
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<OpOutcome> {
        let workflow = self.require_workflow(workflow_id).await?;
        if workflow.status.is_terminal() {
            return Ok(OpOutcome::NotApplicable {
                status: workflow.status,
                operation: "cancel",
            });
        }

        let token = self.inner.runs.lock().get(&workflow_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                // The segment may have passed its last flag check just as
                // the flag was raised (e.g. it was transitioning to
                // blocked). Once the segment slot frees, finalize if the
                // run did not.
                let deadline =
                    tokio::time::Instant::now() + std::time::Duration::from_secs(1);
                while self.inner.runs.lock().contains_key(&workflow_id)
                    && tokio::time::Instant::now() < deadline
                {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
                if !self.inner.runs.lock().contains_key(&workflow_id) {
                    self.finalize_cancelled(workflow_id).await;
                }
            }
            None => {
                // No live segment (blocked): finalize directly.
                self.finalize_cancelled(workflow_id).await;
            }
        }
        Ok(OpOutcome::Accepted)
    }

    /// Apply an external state patch. Permitted only while blocked; the
    /// patch may touch any field except `workflow_id`.
    pub async fn update_state(&self, workflow_id: Uuid, patch: Value) -> Result<OpOutcome> {
        let workflow = self.require_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Blocked {
            return Ok(OpOutcome::NotApplicable {
                status: workflow.status,
                operation: "update_state",
            });
        }
        if patch.get(fields::WORKFLOW_ID).is_some() {
            return Err(AmeliaError::Invalid(
                "workflow_id cannot be patched".to_string(),
            ));
        }
        if !patch.is_object() {
            return Err(AmeliaError::Invalid("patch must be an object".to_string()));
        }

        self.inner.runtime.patch_state(workflow_id, &patch).await?;
        Ok(OpOutcome::Accepted)
    }

    /// Restart planning: reset execution to the architect node and
    /// resume. Permitted while blocked or failed.
    pub async fn replan(&self, workflow_id: Uuid) -> Result<OpOutcome> {
        let workflow = self.require_workflow(workflow_id).await?;
        if !matches!(
            workflow.status,
            WorkflowStatus::Blocked | WorkflowStatus::Failed
        ) {
            return Ok(OpOutcome::NotApplicable {
                status: workflow.status,
                operation: "replan",
            });
        }
        if !self.reserve_segment(workflow_id) {
            return Ok(OpOutcome::NotApplicable {
                status: workflow.status,
                operation: "replan",
            });
        }

        if let Err(err) = self.inner.runtime.reset_to(workflow_id, nodes::ARCHITECT).await {
            self.release_segment(workflow_id);
            return Err(err.into());
        }
        // Failed workflows come back through pending so the segment's
        // terminal guard lets them run again.
        if let Err(err) = self.inner.workflows.reopen(workflow_id).await {
            self.release_segment(workflow_id);
            return Err(err);
        }
        info!(workflow_id = %workflow_id, "replanning from architect");
        self.launch_segment(workflow_id, None);
        Ok(OpOutcome::Accepted)
    }

    /// The current execution state.
    pub async fn snapshot(&self, workflow_id: Uuid) -> Result<Value> {
        self.require_workflow(workflow_id).await?;
        Ok(self.inner.runtime.snapshot(workflow_id).await?)
    }

    /// Checkpoint history, newest first.
    pub async fn history(&self, workflow_id: Uuid) -> Result<Vec<Checkpoint>> {
        self.require_workflow(workflow_id).await?;
        Ok(self
            .inner
            .checkpointer
            .list(&workflow_id.to_string())
            .await?)
    }

    /// Live event stream with optional backfill.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        since_sequence: Option<u64>,
    ) -> impl Stream<Item = StreamItem> + Send + 'static {
        self.inner.events.bus().subscribe(filter, since_sequence)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>> {
        self.inner.workflows.find_by_id(workflow_id).await
    }

    pub async fn list(&self) -> Result<Vec<Workflow>> {
        self.inner.workflows.list().await
    }

    /// Reconcile persisted workflows after a restart: re-enqueue
    /// `in_progress` runs from their latest checkpoints (re-emitting a
    /// `stage_completed` lost between a checkpoint write and its emit),
    /// re-admit `pending` ones, leave `blocked` ones waiting.
    pub async fn recover(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut resumed = 0;

        // Sequences continue from the persisted log: a restarted bus
        // would otherwise restart every workflow's sequence at 1.
        for status in [
            WorkflowStatus::InProgress,
            WorkflowStatus::Blocked,
            WorkflowStatus::Pending,
        ] {
            for workflow in inner.workflows.list_by_status(status).await? {
                let last = inner.event_log.max_sequence(workflow.id).await.unwrap_or(0);
                if last > 0 {
                    inner.events.bus().prime_sequence(workflow.id, last);
                }
            }
        }

        for workflow in inner
            .workflows
            .list_by_status(WorkflowStatus::InProgress)
            .await?
        {
            if self.inner.runs.lock().contains_key(&workflow.id) {
                continue;
            }
            self.replay_lost_stage_completed(workflow.id).await;
            self.spawn_segment(workflow.id, None);
            resumed += 1;
        }

        for workflow in inner
            .workflows
            .list_by_status(WorkflowStatus::Pending)
            .await?
        {
            if self.spawn_segment(workflow.id, None) {
                resumed += 1;
            }
        }

        info!(resumed, "restart recovery complete");
        Ok(resumed)
    }

    /// Purge checkpoints and log rows past their retention windows.
    /// A retention of 0 means "keep until explicit purge" and is
    /// skipped here.
    pub async fn purge_retention(&self) -> Result<(u64, u64)> {
        let inner = &self.inner;
        let mut checkpoints_removed = 0;
        let mut logs_removed = 0;

        if inner.config.checkpoint_retention_days > 0 {
            let cutoff =
                Utc::now() - chrono::Duration::days(inner.config.checkpoint_retention_days as i64);
            let threads = inner.workflows.terminal_ids_before(cutoff).await?;
            checkpoints_removed = inner.checkpointer.purge(&threads, cutoff).await?;
        }
        if inner.config.log_retention_days > 0 {
            let cutoff = Utc::now() - chrono::Duration::days(inner.config.log_retention_days as i64);
            logs_removed = inner.event_log.purge_before(cutoff).await?;
        }

        Ok((checkpoints_removed, logs_removed))
    }

    // ---- segment machinery ----

    fn reserve_segment(&self, workflow_id: Uuid) -> bool {
        let mut runs = self.inner.runs.lock();
        if runs.contains_key(&workflow_id) {
            return false;
        }
        runs.insert(workflow_id, CancellationToken::new());
        true
    }

    fn release_segment(&self, workflow_id: Uuid) {
        self.inner.runs.lock().remove(&workflow_id);
    }

    /// Reserve and launch in one go. Returns false when a segment is
    /// already live.
    fn spawn_segment(&self, workflow_id: Uuid, command: Option<Command>) -> bool {
        if !self.reserve_segment(workflow_id) {
            return false;
        }
        self.launch_segment(workflow_id, command);
        true
    }

    fn launch_segment(&self, workflow_id: Uuid, command: Option<Command>) {
        let cancel = self
            .inner
            .runs
            .lock()
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default();
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_segment(workflow_id, command, cancel).await;
            scheduler.release_segment(workflow_id);
        });
    }

    async fn run_segment(
        &self,
        workflow_id: Uuid,
        command: Option<Command>,
        cancel: CancellationToken,
    ) {
        let inner = &self.inner;

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = tokio::time::timeout(
                inner.config.workflow_start_timeout,
                inner.semaphore.clone().acquire_owned(),
            ) => Some(permit),
        };

        let _permit = match acquired {
            None => {
                self.finalize_cancelled(workflow_id).await;
                return;
            }
            Some(Ok(Ok(permit))) => permit,
            Some(Ok(Err(_))) => {
                self.finalize_failed(workflow_id, "scheduler shut down").await;
                return;
            }
            Some(Err(_)) => {
                self.finalize_failed(workflow_id, "workflow did not start within the start timeout")
                    .await;
                return;
            }
        };

        if cancel.is_cancelled() {
            self.finalize_cancelled(workflow_id).await;
            return;
        }

        let workflow = match inner.workflows.find_by_id(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                warn!(%workflow_id, "segment started for unknown workflow");
                return;
            }
            Err(err) => {
                error!(%workflow_id, error = %err, "failed to load workflow for segment");
                return;
            }
        };
        if workflow.status.is_terminal() {
            return;
        }
        // A workflow that never started emits the lifecycle start event;
        // resumes and replans do not repeat it.
        let first_start = workflow.started_at.is_none();

        if let Err(err) = inner
            .workflows
            .set_status(workflow_id, WorkflowStatus::InProgress, None)
            .await
        {
            // The partial unique index fires when another workflow took
            // the worktree first.
            self.finalize_failed(workflow_id, &format!("could not start: {}", err))
                .await;
            return;
        }
        if first_start {
            inner.events.emit(Event::workflow_started(workflow_id)).await;
        }

        let outcome = inner
            .runtime
            .run(RunRequest {
                workflow_id,
                command,
                cancel: cancel.clone(),
            })
            .await;

        match outcome {
            Ok(RunOutcome::Completed { state }) => {
                if state[fields::BLOCKER_RESOLUTION] == "abort" {
                    self.finalize_cancelled(workflow_id).await;
                    return;
                }
                if let Some(plan) = state.get(fields::PLAN).filter(|p| !p.is_null()) {
                    let _ = inner
                        .workflows
                        .cache_plan(workflow_id, &plan.to_string())
                        .await;
                }
                if let Err(err) = inner
                    .workflows
                    .set_status(workflow_id, WorkflowStatus::Completed, None)
                    .await
                {
                    error!(%workflow_id, error = %err, "failed to mark workflow completed");
                }
                inner.events.emit(Event::workflow_completed(workflow_id)).await;
                info!(%workflow_id, "workflow completed");
            }
            Ok(RunOutcome::Interrupted { node, .. }) => {
                if cancel.is_cancelled() {
                    self.finalize_cancelled(workflow_id).await;
                    return;
                }
                if let Err(err) = inner
                    .workflows
                    .set_status(workflow_id, WorkflowStatus::Blocked, None)
                    .await
                {
                    error!(%workflow_id, error = %err, "failed to mark workflow blocked");
                }
                info!(%workflow_id, %node, "workflow blocked awaiting approval");
            }
            Ok(RunOutcome::Cancelled { .. }) => {
                self.finalize_cancelled(workflow_id).await;
            }
            Err(err) => {
                let reason = err.to_string();
                if let Err(db_err) = inner
                    .workflows
                    .set_status(workflow_id, WorkflowStatus::Failed, Some(&reason))
                    .await
                {
                    error!(%workflow_id, error = %db_err, "failed to mark workflow failed");
                }
                inner
                    .events
                    .emit(Event::workflow_failed(workflow_id, reason.clone()))
                    .await;
                warn!(%workflow_id, %reason, "workflow failed");
            }
        }
    }

    async fn finalize_cancelled(&self, workflow_id: Uuid) {
        match self.inner.workflows.find_by_id(workflow_id).await {
            Ok(Some(workflow)) if !workflow.status.is_terminal() => {}
            _ => return, // already terminal (or unknown): exactly one terminal event
        }
        if let Err(err) = self
            .inner
            .workflows
            .set_status(workflow_id, WorkflowStatus::Cancelled, None)
            .await
        {
            error!(%workflow_id, error = %err, "failed to mark workflow cancelled");
        }
        self.inner
            .events
            .emit(Event::workflow_cancelled(workflow_id))
            .await;
        info!(%workflow_id, "workflow cancelled");
    }

    async fn finalize_failed(&self, workflow_id: Uuid, reason: &str) {
        match self.inner.workflows.find_by_id(workflow_id).await {
            Ok(Some(workflow)) if !workflow.status.is_terminal() => {}
            _ => return,
        }
        if let Err(err) = self
            .inner
            .workflows
            .set_status(workflow_id, WorkflowStatus::Failed, Some(reason))
            .await
        {
            error!(%workflow_id, error = %err, "failed to mark workflow failed");
        }
        self.inner
            .events
            .emit(Event::workflow_failed(workflow_id, reason))
            .await;
    }

    async fn require_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.inner
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| AmeliaError::NotFound(format!("workflow {}", workflow_id)))
    }

    async fn paused_node(&self, workflow_id: Uuid) -> String {
        self.inner
            .checkpointer
            .latest(&workflow_id.to_string())
            .await
            .ok()
            .flatten()
            .and_then(|cp| cp.next_nodes.first().cloned())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Re-emit a `stage_completed` recorded in the latest checkpoint but
    /// missing from the event log (crash between write and emit).
    async fn replay_lost_stage_completed(&self, workflow_id: Uuid) {
        let Ok(Some(checkpoint)) = self
            .inner
            .checkpointer
            .latest(&workflow_id.to_string())
            .await
        else {
            return;
        };
        let Ok(frame) = RunFrame::decode(&checkpoint) else {
            return;
        };
        let Some(node) = frame.completed_node else {
            return;
        };
        match self.inner.event_log.has_stage_completed(workflow_id, &node).await {
            Ok(false) => {
                info!(%workflow_id, %node, "replaying stage_completed lost in crash");
                self.inner
                    .events
                    .emit(Event::stage_completed(workflow_id, &node))
                    .await;
            }
            Ok(true) => {}
            Err(err) => warn!(%workflow_id, error = %err, "failed to check stage_completed"),
        }
    }
}

impl std::fmt::Debug for WorkflowScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowScheduler")
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .field("live_segments", &self.inner.runs.lock().len())
            .finish()
    }
}

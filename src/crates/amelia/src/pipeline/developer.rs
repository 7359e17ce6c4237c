//! Developer node: executes one plan batch per visit.
//!
//! The node is re-entrant: every step outcome is appended to
//! `step_results` in the updates carried by each interrupt, so a re-run
//! (after an approval pause, a blocker, or a crash-restart) skips work
//! already recorded for the current revision round and never replays a
//! step's tool calls.
//!
//! Trust levels drive the approval cadence: paranoid pauses after every
//! step, standard after every batch, autonomous auto-approves low and
//! medium risk and pauses per batch on high risk. Blockers always stop.

use super::{node_error, nodes, AgentInvoker as _, PipelineServices};
use crate::models::{
    ActionType, Batch, BatchResult, Blocker, BlockerType, RiskLevel, Step, StepResult, StepStatus,
};
use crate::prompts::PromptStore as _;
use crate::state::{fields, StateView};
use amelia_drivers::{truncate_output, InvokeRequest, TerminalReason, TrustLevel};
use amelia_events::{Event, EventLevel, EventSink as _, EventType};
use amelia_graph::{InterruptDecision, NodeContext, NodeHandler, NodeOutcome, Result};
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct DeveloperNode {
    services: Arc<PipelineServices>,
}

impl DeveloperNode {
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }
}

/// Collected effects of the current node visit.
#[derive(Default)]
struct BatchRun {
    step_results: Vec<StepResult>,
    skipped: Vec<String>,
    recorded_tools: Vec<Value>,
    usage_entries: Vec<Value>,
    messages: Vec<Value>,
}

impl BatchRun {
    /// Fold the collected effects and `extra` fields into one updates
    /// object for the runtime to merge.
    fn updates(&self, extra: Value) -> Value {
        let mut map = serde_json::Map::new();
        if !self.step_results.is_empty() {
            map.insert(fields::STEP_RESULTS.into(), json!(self.step_results));
        }
        if !self.skipped.is_empty() {
            map.insert(fields::SKIPPED_STEPS.into(), json!(self.skipped));
        }
        if !self.recorded_tools.is_empty() {
            map.insert(fields::RECORDED_TOOL_CALLS.into(), json!(self.recorded_tools));
        }
        if !self.usage_entries.is_empty() {
            map.insert(fields::TOKEN_USAGE.into(), json!(self.usage_entries));
        }
        if !self.messages.is_empty() {
            map.insert(fields::MESSAGES.into(), json!(self.messages));
        }
        if let Some(extra) = extra.as_object() {
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }
        Value::Object(map)
    }
}

enum StepExec {
    Completed(StepResult),
    Blocked(StepResult, Blocker),
    Cancelled,
}

#[async_trait::async_trait]
impl NodeHandler for DeveloperNode {
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
        let view = StateView::new(&state);
        let plan = view.plan().map_err(|e| node_error(nodes::DEVELOPER, e))?;
        let index = view.batch_index();
        if index >= plan.batches.len() {
            return Ok(NodeOutcome::Advance(json!({})));
        }

        let batch = plan.batches[index].clone();
        let revision = view.revision_round();
        let trust = view.trust_level();
        let driver = view
            .driver_name()
            .map_err(|e| node_error(nodes::DEVELOPER, e))?;

        let recorded = view
            .step_results()
            .map_err(|e| node_error(nodes::DEVELOPER, e))?;
        let mut done: HashSet<String> = recorded
            .iter()
            .filter(|r| {
                r.revision_round == revision
                    && matches!(r.status, StepStatus::Completed | StepStatus::Skipped)
            })
            .map(|r| r.step_id.clone())
            .collect();
        let mut skipped: HashSet<String> = view.skipped_steps().into_iter().collect();
        let resolved: HashSet<String> = view.resolved_steps().into_iter().collect();

        info!(
            workflow_id = %ctx.workflow_id,
            batch = batch.batch_number,
            revision,
            steps = batch.steps.len(),
            already_done = done.len(),
            "developer entering batch"
        );

        let mut run = BatchRun::default();

        for step in &batch.steps {
            if done.contains(&step.id) {
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Ok(NodeOutcome::Advance(run.updates(json!({}))));
            }

            // Skip cascades, including dependents in later batches that
            // were marked when the skip was resolved.
            if skipped.contains(&step.id) {
                run.step_results.push(skipped_result(step, revision));
                done.insert(step.id.clone());
                continue;
            }
            if let Some(dep) = step.depends_on.iter().find(|d| skipped.contains(d.as_str())) {
                debug!(step = %step.id, dependency = %dep, "skipping step, dependency skipped");
                run.step_results.push(skipped_result(step, revision));
                run.skipped.push(step.id.clone());
                skipped.insert(step.id.clone());
                done.insert(step.id.clone());
                run.messages.push(json!({
                    "role": "system",
                    "content": format!("step {} skipped: dependency {} was skipped", step.id, dep),
                }));
                continue;
            }

            // Manual work and judgment calls go to a human.
            if step.action_type == ActionType::Manual || step.requires_human_judgment {
                if resolved.contains(&step.id) {
                    run.step_results.push(StepResult {
                        step_id: step.id.clone(),
                        revision_round: revision,
                        status: StepStatus::Completed,
                        exit_code: None,
                        output: Some("resolved by operator".to_string()),
                        duration_ms: 0,
                        attempts: 1,
                    });
                    done.insert(step.id.clone());
                    continue;
                }
                let blocker = Blocker::new(
                    &step.id,
                    &step.description,
                    BlockerType::NeedsJudgment,
                    "step requires human judgment",
                )
                .with_suggestions(vec![
                    "continue: mark the step as handled and proceed".to_string(),
                    "skip: skip this step and its dependents".to_string(),
                    "abort: stop the workflow".to_string(),
                ]);
                return Ok(NodeOutcome::Advance(
                    run.updates(json!({ "blocker": blocker })),
                ));
            }

            match self
                .execute_step(&ctx, &view, &driver, step, revision, &mut run)
                .await?
            {
                StepExec::Completed(result) => {
                    done.insert(step.id.clone());
                    if step.action_type == ActionType::Code {
                        if let Some(path) = &step.file_path {
                            self.services
                                .events
                                .emit(
                                    Event::new(
                                        ctx.workflow_id,
                                        EventType::FileModified,
                                        path.clone(),
                                    )
                                    .with_agent(nodes::DEVELOPER)
                                    .with_data(json!({ "path": path, "step_id": step.id })),
                                )
                                .await;
                        }
                    }
                    run.step_results.push(result);

                    if trust == TrustLevel::Paranoid {
                        let payload = json!({
                            "type": "step_approval",
                            "step_id": step.id,
                            "batch_number": batch.batch_number,
                        });
                        match ctx.interrupt(payload) {
                            InterruptDecision::Resumed(_) => {}
                            InterruptDecision::Pending(payload) => {
                                return Ok(NodeOutcome::Interrupt {
                                    updates: run.updates(json!({})),
                                    payload,
                                });
                            }
                        }
                    }
                }
                StepExec::Blocked(result, blocker) => {
                    warn!(
                        workflow_id = %ctx.workflow_id,
                        step = %result.step_id,
                        blocker_type = blocker.blocker_type.as_str(),
                        "developer hit a blocker"
                    );
                    run.step_results.push(result);
                    return Ok(NodeOutcome::Advance(
                        run.updates(json!({ "blocker": blocker })),
                    ));
                }
                StepExec::Cancelled => {
                    return Ok(NodeOutcome::Advance(run.updates(json!({}))));
                }
            }
        }

        // Batch complete: summarize outcomes for this batch and revision.
        let batch_result = summarize_batch(&batch, revision, &recorded, &run.step_results);
        let advance = json!({
            "batch_results": [batch_result],
            "batch_index": index + 1,
            "blocker": null,
        });
        let updates = run.updates(advance);

        let pause = match trust {
            TrustLevel::Paranoid => false, // already paused per step
            TrustLevel::Standard => true,
            TrustLevel::Autonomous => batch.risk_summary == RiskLevel::High,
        };
        if pause {
            let payload = json!({
                "type": "batch_approval",
                "batch_number": batch.batch_number,
                "next_batch_index": index + 1,
            });
            match ctx.interrupt(payload) {
                InterruptDecision::Resumed(_) => {}
                InterruptDecision::Pending(payload) => {
                    return Ok(NodeOutcome::Interrupt { updates, payload });
                }
            }
        }

        Ok(NodeOutcome::Advance(updates))
    }
}

impl DeveloperNode {
    async fn execute_step(
        &self,
        ctx: &Arc<NodeContext>,
        view: &StateView<'_>,
        driver: &str,
        step: &Step,
        revision: u32,
        run: &mut BatchRun,
    ) -> Result<StepExec> {
        let template = self
            .services
            .prompts
            .resolve_for_workflow(ctx.workflow_id, nodes::DEVELOPER)
            .await
            .map_err(|e| node_error(nodes::DEVELOPER, e))?;

        let tools: Vec<String> = match step.action_type {
            ActionType::Code => vec!["read_file".into(), "write_file".into(), "edit_file".into()],
            ActionType::Command => vec!["run_command".into()],
            ActionType::Validation => vec!["run_command".into(), "read_file".into()],
            ActionType::Manual => Vec::new(),
        };
        let timeout = step
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.services.config.default_step_timeout);

        // Primary command first, then each fallback once.
        let commands: Vec<Option<String>> = match &step.command {
            Some(primary) => std::iter::once(Some(primary.clone()))
                .chain(step.fallback_commands.iter().cloned().map(Some))
                .collect(),
            None => vec![None],
        };

        let started = Instant::now();
        let mut attempts = 0u32;
        let mut attempted: Vec<String> = Vec::new();
        let mut last_failure = String::new();
        let mut last_exit: Option<i32> = None;
        let mut last_output: Option<String> = None;

        for command in commands {
            attempts += 1;

            let mut prompt = format!(
                "{}\n\n# Step {} ({})\n{}",
                template,
                step.id,
                step.action_type.as_str(),
                step.description
            );
            if let Some(command) = &command {
                prompt.push_str("\nRun: ");
                prompt.push_str(command);
                attempted.push(command.clone());
            }
            if let Some(change) = &step.code_change {
                prompt.push_str("\nChange:\n");
                prompt.push_str(change);
            }
            if let Some(path) = &step.file_path {
                prompt.push_str("\nFile: ");
                prompt.push_str(path);
            }

            let mut request = InvokeRequest::new(nodes::DEVELOPER, prompt)
                .with_tools(tools.clone())
                .with_timeout(timeout)
                .with_trust_level(view.trust_level())
                .with_input_state(json!({ "step": step, "command": command }));
            if let Some(model) = view.model_for(nodes::DEVELOPER) {
                request = request.with_model_hint(model);
            }
            if let Some(cwd) = step.cwd.as_deref().or_else(|| view.worktree()) {
                request = request.with_cwd(cwd);
            }

            let sink = self.services.telemetry_sink(ctx.workflow_id, nodes::DEVELOPER);
            let result = self
                .services
                .invoker
                .invoke(driver, request, sink, ctx.cancel.clone())
                .await
                .map_err(|e| node_error(nodes::DEVELOPER, e))?;

            // Tool calls are recorded under a per-attempt dedup key so a
            // re-run can refuse to replay them.
            let dedup_key = format!("{}:{}", step.id, attempts);
            for call in &result.tool_calls {
                run.recorded_tools.push(json!({
                    "dedup_key": dedup_key,
                    "id": call.id,
                    "tool": call.tool,
                }));
            }
            run.usage_entries.push(json!({
                "agent": nodes::DEVELOPER,
                "step_id": step.id,
                "totals": result.token_usage,
            }));

            match result.terminal {
                TerminalReason::Cancelled => return Ok(StepExec::Cancelled),
                TerminalReason::TimedOut => {
                    last_failure = format!("step timed out after {:?}", timeout);
                    continue;
                }
                TerminalReason::Error => {
                    last_failure = "driver reported an execution error".to_string();
                    continue;
                }
                TerminalReason::Completed => {}
            }

            let (exit_code, output) = extract_command_output(&result.final_output);

            // Raw output is streamed at trace level before truncation.
            self.services
                .events
                .emit(
                    Event::new(ctx.workflow_id, EventType::ToolResult, "step output")
                        .with_level(EventLevel::Trace)
                        .with_agent(nodes::DEVELOPER)
                        .with_data(json!({ "step_id": step.id, "output": output })),
                )
                .await;

            let (stored, _truncated) = truncate_output(&output);
            last_exit = exit_code;
            last_output = Some(stored.clone());

            let exit_ok = exit_code.map(|c| c == step.expect_exit_code).unwrap_or(true);
            let pattern_ok = match &step.expected_output_pattern {
                Some(pattern) => match Regex::new(pattern) {
                    Ok(re) => re.is_match(&output),
                    Err(err) => {
                        last_failure = format!("invalid expected_output_pattern: {}", err);
                        false
                    }
                },
                None => true,
            };

            if exit_ok && pattern_ok {
                return Ok(StepExec::Completed(StepResult {
                    step_id: step.id.clone(),
                    revision_round: revision,
                    status: StepStatus::Completed,
                    exit_code,
                    output: Some(stored),
                    duration_ms: started.elapsed().as_millis() as u64,
                    attempts,
                }));
            }

            if !exit_ok {
                last_failure = format!(
                    "exit code {:?}, expected {}",
                    exit_code, step.expect_exit_code
                );
            } else if last_failure.is_empty() {
                last_failure = "output did not match expected pattern".to_string();
            }
        }

        let blocker_type = match step.action_type {
            ActionType::Validation => BlockerType::ValidationFailed,
            ActionType::Command => BlockerType::CommandFailed,
            _ => BlockerType::UnexpectedState,
        };
        let result = StepResult {
            step_id: step.id.clone(),
            revision_round: revision,
            status: StepStatus::Failed,
            exit_code: last_exit,
            output: last_output,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts,
        };
        let blocker = Blocker::new(&step.id, &step.description, blocker_type, last_failure)
            .with_attempted(attempted)
            .with_suggestions(vec![
                "continue: retry the step".to_string(),
                "skip: skip this step and its dependents".to_string(),
                "abort: stop the workflow".to_string(),
            ]);
        Ok(StepExec::Blocked(result, blocker))
    }
}

fn skipped_result(step: &Step, revision: u32) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        revision_round: revision,
        status: StepStatus::Skipped,
        exit_code: None,
        output: None,
        duration_ms: 0,
        attempts: 0,
    }
}

fn summarize_batch(
    batch: &Batch,
    revision: u32,
    recorded: &[StepResult],
    fresh: &[StepResult],
) -> BatchResult {
    // Latest status per step: fresh results override recorded ones.
    let mut statuses: HashMap<&str, StepStatus> = HashMap::new();
    for result in recorded.iter().chain(fresh.iter()) {
        if result.revision_round == revision {
            statuses.insert(result.step_id.as_str(), result.status);
        }
    }

    let mut completed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for step in &batch.steps {
        match statuses.get(step.id.as_str()) {
            Some(StepStatus::Completed) => completed += 1,
            Some(StepStatus::Failed) => failed += 1,
            Some(StepStatus::Skipped) => skipped += 1,
            None => {}
        }
    }

    BatchResult {
        batch_number: batch.batch_number,
        revision_round: revision,
        completed,
        failed,
        skipped,
        completed_at: Utc::now(),
    }
}

fn extract_command_output(output: &Value) -> (Option<i32>, String) {
    match output {
        Value::Object(map) => {
            let exit_code = map
                .get("exit_code")
                .and_then(Value::as_i64)
                .map(|c| c as i32);
            let text = map
                .get("output")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| output.to_string());
            (exit_code, text)
        }
        Value::String(text) => (None, text.clone()),
        other => (None, other.to_string()),
    }
}

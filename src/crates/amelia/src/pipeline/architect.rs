//! Architect node: turns the issue into an executable plan.

use super::{node_error, nodes, AgentInvoker as _, PipelineServices};
use crate::models::Plan;
use crate::prompts::PromptStore as _;
use crate::state::{fields, StateView};
use amelia_drivers::{InvokeRequest, TerminalReason};
use amelia_graph::{NodeContext, NodeHandler, NodeOutcome, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub struct ArchitectNode {
    services: Arc<PipelineServices>,
}

impl ArchitectNode {
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }
}

#[async_trait::async_trait]
impl NodeHandler for ArchitectNode {
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
        let view = StateView::new(&state);
        let issue = view.issue().map_err(|e| node_error(nodes::ARCHITECT, e))?;
        let driver = view
            .driver_name()
            .map_err(|e| node_error(nodes::ARCHITECT, e))?;

        let template = self
            .services
            .prompts
            .resolve_for_workflow(ctx.workflow_id, nodes::ARCHITECT)
            .await
            .map_err(|e| node_error(nodes::ARCHITECT, e))?;

        let mut prompt = format!(
            "{}\n\n# Issue {}\n{}\n\n{}",
            template, issue.key, issue.title, issue.description
        );
        let feedback = view.feedback_messages();
        if !feedback.is_empty() {
            prompt.push_str("\n\n# Feedback on the previous plan\n");
            for item in &feedback {
                prompt.push_str("- ");
                prompt.push_str(item);
                prompt.push('\n');
            }
        }

        let mut request = InvokeRequest::new(nodes::ARCHITECT, prompt)
            .with_input_state(json!({ "issue": issue }))
            .with_timeout(self.services.config.default_node_timeout)
            .with_trust_level(view.trust_level());
        if let Some(model) = view.model_for(nodes::ARCHITECT) {
            request = request.with_model_hint(model);
        }
        if let Some(worktree) = view.worktree() {
            request = request.with_cwd(worktree);
        }

        let sink = self.services.telemetry_sink(ctx.workflow_id, nodes::ARCHITECT);
        let result = self
            .services
            .invoker
            .invoke(&driver, request, sink, ctx.cancel.clone())
            .await
            .map_err(|e| node_error(nodes::ARCHITECT, e))?;

        match result.terminal {
            TerminalReason::Completed => {}
            // The runtime observes the cancel flag right after this node.
            TerminalReason::Cancelled => return Ok(NodeOutcome::Advance(json!({}))),
            TerminalReason::TimedOut => {
                return Err(node_error(nodes::ARCHITECT, "planning invocation timed out"))
            }
            TerminalReason::Error => {
                return Err(node_error(nodes::ARCHITECT, "planning invocation failed"))
            }
        }

        let plan = parse_plan(&result.final_output)
            .map_err(|e| node_error(nodes::ARCHITECT, e))?
            .split_oversized_batches();
        info!(
            workflow_id = %ctx.workflow_id,
            goal = %plan.goal,
            batches = plan.batches.len(),
            "architect produced plan"
        );

        let summary = plan_summary(&plan);
        Ok(NodeOutcome::Advance(json!({
            "plan": plan,
            "batch_index": 0,
            "blocker": null,
            "messages": [{
                "role": "assistant",
                "agent": nodes::ARCHITECT,
                "content": format!("Planned: {}", summary),
            }],
            "token_usage": [{
                "agent": nodes::ARCHITECT,
                "totals": result.token_usage,
            }],
        })))
    }
}

fn plan_summary(plan: &Plan) -> String {
    let steps: usize = plan.batches.iter().map(|b| b.steps.len()).sum();
    format!("{} ({} batches, {} steps)", plan.goal, plan.batches.len(), steps)
}

/// Accept either a structured plan object or a JSON string containing one.
fn parse_plan(output: &Value) -> std::result::Result<Plan, String> {
    match output {
        Value::Object(_) => serde_json::from_value(output.clone())
            .map_err(|e| format!("plan does not match schema: {}", e)),
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| format!("plan output is not valid JSON: {}", e)),
        other => Err(format!("unexpected plan output: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, RiskLevel};

    #[test]
    fn parse_plan_accepts_object_and_string() {
        let object = json!({
            "goal": "fix",
            "batches": [{
                "batch_number": 1,
                "risk_summary": "low",
                "description": "b1",
                "steps": [{"id": "s1", "description": "do", "action_type": "command"}],
            }],
        });
        let plan = parse_plan(&object).unwrap();
        assert_eq!(plan.goal, "fix");
        assert_eq!(plan.batches[0].risk_summary, RiskLevel::Low);
        assert_eq!(plan.batches[0].steps[0].action_type, ActionType::Command);

        let text = Value::String(object.to_string());
        assert_eq!(parse_plan(&text).unwrap().goal, "fix");
    }

    #[test]
    fn parse_plan_rejects_garbage() {
        assert!(parse_plan(&json!(42)).is_err());
        assert!(parse_plan(&Value::String("not json".into())).is_err());
    }
}

//! Reviewer node: assesses the executed steps against the plan.

use super::{node_error, nodes, AgentInvoker as _, PipelineServices};
use crate::models::{ReviewResult, ReviewStatus};
use crate::prompts::PromptStore as _;
use crate::state::{fields, StateView};
use amelia_drivers::{InvokeRequest, TerminalReason};
use amelia_graph::{NodeContext, NodeHandler, NodeOutcome, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub struct ReviewerNode {
    services: Arc<PipelineServices>,
}

impl ReviewerNode {
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }
}

#[async_trait::async_trait]
impl NodeHandler for ReviewerNode {
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
        let view = StateView::new(&state);
        let plan = view.plan().map_err(|e| node_error(nodes::REVIEWER, e))?;
        let step_results = view
            .step_results()
            .map_err(|e| node_error(nodes::REVIEWER, e))?;
        let driver = view
            .driver_name()
            .map_err(|e| node_error(nodes::REVIEWER, e))?;
        let revision = view.revision_round();

        let template = self
            .services
            .prompts
            .resolve_for_workflow(ctx.workflow_id, nodes::REVIEWER)
            .await
            .map_err(|e| node_error(nodes::REVIEWER, e))?;

        let prompt = format!(
            "{}\n\n# Goal\n{}\n\n# Executed steps\n{}",
            template,
            plan.goal,
            serde_json::to_string_pretty(&step_results).unwrap_or_default()
        );

        let mut request = InvokeRequest::new(nodes::REVIEWER, prompt)
            .with_input_state(json!({ "plan": plan, "step_results": step_results }))
            .with_timeout(self.services.config.default_node_timeout)
            .with_trust_level(view.trust_level());
        if let Some(model) = view.model_for(nodes::REVIEWER) {
            request = request.with_model_hint(model);
        }
        if let Some(worktree) = view.worktree() {
            request = request.with_cwd(worktree);
        }

        let sink = self.services.telemetry_sink(ctx.workflow_id, nodes::REVIEWER);
        let result = self
            .services
            .invoker
            .invoke(&driver, request, sink, ctx.cancel.clone())
            .await
            .map_err(|e| node_error(nodes::REVIEWER, e))?;

        match result.terminal {
            TerminalReason::Completed => {}
            TerminalReason::Cancelled => return Ok(NodeOutcome::Advance(json!({}))),
            TerminalReason::TimedOut => {
                return Err(node_error(nodes::REVIEWER, "review invocation timed out"))
            }
            TerminalReason::Error => {
                return Err(node_error(nodes::REVIEWER, "review invocation failed"))
            }
        }

        let review = parse_review(&result.final_output)
            .map_err(|e| node_error(nodes::REVIEWER, e))?;
        info!(
            workflow_id = %ctx.workflow_id,
            status = ?review.status,
            revision,
            "review complete"
        );

        let mut updates = json!({
            "review": review,
            "token_usage": [{
                "agent": nodes::REVIEWER,
                "totals": result.token_usage,
            }],
        });

        if updates[fields::REVIEW]["status"] == "revision_requested" {
            let comments = updates[fields::REVIEW]["comments"]
                .as_array()
                .map(|c| {
                    c.iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_default();
            updates[fields::REVISION_ROUND] = json!(revision + 1);
            // Re-run the plan from the first batch; results are keyed by
            // revision round so nothing is silently reused.
            updates[fields::BATCH_INDEX] = json!(0);
            updates[fields::MESSAGES] = json!([{
                "role": "feedback",
                "content": format!("Review requested changes: {}", comments),
            }]);
        }

        Ok(NodeOutcome::Advance(updates))
    }
}

/// Accept a structured review object or a JSON string containing one.
fn parse_review(output: &Value) -> std::result::Result<ReviewResult, String> {
    match output {
        Value::Object(_) => serde_json::from_value(output.clone())
            .map_err(|e| format!("review does not match schema: {}", e)),
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| format!("review output is not valid JSON: {}", e)),
        other => Err(format!("unexpected review output: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_review_accepts_both_shapes() {
        let object = json!({"status": "approved", "summary": "clean", "comments": []});
        let review = parse_review(&object).unwrap();
        assert_eq!(review.status, ReviewStatus::Approved);
        assert!(review.approved());

        let text = Value::String(
            json!({"status": "revision_requested", "summary": "", "comments": ["fix s2"]})
                .to_string(),
        );
        let review = parse_review(&text).unwrap();
        assert_eq!(review.status, ReviewStatus::RevisionRequested);
        assert_eq!(review.comments, vec!["fix s2"]);
    }

    #[test]
    fn parse_review_rejects_garbage() {
        assert!(parse_review(&json!([1, 2])).is_err());
        assert!(parse_review(&Value::String("looks fine".into())).is_err());
    }
}

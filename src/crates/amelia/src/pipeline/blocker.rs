//! Blocker resolution node.
//!
//! Pauses on the recorded blocker and consumes a resume command of the
//! shape `{action: "continue" | "skip" | "abort"}`:
//!
//! - `continue` clears the blocker so the developer retries the step;
//!   for judgment blockers the step is marked operator-resolved instead.
//! - `skip` marks the step and the transitive closure of its dependents
//!   as skipped.
//! - `abort` routes the workflow to END; the scheduler records it as
//!   cancelled.

use super::{node_error, nodes};
use crate::models::BlockerType;
use crate::state::{fields, StateView};
use amelia_graph::{InterruptDecision, NodeContext, NodeHandler, NodeOutcome, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub struct BlockerResolutionNode;

#[async_trait::async_trait]
impl NodeHandler for BlockerResolutionNode {
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
        let view = StateView::new(&state);
        let blocker = view
            .blocker()
            .map_err(|e| node_error(nodes::BLOCKER_RESOLUTION, e))?
            .ok_or_else(|| node_error(nodes::BLOCKER_RESOLUTION, "no blocker recorded"))?;

        let payload = json!({ "type": "blocker", "blocker": blocker });
        let value = match ctx.interrupt(payload) {
            InterruptDecision::Resumed(value) => value,
            InterruptDecision::Pending(payload) => {
                return Ok(NodeOutcome::Interrupt {
                    updates: json!({}),
                    payload,
                })
            }
        };

        // Resolutions arrive either as a raw `{action}` resume value or
        // wrapped in an approval payload.
        let action = value["action"]
            .as_str()
            .or_else(|| value["payload"]["action"].as_str())
            .unwrap_or("continue");
        info!(
            workflow_id = %ctx.workflow_id,
            step = %blocker.step_id,
            action,
            "blocker resolved"
        );

        let approval = json!([{
            "node": nodes::BLOCKER_RESOLUTION,
            "step_id": blocker.step_id,
            "action": action,
            "at": Utc::now(),
        }]);

        match action {
            "abort" => Ok(NodeOutcome::Advance(json!({
                "blocker": null,
                "blocker_resolution": "abort",
                "approvals": approval,
            }))),
            "skip" => {
                let plan = view
                    .plan()
                    .map_err(|e| node_error(nodes::BLOCKER_RESOLUTION, e))?;
                let already: std::collections::HashSet<String> =
                    view.skipped_steps().into_iter().collect();

                let mut cascade: Vec<String> = plan
                    .dependents_closure(&blocker.step_id)
                    .into_iter()
                    .filter(|id| !already.contains(id))
                    .collect();
                cascade.sort();

                let mut skips = Vec::with_capacity(cascade.len() + 1);
                if !already.contains(&blocker.step_id) {
                    skips.push(blocker.step_id.clone());
                }
                skips.extend(cascade);

                Ok(NodeOutcome::Advance(json!({
                    "blocker": null,
                    "blocker_resolution": "skip",
                    "skipped_steps": skips,
                    "approvals": approval,
                })))
            }
            _ => {
                // Judgment blockers are satisfied by the operator; a
                // retry would only re-raise them.
                let resolved = if blocker.blocker_type == BlockerType::NeedsJudgment {
                    json!([blocker.step_id])
                } else {
                    json!([])
                };
                Ok(NodeOutcome::Advance(json!({
                    "blocker": null,
                    "blocker_resolution": "continue",
                    "resolved_steps": resolved,
                    "approvals": approval,
                })))
            }
        }
    }
}

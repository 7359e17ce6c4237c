//! Human approval gate.
//!
//! Sits in the graph's static interrupts: the runtime pauses before this
//! node and emits `approval_required`. Once resumed, the node consumes
//! the command value and records the decision; the conditional edge then
//! routes approved runs to the developer and rejected runs back to the
//! architect with the feedback merged.

use super::nodes;
use crate::state::fields;
use amelia_graph::{InterruptDecision, NodeContext, NodeHandler, NodeOutcome, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub struct HumanApprovalNode;

#[async_trait::async_trait]
impl NodeHandler for HumanApprovalNode {
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
        let payload = json!({
            "type": "plan_approval",
            "goal": state[fields::PLAN]["goal"],
            "batches": state[fields::PLAN]["batches"].as_array().map(Vec::len).unwrap_or(0),
        });

        let value = match ctx.interrupt(payload) {
            InterruptDecision::Resumed(value) => value,
            // The static gate normally pauses before execution; this
            // covers a direct entry without a queued command.
            InterruptDecision::Pending(payload) => {
                return Ok(NodeOutcome::Interrupt {
                    updates: json!({}),
                    payload,
                })
            }
        };

        let approved = value["approved"].as_bool().unwrap_or(false);
        info!(workflow_id = %ctx.workflow_id, approved, "plan approval decision");

        let mut updates = json!({
            "last_approval": value,
            "approvals": [{
                "node": nodes::HUMAN_APPROVAL,
                "approved": approved,
                "at": Utc::now(),
            }],
        });

        if !approved {
            let feedback = updates[fields::LAST_APPROVAL]["feedback"]
                .as_str()
                .unwrap_or("plan rejected")
                .to_string();
            updates[fields::MESSAGES] = json!([{
                "role": "feedback",
                "content": feedback,
            }]);
        }

        Ok(NodeOutcome::Advance(updates))
    }
}

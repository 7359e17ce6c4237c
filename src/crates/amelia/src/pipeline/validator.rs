//! Plan validator node: structural checks before the human gate.

use super::{node_error, nodes};
use crate::state::{fields, StateView};
use amelia_graph::{NodeContext, NodeHandler, NodeOutcome, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Router node validating plan shape. Writes `plan_valid` and routing
/// inputs; the conditional edge decides whether the architect gets one
/// retry or the plan proceeds to the human gate regardless.
pub struct PlanValidatorNode;

#[async_trait::async_trait]
impl NodeHandler for PlanValidatorNode {
    async fn execute(&self, ctx: Arc<NodeContext>, state: Value) -> Result<NodeOutcome> {
        let view = StateView::new(&state);
        let plan = view
            .plan()
            .map_err(|e| node_error(nodes::PLAN_VALIDATOR, e))?;
        let attempts = view.plan_validation_attempts() + 1;

        let mut errors: Vec<String> = match plan.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        for batch in &plan.batches {
            let limit = batch.risk_summary.max_batch_size();
            if batch.steps.len() > limit {
                errors.push(format!(
                    "batch {} has {} steps, limit {} for {} risk",
                    batch.batch_number,
                    batch.steps.len(),
                    limit,
                    batch.risk_summary.as_str()
                ));
            }
        }

        let valid = errors.is_empty();
        let error_summary = errors.join("; ");
        debug!(
            workflow_id = %ctx.workflow_id,
            valid,
            attempts,
            "plan validated"
        );

        let mut updates = json!({
            "plan_valid": valid,
            "plan_validation_attempts": attempts,
            "validation_errors": errors,
        });
        if !valid {
            updates[fields::MESSAGES] = json!([{
                "role": "feedback",
                "content": format!("Plan validation failed: {}", error_summary),
            }]);
        }

        Ok(NodeOutcome::Advance(updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, Batch, Plan, RiskLevel, Step};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn state_with_plan(plan: &Plan) -> Value {
        json!({
            "plan": plan,
            "plan_validation_attempts": 0,
        })
    }

    fn ctx(resumes: Vec<Value>) -> Arc<NodeContext> {
        Arc::new(NodeContext::new(
            Uuid::new_v4(),
            nodes::PLAN_VALIDATOR,
            resumes,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn valid_plan_passes() {
        let plan = Plan {
            goal: "g".into(),
            batches: vec![Batch {
                batch_number: 1,
                risk_summary: RiskLevel::Low,
                description: "b".into(),
                steps: vec![Step::new("s1", "one", ActionType::Command)],
            }],
            tdd_approach: None,
            total_estimated_minutes: 5,
        };

        let outcome = PlanValidatorNode
            .execute(ctx(vec![]), state_with_plan(&plan))
            .await
            .unwrap();
        let NodeOutcome::Advance(updates) = outcome else {
            panic!("expected advance");
        };
        assert_eq!(updates[fields::PLAN_VALID], true);
        assert_eq!(updates[fields::PLAN_VALIDATION_ATTEMPTS], 1);
    }

    #[tokio::test]
    async fn oversized_batch_fails_with_feedback() {
        let steps: Vec<Step> = (0..3)
            .map(|i| Step::new(format!("s{}", i), "x", ActionType::Command))
            .collect();
        let plan = Plan {
            goal: "g".into(),
            batches: vec![Batch {
                batch_number: 1,
                risk_summary: RiskLevel::High,
                description: "b".into(),
                steps,
            }],
            tdd_approach: None,
            total_estimated_minutes: 5,
        };

        let outcome = PlanValidatorNode
            .execute(ctx(vec![]), state_with_plan(&plan))
            .await
            .unwrap();
        let NodeOutcome::Advance(updates) = outcome else {
            panic!("expected advance");
        };
        assert_eq!(updates[fields::PLAN_VALID], false);
        assert!(updates[fields::MESSAGES][0]["content"]
            .as_str()
            .unwrap()
            .contains("limit 1"));
    }

    #[tokio::test]
    async fn validator_advances_without_consuming_resume_values() {
        let plan = Plan {
            goal: "g".into(),
            batches: vec![Batch {
                batch_number: 1,
                risk_summary: RiskLevel::Low,
                description: "b".into(),
                steps: vec![Step::new("s1", "one", ActionType::Command)],
            }],
            tdd_approach: None,
            total_estimated_minutes: 5,
        };

        // Even with a resume value queued, the validator routes through
        // state updates alone: it never pauses and never touches the
        // resume queue.
        let ctx = ctx(vec![json!({"approved": true})]);
        let outcome = PlanValidatorNode
            .execute(ctx.clone(), state_with_plan(&plan))
            .await
            .unwrap();
        assert!(matches!(outcome, NodeOutcome::Advance(_)));
        assert_eq!(ctx.resumes_consumed(), 0);
    }
}

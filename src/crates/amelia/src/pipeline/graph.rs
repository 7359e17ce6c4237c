//! Pipeline graph wiring.
//!
//! ```text
//!                    ┌──────────── rejected ───────────┐
//!                    │                                  │
//! architect ─► plan_validator ─► human_approval ─► developer ─► reviewer ─► END
//!     ▲   ▲          │ (invalid, one retry)  │        │  ▲  ▲        │
//!     │   └──────────┘                       │        │  │  └─ revision
//!     └── validation retry                   │     blocker │
//!                                            │        ▼    │
//!                                            │  blocker_resolution
//!                                            │        │ (abort → END)
//!                                            └────────┴─ continue / skip
//! ```

use super::approval::HumanApprovalNode;
use super::architect::ArchitectNode;
use super::blocker::BlockerResolutionNode;
use super::developer::DeveloperNode;
use super::nodes;
use super::reviewer::ReviewerNode;
use super::validator::PlanValidatorNode;
use super::PipelineServices;
use crate::state::fields;
use amelia_graph::{CompiledGraph, Graph, Node, NodeKind, Result, END};
use serde_json::Value;
use std::sync::Arc;

/// Build the compiled agent pipeline over the given services.
pub fn build_pipeline(services: Arc<PipelineServices>) -> Result<CompiledGraph> {
    let max_review_cycles = services.config.max_review_cycles;

    let mut graph = Graph::new();
    graph.add_node(Node::new(
        nodes::ARCHITECT,
        NodeKind::Agent,
        Arc::new(ArchitectNode::new(services.clone())),
    ));
    graph.add_node(Node::new(
        nodes::PLAN_VALIDATOR,
        NodeKind::Router,
        Arc::new(PlanValidatorNode),
    ));
    graph.add_node(Node::new(
        nodes::HUMAN_APPROVAL,
        NodeKind::Approval,
        Arc::new(HumanApprovalNode),
    ));
    graph.add_node(Node::new(
        nodes::DEVELOPER,
        NodeKind::Agent,
        Arc::new(DeveloperNode::new(services.clone())),
    ));
    graph.add_node(Node::new(
        nodes::BLOCKER_RESOLUTION,
        NodeKind::Approval,
        Arc::new(BlockerResolutionNode),
    ));
    graph.add_node(Node::new(
        nodes::REVIEWER,
        NodeKind::Agent,
        Arc::new(ReviewerNode::new(services)),
    ));

    graph.set_entry(nodes::ARCHITECT);
    graph.add_static_interrupt(nodes::HUMAN_APPROVAL);

    graph.add_edge(nodes::ARCHITECT, nodes::PLAN_VALIDATOR);

    // One architect retry on an invalid plan; afterwards the human gate
    // decides either way.
    graph.add_conditional_edge(
        nodes::PLAN_VALIDATOR,
        Arc::new(|state: &Value| {
            let valid = state[fields::PLAN_VALID].as_bool().unwrap_or(false);
            let attempts = state[fields::PLAN_VALIDATION_ATTEMPTS].as_u64().unwrap_or(0);
            if !valid && attempts <= 1 {
                nodes::ARCHITECT.to_string()
            } else {
                nodes::HUMAN_APPROVAL.to_string()
            }
        }),
    );

    graph.add_conditional_edge(
        nodes::HUMAN_APPROVAL,
        Arc::new(|state: &Value| {
            if state[fields::LAST_APPROVAL]["approved"].as_bool().unwrap_or(false) {
                nodes::DEVELOPER.to_string()
            } else {
                nodes::ARCHITECT.to_string()
            }
        }),
    );

    graph.add_conditional_edge(
        nodes::DEVELOPER,
        Arc::new(|state: &Value| {
            if !state[fields::BLOCKER].is_null() {
                return nodes::BLOCKER_RESOLUTION.to_string();
            }
            let batch_index = state[fields::BATCH_INDEX].as_u64().unwrap_or(0) as usize;
            let batches = state[fields::PLAN]["batches"]
                .as_array()
                .map(Vec::len)
                .unwrap_or(0);
            if batch_index < batches {
                nodes::DEVELOPER.to_string()
            } else {
                nodes::REVIEWER.to_string()
            }
        }),
    );

    graph.add_conditional_edge(
        nodes::BLOCKER_RESOLUTION,
        Arc::new(|state: &Value| {
            if state[fields::BLOCKER_RESOLUTION] == "abort" {
                END.to_string()
            } else {
                nodes::DEVELOPER.to_string()
            }
        }),
    );

    graph.add_conditional_edge(
        nodes::REVIEWER,
        Arc::new(move |state: &Value| {
            let status = state[fields::REVIEW]["status"].as_str().unwrap_or("approved");
            let round = state[fields::REVISION_ROUND].as_u64().unwrap_or(0) as u32;
            if status == "revision_requested" && round <= max_review_cycles {
                nodes::DEVELOPER.to_string()
            } else {
                END.to_string()
            }
        }),
    );

    graph.compile()
}

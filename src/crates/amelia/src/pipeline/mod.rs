//! The concrete agent pipeline: architect → plan validation → human
//! approval → developer (batched) → reviewer, with blocker resolution.
//!
//! Node behavior lives in the submodules; [`graph::build_pipeline`] wires
//! them into a compiled graph for the runtime.

pub mod approval;
pub mod architect;
pub mod blocker;
pub mod developer;
pub mod graph;
pub mod reviewer;
pub mod validator;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::TokenUsageRecord;
use crate::prompts::{Prompt, PromptStore};
use crate::repositories::TokenUsageRepository;
use amelia_drivers::{
    DriverRegistry, InvokeRequest, InvokeResult, StreamNotification, StreamSink,
};
use amelia_events::{Event, EventLevel, EventSink, EventType};
use amelia_graph::GraphError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

pub use graph::build_pipeline;

/// Node names of the pipeline graph.
pub mod nodes {
    pub const ARCHITECT: &str = "architect";
    pub const PLAN_VALIDATOR: &str = "plan_validator";
    pub const HUMAN_APPROVAL: &str = "human_approval";
    pub const DEVELOPER: &str = "developer";
    pub const BLOCKER_RESOLUTION: &str = "blocker_resolution";
    pub const REVIEWER: &str = "reviewer";
}

const ARCHITECT_PROMPT: &str = "\
You are the planning architect for a coding workflow. Read the issue and \
produce an implementation plan as a single JSON object with fields: goal, \
batches (each with batch_number, risk_summary one of low|medium|high, \
description, steps), tdd_approach, total_estimated_minutes. Each step \
needs id, description, action_type one of code|command|validation|manual, \
and when relevant: file_path, code_change, command, depends_on, \
risk_level, is_test_step, validates_step, requires_human_judgment. Step \
ids must be unique and depends_on may only reference earlier steps. \
Prefer small, verifiable steps; pair code steps with validation steps.";

const DEVELOPER_PROMPT: &str = "\
You are the implementing developer for a coding workflow. Execute exactly \
the step you are given, using only the tools listed. For command steps \
report the command output and exit code as a JSON object {\"exit_code\": \
n, \"output\": \"...\"}. Do not improvise beyond the step description; if \
the step cannot be completed as written, say so plainly in the output.";

const REVIEWER_PROMPT: &str = "\
You are the code reviewer for a coding workflow. Compare the executed \
steps against the plan and respond with a single JSON object: {\"status\": \
\"approved\"|\"revision_requested\", \"summary\": \"...\", \"comments\": \
[\"...\"]}. Request a revision only for concrete defects, naming the step \
and the problem in each comment.";

/// Register the pipeline's default prompts.
pub async fn register_default_prompts(store: &dyn PromptStore) -> Result<()> {
    store
        .register(Prompt::new(nodes::ARCHITECT, nodes::ARCHITECT, ARCHITECT_PROMPT))
        .await?;
    store
        .register(Prompt::new(nodes::DEVELOPER, nodes::DEVELOPER, DEVELOPER_PROMPT))
        .await?;
    store
        .register(Prompt::new(nodes::REVIEWER, nodes::REVIEWER, REVIEWER_PROMPT))
        .await?;
    Ok(())
}

/// Executes agent invocations for pipeline nodes.
///
/// Production wires this to the [`DriverRegistry`]; tests substitute a
/// scripted implementation.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        driver: &str,
        request: InvokeRequest,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> amelia_drivers::Result<InvokeResult>;
}

/// [`AgentInvoker`] backed by the driver registry.
pub struct RegistryInvoker {
    registry: Arc<DriverRegistry>,
}

impl RegistryInvoker {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl AgentInvoker for RegistryInvoker {
    async fn invoke(
        &self,
        driver: &str,
        request: InvokeRequest,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> amelia_drivers::Result<InvokeResult> {
        self.registry.invoke(driver, &request, sink.as_ref(), &cancel).await
    }
}

/// Shared collaborators handed to every pipeline node.
pub struct PipelineServices {
    pub invoker: Arc<dyn AgentInvoker>,
    pub prompts: Arc<dyn PromptStore>,
    pub events: Arc<dyn EventSink>,
    pub usage: Option<TokenUsageRepository>,
    pub config: EngineConfig,
}

impl PipelineServices {
    /// Sink translating driver telemetry into workflow events and usage
    /// rows for one invocation.
    pub fn telemetry_sink(&self, workflow_id: Uuid, agent: &str) -> Arc<TelemetrySink> {
        Arc::new(TelemetrySink {
            workflow_id,
            agent: agent.to_string(),
            events: self.events.clone(),
            usage: self.usage.clone(),
        })
    }
}

/// Forwards driver stream notifications onto the event bus (and token
/// usage rows into the database).
pub struct TelemetrySink {
    workflow_id: Uuid,
    agent: String,
    events: Arc<dyn EventSink>,
    usage: Option<TokenUsageRepository>,
}

#[async_trait]
impl StreamSink for TelemetrySink {
    async fn notify(&self, notification: StreamNotification) {
        match notification {
            StreamNotification::AgentMessage { text } => {
                self.events
                    .emit(
                        Event::new(self.workflow_id, EventType::AgentMessage, text)
                            .with_level(EventLevel::Debug)
                            .with_agent(&self.agent),
                    )
                    .await;
            }
            StreamNotification::ToolCall(record) => {
                self.events
                    .emit(
                        Event::new(
                            self.workflow_id,
                            EventType::ToolCall,
                            format!("Tool call: {}", record.tool),
                        )
                        .with_level(EventLevel::Debug)
                        .with_agent(&self.agent)
                        .with_data(serde_json::json!({
                            "id": record.id,
                            "tool": record.tool,
                            "arguments": record.arguments,
                        })),
                    )
                    .await;
            }
            StreamNotification::ToolResult { id, tool, output } => {
                self.events
                    .emit(
                        Event::new(
                            self.workflow_id,
                            EventType::ToolResult,
                            format!("Tool result: {}", tool),
                        )
                        .with_level(EventLevel::Debug)
                        .with_agent(&self.agent)
                        .with_data(serde_json::json!({
                            "id": id, "tool": tool, "output": output,
                        })),
                    )
                    .await;

                if let Some(artifact) = artifact_event_type(&tool) {
                    if let Some(path) = output["path"].as_str() {
                        self.events
                            .emit(
                                Event::new(self.workflow_id, artifact, path.to_string())
                                    .with_agent(&self.agent)
                                    .with_data(serde_json::json!({ "path": path })),
                            )
                            .await;
                    }
                }
            }
            StreamNotification::TokenUsage(update) => {
                self.events
                    .emit(
                        Event::new(self.workflow_id, EventType::TokenUsage, "Token usage")
                            .with_level(EventLevel::Debug)
                            .with_agent(&self.agent)
                            .with_data(serde_json::to_value(&update).unwrap_or_default()),
                    )
                    .await;

                if let Some(usage) = &self.usage {
                    let mut record = TokenUsageRecord::new(
                        self.workflow_id,
                        &self.agent,
                        update.model.as_deref().unwrap_or("unknown"),
                    );
                    record.input_tokens = update.input_tokens;
                    record.output_tokens = update.output_tokens;
                    record.cache_read_tokens = update.cache_read_tokens;
                    record.cache_creation_tokens = update.cache_creation_tokens;
                    record.cost_usd = update.cost_usd.unwrap_or(0.0);
                    record.num_turns = 1;
                    if let Err(err) = usage.insert(&record).await {
                        warn!(workflow_id = %self.workflow_id, error = %err, "failed to record token usage");
                    }
                }
            }
        }
    }
}

fn artifact_event_type(tool: &str) -> Option<EventType> {
    match tool {
        "write_file" | "create_file" => Some(EventType::FileCreated),
        "edit_file" | "apply_patch" => Some(EventType::FileModified),
        "delete_file" => Some(EventType::FileDeleted),
        _ => None,
    }
}

/// Map an engine error into a node failure for the runtime.
pub(crate) fn node_error(node: &str, err: impl std::fmt::Display) -> GraphError {
    GraphError::node_failed(node, err)
}

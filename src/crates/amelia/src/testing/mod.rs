//! Test support: scripted agent invoker and a static tracker.
//!
//! Shipped in the crate (not behind `cfg(test)`) so integration tests
//! and downstream consumers can drive the engine without real drivers.

use crate::error::{AmeliaError, Result};
use crate::models::{Issue, Tracker};
use crate::pipeline::AgentInvoker;
use amelia_drivers::{
    DriverError, InvokeRequest, InvokeResult, StreamNotification, StreamSink, TerminalReason,
    ToolCallRecord, UsageTotals,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One canned driver response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub output: Value,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: UsageTotals,
    pub terminal: TerminalReason,
    /// Notifications forwarded to the sink before the result returns.
    pub notifications: Vec<StreamNotification>,
    /// Simulated invocation latency, observed before returning.
    pub delay: Option<std::time::Duration>,
}

impl ScriptedResponse {
    pub fn output(output: Value) -> Self {
        Self {
            output,
            tool_calls: Vec::new(),
            usage: UsageTotals {
                input_tokens: 100,
                output_tokens: 20,
                num_turns: 1,
                ..Default::default()
            },
            terminal: TerminalReason::Completed,
            notifications: Vec::new(),
            delay: None,
        }
    }

    /// A command result with the given exit code and output text.
    pub fn command(exit_code: i32, output: impl Into<String>) -> Self {
        Self::output(serde_json::json!({
            "exit_code": exit_code,
            "output": output.into(),
        }))
    }

    pub fn with_usage(mut self, usage: UsageTotals) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_tool_call(mut self, tool: impl Into<String>, arguments: Value) -> Self {
        let record = ToolCallRecord {
            id: format!("t{}", self.tool_calls.len() + 1),
            tool: tool.into(),
            arguments,
        };
        self.notifications
            .push(StreamNotification::ToolCall(record.clone()));
        self.tool_calls.push(record);
        self
    }

    pub fn with_terminal(mut self, terminal: TerminalReason) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// [`AgentInvoker`] that pops canned responses per agent name and
/// records every request for assertions.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the named agent.
    pub fn push(&self, agent: &str, response: ScriptedResponse) {
        self.scripts
            .lock()
            .entry(agent.to_string())
            .or_default()
            .push_back(response);
    }

    /// Requests made so far.
    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().clone()
    }

    /// Number of invocations of a given agent.
    pub fn call_count(&self, agent: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.agent == agent).count()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _driver: &str,
        request: InvokeRequest,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> amelia_drivers::Result<InvokeResult> {
        self.calls.lock().push(request.clone());

        if cancel.is_cancelled() {
            return Ok(InvokeResult {
                final_output: Value::Null,
                token_usage: UsageTotals::default(),
                tool_calls: Vec::new(),
                terminal: TerminalReason::Cancelled,
            });
        }

        let response = self
            .scripts
            .lock()
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front);
        let Some(response) = response else {
            return Err(DriverError::Protocol(format!(
                "no scripted response for agent {}",
                request.agent
            )));
        };

        if let Some(delay) = response.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(InvokeResult {
                        final_output: Value::Null,
                        token_usage: UsageTotals::default(),
                        tool_calls: Vec::new(),
                        terminal: TerminalReason::Cancelled,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        for notification in response.notifications {
            sink.notify(notification).await;
        }
        sink.notify(StreamNotification::TokenUsage(amelia_drivers::UsageUpdate {
            model: request.model_hint.clone(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_read_tokens: response.usage.cache_read_tokens,
            cache_creation_tokens: response.usage.cache_creation_tokens,
            cost_usd: Some(response.usage.cost_usd),
        }))
        .await;

        Ok(InvokeResult {
            final_output: response.output,
            token_usage: response.usage,
            tool_calls: response.tool_calls,
            terminal: response.terminal,
        })
    }
}

/// [`Tracker`] serving issues from a fixed map.
#[derive(Default)]
pub struct StaticTracker {
    issues: Mutex<HashMap<String, Issue>>,
}

impl StaticTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issue(self, reference: impl Into<String>, issue: Issue) -> Self {
        self.issues.lock().insert(reference.into(), issue);
        self
    }
}

#[async_trait]
impl Tracker for StaticTracker {
    async fn fetch_issue(&self, issue_ref: &str) -> Result<Issue> {
        self.issues
            .lock()
            .get(issue_ref)
            .cloned()
            .ok_or_else(|| AmeliaError::Tracker(format!("unknown issue {}", issue_ref)))
    }
}

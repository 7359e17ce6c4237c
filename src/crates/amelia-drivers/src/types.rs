//! Shared driver request, result and streaming types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// How much autonomy the operator granted a run.
///
/// Consumed by the developer stage to decide how often to pause for
/// approval, and surfaced to drivers so agents can temper tool use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Pause for approval after every step.
    Paranoid,
    /// Pause for approval after every batch.
    #[default]
    Standard,
    /// Auto-approve low and medium risk; pause per batch on high risk.
    Autonomous,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paranoid => "paranoid",
            Self::Standard => "standard",
            Self::Autonomous => "autonomous",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for TrustLevel {
    fn from(s: &str) -> Self {
        match s {
            "paranoid" => Self::Paranoid,
            "autonomous" => Self::Autonomous,
            _ => Self::Standard,
        }
    }
}

/// A single agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Logical agent name (architect, developer, reviewer, ...).
    pub agent: String,

    /// Fully rendered prompt.
    pub prompt: String,

    /// Tools the agent may use during this invocation.
    pub tools_available: Vec<String>,

    /// Snapshot of relevant execution state handed to the agent.
    pub input_state: Value,

    /// Preferred model, overriding the driver default.
    pub model_hint: Option<String>,

    /// Soft deadline; `None` means unbounded.
    pub timeout: Option<Duration>,

    /// Trust level of the owning profile.
    pub trust_level: TrustLevel,

    /// Working directory for subprocess execution (the worktree).
    pub cwd: Option<PathBuf>,
}

impl InvokeRequest {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            tools_available: Vec::new(),
            input_state: Value::Null,
            model_hint: None,
            timeout: None,
            trust_level: TrustLevel::default(),
            cwd: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_available = tools;
        self
    }

    pub fn with_input_state(mut self, state: Value) -> Self {
        self.input_state = state;
        self
    }

    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_trust_level(mut self, trust: TrustLevel) -> Self {
        self.trust_level = trust;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Incremental token usage reported mid-invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageUpdate {
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// A tool call the agent made, kept for idempotency bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool: String,
    pub arguments: Value,
}

/// Incremental notifications streamed during an invocation.
#[derive(Debug, Clone)]
pub enum StreamNotification {
    AgentMessage { text: String },
    ToolCall(ToolCallRecord),
    ToolResult { id: String, tool: String, output: Value },
    TokenUsage(UsageUpdate),
}

/// Receives streaming notifications. Sink failures must never abort the
/// driver, so `notify` is infallible; implementations swallow their own
/// errors.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn notify(&self, notification: StreamNotification);
}

/// Sink that discards everything.
pub struct NullSink;

#[async_trait]
impl StreamSink for NullSink {
    async fn notify(&self, _notification: StreamNotification) {}
}

/// Why an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Completed,
    Cancelled,
    TimedOut,
    Error,
}

/// Aggregated token usage for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
}

impl UsageTotals {
    /// Fold one incremental update into the totals.
    pub fn absorb(&mut self, update: &UsageUpdate) {
        self.input_tokens += update.input_tokens;
        self.output_tokens += update.output_tokens;
        self.cache_read_tokens += update.cache_read_tokens;
        self.cache_creation_tokens += update.cache_creation_tokens;
        self.cost_usd += update.cost_usd.unwrap_or(0.0);
        self.num_turns += 1;
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone)]
pub struct InvokeResult {
    /// Final agent output. Structured JSON when the agent produced it,
    /// otherwise the raw text as a JSON string. Partial output is
    /// surfaced here on cancellation and timeout.
    pub final_output: Value,

    /// Aggregated token usage.
    pub token_usage: UsageTotals,

    /// Tool calls made, in order. Non-empty forbids retrying.
    pub tool_calls: Vec<ToolCallRecord>,

    /// How the invocation ended.
    pub terminal: TerminalReason,
}

impl InvokeResult {
    pub fn completed(final_output: Value) -> Self {
        Self {
            final_output,
            token_usage: UsageTotals::default(),
            tool_calls: Vec::new(),
            terminal: TerminalReason::Completed,
        }
    }

    /// Final output as text when it is a plain string.
    pub fn output_text(&self) -> Option<&str> {
        self.final_output.as_str()
    }
}

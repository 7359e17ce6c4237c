//! Agent execution drivers for the Amelia orchestration engine.
//!
//! A driver turns an [`types::InvokeRequest`] into an
//! [`types::InvokeResult`], streaming incremental telemetry (agent
//! messages, tool calls, token usage) into a [`types::StreamSink`] along
//! the way. Two backends exist as a closed sum:
//!
//! - [`subprocess::SubprocessDriver`] supervises a child CLI process per
//!   invocation, speaking newline-delimited JSON frames on stdout.
//! - [`api::ApiDriver`] makes a direct request/response call to a model
//!   provider with transient-only retry.
//!
//! **Idempotency rule:** an invocation may be retried only while no
//! tool-call notification has fired. Once the first tool call is emitted,
//! retrying is forbidden; check [`types::InvokeResult::tool_calls`]
//! before ever re-issuing a request.

pub mod api;
pub mod error;
pub mod registry;
pub mod retry;
pub mod subprocess;
pub mod truncate;
pub mod types;

pub use api::{ApiConfig, ApiDriver};
pub use error::{DriverError, Result};
pub use registry::{Driver, DriverRegistry};
pub use retry::{ErrorClass, RetryConfig};
pub use subprocess::{SubprocessConfig, SubprocessDriver};
pub use truncate::{truncate_output, MAX_OUTPUT_CHARS, MAX_OUTPUT_LINES};
pub use types::{
    InvokeRequest, InvokeResult, NullSink, StreamNotification, StreamSink, TerminalReason,
    ToolCallRecord, TrustLevel, UsageTotals, UsageUpdate,
};

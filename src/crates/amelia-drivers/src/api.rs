//! Direct model-API driver.
//!
//! A single synchronous request/response per attempt against an
//! Anthropic-style messages endpoint. Retries apply only to explicitly
//! transient error classes (connection failures, 5xx, 429 honoring
//! `Retry-After`) with bounded exponential backoff, never to 4xx. The
//! driver makes no tool calls itself, so its internal retry always
//! satisfies the no-tool-calls-fired rule.

use crate::error::{DriverError, Result};
use crate::retry::{classify, ErrorClass, RetryConfig};
use crate::types::{
    InvokeRequest, InvokeResult, StreamNotification, StreamSink, TerminalReason, UsageTotals,
    UsageUpdate,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const API_VERSION: &str = "2023-06-01";

/// Configuration for the API driver.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Provider base URL, e.g. `https://api.anthropic.com`.
    pub base_url: String,

    /// API key sent as `x-api-key`.
    pub api_key: String,

    /// Default model when the request carries no hint.
    pub model: String,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Retry strategy for transient failures.
    pub retry: RetryConfig,
}

impl ApiConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            request_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<OutboundMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

/// Driver that calls a model provider directly.
#[derive(Debug, Clone)]
pub struct ApiDriver {
    config: ApiConfig,
    client: Client,
}

impl ApiDriver {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DriverError::Transport(format!("failed to build http client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub async fn invoke(
        &self,
        request: &InvokeRequest,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        let started = Instant::now();
        let model = request.model_hint.as_deref().unwrap_or(&self.config.model);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let body = MessagesRequest {
            model,
            max_tokens: self.config.max_tokens,
            messages: vec![OutboundMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DriverError::Cancelled);
            }

            let send = self
                .client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send();

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DriverError::Cancelled),
                response = send => response,
            };

            let error = match response {
                Ok(response) if response.status().is_success() => {
                    let text = response.text().await.map_err(DriverError::from)?;
                    let parsed: MessagesResponse = serde_json::from_str(&text)
                        .map_err(|e| DriverError::Protocol(format!("malformed response: {}", e)))?;
                    let mut result = convert_response(parsed, model);
                    result.token_usage.duration_ms = started.elapsed().as_millis() as u64;

                    if let Some(text) = result.final_output.as_str() {
                        sink.notify(StreamNotification::AgentMessage {
                            text: text.to_string(),
                        })
                        .await;
                    }
                    sink.notify(StreamNotification::TokenUsage(UsageUpdate {
                        model: Some(model.to_string()),
                        input_tokens: result.token_usage.input_tokens,
                        output_tokens: result.token_usage.output_tokens,
                        cache_read_tokens: result.token_usage.cache_read_tokens,
                        cache_creation_tokens: result.token_usage.cache_creation_tokens,
                        cost_usd: None,
                    }))
                    .await;

                    // Structured output is handed through as JSON.
                    let structured = result
                        .final_output
                        .as_str()
                        .and_then(|text| serde_json::from_str::<Value>(text).ok())
                        .filter(|value| value.is_object() || value.is_array());
                    if let Some(value) = structured {
                        result.final_output = value;
                    }
                    return Ok(result);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    let message = response.text().await.unwrap_or_default();
                    DriverError::Api {
                        status,
                        message,
                        retry_after,
                    }
                }
                Err(err) => DriverError::from(err),
            };

            attempt += 1;
            let retry_after = match &error {
                DriverError::Api { retry_after, .. } => *retry_after,
                _ => None,
            };

            if classify(&error) == ErrorClass::Permanent {
                return Err(error);
            }
            if attempt >= self.config.retry.max_attempts {
                return Err(DriverError::RetriesExhausted {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = self.config.retry.backoff_delay(attempt - 1, retry_after);
            warn!(
                agent = %request.agent,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient api error, backing off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DriverError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn convert_response(response: MessagesResponse, fallback_model: &str) -> InvokeResult {
    let text: String = response
        .content
        .iter()
        .filter_map(|block| {
            if block.block_type == "text" {
                block.text.clone()
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("");

    let usage = response.usage.unwrap_or_default();
    let model = response
        .model
        .unwrap_or_else(|| fallback_model.to_string());
    debug!(%model, input = usage.input_tokens, output = usage.output_tokens, "api response");

    InvokeResult {
        final_output: Value::String(text),
        token_usage: UsageTotals {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            cost_usd: 0.0,
            duration_ms: 0,
            num_turns: 1,
        },
        tool_calls: Vec::new(),
        terminal: TerminalReason::Completed,
    }
}

//! Subprocess agent driver.
//!
//! Supervises one child CLI process per invocation: the request is handed
//! over stdin as a single JSON line, the child answers with
//! newline-delimited JSON frames on stdout which are translated into sink
//! notifications. A soft timeout sends SIGTERM and escalates to SIGKILL
//! after a grace period. Partial output produced before cancellation or
//! timeout is surfaced in the result.
//!
//! Frame protocol (one JSON object per line):
//!
//! ```text
//! {"type":"message","text":"thinking..."}
//! {"type":"tool_call","id":"t1","tool":"write_file","arguments":{...}}
//! {"type":"tool_result","id":"t1","tool":"write_file","output":{...}}
//! {"type":"usage","input_tokens":120,"output_tokens":40}
//! {"type":"result","output":{...}}
//! ```
//!
//! Lines that are not valid frames are forwarded verbatim as agent
//! messages; a chatty CLI never kills the run.

use crate::error::{DriverError, Result};
use crate::types::{
    InvokeRequest, InvokeResult, StreamNotification, StreamSink, TerminalReason, ToolCallRecord,
    UsageTotals, UsageUpdate,
};
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for the subprocess driver.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Program to execute.
    pub program: String,

    /// Fixed arguments prepended to every invocation.
    pub args: Vec<String>,

    /// Time between SIGTERM and SIGKILL.
    pub grace_period: Duration,

    /// Deadline applied when the request carries none.
    pub default_timeout: Option<Duration>,
}

impl SubprocessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            grace_period: Duration::from_secs(5),
            default_timeout: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Message {
        text: String,
    },
    ToolCall {
        id: String,
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolResult {
        id: String,
        tool: String,
        #[serde(default)]
        output: Value,
    },
    Usage(UsageUpdate),
    Result {
        output: Value,
    },
}

/// Driver that supervises a child CLI process per invocation.
#[derive(Debug, Clone)]
pub struct SubprocessDriver {
    config: SubprocessConfig,
}

impl SubprocessDriver {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    pub async fn invoke(
        &self,
        request: &InvokeRequest,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        let started = Instant::now();

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| DriverError::Spawn(format!("{}: {}", self.config.program, e)))?;
        debug!(agent = %request.agent, program = %self.config.program, "agent process spawned");

        // Hand the request over and close stdin so the child sees EOF.
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| DriverError::Spawn("stdin unavailable".to_string()))?;
            let header = serde_json::json!({
                "agent": request.agent,
                "prompt": request.prompt,
                "tools": request.tools_available,
                "model": request.model_hint,
                "trust_level": request.trust_level,
                "state": request.input_state,
            });
            let mut line = serde_json::to_string(&header)?;
            line.push('\n');
            stdin.write_all(line.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        // Drain stderr concurrently so a noisy child cannot block on a
        // full pipe while we read stdout.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer).await;
                buffer
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Spawn("stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let timeout = request.timeout.or(self.config.default_timeout);
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        let mut usage = UsageTotals::default();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut transcript = String::new();
        let mut final_output: Option<Value> = None;
        let mut terminal = TerminalReason::Completed;

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    terminal = TerminalReason::Cancelled;
                    break;
                }
                _ = sleep_until_opt(deadline) => {
                    terminal = TerminalReason::TimedOut;
                    break;
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                break; // EOF
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Frame>(&line) {
                Ok(Frame::Message { text }) => {
                    transcript.push_str(&text);
                    transcript.push('\n');
                    sink.notify(StreamNotification::AgentMessage { text }).await;
                }
                Ok(Frame::ToolCall { id, tool, arguments }) => {
                    let record = ToolCallRecord { id, tool, arguments };
                    tool_calls.push(record.clone());
                    sink.notify(StreamNotification::ToolCall(record)).await;
                }
                Ok(Frame::ToolResult { id, tool, output }) => {
                    sink.notify(StreamNotification::ToolResult { id, tool, output })
                        .await;
                }
                Ok(Frame::Usage(update)) => {
                    usage.absorb(&update);
                    sink.notify(StreamNotification::TokenUsage(update)).await;
                }
                Ok(Frame::Result { output }) => {
                    final_output = Some(output);
                }
                Err(_) => {
                    // Not a frame: forward verbatim.
                    transcript.push_str(&line);
                    transcript.push('\n');
                    sink.notify(StreamNotification::AgentMessage { text: line }).await;
                }
            }

            // Cancellation is observed after every sink event.
            if cancel.is_cancelled() {
                terminal = TerminalReason::Cancelled;
                break;
            }
        }

        if matches!(terminal, TerminalReason::Cancelled | TerminalReason::TimedOut) {
            self.terminate(&mut child).await;
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if terminal == TerminalReason::Completed {
            if final_output.is_none() {
                if status.success() {
                    final_output = Some(Value::String(transcript.trim_end().to_string()));
                } else {
                    warn!(
                        agent = %request.agent,
                        code = ?status.code(),
                        "agent process exited without a result frame"
                    );
                    terminal = TerminalReason::Error;
                }
            } else if !status.success() {
                terminal = TerminalReason::Error;
            }
        }

        // Partial output is surfaced whatever the terminal reason.
        let final_output = final_output.unwrap_or_else(|| {
            serde_json::json!({
                "partial": transcript.trim_end(),
                "stderr": tail(&stderr, 2048),
                "exit_code": status.code(),
            })
        });

        usage.duration_ms = started.elapsed().as_millis() as u64;

        Ok(InvokeResult {
            final_output,
            token_usage: usage,
            tool_calls,
            terminal,
        })
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let pid = nix::unistd::Pid::from_raw(pid as i32);
                if nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM).is_ok() {
                    if tokio::time::timeout(self.config.grace_period, child.wait())
                        .await
                        .is_ok()
                    {
                        return;
                    }
                    warn!("agent process ignored SIGTERM, escalating to SIGKILL");
                }
            }
        }
        let _ = child.start_kill();
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

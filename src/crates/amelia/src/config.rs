//! Engine configuration.
//!
//! Read once at startup; environment variables override the defaults.
//! Malformed values fall back to the default with a warning rather than
//! failing startup.

use std::time::Duration;
use tracing::warn;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global cap on concurrently running workflows.
    /// Env: `AMELIA_MAX_CONCURRENT`.
    pub max_concurrent: usize,

    /// Days to retain workflow log rows; 0 keeps them until explicit
    /// purge. Env: `AMELIA_LOG_RETENTION_DAYS`.
    pub log_retention_days: u32,

    /// Days to retain checkpoints of terminal workflows; 0 keeps them
    /// until explicit purge. Env: `AMELIA_CHECKPOINT_RETENTION_DAYS`.
    pub checkpoint_retention_days: u32,

    /// How long an admitted workflow may wait for a concurrency slot
    /// before it is failed. Env: `AMELIA_WORKFLOW_START_TIMEOUT_SECONDS`.
    pub workflow_start_timeout: Duration,

    /// Idle timeout surfaced to event-stream consumers.
    /// Env: `AMELIA_WEBSOCKET_IDLE_TIMEOUT_SECONDS`.
    pub websocket_idle_timeout: Duration,

    /// Events retained per workflow for backfill.
    pub event_ring_capacity: usize,

    /// Driver timeout for non-developer nodes.
    pub default_node_timeout: Duration,

    /// Default per-step command timeout in the developer stage.
    pub default_step_timeout: Duration,

    /// Maximum reviewer-requested revision rounds before the run
    /// completes with the last review recorded.
    pub max_review_cycles: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            log_retention_days: 30,
            checkpoint_retention_days: 0,
            workflow_start_timeout: Duration::from_secs(300),
            websocket_idle_timeout: Duration::from_secs(300),
            event_ring_capacity: 1024,
            default_node_timeout: Duration::from_secs(60),
            default_step_timeout: Duration::from_secs(120),
            max_review_cycles: 2,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: env_parse("AMELIA_MAX_CONCURRENT", defaults.max_concurrent),
            log_retention_days: env_parse("AMELIA_LOG_RETENTION_DAYS", defaults.log_retention_days),
            checkpoint_retention_days: env_parse(
                "AMELIA_CHECKPOINT_RETENTION_DAYS",
                defaults.checkpoint_retention_days,
            ),
            workflow_start_timeout: Duration::from_secs(env_parse(
                "AMELIA_WORKFLOW_START_TIMEOUT_SECONDS",
                defaults.workflow_start_timeout.as_secs(),
            )),
            websocket_idle_timeout: Duration::from_secs(env_parse(
                "AMELIA_WEBSOCKET_IDLE_TIMEOUT_SECONDS",
                defaults.websocket_idle_timeout.as_secs(),
            )),
            ..defaults
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_review_cycles(mut self, cycles: u32) -> Self {
        self.max_review_cycles = cycles;
        self
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "malformed environment value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.checkpoint_retention_days, 0);
        assert_eq!(config.event_ring_capacity, 1024);
        assert_eq!(config.default_node_timeout, Duration::from_secs(60));
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("AMELIA_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("AMELIA_TEST_PARSE", 7usize), 7);
        std::env::remove_var("AMELIA_TEST_PARSE");
    }
}

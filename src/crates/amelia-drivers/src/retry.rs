//! Retry strategy with exponential backoff and error classification.

use crate::error::DriverError;
use std::time::Duration;

/// Classification of errors for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry: connection resets, 5xx, rate limits.
    Transient,
    /// Will not succeed on retry: 4xx, protocol violations, cancellation.
    Permanent,
}

/// Classify a driver error.
pub fn classify(error: &DriverError) -> ErrorClass {
    if error.is_transient() {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Retry strategy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the first.
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Cap on the backoff delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Exponential multiplier per attempt.
    pub multiplier: f64,

    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 15_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), honoring an
    /// explicit `Retry-After` hint when present.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after {
            return Duration::from_secs(seconds);
        }

        let delay_ms =
            (self.initial_backoff_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_backoff_ms);

        let delay_ms = if self.jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(0, None), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(1, None), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(2, None), Duration::from_millis(2000));
        assert_eq!(config.backoff_delay(10, None), Duration::from_millis(15_000));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_delay(0, Some(7)), Duration::from_secs(7));
    }

    #[test]
    fn jitter_stays_bounded() {
        let config = RetryConfig::default();
        for attempt in 0..3 {
            let base = (config.initial_backoff_ms as f64
                * config.multiplier.powi(attempt as i32)) as u64;
            let delay = config.backoff_delay(attempt, None).as_millis() as u64;
            assert!(delay >= base);
            assert!(delay <= base + base / 4 + 1);
        }
    }

    #[test]
    fn classification_matches_error_taxonomy() {
        assert_eq!(
            classify(&DriverError::Transport("reset".into())),
            ErrorClass::Transient
        );
        assert_eq!(classify(&DriverError::Cancelled), ErrorClass::Permanent);
        assert_eq!(
            classify(&DriverError::Api {
                status: 400,
                message: "bad request".into(),
                retry_after: None
            }),
            ErrorClass::Permanent
        );
    }
}

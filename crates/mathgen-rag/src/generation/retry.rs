//! Retry policy for generation calls

use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::Error;

/// Which failures are retried and how long to wait between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// Cap on the computed exponential delay
    pub max_backoff: Duration,
    /// Longest server retry hint worth waiting for
    pub max_retry_hint: Duration,
}

impl RetryPolicy {
    /// Policy whose backoff starts at the configured minimum call interval
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.min_interval(),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_retry_hint: Duration::from_millis(config.max_retry_hint_ms),
        }
    }

    /// Only transient failures are retried
    pub fn is_retryable(&self, err: &Error) -> bool {
        matches!(err, Error::GenerationTransient { .. })
    }

    /// Server retry hint carried by a transient failure
    fn retry_hint(err: &Error) -> Option<Duration> {
        match err {
            Error::GenerationTransient {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Whether the server asked for a longer wait than `max_retry_hint`
    pub fn hint_exceeds_ceiling(&self, err: &Error) -> bool {
        Self::retry_hint(err).is_some_and(|hint| hint > self.max_retry_hint)
    }

    /// Delay after failed attempt number `attempt` (0-based)
    ///
    /// A server retry hint wins when it is longer than the computed delay.
    /// The hint is capped at `max_retry_hint`.
    pub fn backoff(&self, attempt: u32, err: &Error) -> Duration {
        let computed = self.exponential(attempt);
        match Self::retry_hint(err) {
            Some(hint) => computed.max(hint.min(self.max_retry_hint)),
            None => computed,
        }
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

//! Generation client: rate limiting, retries and call bookkeeping around an
//! [`LlmProvider`]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::sleep;

use crate::config::{GenerationConfig, SafetySetting, SamplingConfig};
use crate::error::{Error, Result};
use crate::providers::LlmProvider;

use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;

/// Final outcome of one `generate` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    /// Transient failures until attempts ran out
    RetriesExhausted,
    Rejected,
    ContentFiltered,
}

/// Attempt statistics exposed through health reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationStats {
    /// `generate` calls
    pub calls: u64,
    /// Provider requests, including retries
    pub attempts: u64,
    pub retries: u64,
    pub successes: u64,
    pub failures: u64,
    pub content_filtered: u64,
    pub last_outcome: Option<CallOutcome>,
    pub last_error: Option<String>,
    pub last_call_at: Option<DateTime<Utc>>,
}

/// Rate-limited, retrying generation client
pub struct GenerationClient {
    provider: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    safety: Vec<SafetySetting>,
    stats: Mutex<GenerationStats>,
}

impl GenerationClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        safety: Vec<SafetySetting>,
    ) -> Self {
        Self {
            provider,
            limiter,
            policy,
            safety,
            stats: Mutex::new(GenerationStats::default()),
        }
    }

    /// Client configured from generation settings
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &GenerationConfig) -> Self {
        Self::new(
            provider,
            Arc::new(RateLimiter::new(config.min_interval())),
            RetryPolicy::from_config(config),
            config.safety_settings.clone(),
        )
    }

    /// Model identifier of the underlying provider
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn stats(&self) -> GenerationStats {
        self.stats.lock().clone()
    }

    /// Send `prompt` and return the raw response text
    ///
    /// Transient failures are retried per the retry policy and surface as
    /// `GenerationFailed` once attempts run out. Every other failure is
    /// returned after the first attempt.
    pub async fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String> {
        {
            let mut stats = self.stats.lock();
            stats.calls += 1;
            stats.last_call_at = Some(Utc::now());
        }

        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0u32;

        loop {
            self.limiter.acquire().await;
            self.stats.lock().attempts += 1;

            let err = match self.provider.generate(prompt, sampling, &self.safety).await {
                Ok(text) => {
                    tracing::debug!(
                        "{} returned {} characters on attempt {}",
                        self.provider.name(),
                        text.chars().count(),
                        attempt + 1
                    );
                    self.record(CallOutcome::Success, None);
                    return Ok(text);
                }
                Err(e) => e,
            };

            if !self.policy.is_retryable(&err) {
                let outcome = match err {
                    Error::ContentFiltered(_) => CallOutcome::ContentFiltered,
                    _ => CallOutcome::Rejected,
                };
                tracing::error!("Generation failed without retry: {}", err);
                self.record(outcome, Some(err.to_string()));
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts || self.policy.hint_exceeds_ceiling(&err) {
                let last_error = err.to_string();
                tracing::error!(
                    "Generation failed after {} attempts: {}",
                    attempt,
                    last_error
                );
                self.record(CallOutcome::RetriesExhausted, Some(last_error.clone()));
                return Err(Error::GenerationFailed {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.policy.backoff(attempt - 1, &err);
            tracing::warn!(
                "Generation attempt {}/{} failed ({}), retrying in {:?}",
                attempt,
                max_attempts,
                err,
                delay
            );
            {
                let mut stats = self.stats.lock();
                stats.retries += 1;
                stats.last_error = Some(err.to_string());
            }
            sleep(delay).await;
        }
    }

    fn record(&self, outcome: CallOutcome, error: Option<String>) {
        let mut stats = self.stats.lock();
        match outcome {
            CallOutcome::Success => stats.successes += 1,
            CallOutcome::ContentFiltered => {
                stats.failures += 1;
                stats.content_filtered += 1;
            }
            CallOutcome::RetriesExhausted | CallOutcome::Rejected => stats.failures += 1,
        }
        stats.last_outcome = Some(outcome);
        if error.is_some() {
            stats.last_error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use futures::future::join_all;
    use std::time::Duration;

    fn client(llm: Arc<ScriptedLlm>, interval_ms: u64, max_attempts: u32) -> GenerationClient {
        GenerationClient::new(
            llm,
            Arc::new(RateLimiter::new(Duration::from_millis(interval_ms))),
            RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(interval_ms),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(200),
                max_retry_hint: Duration::from_secs(1),
            },
            GenerationConfig::default().safety_settings,
        )
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let llm = Arc::new(ScriptedLlm::new("gemini-2.5-flash").with_script(vec![
            Err(Error::transient("503")),
            Err(Error::transient("timeout")),
            Ok("done".to_string()),
        ]));
        let client = client(llm.clone(), 5, 3);

        let text = client.generate("p", &SamplingConfig::default()).await.unwrap();
        assert_eq!(text, "done");
        assert_eq!(llm.calls(), 3);

        let stats = client.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.last_outcome, Some(CallOutcome::Success));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_generation_failed() {
        let llm = Arc::new(ScriptedLlm::new("m").with_script(vec![
            Err(Error::transient("503")),
            Err(Error::transient("503")),
            Err(Error::transient("still 503")),
            Ok("too late".to_string()),
        ]));
        let client = client(llm.clone(), 5, 3);

        let err = client.generate("p", &SamplingConfig::default()).await.unwrap_err();
        match err {
            Error::GenerationFailed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("still 503"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(llm.calls(), 3);
        assert_eq!(client.stats().last_outcome, Some(CallOutcome::RetriesExhausted));
    }

    #[tokio::test]
    async fn test_long_retry_hint_fails_fast() {
        let llm = Arc::new(ScriptedLlm::new("m").with_script(vec![
            Err(Error::GenerationTransient {
                message: "quota exhausted".to_string(),
                retry_after_secs: Some(3600),
            }),
            Ok("unused".to_string()),
        ]));
        let client = client(llm.clone(), 5, 3);

        let started = std::time::Instant::now();
        let err = client.generate("p", &SamplingConfig::default()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, Error::GenerationFailed { attempts: 1, .. }));
        assert_eq!(llm.calls(), 1);
        assert_eq!(client.stats().last_outcome, Some(CallOutcome::RetriesExhausted));
    }

    #[tokio::test]
    async fn test_non_transient_failures_are_not_retried() {
        let llm = Arc::new(ScriptedLlm::new("m").with_script(vec![
            Err(Error::GenerationNonTransient("API key not valid".into())),
            Ok("unused".to_string()),
        ]));
        let client = client(llm.clone(), 5, 3);
        let err = client.generate("p", &SamplingConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::GenerationNonTransient(_)));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_content_filter_is_distinct_and_not_retried() {
        let llm = Arc::new(
            ScriptedLlm::new("m").with_script(vec![Err(Error::ContentFiltered("SAFETY".into()))]),
        );
        let client = client(llm.clone(), 5, 3);
        let err = client.generate("p", &SamplingConfig::default()).await.unwrap_err();
        assert_eq!(err.kind(), "content_filtered");
        assert_eq!(llm.calls(), 1);

        let stats = client.stats();
        assert_eq!(stats.content_filtered, 1);
        assert_eq!(stats.last_outcome, Some(CallOutcome::ContentFiltered));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_respect_min_interval() {
        let interval = Duration::from_millis(50);
        let llm = Arc::new(ScriptedLlm::always("m", "ok"));
        let client = Arc::new(client(llm.clone(), 50, 1));

        let calls = (0..5).map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.generate("p", &SamplingConfig::default()).await })
        });
        for result in join_all(calls).await {
            assert_eq!(result.unwrap().unwrap(), "ok");
        }

        let mut dispatches = llm.dispatches();
        dispatches.sort();
        assert_eq!(dispatches.len(), 5);
        // recorded inside the provider, a little after the slot was granted
        let slack = Duration::from_millis(10);
        for pair in dispatches.windows(2) {
            assert!(pair[1].duration_since(pair[0]) + slack >= interval);
        }
    }
}

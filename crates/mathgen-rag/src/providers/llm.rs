//! LLM provider trait for hosted text generation

use async_trait::async_trait;

use crate::config::{SafetySetting, SamplingConfig};
use crate::error::Result;

/// Trait for a single call to a hosted generation model
///
/// Implementations classify their failures: `Error::GenerationTransient`
/// for timeouts, quota and server errors (the caller may retry),
/// `Error::GenerationNonTransient` for rejected requests, and
/// `Error::ContentFiltered` for safety blocks. Rate limiting and retries are
/// the caller's concern.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one prompt and return the raw text response
    async fn generate(
        &self,
        prompt: &str,
        sampling: &SamplingConfig,
        safety: &[SafetySetting],
    ) -> Result<String>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}

//! Gemini client for question generation via the Generative Language API
//!
//! Authenticates with an API key and sends one `generateContent` request per
//! call. HTTP failures are classified so the generation client knows which
//! ones are worth retrying.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::{GenerationConfig, SafetySetting, SamplingConfig};
use crate::error::{Error, Result};
use crate::providers::llm::LlmProvider;

/// Finish reasons that mean the output was withheld by safety filtering
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Gemini client using API-key authentication
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Create a new Gemini client from generation settings
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.trim().to_string(),
        })
    }

    /// Get the API endpoint URL
    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationParams,
    #[serde(rename = "safetySettings", skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetyRule<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationParams {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetyRule<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Classify a non-success HTTP status
fn map_http_error(status: StatusCode, body: &str, retry_after_secs: Option<u64>) -> Error {
    let detail = truncate_body(body);
    match status.as_u16() {
        429 => Error::GenerationTransient {
            message: format!("rate limited by Gemini ({}): {}", status, detail),
            retry_after_secs: retry_after_secs.or_else(|| retry_delay_from_body(body)),
        },
        401 | 403 => Error::GenerationNonTransient(format!(
            "Gemini rejected the credential ({}): {}",
            status, detail
        )),
        408 | 500..=599 => Error::GenerationTransient {
            message: format!("Gemini server error ({}): {}", status, detail),
            retry_after_secs,
        },
        _ => Error::GenerationNonTransient(format!(
            "Gemini request rejected ({}): {}",
            status, detail
        )),
    }
}

/// Classify a transport-level failure
fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::GenerationNonTransient(format!("invalid Gemini request: {}", e))
    } else if e.is_timeout() {
        Error::transient(format!("Gemini request timed out: {}", e))
    } else {
        Error::transient(format!("Gemini request failed: {}", e))
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(300).collect()
}

/// `retryDelay` from a `google.rpc.RetryInfo` error detail, e.g. `"17s"`
fn retry_delay_from_body(body: &str) -> Option<u64> {
    static RETRY_DELAY: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RETRY_DELAY
        .get_or_init(|| Regex::new(r#""retryDelay"\s*:\s*"(\d+)(?:\.\d+)?s""#).ok())
        .as_ref()?;
    re.captures(body)?.get(1)?.as_str().parse().ok()
}

/// Retry-After header in seconds
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|s| s.ceil().max(0.0) as u64))
}

/// Pull the generated text out of a decoded response
fn extract_text(response: GenerateResponse) -> Result<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::ContentFiltered(format!("prompt blocked: {}", reason)));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(Error::transient("Gemini returned no candidates"));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return match candidate.finish_reason.as_deref() {
            Some(reason) if BLOCKED_FINISH_REASONS.contains(&reason) => {
                Err(Error::ContentFiltered(format!("response blocked: {}", reason)))
            }
            Some(reason) => Err(Error::transient(format!(
                "Gemini returned no text (finish reason {})",
                reason
            ))),
            None => Err(Error::transient("Gemini returned no text")),
        };
    }

    Ok(text)
}

#[async_trait]
impl LlmProvider for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        sampling: &SamplingConfig,
        safety: &[SafetySetting],
    ) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(Error::config("GEMINI_API_KEY is not set"));
        }

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationParams {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
                max_output_tokens: sampling.max_output_tokens,
            },
            safety_settings: safety
                .iter()
                .map(|s| SafetyRule {
                    category: &s.category,
                    threshold: &s.threshold,
                })
                .collect(),
        };

        tracing::debug!("Sending {}-character prompt to {}", prompt.chars().count(), self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body, retry_after));
        }

        let body = response.text().await.map_err(map_transport_error)?;
        let decoded: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| Error::transient(format!("Failed to parse Gemini response: {}", e)))?;

        extract_text(decoded)
    }

    async fn health_check(&self) -> Result<bool> {
        if self.api_key.is_empty() {
            return Ok(false);
        }
        let url = format!("{}/models/{}", self.base_url, self.model);
        match self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = map_http_error(StatusCode::TOO_MANY_REQUESTS, "", Some(7));
        assert!(matches!(
            err,
            Error::GenerationTransient {
                retry_after_secs: Some(7),
                ..
            }
        ));

        let err = map_http_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded", None);
        assert!(matches!(err, Error::GenerationTransient { .. }));

        let err = map_http_error(StatusCode::FORBIDDEN, "API key not valid", None);
        assert!(matches!(err, Error::GenerationNonTransient(_)));

        let err = map_http_error(StatusCode::BAD_REQUEST, "bad", None);
        assert!(matches!(err, Error::GenerationNonTransient(_)));
    }

    #[test]
    fn test_retry_delay_from_error_body() {
        let body = r#"{"error":{"code":429,"details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"17s"}]}}"#;
        let err = map_http_error(StatusCode::TOO_MANY_REQUESTS, body, None);
        assert!(matches!(
            err,
            Error::GenerationTransient {
                retry_after_secs: Some(17),
                ..
            }
        ));
        assert_eq!(parse_retry_after(" 3 "), Some(3));
        assert_eq!(parse_retry_after("1.5"), Some(2));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"QUESTION 1: "},{"text":"x"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "QUESTION 1: x");
    }

    #[test]
    fn test_safety_block_is_content_filtered() {
        let prompt_blocked: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert!(matches!(
            extract_text(prompt_blocked),
            Err(Error::ContentFiltered(_))
        ));

        let output_blocked: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(matches!(
            extract_text(output_blocked),
            Err(Error::ContentFiltered(_))
        ));

        let empty = GenerateResponse::default();
        assert!(matches!(
            extract_text(empty),
            Err(Error::GenerationTransient { .. })
        ));
    }

    #[test]
    fn test_request_shape() {
        let sampling = SamplingConfig::default();
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationParams {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
                max_output_tokens: sampling.max_output_tokens,
            },
            safety_settings: vec![SafetyRule {
                category: "HARM_CATEGORY_HARASSMENT",
                threshold: "BLOCK_NONE",
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 16384);
        assert_eq!(value["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }
}

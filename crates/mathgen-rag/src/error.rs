//! Error types for the question generation pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
///
/// Non-fatal conditions (degraded retrieval, short question counts) are not
/// errors; they are reported through the result types instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (e.g. no generation credential)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding model unavailable or inference failed
    #[error("Embedding generation failed: {0}")]
    Encoding(String),

    /// Vector index storage corrupt or unreadable
    #[error("Vector index error: {0}")]
    Index(String),

    /// Transient generation failure (timeout, 5xx, quota); retried by the client
    #[error("Transient generation failure: {message}")]
    GenerationTransient {
        message: String,
        /// Server-provided retry hint in seconds, if any
        retry_after_secs: Option<u64>,
    },

    /// Retries exhausted on transient failures
    #[error("Generation failed after {attempts} attempts: {last_error}")]
    GenerationFailed { attempts: u32, last_error: String },

    /// Non-transient generation failure (invalid key, malformed request)
    #[error("Generation rejected: {0}")]
    GenerationNonTransient(String),

    /// Response blocked by content-safety filtering
    #[error("Content filtered by safety settings: {0}")]
    ContentFiltered(String),

    /// No usable question/solution/answer triple in the model output
    #[error("Could not extract any question from a {response_chars}-character response")]
    Parse { response_chars: usize },

    /// Generation requested before the pipeline was ever initialized
    #[error("RAG system is not initialized")]
    NotInitialized,

    /// Request failed validation before any external call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Create an index error
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    /// Create a transient generation error without a retry hint
    pub fn transient(message: impl Into<String>) -> Self {
        Self::GenerationTransient {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable, machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration_error",
            Error::Encoding(_) => "encoding_error",
            Error::Index(_) => "index_error",
            Error::GenerationTransient { .. } => "generation_transient",
            Error::GenerationFailed { .. } => "generation_failed",
            Error::GenerationNonTransient(_) => "generation_non_transient",
            Error::ContentFiltered(_) => "content_filtered",
            Error::Parse { .. } => "parse_error",
            Error::NotInitialized => "not_initialized",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Database(_) => "database_error",
            Error::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::ContentFiltered(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Parse { .. } => StatusCode::BAD_GATEWAY,
            Error::GenerationTransient { .. } | Error::GenerationFailed { .. } | Error::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::GenerationNonTransient(_) => StatusCode::BAD_GATEWAY,
            Error::NotInitialized | Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_for_generation_failures() {
        let kinds = [
            Error::transient("timeout").kind(),
            Error::GenerationFailed { attempts: 3, last_error: "503".into() }.kind(),
            Error::GenerationNonTransient("bad key".into()).kind(),
            Error::ContentFiltered("SAFETY".into()).kind(),
            Error::Parse { response_chars: 10 }.kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::InvalidRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotInitialized.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::config("no key").status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

//! Configuration for the question generation pipeline
//!
//! Values come from built-in defaults, an optional TOML file named by
//! `MATHGEN_CONFIG`, and environment variables (highest precedence).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// HTTP adapter configuration
    pub server: ServerConfig,
    /// Corpus file locations
    pub corpus: CorpusConfig,
    /// Embedding model configuration
    pub embeddings: EmbeddingConfig,
    /// Vector index storage
    pub vector_db: VectorDbConfig,
    /// Context retrieval tuning
    pub retrieval: RetrievalConfig,
    /// Hosted generation model configuration
    pub generation: GenerationConfig,
    /// Topic catalog override
    pub topics: TopicsConfig,
}

impl RagConfig {
    /// Load configuration from `MATHGEN_CONFIG` (if set) and the environment
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("MATHGEN_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.generation.api_key = key.trim().to_string();
        }
        if let Some(model) = lookup("MATHGEN_GENERATION_MODEL") {
            self.generation.model = model;
        }
        if let Some(v) = lookup("MATHGEN_MIN_INTERVAL_MS") {
            self.generation.min_interval_ms = parse_env("MATHGEN_MIN_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("MATHGEN_TEMPERATURE") {
            self.generation.sampling.temperature = parse_env("MATHGEN_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("MATHGEN_TOP_P") {
            self.generation.sampling.top_p = parse_env("MATHGEN_TOP_P", &v)?;
        }
        if let Some(v) = lookup("MATHGEN_TOP_K") {
            self.generation.sampling.top_k = parse_env("MATHGEN_TOP_K", &v)?;
        }
        if let Some(v) = lookup("MATHGEN_MAX_OUTPUT_TOKENS") {
            self.generation.sampling.max_output_tokens =
                parse_env("MATHGEN_MAX_OUTPUT_TOKENS", &v)?;
        }
        if let Some(model) = lookup("MATHGEN_EMBEDDING_MODEL") {
            self.embeddings.model = model;
        }
        if let Some(backend) = lookup("MATHGEN_EMBEDDING_BACKEND") {
            self.embeddings.backend = match backend.to_lowercase().as_str() {
                "onnx" => EmbeddingBackend::Onnx,
                "ollama" => EmbeddingBackend::Ollama,
                other => {
                    return Err(Error::Config(format!(
                        "MATHGEN_EMBEDDING_BACKEND must be 'onnx' or 'ollama' (got '{}')",
                        other
                    )))
                }
            };
        }
        if let Some(path) = lookup("MATHGEN_INDEX_PATH") {
            self.vector_db.storage_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("MATHGEN_DATA_DIR") {
            self.corpus.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("MATHGEN_HOST") {
            self.server.host = host;
        }
        if let Some(v) = lookup("MATHGEN_PORT") {
            self.server.port = parse_env("MATHGEN_PORT", &v)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, value)))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
        }
    }
}

/// Corpus file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Directory holding the extracted JSON files
    pub data_dir: PathBuf,
    pub examples_file: String,
    pub exercises_file: String,
    pub paragraphs_file: String,
    pub guidelines_file: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/extracted_text"),
            examples_file: "extracted_examples.json".to_string(),
            exercises_file: "extracted_exercises.json".to_string(),
            paragraphs_file: "paragraphs_and_tables.json".to_string(),
            guidelines_file: "guidelines.json".to_string(),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local ONNX Runtime inference
    #[default]
    Onnx,
    /// Local Ollama server
    Ollama,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Sentence-transformers model identifier
    pub model: String,
    /// Embedding dimensions (768 for multilingual mpnet)
    pub dimensions: usize,
    /// Batch size for embedding generation
    pub batch_size: usize,
    /// Maximum sequence length in tokens
    pub max_length: usize,
    /// Cache directory for downloaded models
    pub cache_dir: PathBuf,
    /// Ollama base URL (ollama backend only)
    pub ollama_url: String,
    /// Request timeout for remote backends
    pub timeout_secs: u64,
    /// Retries for transient embedding failures
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Onnx,
            model: "paraphrase-multilingual-mpnet-base-v2".to_string(),
            dimensions: 768,
            batch_size: 32,
            max_length: 256,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mathgen-rag")
                .join("models"),
            ollama_url: "http://localhost:11434".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Vector index storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// SQLite file holding the persisted index
    pub storage_path: PathBuf,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        let storage_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mathgen-rag")
            .join("index.db");
        Self { storage_path }
    }
}

/// Context retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Fragments placed in the prompt context
    pub max_fragments: usize,
    /// Fragments below this cosine similarity are ignored
    pub min_similarity: f32,
    /// Total context budget in characters
    pub max_context_chars: usize,
    /// Per-fragment budget in characters
    pub max_fragment_chars: usize,
    /// Candidates fetched per slot before category biasing
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_fragments: 6,
            min_similarity: 0.2,
            max_context_chars: 4000,
            max_fragment_chars: 500,
            candidate_multiplier: 3,
        }
    }
}

/// Sampling parameters sent with every generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 16384,
        }
    }
}

/// One content-safety rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn new(category: &str, threshold: &str) -> Self {
        Self {
            category: category.to_string(),
            threshold: threshold.to_string(),
        }
    }
}

fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|category| SafetySetting::new(category, "BLOCK_NONE"))
    .collect()
}

/// Hosted generation model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// API credential (from `GEMINI_API_KEY`)
    #[serde(skip_serializing)]
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Minimum spacing between outbound calls in milliseconds
    pub min_interval_ms: u64,
    /// Sampling parameters
    pub sampling: SamplingConfig,
    /// Content-safety rules
    pub safety_settings: Vec<SafetySetting>,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Upper bound on a single backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Longest server retry hint honoured in milliseconds; longer hints fail the call
    pub max_retry_hint_ms: u64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Generation rounds per request
    pub max_rounds: u32,
    /// Extra questions asked for per round to absorb parse losses
    pub extra_per_round: usize,
    /// Language the questions are written in
    pub output_language: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            min_interval_ms: 2000,
            sampling: SamplingConfig::default(),
            safety_settings: default_safety_settings(),
            max_attempts: 3,
            max_backoff_ms: 30_000,
            max_retry_hint_ms: 60_000,
            timeout_secs: 120,
            max_rounds: 3,
            extra_per_round: 2,
            output_language: "Sinhala".to_string(),
        }
    }
}

impl GenerationConfig {
    /// Minimum spacing between outbound calls
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Whether a credential has been provided
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Topic catalog override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// TOML file with additional or replacement topic definitions
    pub catalog_path: Option<PathBuf>,
}

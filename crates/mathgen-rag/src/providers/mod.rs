//! Provider abstractions for embeddings and hosted generation
//!
//! The orchestrator only sees these traits, so the ONNX encoder, the Ollama
//! encoder and the Gemini client can be swapped for fakes in tests.

pub mod embedding;
pub mod gemini;
pub mod llm;
pub mod ollama;

pub use embedding::EmbeddingProvider;
pub use gemini::GeminiClient;
pub use llm::LlmProvider;
pub use ollama::OllamaEmbedder;

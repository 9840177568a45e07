//! Embedding provider trait for generating text embeddings

use async_trait::async_trait;

use crate::error::Result;

/// Trait for turning text into fixed-dimension vectors
///
/// Implementations:
/// - `OnnxEncoder`: local multilingual sentence-transformer via ONNX Runtime
/// - `OllamaEmbedder`: local Ollama server
///
/// Every vector returned by one provider instance has the same length, and
/// the same input text always maps to the same vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    ///
    /// Default implementation calls `embed` sequentially.
    /// Implementations should override for better performance.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get embedding dimensions (768 for paraphrase-multilingual-mpnet-base-v2)
    fn dimensions(&self) -> usize;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Model identifier, persisted alongside the index
    fn model(&self) -> &str;
}

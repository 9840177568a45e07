//! Text encoders and vector helpers

pub mod onnx;

pub use onnx::OnnxEncoder;

use std::sync::Arc;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::Result;
use crate::providers::{EmbeddingProvider, OllamaEmbedder};

/// Build the configured encoder backend
pub async fn build_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend {
        EmbeddingBackend::Onnx => Ok(Arc::new(OnnxEncoder::new(config).await?)),
        EmbeddingBackend::Ollama => Ok(Arc::new(OllamaEmbedder::new(config)?)),
    }
}

/// Scale a vector to unit length in place (zero vectors are left alone)
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

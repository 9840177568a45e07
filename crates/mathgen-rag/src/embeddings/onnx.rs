//! ONNX-based embedding generation
//!
//! Runs paraphrase-multilingual-mpnet-base-v2 locally, which maps Sinhala
//! and English text into the same 768-dimensional space. Model and tokenizer
//! are fetched from the sentence-transformers hub repo on first use.

use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;

/// Loaded model state, used from one blocking thread at a time
struct OnnxModel {
    session: Session,
    tokenizer: Tokenizer,
    /// Whether the graph declares a `token_type_ids` input (BERT does, MPNet does not)
    uses_token_types: bool,
    dimensions: usize,
    max_length: usize,
    batch_size: usize,
}

/// ONNX-based text encoder
pub struct OnnxEncoder {
    model: Arc<Mutex<OnnxModel>>,
    model_name: String,
    dimensions: usize,
}

impl OnnxEncoder {
    /// Create a new ONNX encoder, downloading model files if needed
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        tracing::info!("Initializing ONNX encoder with model: {}", config.model);

        let model_dir = config.cache_dir.join(&config.model);
        std::fs::create_dir_all(&model_dir).map_err(|e| {
            Error::encoding(format!("Failed to create model cache directory: {}", e))
        })?;

        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            download_file(&config.model, "onnx/model.onnx", &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download_file(&config.model, "tokenizer.json", &tokenizer_path).await?;
        }

        let threads = num_cpus::get().clamp(1, 8);
        let session = Session::builder()
            .map_err(|e| Error::encoding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::encoding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(threads)
            .map_err(|e| Error::encoding(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::encoding(format!("Failed to load model: {}", e)))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::encoding(format!("Failed to load tokenizer: {}", e)))?;

        let uses_token_types = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        tracing::info!(
            "ONNX encoder ready ({} threads, token types: {})",
            threads,
            uses_token_types
        );

        Ok(Self {
            model: Arc::new(Mutex::new(OnnxModel {
                session,
                tokenizer,
                uses_token_types,
                dimensions: config.dimensions,
                max_length: config.max_length,
                batch_size: config.batch_size.max(1),
            })),
            model_name: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    async fn run_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.lock().embed_batch(&texts))
            .await
            .map_err(|e| Error::encoding(format!("Embedding task failed: {}", e)))?
    }
}

impl OnnxModel {
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all_embeddings.extend(self.embed_chunk(batch)?);
        }
        Ok(all_embeddings)
    }

    fn embed_chunk(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::encoding(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_length)
            .max(1);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len().min(max_len) {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
                token_type_ids[i * max_len + j] = types[j] as i64;
            }
        }

        let shape = vec![batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| Error::encoding(format!("Input tensor creation failed: {}", e)))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
                .map_err(|e| {
                    Error::encoding(format!("Attention mask tensor creation failed: {}", e))
                })?;

        let mut inputs = vec![
            ("input_ids", input_ids_tensor.into_dyn()),
            ("attention_mask", attention_mask_tensor.into_dyn()),
        ];
        if self.uses_token_types {
            let token_type_tensor =
                Tensor::from_array((shape, token_type_ids.into_boxed_slice())).map_err(|e| {
                    Error::encoding(format!("Token type tensor creation failed: {}", e))
                })?;
            inputs.push(("token_type_ids", token_type_tensor.into_dyn()));
        }

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| Error::encoding(format!("Inference failed: {}", e)))?;

        let output_iter: Vec<_> = outputs.iter().collect();
        let output = output_iter
            .iter()
            .find(|(name, _)| *name == "last_hidden_state")
            .or_else(|| output_iter.first())
            .map(|(_, v)| v)
            .ok_or_else(|| Error::encoding("No output tensor"))?;

        let (tensor_shape, tensor_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::encoding(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = tensor_shape.iter().map(|&d| d as usize).collect();
        let hidden_size = dims.get(2).copied().unwrap_or(self.dimensions);
        if hidden_size != self.dimensions {
            return Err(Error::encoding(format!(
                "Model produced {} dimensions, expected {}",
                hidden_size, self.dimensions
            )));
        }

        Ok((0..batch_size)
            .map(|i| {
                mean_pool(
                    tensor_data,
                    &attention_mask[i * max_len..(i + 1) * max_len],
                    i * max_len * hidden_size,
                    hidden_size,
                )
            })
            .collect())
    }
}

/// Attention-masked mean pooling followed by L2 normalization
fn mean_pool(hidden: &[f32], mask: &[i64], offset: usize, hidden_size: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for (j, &m) in mask.iter().enumerate() {
        if m == 0 {
            continue;
        }
        let start = offset + j * hidden_size;
        if let Some(row) = hidden.get(start..start + hidden_size) {
            for (acc, v) in sum.iter_mut().zip(row) {
                *acc += v;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut sum {
            *val /= count;
        }
    }

    crate::embeddings::normalize(&mut sum);
    sum
}

/// Download one file from the sentence-transformers hub repo
async fn download_file(model_name: &str, remote_path: &str, path: &Path) -> Result<()> {
    let url = format!(
        "https://huggingface.co/sentence-transformers/{}/resolve/main/{}",
        model_name, remote_path
    );

    tracing::info!("Downloading {}", url);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| Error::encoding(format!("Failed to download {}: {}", remote_path, e)))?;

    if !response.status().is_success() {
        return Err(Error::encoding(format!(
            "Download of {} failed: HTTP {}",
            remote_path,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::encoding(format!("Failed to read {}: {}", remote_path, e)))?;

    // Renamed into place once complete; only finished files count as cached
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, path).await?;

    tracing::info!("Downloaded {} ({} bytes)", remote_path, bytes.len());

    Ok(())
}

#[async_trait]
impl EmbeddingProvider for OnnxEncoder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run_blocking(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::encoding("Empty embedding result"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_blocking(texts.to_vec()).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.embed("health").await.is_ok())
    }

    fn name(&self) -> &str {
        "onnx"
    }

    fn model(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_ignores_padding() {
        // two tokens of width 2, second is padding
        let hidden = [3.0, 4.0, 100.0, 100.0];
        let pooled = mean_pool(&hidden, &[1, 0], 0, 2);
        assert!((pooled[0] - 0.6).abs() < 1e-6);
        assert!((pooled[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_mean_pool_all_masked_is_zero() {
        let pooled = mean_pool(&[1.0, 1.0], &[0], 0, 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }
}

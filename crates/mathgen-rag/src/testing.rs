//! Deterministic fakes for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::Instant;

use crate::config::{SafetySetting, SamplingConfig};
use crate::embeddings::normalize;
use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, LlmProvider};

/// Bag-of-words encoder: each whitespace token is hashed into a bucket
pub struct HashingEmbedder {
    dimensions: usize,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::encoding("model unavailable"));
        }
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            vector[self.bucket(token)] += 1.0;
        }
        normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail.load(Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "hashing-test"
    }
}

/// LLM fake that replays scripted outcomes and records every call
pub struct ScriptedLlm {
    model: String,
    script: Mutex<VecDeque<Result<String>>>,
    /// Returned once the script runs out
    fallback: Option<String>,
    calls: AtomicUsize,
    dispatches: Mutex<Vec<Instant>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
            dispatches: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `response`
    pub fn always(model: &str, response: &str) -> Self {
        Self {
            fallback: Some(response.to_string()),
            ..Self::new(model)
        }
    }

    /// Queue outcomes returned in order
    pub fn with_script(self, outcomes: Vec<Result<String>>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> Vec<Instant> {
        self.dispatches.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(
        &self,
        prompt: &str,
        _sampling: &SamplingConfig,
        _safety: &[SafetySetting],
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatches.lock().push(Instant::now());
        self.prompts.lock().push(prompt.to_string());

        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => outcome,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| Error::transient("script exhausted")),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// A well-formed response with `count` questions numbered from `start`
pub fn formatted_response(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| {
            format!(
                "QUESTION {n}:\nනිමල් රු. {amount} ක ණයක් වාර්ෂික 10% පොලියට ලබා ගනී. වසර 2 කට පසු පොලිය කීයද?\n\n\
                 SOLUTION:\nපියවර 1: වාර්ෂික පොලිය = {amount} × 10/100\nපියවර 2: මුළු පොලිය = වාර්ෂික පොලිය × 2\n\n\
                 ANSWER: රු. {interest}\n",
                n = n,
                amount = 10_000 * n,
                interest = 2_000 * n
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

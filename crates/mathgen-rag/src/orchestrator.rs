//! RAG orchestrator: owns the pipeline lifecycle and coordinates
//! retrieve → compose → generate → parse for each request
//!
//! One instance is shared by every request handler. Lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──▶ Loading ──▶ Ready
//!                                  │   ◀──reload── Ready / Degraded
//!                                  └──▶ Degraded (some corpus files failed)
//! ```
//!
//! While a reload is `Loading`, requests keep being served from the previous
//! index snapshot if one was ever completed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};

use crate::config::RagConfig;
use crate::corpus::{CorpusLoad, CorpusStore};
use crate::embeddings::build_encoder;
use crate::error::{Error, Result};
use crate::generation::{parse, GenerationClient, GenerationStats, PromptComposer};
use crate::index::{IndexMeta, VectorIndex};
use crate::providers::{EmbeddingProvider, GeminiClient, LlmProvider};
use crate::retrieval::{ContextRetriever, RetrievalResult};
use crate::topics::{TopicCatalog, TopicConfig};
use crate::types::{
    CorpusFragment, Difficulty, GeneratedQuestion, GenerationOutcome, GenerationRequest,
    SourceCategory,
};

/// Lifecycle state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    /// Serving, but part of the corpus failed to load
    Degraded,
}

impl LifecycleState {
    fn is_serving(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

/// Process-wide health state; only the orchestrator mutates it
#[derive(Debug, Clone)]
struct SystemHealth {
    state: LifecycleState,
    /// Last completed state, kept while a reload is in progress
    serving: Option<LifecycleState>,
    data_loaded_counts: BTreeMap<SourceCategory, usize>,
    last_error: Option<String>,
    /// Configuration problem that rejects every request until fixed
    config_error: Option<String>,
    initialized_at: Option<DateTime<Utc>>,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            serving: None,
            data_loaded_counts: SourceCategory::ALL.iter().map(|c| (*c, 0)).collect(),
            last_error: None,
            config_error: None,
            initialized_at: None,
        }
    }
}

/// Health surface exposed to the HTTP adapter
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `Ready`, `Degraded` or `Uninitialized`; a reload reports the state it is serving
    pub status: LifecycleState,
    /// True while a (re)initialization is running
    pub reloading: bool,
    pub data_loaded_counts: BTreeMap<SourceCategory, usize>,
    pub last_error: Option<String>,
    pub index_entries: usize,
    pub corpus_version: Option<String>,
    pub embedding_model: Option<String>,
    pub generation_model: String,
    pub generation: GenerationStats,
    pub initialized_at: Option<DateTime<Utc>>,
}

/// Shared question generation service
#[derive(Clone)]
pub struct RagOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: RagConfig,
    /// Built on first initialization unless injected
    encoder: OnceCell<Arc<dyn EmbeddingProvider>>,
    index: Arc<VectorIndex>,
    client: GenerationClient,
    composer: PromptComposer,
    topics: RwLock<TopicCatalog>,
    health: RwLock<SystemHealth>,
    /// Serializes initialization runs; generation never takes it
    reload_lock: Mutex<()>,
}

impl RagOrchestrator {
    /// Create the orchestrator with the configured providers
    ///
    /// The embedding model is loaded by `initialize`, not here.
    pub fn new(config: RagConfig) -> Result<Self> {
        let llm: Arc<dyn LlmProvider> = Arc::new(GeminiClient::new(&config.generation)?);

        let index = match VectorIndex::open(&config.vector_db.storage_path) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(
                    "Could not open index at {} ({}), using an in-memory index",
                    config.vector_db.storage_path.display(),
                    e
                );
                VectorIndex::in_memory()
            }
        };

        let topics = TopicCatalog::load(config.topics.catalog_path.as_deref())?;
        tracing::info!("Topic catalog ready with {} topics", topics.len());

        Ok(Self::build(config, OnceCell::new(), llm, Arc::new(index), topics))
    }

    /// Create the orchestrator around explicit providers
    pub fn with_providers(
        config: RagConfig,
        encoder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self::build(
            config,
            OnceCell::new_with(Some(encoder)),
            llm,
            index,
            TopicCatalog::builtin(),
        )
    }

    fn build(
        config: RagConfig,
        encoder: OnceCell<Arc<dyn EmbeddingProvider>>,
        llm: Arc<dyn LlmProvider>,
        index: Arc<VectorIndex>,
        topics: TopicCatalog,
    ) -> Self {
        let client = GenerationClient::from_config(llm, &config.generation);
        let composer = PromptComposer::new(config.generation.output_language.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                encoder,
                index,
                client,
                composer,
                topics: RwLock::new(topics),
                health: RwLock::new(SystemHealth::default()),
                reload_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.health.read().state
    }

    /// Load the corpus and (re)build the index
    ///
    /// With `load_data = false` only the credential and encoder are checked
    /// and the current index is kept. On failure the previously completed
    /// state, if any, stays in service.
    pub async fn initialize(&self, load_data: bool) -> Result<()> {
        let _reload = self.inner.reload_lock.lock().await;

        if !self.inner.config.generation.has_credential() {
            let message = "GEMINI_API_KEY is not set".to_string();
            let err = Error::Config(message.clone());
            tracing::error!("Initialization failed: {}", err);
            let mut health = self.inner.health.write();
            health.state = LifecycleState::Uninitialized;
            health.serving = None;
            health.config_error = Some(message);
            health.last_error = Some(err.to_string());
            return Err(err);
        }

        let previous = {
            let mut health = self.inner.health.write();
            health.config_error = None;
            health.state = LifecycleState::Loading;
            health.serving
        };
        tracing::info!("Initializing RAG system (load_data: {})", load_data);

        match self.load(load_data).await {
            Ok(load) => {
                let mut health = self.inner.health.write();
                let state = if load.as_ref().is_some_and(CorpusLoad::is_partial) {
                    LifecycleState::Degraded
                } else {
                    LifecycleState::Ready
                };
                health.last_error = match load.as_ref() {
                    Some(load) if load.is_partial() => Some(load.failures.join("; ")),
                    _ => None,
                };
                if let Some(load) = load {
                    health.data_loaded_counts = load.counts;
                }
                health.state = state;
                health.serving = Some(state);
                health.initialized_at = Some(Utc::now());
                tracing::info!(
                    "RAG system {:?} with {} indexed fragments",
                    state,
                    self.inner.index.len()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Initialization failed: {}", e);
                let mut health = self.inner.health.write();
                health.state = previous.unwrap_or(LifecycleState::Uninitialized);
                health.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn encoder(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        let config = &self.inner.config.embeddings;
        self.inner
            .encoder
            .get_or_try_init(|| async {
                tracing::info!("Loading embedding model {}", config.model);
                build_encoder(config).await.map_err(as_encoding_error)
            })
            .await
    }

    async fn load(&self, load_data: bool) -> Result<Option<CorpusLoad>> {
        let encoder = Arc::clone(self.encoder().await?);
        if !load_data {
            return Ok(None);
        }

        let store = CorpusStore::new(self.inner.config.corpus.clone());
        let load = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| Error::internal(format!("Corpus load task failed: {}", e)))?;

        for (category, count) in &load.counts {
            tracing::info!("  - {}: {}", category, count);
        }

        let expected = IndexMeta {
            corpus_version: load.version.clone(),
            count: load.fragments.len(),
            model: encoder.model().to_string(),
            dimensions: encoder.dimensions(),
        };

        let index = Arc::clone(&self.inner.index);
        let check = expected.clone();
        let reused = tokio::task::spawn_blocking(move || index.load_persisted(&check))
            .await
            .map_err(|e| Error::internal(format!("Index load task failed: {}", e)))?;

        match reused {
            Ok(true) => return Ok(Some(load)),
            Ok(false) => {}
            Err(e) => tracing::warn!("Persisted index unusable ({}), rebuilding", e),
        }

        let items = self.embed_fragments(encoder.as_ref(), &load.fragments).await?;
        let index = Arc::clone(&self.inner.index);
        tokio::task::spawn_blocking(move || index.rebuild(items, expected))
            .await
            .map_err(|e| Error::internal(format!("Index rebuild task failed: {}", e)))??;

        Ok(Some(load))
    }

    /// Embed every fragment in batches, preserving order
    async fn embed_fragments(
        &self,
        encoder: &dyn EmbeddingProvider,
        fragments: &[CorpusFragment],
    ) -> Result<Vec<(CorpusFragment, Vec<f32>)>> {
        let batch_size = self.inner.config.embeddings.batch_size.max(1);
        let mut items = Vec::with_capacity(fragments.len());

        for (i, batch) in fragments.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();
            let vectors = encoder.embed_batch(&texts).await.map_err(as_encoding_error)?;
            if vectors.len() != batch.len() {
                return Err(Error::encoding(format!(
                    "encoder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            items.extend(batch.iter().cloned().zip(vectors));
            tracing::debug!("Embedded batch {} ({} fragments)", i + 1, batch.len());
        }

        tracing::info!("Embedded {} fragments with {}", items.len(), encoder.model());
        Ok(items)
    }

    fn ensure_serving(&self) -> Result<()> {
        let health = self.inner.health.read();
        if let Some(message) = &health.config_error {
            return Err(Error::Config(message.clone()));
        }
        let serving = health.state.is_serving()
            || (health.state == LifecycleState::Loading && health.serving.is_some());
        if serving {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Generate up to `num_questions` questions on `topic`
    ///
    /// Runs up to `generation.max_rounds` rounds, asking for a few extra
    /// questions each round and dropping near-duplicates. Returns a partial
    /// result when later rounds fail; fails only when nothing was produced.
    pub async fn generate_questions(
        &self,
        topic: &str,
        difficulty: Difficulty,
        num_questions: usize,
    ) -> Result<GenerationOutcome> {
        let request = GenerationRequest::new(topic, difficulty, num_questions)?;
        self.ensure_serving()?;

        let start = Instant::now();
        let topic = request.topic().to_string();
        tracing::info!(
            "Generating {} {} questions on '{}'",
            num_questions,
            difficulty,
            topic
        );

        let retrieval = self.retrieve(&topic, difficulty).await;
        let rag_context_used = !retrieval.is_empty();
        let guidance = self.inner.topics.read().resolve(&topic, difficulty);

        let config = &self.inner.config.generation;
        let mut questions: Vec<GeneratedQuestion> = Vec::with_capacity(num_questions);
        let mut seen = HashSet::new();

        for round in 1..=config.max_rounds.max(1) {
            let remaining = num_questions - questions.len();
            if remaining == 0 {
                break;
            }

            let ask = (remaining + config.extra_per_round).min(GenerationRequest::MAX_QUESTIONS);
            let round_request = GenerationRequest::new(&topic, difficulty, ask)?
                .with_context(retrieval.context.clone());
            let prompt = self
                .inner
                .composer
                .compose(&round_request, &guidance, questions.len() + 1);

            let parsed = match self.inner.client.generate(&prompt, &config.sampling).await {
                Ok(raw) => parse(&raw, ask).into_result(),
                Err(e) => Err(e),
            };
            let parsed = match parsed {
                Ok(parsed) => parsed,
                Err(e) if questions.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Round {} failed ({}), returning {} questions",
                        round,
                        e,
                        questions.len()
                    );
                    break;
                }
            };

            let before = questions.len();
            for question in parsed {
                if questions.len() == num_questions {
                    break;
                }
                if seen.insert(question.dedup_key()) {
                    questions.push(question);
                }
            }
            tracing::info!(
                "Round {}: {} new questions ({}/{})",
                round,
                questions.len() - before,
                questions.len(),
                num_questions
            );
        }

        if questions.len() < num_questions {
            tracing::warn!(
                "Generated {} of {} requested questions",
                questions.len(),
                num_questions
            );
        }

        Ok(GenerationOutcome {
            topic,
            difficulty,
            count: questions.len(),
            questions,
            requested: num_questions,
            generation_time_seconds: start.elapsed().as_secs_f64(),
            rag_context_used,
            model_used: self.inner.client.model().to_string(),
            generated_at: Utc::now(),
        })
    }

    /// Context for a request; failures degrade to no context
    async fn retrieve(&self, topic: &str, difficulty: Difficulty) -> RetrievalResult {
        let Some(encoder) = self.inner.encoder.get() else {
            return RetrievalResult::empty();
        };
        let retriever = ContextRetriever::new(
            Arc::clone(encoder),
            Arc::clone(&self.inner.index),
            self.inner.config.retrieval.clone(),
        );
        match retriever
            .retrieve(topic, difficulty, self.inner.config.retrieval.max_fragments)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Retrieval failed, generating without context: {}", e);
                RetrievalResult::empty()
            }
        }
    }

    /// Register or replace a topic in the catalog
    pub fn add_topic(&self, topic: TopicConfig) -> Result<()> {
        self.inner.topics.write().add_topic(topic)
    }

    /// Names of every configured topic
    pub fn available_topics(&self) -> Vec<String> {
        self.inner.topics.read().available_topics()
    }

    /// Snapshot of the health state
    pub fn health(&self) -> HealthReport {
        let health = self.inner.health.read().clone();
        let snapshot = self.inner.index.snapshot();
        let status = match health.state {
            LifecycleState::Loading => health.serving.unwrap_or(LifecycleState::Uninitialized),
            state => state,
        };
        HealthReport {
            status,
            reloading: health.state == LifecycleState::Loading,
            data_loaded_counts: health.data_loaded_counts,
            last_error: health.last_error,
            index_entries: snapshot.len(),
            corpus_version: snapshot.corpus_version().map(str::to_string),
            embedding_model: self.inner.encoder.get().map(|e| e.model().to_string()),
            generation_model: self.inner.client.model().to_string(),
            generation: self.inner.client.stats(),
            initialized_at: health.initialized_at,
        }
    }
}

fn as_encoding_error(err: Error) -> Error {
    match err {
        Error::Encoding(_) => err,
        other => Error::encoding(other.to_string()),
    }
}

/// Write questions to `path` as pretty-printed UTF-8 JSON
pub fn export_questions(questions: &[GeneratedQuestion], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(questions)?;
    std::fs::write(path, json)?;
    tracing::info!("Exported {} questions to {}", questions.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::NO_CONTEXT_MARKER;
    use crate::testing::{formatted_response, HashingEmbedder, ScriptedLlm};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn config(data_dir: &Path, api_key: &str) -> RagConfig {
        let mut config = RagConfig::default();
        config.corpus.data_dir = data_dir.to_path_buf();
        config.generation.api_key = api_key.to_string();
        config.generation.min_interval_ms = 1;
        config.retrieval.min_similarity = 0.05;
        config
    }

    fn setup(
        dir: &TempDir,
        api_key: &str,
        llm: Arc<ScriptedLlm>,
    ) -> (RagOrchestrator, Arc<HashingEmbedder>) {
        let encoder = Arc::new(HashingEmbedder::new(1024));
        let orchestrator = RagOrchestrator::with_providers(
            config(dir.path(), api_key),
            encoder.clone(),
            llm,
            Arc::new(VectorIndex::in_memory()),
        );
        (orchestrator, encoder)
    }

    fn write_examples(dir: &TempDir, questions: &[&str]) {
        let records: Vec<serde_json::Value> = questions
            .iter()
            .map(|q| {
                serde_json::json!({
                    "question": q,
                    "steps": ["පියවර 1: 12000 ÷ 12 = 1000"],
                    "final_answer": "රු. 1000"
                })
            })
            .collect();
        std::fs::write(
            dir.path().join("extracted_examples.json"),
            serde_json::to_string(&records).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_missing_credential_rejects_without_network() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("gemini-2.5-flash", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "  ", llm.clone());

        let err = orchestrator.initialize(true).await.unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        assert_eq!(orchestrator.state(), LifecycleState::Uninitialized);

        let err = orchestrator
            .generate_questions("පොළිය", Difficulty::Medium, 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        assert_eq!(llm.calls(), 0);
        assert!(orchestrator.health().last_error.is_some());
    }

    #[tokio::test]
    async fn test_health_reports_serving_state_while_loading() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "key", llm);

        orchestrator.inner.health.write().state = LifecycleState::Loading;
        let health = orchestrator.health();
        assert_eq!(health.status, LifecycleState::Uninitialized);
        assert!(health.reloading);

        orchestrator.initialize(true).await.unwrap();
        orchestrator.inner.health.write().state = LifecycleState::Loading;
        let health = orchestrator.health();
        assert_eq!(health.status, LifecycleState::Ready);
        assert!(health.reloading);
        assert_eq!(serde_json::to_value(&health).unwrap()["status"], "Ready");

        orchestrator.inner.health.write().state = LifecycleState::Ready;
        assert!(!orchestrator.health().reloading);
    }

    #[tokio::test]
    async fn test_generate_before_initialize_fails() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());

        let err = orchestrator
            .generate_questions("පොළිය", Difficulty::Easy, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_first() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();

        for n in [0, 11] {
            let err = orchestrator
                .generate_questions("පොළිය", Difficulty::Easy, n)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_request");
        }
        let err = orchestrator
            .generate_questions("   ", Difficulty::Easy, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_corpus_generates_without_context() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("gemini-2.5-flash", &formatted_response(1, 5)));
        let (orchestrator, encoder) = setup(&dir, "key", llm.clone());

        orchestrator.initialize(true).await.unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Ready);

        let outcome = orchestrator
            .generate_questions("පොළිය", Difficulty::Medium, 3)
            .await
            .unwrap();
        assert!(!outcome.rag_context_used);
        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.count, outcome.questions.len());
        assert!(llm.prompts()[0].contains(NO_CONTEXT_MARKER));
        // empty index: the topic is never embedded
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_installment_scenario() {
        let dir = TempDir::new().unwrap();
        write_examples(
            &dir,
            &[
                "රු. 12000 ක භාණ්ඩයක් මාසික වාරික 12 කින් ගෙවයි. වාරික ගණනය කරන්න.",
                "වාරික ගණනය සඳහා පොලිය සහිත ණය මුදල සොයන්න.",
            ],
        );
        let llm = Arc::new(ScriptedLlm::always("gemini-2.5-flash", &formatted_response(1, 5)));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();

        let outcome = orchestrator
            .generate_questions("වාරික ගණනය", Difficulty::Medium, 3)
            .await
            .unwrap();

        assert!(outcome.count <= 3);
        assert_eq!(outcome.count, outcome.questions.len());
        assert_eq!(outcome.model_used, "gemini-2.5-flash");
        assert!(outcome.rag_context_used);
        for q in &outcome.questions {
            assert!(!q.question.is_empty());
            assert!(!q.solution.is_empty());
            assert!(!q.answer.is_empty());
        }

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("[example | ex_"));
        assert!(!prompt.contains(NO_CONTEXT_MARKER));
        // alias of the interest topic
        assert!(prompt.contains("බැංකු ණය"));

        let health = orchestrator.health();
        assert_eq!(health.data_loaded_counts[&SourceCategory::Example], 2);
        assert_eq!(health.index_entries, 2);
    }

    #[tokio::test]
    async fn test_count_never_exceeds_request() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 10)));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(false).await.unwrap();

        for n in 1..=10 {
            let outcome = orchestrator
                .generate_questions("සමීකරණ", Difficulty::Hard, n)
                .await
                .unwrap();
            assert_eq!(outcome.count, n);
            assert_eq!(outcome.questions.len(), n);
        }
    }

    #[tokio::test]
    async fn test_short_rounds_are_topped_up() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::new("m").with_script(vec![
            Ok(formatted_response(1, 2)),
            Ok(formatted_response(3, 3)),
        ]));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();

        let outcome = orchestrator
            .generate_questions("පොළිය", Difficulty::Medium, 4)
            .await
            .unwrap();
        assert_eq!(outcome.count, 4);
        assert!(!outcome.is_partial());
        assert_eq!(llm.calls(), 2);

        let prompts = llm.prompts();
        assert!(prompts[0].contains("numbered 1 to 6"));
        assert!(prompts[1].contains("numbered 3 to 6"));
    }

    #[tokio::test]
    async fn test_duplicates_across_rounds_are_dropped() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 2)));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();

        let outcome = orchestrator
            .generate_questions("පොළිය", Difficulty::Easy, 3)
            .await
            .unwrap();
        assert_eq!(outcome.count, 2);
        assert!(outcome.is_partial());
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_later_round_failure_returns_partial() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::new("m").with_script(vec![
            Ok(formatted_response(1, 1)),
            Err(Error::GenerationNonTransient("bad request".into())),
        ]));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();

        let outcome = orchestrator
            .generate_questions("පොළිය", Difficulty::Easy, 3)
            .await
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_first_round_failures_propagate() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(
            ScriptedLlm::new("m").with_script(vec![Err(Error::ContentFiltered("SAFETY".into()))]),
        );
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();
        let err = orchestrator
            .generate_questions("පොළිය", Difficulty::Easy, 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "content_filtered");

        let llm = Arc::new(ScriptedLlm::always("m", "Sorry, I cannot do that."));
        let (orchestrator, _) = setup(&dir, "key", llm.clone());
        orchestrator.initialize(true).await.unwrap();
        let err = orchestrator
            .generate_questions("පොළිය", Difficulty::Easy, 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse_error");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_corpus_is_degraded_but_serving() {
        let dir = TempDir::new().unwrap();
        write_examples(&dir, &["වාරික ගණනය කරන්න."]);
        std::fs::write(dir.path().join("extracted_exercises.json"), "{ not json").unwrap();

        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "key", llm);
        orchestrator.initialize(true).await.unwrap();

        let health = orchestrator.health();
        assert_eq!(health.status, LifecycleState::Degraded);
        assert!(health.last_error.unwrap().contains("extracted_exercises.json"));

        let outcome = orchestrator
            .generate_questions("වාරික ගණනය", Difficulty::Easy, 1)
            .await
            .unwrap();
        assert!(outcome.rag_context_used);
    }

    #[tokio::test]
    async fn test_encoder_failure_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        write_examples(&dir, &["වාරික ගණනය කරන්න."]);
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, encoder) = setup(&dir, "key", llm);

        encoder.fail.store(true, Ordering::SeqCst);
        let err = orchestrator.initialize(true).await.unwrap_err();
        assert_eq!(err.kind(), "encoding_error");
        assert_eq!(orchestrator.state(), LifecycleState::Uninitialized);

        encoder.fail.store(false, Ordering::SeqCst);
        orchestrator.initialize(true).await.unwrap();
        let before = orchestrator.health();
        assert_eq!(before.index_entries, 1);

        write_examples(&dir, &["වාරික ගණනය කරන්න.", "පොළිය සොයන්න."]);
        encoder.fail.store(true, Ordering::SeqCst);
        assert!(orchestrator.initialize(true).await.is_err());

        let after = orchestrator.health();
        assert_eq!(after.status, LifecycleState::Ready);
        assert_eq!(after.index_entries, 1);
        assert_eq!(after.corpus_version, before.corpus_version);
        assert!(after.last_error.is_some());

        // retrieval fails with the encoder down, generation carries on unaugmented
        let outcome = orchestrator
            .generate_questions("පොළිය", Difficulty::Easy, 1)
            .await
            .unwrap();
        assert!(!outcome.rag_context_used);
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot_atomically() {
        let dir = TempDir::new().unwrap();
        write_examples(&dir, &["වාරික ගණනය කරන්න."]);
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "key", llm);
        orchestrator.initialize(true).await.unwrap();

        let held = orchestrator.inner.index.snapshot();
        write_examples(&dir, &["වාරික ගණනය කරන්න.", "පොළිය සොයන්න.", "දුර සොයන්න."]);
        orchestrator.initialize(true).await.unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(orchestrator.health().index_entries, 3);
        assert_eq!(orchestrator.health().data_loaded_counts[&SourceCategory::Example], 3);
    }

    #[tokio::test]
    async fn test_add_topic() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::always("m", &formatted_response(1, 3)));
        let (orchestrator, _) = setup(&dir, "key", llm);
        let before = orchestrator.available_topics().len();

        let topic: TopicConfig = toml::from_str(
            r#"
            name = "ප්‍රතිශත"
            aliases = ["percentage"]
            prompt_template = "Use shop discounts."
            "#,
        )
        .unwrap();
        orchestrator.add_topic(topic).unwrap();

        let topics = orchestrator.available_topics();
        assert_eq!(topics.len(), before + 1);
        assert!(topics.contains(&"ප්‍රතිශත".to_string()));
    }

    #[test]
    fn test_export_questions_keeps_sinhala() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("questions.json");
        let questions = vec![GeneratedQuestion::new("පොලිය කීයද?", "පියවර 1: 100 × 5%", "රු. 5").unwrap()];

        export_questions(&questions, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("පොලිය කීයද?"));
        let back: Vec<GeneratedQuestion> = serde_json::from_str(&content).unwrap();
        assert_eq!(back, questions);
    }
}

//! Context retrieval for question generation
//!
//! Embeds the requested topic, pulls the nearest fragments from the current
//! index snapshot and packs them into a bounded context block. An empty or
//! low-similarity result is not an error: the caller generates without
//! context and reports `rag_context_used = false`.

use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::index::{SearchHit, VectorIndex};
use crate::providers::EmbeddingProvider;
use crate::types::{CorpusFragment, Difficulty, SourceCategory};

/// Fragments shorter than this are not worth squeezing into a nearly full budget
const MIN_TAIL_CHARS: usize = 80;

/// One fragment chosen for the context block
#[derive(Debug, Clone)]
pub struct RetrievedFragment {
    pub fragment: Arc<CorpusFragment>,
    pub score: f32,
}

/// Outcome of a retrieval
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    /// Selected fragments in descending similarity
    pub items: Vec<RetrievedFragment>,
    /// Prompt-ready context built from `items`
    pub context: String,
    /// True when nothing usable was found
    pub degraded: bool,
}

impl RetrievalResult {
    /// Result carrying no context
    pub fn empty() -> Self {
        Self {
            degraded: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.fragment.id.as_str()).collect()
    }
}

/// Categories a difficulty prefers, most preferred first
pub fn preferred_categories(difficulty: Difficulty) -> &'static [SourceCategory] {
    match difficulty {
        Difficulty::Easy => &[SourceCategory::Example],
        Difficulty::Medium => &[SourceCategory::Example, SourceCategory::Exercise],
        Difficulty::Hard => &[SourceCategory::Exercise, SourceCategory::Table],
    }
}

/// Context retriever over a shared vector index
pub struct ContextRetriever {
    encoder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    config: RetrievalConfig,
}

impl ContextRetriever {
    pub fn new(
        encoder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            encoder,
            index,
            config,
        }
    }

    /// Retrieve up to `max_fragments` fragments relevant to `topic`
    pub async fn retrieve(
        &self,
        topic: &str,
        difficulty: Difficulty,
        max_fragments: usize,
    ) -> Result<RetrievalResult> {
        // One snapshot for the whole call, even if a reload swaps the index meanwhile
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() || max_fragments == 0 {
            tracing::debug!("Index empty, retrieving no context for '{}'", topic);
            return Ok(RetrievalResult::empty());
        }

        let query = self.encoder.embed(topic).await?;
        let pool = max_fragments.saturating_mul(self.config.candidate_multiplier.max(1));
        let candidates: Vec<SearchHit> = snapshot
            .query(&query, pool)?
            .into_iter()
            .filter(|hit| hit.score >= self.config.min_similarity)
            .collect();

        if candidates.is_empty() {
            tracing::warn!(
                "No fragment cleared similarity {:.2} for '{}'",
                self.config.min_similarity,
                topic
            );
            return Ok(RetrievalResult::empty());
        }

        let selected = select_with_bias(candidates, difficulty, max_fragments);
        let result = self.pack(selected);

        tracing::info!(
            "Retrieved {} fragments ({} chars) for '{}' [{}]",
            result.items.len(),
            result.context.chars().count(),
            topic,
            difficulty
        );
        Ok(result)
    }

    /// Truncate fragments to the character budgets and build the context block
    fn pack(&self, selected: Vec<SearchHit>) -> RetrievalResult {
        let mut context = String::new();
        let mut used = 0usize;
        let mut items = Vec::with_capacity(selected.len());

        for hit in selected {
            let separator = if context.is_empty() { 0 } else { 2 };
            let remaining = self
                .config
                .max_context_chars
                .saturating_sub(used + separator);
            let header = format!("[{} | {}]\n", hit.fragment.category, hit.fragment.id);
            let header_len = header.graphemes(true).count();
            if remaining < header_len + MIN_TAIL_CHARS {
                break;
            }

            let limit = self
                .config
                .max_fragment_chars
                .min(remaining - header_len);
            let body = truncate_graphemes(hit.fragment.text.trim(), limit);

            if separator > 0 {
                context.push_str("\n\n");
            }
            context.push_str(&header);
            context.push_str(&body);
            used += separator + header_len + body.graphemes(true).count();

            tracing::debug!("Context fragment {} (score {:.3})", hit.fragment.id, hit.score);
            items.push(RetrievedFragment {
                fragment: hit.fragment,
                score: hit.score,
            });
        }

        RetrievalResult {
            degraded: items.is_empty(),
            items,
            context,
        }
    }
}

/// Fill slots with preferred-category candidates first, then the best of the rest
///
/// Output stays in descending similarity; bias only decides membership.
fn select_with_bias(
    candidates: Vec<SearchHit>,
    difficulty: Difficulty,
    max_fragments: usize,
) -> Vec<SearchHit> {
    let preferred = preferred_categories(difficulty);
    let mut chosen = vec![false; candidates.len()];
    let mut taken = 0;

    for category in preferred {
        for (i, hit) in candidates.iter().enumerate() {
            if taken == max_fragments {
                break;
            }
            if !chosen[i] && hit.fragment.category == *category {
                chosen[i] = true;
                taken += 1;
            }
        }
    }
    for flag in chosen.iter_mut() {
        if taken == max_fragments {
            break;
        }
        if !*flag {
            *flag = true;
            taken += 1;
        }
    }

    // candidates arrive sorted, so filtering keeps similarity order
    candidates
        .into_iter()
        .zip(chosen)
        .filter_map(|(hit, keep)| keep.then_some(hit))
        .collect()
}

/// Cut `text` to at most `limit` grapheme clusters, marking the cut with `…`
fn truncate_graphemes(text: &str, limit: usize) -> String {
    if limit == 0 {
        return String::new();
    }
    if text.graphemes(true).nth(limit).is_none() {
        return text.to_string();
    }
    let mut out: String = text.graphemes(true).take(limit - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexMeta;
    use crate::testing::HashingEmbedder;
    use std::sync::atomic::Ordering;

    async fn build(fragments: Vec<CorpusFragment>) -> (Arc<HashingEmbedder>, Arc<VectorIndex>) {
        let encoder = Arc::new(HashingEmbedder::new(1024));
        let index = Arc::new(VectorIndex::in_memory());
        let mut items = Vec::new();
        for fragment in fragments {
            let vector = encoder.embed(&fragment.text).await.unwrap();
            items.push((fragment, vector));
        }
        let count = items.len();
        index
            .rebuild(
                items,
                IndexMeta {
                    corpus_version: "v".to_string(),
                    count,
                    model: "hashing-test".to_string(),
                    dimensions: 1024,
                },
            )
            .unwrap();
        (encoder, index)
    }

    fn frag(id: &str, category: SourceCategory, text: &str) -> CorpusFragment {
        CorpusFragment::new(id, category, text, format!("test#{}", id))
    }

    fn corpus() -> Vec<CorpusFragment> {
        vec![
            frag("guide_0", SourceCategory::Guideline, "පොළිය ණය බැංකු"),
            frag("ex_0", SourceCategory::Example, "පොළිය ණය වාරික"),
            frag("exr_0", SourceCategory::Exercise, "පොළිය තැන්පතු"),
            frag("para_0", SourceCategory::Table, "පොළිය වගුව අනුපාත"),
            frag("ex_1", SourceCategory::Example, "ශ්‍රීඝ්‍රතාවය දුර කාලය"),
        ]
    }

    fn retriever(encoder: Arc<HashingEmbedder>, index: Arc<VectorIndex>) -> ContextRetriever {
        ContextRetriever::new(encoder, index, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let (encoder, index) = build(corpus()).await;
        let retriever = retriever(encoder, index);

        let first = retriever.retrieve("පොළිය ණය", Difficulty::Medium, 3).await.unwrap();
        let second = retriever.retrieve("පොළිය ණය", Difficulty::Medium, 3).await.unwrap();

        assert!(!first.degraded);
        assert_eq!(first.ids(), second.ids());
        assert_eq!(first.context, second.context);
        assert!(first.items.len() <= 3);
        assert!(!first.ids().contains(&"ex_1"));
        for pair in first.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_result() {
        let encoder = Arc::new(HashingEmbedder::new(1024));
        let index = Arc::new(VectorIndex::in_memory());
        let result = retriever(encoder.clone(), index)
            .retrieve("පොළිය", Difficulty::Easy, 4)
            .await
            .unwrap();
        assert!(result.is_empty());
        assert!(result.degraded);
        assert!(result.context.is_empty());
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrelated_topic_clears_no_threshold() {
        let (encoder, index) = build(corpus()).await;
        let result = retriever(encoder, index)
            .retrieve("ත්‍රිකෝණමිතිය", Difficulty::Hard, 4)
            .await
            .unwrap();
        assert!(result.degraded);
    }

    #[tokio::test]
    async fn test_bias_prefers_category_without_shrinking() {
        let (encoder, index) = build(corpus()).await;
        let retriever = retriever(encoder, index);

        let hard = retriever.retrieve("පොළිය", Difficulty::Hard, 2).await.unwrap();
        let ids = hard.ids();
        assert!(ids.contains(&"exr_0"));
        assert!(ids.contains(&"para_0"));

        // more slots than preferred fragments: filled from the rest
        let easy = retriever.retrieve("පොළිය", Difficulty::Easy, 4).await.unwrap();
        assert_eq!(easy.items.len(), 4);
        assert!(easy.ids().contains(&"ex_0"));
    }

    #[tokio::test]
    async fn test_context_respects_budgets() {
        let long = "පොළිය ".repeat(400);
        let (encoder, index) = build(vec![
            frag("ex_0", SourceCategory::Example, &long),
            frag("ex_1", SourceCategory::Example, &long),
        ])
        .await;
        let config = RetrievalConfig {
            max_context_chars: 700,
            max_fragment_chars: 500,
            ..Default::default()
        };
        let retriever = ContextRetriever::new(encoder, index, config);
        let result = retriever.retrieve("පොළිය", Difficulty::Easy, 2).await.unwrap();
        assert!(result.context.graphemes(true).count() <= 700);
        assert!(result.context.contains('…'));
        assert_eq!(result.items.len(), 2);
    }

    #[tokio::test]
    async fn test_encoder_failure_propagates() {
        let (encoder, index) = build(corpus()).await;
        encoder.fail.store(true, Ordering::SeqCst);
        let result = retriever(encoder, index)
            .retrieve("පොළිය", Difficulty::Easy, 2)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_truncate_graphemes() {
        assert_eq!(truncate_graphemes("abc", 5), "abc");
        assert_eq!(truncate_graphemes("abc", 3), "abc");
        assert_eq!(truncate_graphemes("abcdef", 3), "ab…");
        assert_eq!(truncate_graphemes("abc", 0), "");
        // Sinhala conjuncts count as single clusters
        let text = "ශ්‍රී ලංකාව";
        let cut = truncate_graphemes(text, 3);
        assert!(text.starts_with(cut.trim_end_matches('…')));
    }
}

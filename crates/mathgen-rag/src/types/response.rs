//! Generated question types and response payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::Difficulty;

/// A single parsed question with its worked solution and final answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question: String,
    pub solution: String,
    pub answer: String,
}

impl GeneratedQuestion {
    /// Build a question if all three fields are non-empty after trimming
    pub fn new(question: &str, solution: &str, answer: &str) -> Option<Self> {
        let (q, s, a) = (question.trim(), solution.trim(), answer.trim());
        if q.is_empty() || s.is_empty() || a.is_empty() {
            return None;
        }
        Some(Self {
            question: q.to_string(),
            solution: s.to_string(),
            answer: a.to_string(),
        })
    }

    /// Key used to drop near-identical questions across generation rounds
    pub(crate) fn dedup_key(&self) -> String {
        self.question.chars().take(50).collect()
    }
}

/// Result of a `generate_questions` call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub topic: String,
    pub difficulty: Difficulty,
    pub questions: Vec<GeneratedQuestion>,
    /// Always equal to `questions.len()`
    pub count: usize,
    /// Number of questions originally requested
    pub requested: usize,
    pub generation_time_seconds: f64,
    pub rag_context_used: bool,
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
}

impl GenerationOutcome {
    /// Whether fewer questions were produced than requested
    pub fn is_partial(&self) -> bool {
        self.count < self.requested
    }
}

/// Wire response for a successful generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub topic: String,
    pub difficulty: Difficulty,
    pub questions: Vec<GeneratedQuestion>,
    pub count: usize,
    pub generation_time_seconds: f64,
    pub model_used: String,
    pub rag_context_used: bool,
}

impl From<GenerationOutcome> for GenerateResponse {
    fn from(outcome: GenerationOutcome) -> Self {
        Self {
            success: true,
            topic: outcome.topic,
            difficulty: outcome.difficulty,
            count: outcome.questions.len(),
            questions: outcome.questions,
            generation_time_seconds: (outcome.generation_time_seconds * 100.0).round() / 100.0,
            model_used: outcome.model_used,
            rag_context_used: outcome.rag_context_used,
        }
    }
}

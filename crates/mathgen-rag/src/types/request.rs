//! Generation request types and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Requested question difficulty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(Error::InvalidRequest(format!(
                "difficulty must be one of easy, medium, hard (got '{}')",
                other
            ))),
        }
    }
}

/// A validated generation request
///
/// Construction goes through [`GenerationRequest::new`], so an instance is
/// always within bounds before anything is dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    topic: String,
    difficulty: Difficulty,
    num_questions: usize,
    context_block: String,
}

impl GenerationRequest {
    /// Smallest number of questions per request
    pub const MIN_QUESTIONS: usize = 1;
    /// Largest number of questions per request
    pub const MAX_QUESTIONS: usize = 10;

    /// Validate and build a request
    pub fn new(topic: &str, difficulty: Difficulty, num_questions: usize) -> Result<Self> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(Error::InvalidRequest("topic must not be empty".to_string()));
        }
        if !(Self::MIN_QUESTIONS..=Self::MAX_QUESTIONS).contains(&num_questions) {
            return Err(Error::InvalidRequest(format!(
                "num_questions must be between {} and {} (got {})",
                Self::MIN_QUESTIONS,
                Self::MAX_QUESTIONS,
                num_questions
            )));
        }

        Ok(Self {
            topic: topic.to_string(),
            difficulty,
            num_questions,
            context_block: String::new(),
        })
    }

    /// Attach the retrieved context block
    pub fn with_context(mut self, context_block: String) -> Self {
        self.context_block = context_block;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn num_questions(&self) -> usize {
        self.num_questions
    }

    pub fn context_block(&self) -> &str {
        &self.context_block
    }
}

/// Wire request for question generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Topic (required, non-empty)
    pub topic: String,
    /// Difficulty (default: medium)
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Number of questions, 1..=10 (default: 1)
    #[serde(default = "default_num_questions")]
    pub num_questions: usize,
}

fn default_num_questions() -> usize {
    1
}

impl GenerateRequest {
    /// Validate into a [`GenerationRequest`]
    pub fn validate(&self) -> Result<GenerationRequest> {
        GenerationRequest::new(&self.topic, self.difficulty, self.num_questions)
    }
}

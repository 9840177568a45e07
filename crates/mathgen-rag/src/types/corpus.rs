//! Corpus fragment types with provenance metadata

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of educational source material
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    /// Worked example with steps and final answer
    Example,
    /// Textbook exercise, optionally with sub-questions
    Exercise,
    /// Syllabus guideline or explanatory paragraph
    Guideline,
    /// Table flattened to text
    Table,
}

impl SourceCategory {
    /// All categories in a stable order
    pub const ALL: [SourceCategory; 4] = [
        SourceCategory::Example,
        SourceCategory::Exercise,
        SourceCategory::Guideline,
        SourceCategory::Table,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Example => "example",
            Self::Exercise => "exercise",
            Self::Guideline => "guideline",
            Self::Table => "table",
        }
    }

    /// Parse a persisted category name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "example" => Some(Self::Example),
            "exercise" => Some(Self::Exercise),
            "guideline" => Some(Self::Guideline),
            "table" => Some(Self::Table),
            _ => None,
        }
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-extracted text fragment from the corpus
///
/// Fragments are created once during corpus ingestion and never mutated;
/// a reload produces a fresh set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusFragment {
    /// Stable identifier (e.g. `ex_3`, `guide_12`)
    pub id: String,
    /// Flattened text used for embedding and prompt context
    pub text: String,
    /// Source category
    pub category: SourceCategory,
    /// Where the fragment came from (`file#index`)
    pub origin: String,
    /// Topic tag from the source record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Sub-topic tag from the source record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_topic: Option<String>,
    /// Exercise linked to an example, when the source records one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_exercise: Option<String>,
}

impl CorpusFragment {
    /// Create a fragment without optional metadata
    pub fn new(
        id: impl Into<String>,
        category: SourceCategory,
        text: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category,
            origin: origin.into(),
            topic: None,
            sub_topic: None,
            linked_exercise: None,
        }
    }

    /// Attach topic metadata, ignoring empty strings
    pub fn with_topic(mut self, topic: Option<String>, sub_topic: Option<String>) -> Self {
        self.topic = topic.filter(|t| !t.trim().is_empty());
        self.sub_topic = sub_topic.filter(|t| !t.trim().is_empty());
        self
    }
}

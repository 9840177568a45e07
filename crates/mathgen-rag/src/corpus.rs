//! Corpus store: loads pre-extracted educational text into fragments
//!
//! The extracted JSON files come from several extraction passes and do not
//! share one schema, so records are read as loose `serde_json::Value`s and
//! flattened field by field. A missing file is logged and skipped; a file that
//! cannot be read or parsed is recorded as a load failure.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::CorpusConfig;
use crate::error::{Error, Result};
use crate::types::{CorpusFragment, SourceCategory};

/// Kind of source file, which decides how its records are flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFile {
    Examples,
    Exercises,
    Paragraphs,
    Guidelines,
}

impl SourceFile {
    fn label(&self) -> &'static str {
        match self {
            Self::Examples => "examples",
            Self::Exercises => "exercises",
            Self::Paragraphs => "paragraphs",
            Self::Guidelines => "guidelines",
        }
    }

    /// Keys under which an object-wrapped file keeps its record list
    fn list_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Examples => &["examples"],
            Self::Exercises => &["exercises", "exercise", "questions", "data"],
            Self::Paragraphs => &["paragraphs"],
            Self::Guidelines => &["guideline", "guidelines"],
        }
    }
}

/// Result of loading the corpus
#[derive(Debug, Clone, Default)]
pub struct CorpusLoad {
    /// All fragments in load order
    pub fragments: Vec<CorpusFragment>,
    /// Fragment counts per category (every category present, possibly 0)
    pub counts: BTreeMap<SourceCategory, usize>,
    /// Source files that do not exist
    pub missing: Vec<PathBuf>,
    /// Source files that exist but could not be loaded
    pub failures: Vec<String>,
    /// Content hash over every fragment
    pub version: String,
}

impl CorpusLoad {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// True when some source file failed to load
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    fn finish(&mut self) {
        self.counts = SourceCategory::ALL.iter().map(|c| (*c, 0)).collect();
        for fragment in &self.fragments {
            *self.counts.entry(fragment.category).or_default() += 1;
        }
        self.version = corpus_version(&self.fragments);
    }
}

/// Compute the corpus version hash
pub fn corpus_version(fragments: &[CorpusFragment]) -> String {
    let mut hasher = Sha256::new();
    for fragment in fragments {
        hasher.update(fragment.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(fragment.category.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(fragment.text.as_bytes());
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

/// On-disk collection of extracted corpus files
pub struct CorpusStore {
    config: CorpusConfig,
}

impl CorpusStore {
    pub fn new(config: CorpusConfig) -> Self {
        Self { config }
    }

    fn sources(&self) -> [(SourceFile, PathBuf); 4] {
        let dir = &self.config.data_dir;
        [
            (SourceFile::Examples, dir.join(&self.config.examples_file)),
            (SourceFile::Exercises, dir.join(&self.config.exercises_file)),
            (SourceFile::Paragraphs, dir.join(&self.config.paragraphs_file)),
            (SourceFile::Guidelines, dir.join(&self.config.guidelines_file)),
        ]
    }

    /// Load every available source file
    pub fn load(&self) -> CorpusLoad {
        tracing::info!("Loading corpus from {}", self.config.data_dir.display());

        let mut load = CorpusLoad::default();

        for (kind, path) in self.sources() {
            if !path.exists() {
                tracing::warn!("Corpus file not found, skipping {}: {}", kind.label(), path.display());
                load.missing.push(path);
                continue;
            }

            match load_file(kind, &path) {
                Ok(fragments) => {
                    if fragments.is_empty() {
                        tracing::warn!("No valid {} found in {}", kind.label(), path.display());
                    } else {
                        tracing::info!("Loaded {} {} fragments", fragments.len(), kind.label());
                    }
                    load.fragments.extend(fragments);
                }
                Err(e) => {
                    tracing::error!("Failed to load {} from {}: {}", kind.label(), path.display(), e);
                    load.failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        load.finish();
        tracing::info!(
            "Corpus loaded: {} fragments ({} missing files, {} failed files)",
            load.fragments.len(),
            load.missing.len(),
            load.failures.len()
        );
        load
    }
}

fn load_file(kind: SourceFile, path: &Path) -> Result<Vec<CorpusFragment>> {
    let content = std::fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&content)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| kind.label().to_string());

    let records = record_list(kind, &data).ok_or_else(|| {
        Error::internal(format!("no {} list found in {}", kind.label(), file_name))
    })?;

    Ok(match kind {
        SourceFile::Examples => flatten_examples(records, &file_name),
        SourceFile::Exercises => flatten_exercises(records, &file_name),
        SourceFile::Paragraphs => flatten_paragraphs(records, &file_name),
        SourceFile::Guidelines => flatten_guidelines(records, &file_name),
    })
}

fn record_list<'a>(kind: SourceFile, data: &'a Value) -> Option<&'a Vec<Value>> {
    match data {
        Value::Array(items) => Some(items),
        Value::Object(obj) => kind
            .list_keys()
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array)),
        _ => None,
    }
}

/// First non-empty string (or number) value among `keys`
fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn topic_fields(obj: &Map<String, Value>) -> (Option<String>, Option<String>) {
    (text_field(obj, &["topic"]), text_field(obj, &["sub_topic"]))
}

fn flatten_examples(records: &[Value], file_name: &str) -> Vec<CorpusFragment> {
    let mut fragments = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let Some(obj) = record.as_object() else {
            tracing::warn!("Skipping non-object example at index {}", i);
            continue;
        };

        let question = text_field(obj, &["question", "Question"]).unwrap_or_default();
        let mut text = format!("උදාහරණය:\n{}\n\nවිසඳුම:\n", question);

        let steps = obj
            .get("Steps")
            .or_else(|| obj.get("steps"))
            .and_then(Value::as_array);
        for step in steps.into_iter().flatten() {
            let line = match step {
                Value::String(s) => Some(s.clone()),
                Value::Object(step) => text_field(step, &["step_answer", "Step", "step"]),
                _ => None,
            };
            if let Some(line) = line {
                text.push_str(&line);
                text.push('\n');
            }
        }

        let final_answer = text_field(obj, &["Final_answer", "final_answer"]).unwrap_or_default();
        text.push_str(&format!("\nඅවසාන පිළිතුර: {}", final_answer));

        if question.is_empty() && steps.map_or(true, |s| s.is_empty()) {
            tracing::warn!("Skipping empty example at index {}", i);
            continue;
        }

        let (topic, sub_topic) = topic_fields(obj);
        let mut fragment = CorpusFragment::new(
            format!("ex_{}", i),
            SourceCategory::Example,
            text,
            format!("{}#{}", file_name, i),
        )
        .with_topic(topic, sub_topic);
        fragment.linked_exercise = text_field(obj, &["exercise_id", "linked_exercise"]);
        fragments.push(fragment);
    }

    fragments
}

fn flatten_exercises(records: &[Value], file_name: &str) -> Vec<CorpusFragment> {
    let mut fragments = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let Some(obj) = record.as_object() else {
            tracing::warn!("Skipping non-object exercise at index {}", i);
            continue;
        };
        let metadata = obj.get("metadata").and_then(Value::as_object);

        let main_question = text_field(obj, &["question", "text"])
            .or_else(|| metadata.and_then(|m| text_field(m, &["main_question"])))
            .unwrap_or_default();

        let sub_questions = obj
            .get("sub_questions")
            .and_then(Value::as_array)
            .filter(|s| !s.is_empty())
            .or_else(|| metadata.and_then(|m| m.get("sub_questions")).and_then(Value::as_array));

        let sub_lines: Vec<String> = sub_questions
            .into_iter()
            .flatten()
            .filter_map(|sub| match sub {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Object(sub) => text_field(sub, &["sub_question", "question", "text"]),
                _ => None,
            })
            .collect();

        if main_question.is_empty() && sub_lines.is_empty() {
            tracing::warn!("Skipping empty exercise at index {}", i);
            continue;
        }

        let mut text = format!("අභ්‍යාස ප්‍රශ්නය:\n{}", main_question);
        if !sub_lines.is_empty() {
            text.push_str("\n\nඅනු ප්‍රශ්න:\n");
            for (j, line) in sub_lines.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", j + 1, line));
            }
        }

        let (topic, sub_topic) = topic_fields(obj);
        fragments.push(
            CorpusFragment::new(
                format!("exr_{}", i),
                SourceCategory::Exercise,
                text.trim_end().to_string(),
                format!("{}#{}", file_name, i),
            )
            .with_topic(topic, sub_topic),
        );
    }

    fragments
}

/// Flatten table rows into ` | `-joined lines
fn flatten_rows(rows: &[Value]) -> String {
    rows.iter()
        .filter_map(|row| match row {
            Value::Array(cells) => Some(
                cells
                    .iter()
                    .map(|c| match c {
                        Value::String(s) => s.trim().to_string(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" | "),
            ),
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn flatten_paragraphs(records: &[Value], file_name: &str) -> Vec<CorpusFragment> {
    let mut fragments = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let (text, category, topic) = match record {
            Value::String(s) => (s.trim().to_string(), SourceCategory::Guideline, None),
            Value::Object(obj) => {
                let body = text_field(obj, &["text", "content"]).unwrap_or_default();
                let rows = obj
                    .get("rows")
                    .or_else(|| obj.get("table"))
                    .and_then(Value::as_array);
                match rows {
                    Some(rows) => {
                        let table = flatten_rows(rows);
                        let text = [body, table]
                            .into_iter()
                            .filter(|s| !s.is_empty())
                            .collect::<Vec<_>>()
                            .join("\n");
                        (text, SourceCategory::Table, text_field(obj, &["topic"]))
                    }
                    None => (body, SourceCategory::Guideline, text_field(obj, &["topic"])),
                }
            }
            _ => continue,
        };

        if text.is_empty() {
            continue;
        }

        let origin = match record.get("page").and_then(Value::as_u64) {
            Some(page) => format!("{}#{} (page {})", file_name, i, page),
            None => format!("{}#{}", file_name, i),
        };

        fragments.push(
            CorpusFragment::new(format!("para_{}", i), category, text, origin)
                .with_topic(topic, None),
        );
    }

    fragments
}

fn flatten_guidelines(records: &[Value], file_name: &str) -> Vec<CorpusFragment> {
    let mut fragments = Vec::new();
    let mut index = 0usize;

    let mut push = |text: &str, topic: Option<String>, record: usize| {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        fragments.push(
            CorpusFragment::new(
                format!("guide_{}", index),
                SourceCategory::Guideline,
                text,
                format!("{}#{}", file_name, record),
            )
            .with_topic(topic, None),
        );
        index += 1;
    };

    for (i, record) in records.iter().enumerate() {
        match record {
            Value::String(s) => push(s, None, i),
            Value::Object(obj) => {
                let topic = text_field(obj, &["topic"]);
                match obj.get("content") {
                    Some(Value::String(s)) => push(s, topic, i),
                    Some(Value::Array(items)) => {
                        for item in items.iter().filter_map(Value::as_str) {
                            push(item, topic.clone(), i);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fragments
}

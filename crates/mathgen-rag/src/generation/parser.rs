//! Response parsing: question/solution/answer triples from free text
//!
//! Models drift from the requested template (markdown emphasis, renumbering,
//! Sinhala headings instead of English ones, missing separators), so the
//! parser splits on whatever boundaries it finds and then looks for the three
//! section headings inside each block.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::types::GeneratedQuestion;

/// What a parse recovered
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// At least as many questions as expected (extras are dropped)
    Full(Vec<GeneratedQuestion>),
    /// Some questions, fewer than expected
    Partial {
        questions: Vec<GeneratedQuestion>,
        expected: usize,
    },
    /// Nothing usable in the response
    NoMatches { response_chars: usize },
}

impl ParseOutcome {
    pub fn questions(&self) -> &[GeneratedQuestion] {
        match self {
            Self::Full(questions) | Self::Partial { questions, .. } => questions,
            Self::NoMatches { .. } => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.questions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions().is_empty()
    }

    /// Questions, or `Error::Parse` when none were recovered
    pub fn into_result(self) -> Result<Vec<GeneratedQuestion>> {
        match self {
            Self::Full(questions) | Self::Partial { questions, .. } => Ok(questions),
            Self::NoMatches { response_chars } => Err(Error::Parse { response_chars }),
        }
    }
}

struct Patterns {
    separator: Regex,
    question: Regex,
    solution: Regex,
    answer: Regex,
    inline_answer: Regex,
    emphasis: Regex,
    heading: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        separator: Regex::new(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,}|={3,})[ \t]*$")
            .expect("Invalid regex"),
        question: Regex::new(
            r"(?mi)^[ \t]*(?:QUESTION|ප්‍රශ්නය)[ \t]*(?:#?\d+)?[ \t]*(?:\([^)\n]*\))?[ \t]*[:.)\-]?",
        )
        .expect("Invalid regex"),
        solution: Regex::new(r"(?mi)^[ \t]*(?:SOLUTION|විසඳුම)[ \t]*[:.\-]?")
            .expect("Invalid regex"),
        answer: Regex::new(
            r"(?mi)^[ \t]*(?:FINAL[ \t]+ANSWER|ANSWER|අවසාන[ \t]*පිළිතුර|පිළිතුර)[ \t]*[:.\-]?",
        )
        .expect("Invalid regex"),
        inline_answer: Regex::new(r"(?i)\b(?:final\s+)?answer\s*:|(?:අවසාන\s*)?පිළිතුර\s*:")
            .expect("Invalid regex"),
        emphasis: Regex::new(r"\*\*|__").expect("Invalid regex"),
        heading: Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").expect("Invalid regex"),
    })
}

/// Parse `raw` into at most `expected` questions
pub fn parse(raw: &str, expected: usize) -> ParseOutcome {
    let p = patterns();
    let cleaned = p.heading.replace_all(&p.emphasis.replace_all(raw, ""), "").into_owned();

    let mut questions = Vec::new();
    for block in split_blocks(&cleaned, p) {
        match extract(block, p) {
            Some(q) => questions.push(q),
            None if block.trim().chars().count() > 20 => {
                tracing::debug!("Dropping malformed block: {:.60}", block.trim());
            }
            None => {}
        }
    }

    tracing::debug!(
        "Parsed {} of {} expected questions from {} characters",
        questions.len(),
        expected,
        raw.chars().count()
    );

    if questions.is_empty() {
        ParseOutcome::NoMatches {
            response_chars: raw.chars().count(),
        }
    } else if questions.len() >= expected {
        questions.truncate(expected);
        ParseOutcome::Full(questions)
    } else {
        ParseOutcome::Partial {
            questions,
            expected,
        }
    }
}

/// Split on separator lines, then before every question heading
fn split_blocks<'a>(text: &'a str, p: &Patterns) -> Vec<&'a str> {
    let mut blocks = Vec::new();
    for part in p.separator.split(text) {
        let starts: Vec<usize> = p.question.find_iter(part).map(|m| m.start()).collect();
        let mut cuts = vec![0];
        cuts.extend(starts.into_iter().filter(|&s| s > 0));
        cuts.push(part.len());
        cuts.dedup();
        for window in cuts.windows(2) {
            let block = &part[window[0]..window[1]];
            if !block.trim().is_empty() {
                blocks.push(block);
            }
        }
    }
    blocks
}

/// Pull one triple out of a block
fn extract(block: &str, p: &Patterns) -> Option<GeneratedQuestion> {
    let solution = p.solution.find(block)?;
    // Answer label as its own line, else a labelled answer inside the last solution line
    let answer = p
        .answer
        .find_at(block, solution.end())
        .or_else(|| p.inline_answer.find_at(block, solution.end()))?;

    let question_start = p
        .question
        .find(&block[..solution.start()])
        .map(|m| m.end())
        .unwrap_or(0);

    let question = collapse_whitespace(&block[question_start..solution.start()]);
    let solution_text = trim_lines(&block[solution.end()..answer.start()]);
    let answer_text = block[answer.end()..]
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    GeneratedQuestion::new(&question, &solution_text, answer_text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim each line and drop leading/trailing blank lines
fn trim_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

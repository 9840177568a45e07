//! Prompt templates for question generation

use crate::topics::ResolvedTopic;
use crate::types::GenerationRequest;

/// Stands in for the reference section when retrieval found nothing
pub const NO_CONTEXT_MARKER: &str =
    "NO REFERENCE MATERIAL AVAILABLE. Rely on the topic guidance above.";

/// Prompt builder for question generation
///
/// Output depends only on the arguments, so identical requests always
/// produce byte-identical prompts.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    language: String,
}

impl PromptComposer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Build the full prompt for one generation round
    ///
    /// Questions are numbered from `start_number`, so later rounds continue
    /// the numbering of earlier ones.
    pub fn compose(
        &self,
        request: &GenerationRequest,
        guidance: &ResolvedTopic,
        start_number: usize,
    ) -> String {
        let n = request.num_questions();
        let start = start_number.max(1);
        let end = start + n - 1;
        let profile = &guidance.profile;
        let language = &self.language;

        let mut prompt = String::new();

        prompt.push_str(&format!(
            "You are an expert O/L mathematics teacher creating exam questions in {}.\n\n",
            language
        ));

        prompt.push_str(&format!("TOPIC: {}\n", request.topic()));
        prompt.push_str(&format!(
            "DIFFICULTY: {} ({})\n",
            request.difficulty(),
            profile.description
        ));
        prompt.push_str(&format!("STEPS: {}\n", profile.steps));
        prompt.push_str(&format!("NUMBER RANGE: {}\n", profile.numbers));
        if !profile.context.is_empty() {
            prompt.push_str(&format!("CONTEXT: {}\n", profile.context));
        }
        if !profile.sub_topics.is_empty() {
            prompt.push_str(&format!("SUB-TOPICS: {}\n", profile.sub_topics.join("; ")));
        }
        push_list(&mut prompt, "EXAMPLE PROBLEM TYPES", &profile.examples);
        push_list(&mut prompt, "FORMULAS", &profile.formulas);

        prompt.push_str("\nREFERENCE MATERIAL (match its style and level, do not copy it):\n");
        let context = request.context_block().trim();
        if context.is_empty() {
            prompt.push_str(NO_CONTEXT_MARKER);
        } else {
            prompt.push_str(context);
        }
        prompt.push_str("\n\n");

        let template = guidance.prompt_template.trim();
        if !template.is_empty() {
            prompt.push_str(template);
            prompt.push_str("\n\n");
        }

        prompt.push_str(&format!(
            "IMPORTANT: Generate ALL {n} complete questions, numbered {start} to {end}. Do NOT stop early.\n\n"
        ));

        prompt.push_str(&format!(
            r#"FORMAT for each question:

QUESTION {start}:
[Complete math word problem in {language}]

SOLUTION:
පියවර 1: [Step description]
[Calculation] = [Result]

පියවර 2: [Step description]
[Calculation] = [Result]

ANSWER: [Final answer]

---

QUESTION {next}:
[Different scenario with different numbers]

SOLUTION:
[Steps...]

ANSWER: [Final answer]

---

RULES:
- Generate EXACTLY {n} complete questions
- Each question must use DIFFERENT numbers and scenarios
- Write the question, solution and answer in {language}
- Separate questions with a line containing only ---
- Every question must have QUESTION, SOLUTION and ANSWER sections

Generate {n} questions about {topic}:
"#,
            start = start,
            next = start + 1,
            n = n,
            language = language,
            topic = request.topic(),
        ));

        prompt
    }
}

fn push_list(prompt: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    prompt.push_str(title);
    prompt.push_str(":\n");
    for item in items {
        prompt.push_str("- ");
        prompt.push_str(item);
        prompt.push('\n');
    }
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new("Sinhala")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::TopicCatalog;
    use crate::types::Difficulty;

    fn request(context: &str) -> GenerationRequest {
        GenerationRequest::new("පොළිය", Difficulty::Medium, 3)
            .unwrap()
            .with_context(context.to_string())
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let composer = PromptComposer::default();
        let guidance = TopicCatalog::builtin().resolve("පොළිය", Difficulty::Medium);
        let a = composer.compose(&request("[example | ex_0]\nඋදාහරණය"), &guidance, 1);
        let b = composer.compose(&request("[example | ex_0]\nඋදාහරණය"), &guidance, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_prompt_contains_instruction_block() {
        let composer = PromptComposer::default();
        let guidance = TopicCatalog::builtin().resolve("පොළිය", Difficulty::Medium);
        let prompt = composer.compose(&request("[example | ex_0]\nඋදාහරණය"), &guidance, 1);

        assert!(prompt.contains("creating exam questions in Sinhala"));
        assert!(prompt.contains("TOPIC: පොළිය"));
        assert!(prompt.contains("DIFFICULTY: medium (installment and reducing balance calculations)"));
        assert!(prompt.contains("numbered 1 to 3"));
        assert!(prompt.contains("QUESTION 1:"));
        assert!(prompt.contains("QUESTION 2:"));
        assert!(prompt.contains("SOLUTION:"));
        assert!(prompt.contains("ANSWER:"));
        assert!(prompt.contains("[example | ex_0]\nඋදාහරණය"));
        assert!(prompt.contains("බැංකු ණය"));
        assert!(!prompt.contains(NO_CONTEXT_MARKER));
    }

    #[test]
    fn test_empty_context_uses_marker() {
        let composer = PromptComposer::default();
        let guidance = TopicCatalog::builtin().resolve("unknown", Difficulty::Easy);
        let prompt = composer.compose(&request("   "), &guidance, 1);
        assert!(prompt.contains(NO_CONTEXT_MARKER));
        assert!(prompt.contains("DIFFICULTY: medium (standard problems)"));
    }

    #[test]
    fn test_numbering_continues_from_start() {
        let composer = PromptComposer::new("English");
        let guidance = TopicCatalog::builtin().resolve("speed", Difficulty::Hard);
        let prompt = composer.compose(&request(""), &guidance, 4);
        assert!(prompt.contains("QUESTION 4:"));
        assert!(prompt.contains("QUESTION 5:"));
        assert!(prompt.contains("numbered 4 to 6"));
        assert!(prompt.contains("in English"));
        assert!(!prompt.contains("QUESTION 1:"));
    }
}

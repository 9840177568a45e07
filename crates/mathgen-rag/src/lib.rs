//! mathgen-rag: retrieval-augmented generation of Sinhala mathematics exam questions
//!
//! Pre-extracted textbook material (examples, exercises, guideline paragraphs
//! and tables) is embedded into a persistent vector index. For each request
//! the most relevant fragments are packed into a prompt for a hosted Gemini
//! model, and the free-text response is parsed back into
//! question/solution/answer records.

pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod index;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use orchestrator::{export_questions, HealthReport, LifecycleState, RagOrchestrator};
pub use types::{
    corpus::{CorpusFragment, SourceCategory},
    request::{Difficulty, GenerateRequest, GenerationRequest},
    response::{GenerateResponse, GeneratedQuestion, GenerationOutcome},
};

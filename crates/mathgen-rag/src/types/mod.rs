//! Core types for the question generation pipeline

pub mod corpus;
pub mod request;
pub mod response;

pub use corpus::{CorpusFragment, SourceCategory};
pub use request::{Difficulty, GenerateRequest, GenerationRequest};
pub use response::{GenerateResponse, GeneratedQuestion, GenerationOutcome};

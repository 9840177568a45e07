//! Question generation: prompt composition, the rate-limited generation
//! client and response parsing

pub mod client;
pub mod parser;
pub mod prompt;
pub mod rate_limit;
pub mod retry;

pub use client::{CallOutcome, GenerationClient, GenerationStats};
pub use parser::{parse, ParseOutcome};
pub use prompt::{PromptComposer, NO_CONTEXT_MARKER};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

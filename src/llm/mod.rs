//! LLM integration.
//!
//! Pins the request/response contract between the core and any LLM: a list
//! of role-tagged messages in, one completion string out. Structured outputs
//! (plans, SQL) travel inside the completion text and are parsed and
//! validated at the boundary by `parser` and the agent layer.

pub mod mock;
pub mod openai;
pub mod parser;
pub mod prompt;
pub mod types;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use parser::{extract_json_payload, extract_sql, parse_llm_response, ParsedResponse};
pub use types::{Conversation, Message, Role};

use crate::error::Result;
use async_trait::async_trait;

/// Cap applied to any single LLM call, regardless of provider timeout.
pub const LLM_CALL_TIMEOUT_SECS: u64 = 60;

/// Trait for LLM clients that can generate completions.
///
/// Implementations must be thread-safe and tolerate concurrent calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

//! Mock LLM client for testing.
//!
//! Deterministic responses, either scripted in order or matched by input
//! pattern. Records every request so tests can assert on prompt content.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{AskdbError, Result};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

/// Mock LLM client.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    /// Responses returned in order; takes precedence over patterns.
    script: Mutex<VecDeque<String>>,
    /// Pattern → response mappings checked against the last user message.
    responses: Vec<(String, String)>,
    /// Every prompt seen, flattened to "role: content" lines.
    requests: Mutex<Vec<String>>,
    /// When set, every call fails with this message.
    failure: Option<String>,
}

impl MockLlmClient {
    /// Creates a mock with no canned behaviour (echoes a default answer).
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues responses returned in order, one per `complete` call.
    pub fn with_script(self, responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            script.extend(responses.into_iter().map(Into::into));
        }
        self
    }

    /// Adds a pattern → response mapping, used when the script is empty.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), response.into()));
        self
    }

    /// Makes every call fail, for error-path tests.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Returns every prompt the mock has seen.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn last_user_message(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let flat = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.requests.lock().unwrap().push(flat);

        if let Some(message) = &self.failure {
            return Err(AskdbError::llm(message.clone()));
        }

        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }

        let input = Self::last_user_message(messages).to_lowercase();
        for (pattern, response) in &self.responses {
            if input.contains(&pattern.to_lowercase()) {
                return Ok(response.clone());
            }
        }

        Ok("I can answer questions about the connected data sources.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_is_consumed_in_order() {
        let client = MockLlmClient::new().with_script(["first", "second"]);
        let messages = vec![Message::user("x")];
        assert_eq!(client.complete(&messages).await.unwrap(), "first");
        assert_eq!(client.complete(&messages).await.unwrap(), "second");
        // Script exhausted: falls back to the default answer.
        assert!(client.complete(&messages).await.unwrap().contains("data sources"));
    }

    #[tokio::test]
    async fn test_pattern_response() {
        let client = MockLlmClient::new()
            .with_response("how many users", "```sql\nSELECT COUNT(*) FROM users;\n```");
        let messages = vec![Message::user("How many users are there?")];
        let response = client.complete(&messages).await.unwrap();
        assert!(response.contains("COUNT(*)"));
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = MockLlmClient::failing("provider down");
        let err = client.complete(&[Message::user("x")]).await.unwrap_err();
        assert!(err.to_string().contains("provider down"));
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let client = MockLlmClient::new();
        let _ = client
            .complete(&[Message::system("ctx"), Message::user("question")])
            .await;
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("system: ctx"));
        assert!(requests[0].contains("user: question"));
    }
}

//! OpenAI-compatible LLM client.
//!
//! Talks to any chat-completions endpoint that speaks the OpenAI wire format.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AskdbError, Result};
use crate::llm::types::Message;
use crate::llm::{LlmClient, LLM_CALL_TIMEOUT_SECS};

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum number of retry attempts for transient errors.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Model to use.
    pub model: String,
    /// Base URL of the chat-completions API.
    pub base_url: String,
    /// Request timeout in seconds, capped at the orchestrator limit.
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    /// Creates a config with the default base URL and timeout.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout_secs: LLM_CALL_TIMEOUT_SECS,
        }
    }

    /// Overrides the API base URL (for compatible providers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// OpenAI-compatible LLM client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let timeout = config.timeout_secs.min(LLM_CALL_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| AskdbError::llm(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (AskdbError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return (
                AskdbError::llm("Authentication failed. Check your LLM API key."),
                false,
            );
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (AskdbError::llm("Rate limited. Please wait and try again."), true);
        }

        let is_retryable = status.is_server_error();
        if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(body) {
            return (
                AskdbError::llm(format!("LLM API error: {}", error_response.error.message)),
                is_retryable,
            );
        }
        (
            AskdbError::llm(format!("LLM API error ({status}): {body}")),
            is_retryable,
        )
    }

    fn is_retryable_request_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::convert_messages(messages),
            stream: false,
        };
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!(attempt, "LLM API request");

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| AskdbError::llm(format!("Failed to read response: {e}")))?;

                    if status.is_success() {
                        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
                            AskdbError::llm(format!("Malformed LLM response: {e}"))
                        })?;
                        let content = parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .ok_or_else(|| AskdbError::llm("LLM returned no choices"))?;
                        return Ok(content);
                    }

                    let (error, retryable) = Self::parse_error(status, &body);
                    if !retryable || attempt == MAX_RETRY_ATTEMPTS {
                        return Err(error);
                    }
                    warn!(attempt, %status, "retryable LLM API error");
                    last_error = Some(error);
                }
                Err(e) => {
                    let retryable = Self::is_retryable_request_error(&e);
                    let error = if e.is_timeout() {
                        AskdbError::timeout(format!("LLM call timed out: {e}"))
                    } else {
                        AskdbError::llm(format!("LLM request failed: {e}"))
                    };
                    if !retryable || attempt == MAX_RETRY_ATTEMPTS {
                        return Err(error);
                    }
                    warn!(attempt, "retryable LLM request error");
                    last_error = Some(error);
                }
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        Err(last_error.unwrap_or_else(|| AskdbError::llm("LLM request failed")))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

//! Message types for LLM communication.

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions.
    System,
    /// User message (human input).
    User,
    /// Assistant message (LLM response).
    Assistant,
}

impl Role {
    /// Returns the role as a string for API requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: Role,
    /// The content of the message.
    pub content: String,
}

impl Message {
    /// Creates a new message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A bounded conversation window used by the direct-answer path.
///
/// Keeps at most `max_exchanges` user/assistant pairs, always preserving
/// leading system messages.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    max_exchanges: usize,
}

impl Conversation {
    /// Creates a new empty conversation with the default window.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            max_exchanges: 10,
        }
    }

    /// Creates a conversation with a custom window size.
    pub fn with_max_exchanges(max_exchanges: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_exchanges,
        }
    }

    /// Adds a message and trims the window.
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
        self.trim_to_limit();
    }

    /// Adds a user message.
    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add(Message::user(content));
    }

    /// Adds an assistant message.
    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add(Message::assistant(content));
    }

    /// Returns all messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns true when no messages are present.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn trim_to_limit(&mut self) {
        let start_idx = self
            .messages
            .iter()
            .position(|m| m.role != Role::System)
            .unwrap_or(self.messages.len());

        // Drop the oldest user/assistant pair while over the window.
        loop {
            let exchanges = self.messages[start_idx..]
                .windows(2)
                .filter(|w| w[0].role == Role::User && w[1].role == Role::Assistant)
                .count();
            if exchanges <= self.max_exchanges {
                break;
            }
            let first_pair = (start_idx..self.messages.len().saturating_sub(1)).find(|&i| {
                self.messages[i].role == Role::User
                    && self.messages[i + 1].role == Role::Assistant
            });
            match first_pair {
                Some(i) => {
                    self.messages.remove(i);
                    self.messages.remove(i);
                }
                None => break,
            }
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

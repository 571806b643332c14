//! Core types for model requests and responses.

use serde::{Deserialize, Serialize};

/// Speaker of one turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Persona and rules.
    System,
    /// Prompt text sent on behalf of the character.
    User,
    /// A previous model reply.
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: ChatRole,
    /// What was said.
    pub content: String,
}

impl ChatMessage {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// A request to a model backend.
///
/// `history` carries earlier turns of the same exchange so that a retry can
/// show the model its previous answer alongside the new warning.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// System prompt (character persona).
    pub system: String,
    /// Earlier turns, oldest first.
    pub history: Vec<ChatMessage>,
    /// The new user prompt.
    pub user: String,
    /// Named model profile; `None` selects the client's default model.
    pub profile: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Ask the provider for a JSON object reply where supported.
    pub json_mode: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ChatRequest {
    /// Create a request with default sampling settings.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: Vec::new(),
            user: user.into(),
            profile: None,
            max_tokens: 600,
            temperature: 0.5,
            json_mode: true,
            timeout_ms: 30_000,
        }
    }

    /// Attach earlier turns.
    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Select a named model profile.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// All turns in wire order: history followed by the new user prompt.
    #[must_use]
    pub fn turns(&self) -> Vec<ChatMessage> {
        let mut turns = self.history.clone();
        turns.push(ChatMessage::user(self.user.clone()));
        turns
    }
}

/// A response from a model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model produced it.
    pub model: String,
}

impl LlmResponse {
    /// A response with only text, used by offline backends.
    #[must_use]
    pub fn text_only(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_generated: 0,
            latency_ms: 0,
            model: model.into(),
        }
    }
}

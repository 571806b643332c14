//! # hearth-llm — model access for the hearth state engine
//!
//! Everything the engine needs to talk to a language model:
//!   - **Backends** behind the [`ModelBackend`] trait: an HTTP client for
//!     Ollama and OpenAI-compatible endpoints, and a scripted backend for
//!     offline runs.
//!   - **Prompt catalog** ([`PromptBook`]): one template pair, example reply
//!     and recordable-key list per [`PromptKind`], with strict placeholder
//!     binding.
//!   - **Shape checking** ([`schema`]): a reply must be a JSON object that
//!     mirrors the example down to the first exempt layer.
//!
//! ```text
//! engine ──ChatRequest──▶ ModelBackend ──LlmResponse──▶ parse_reply ──▶ check_shape
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod client;
pub mod error;
pub mod prompt;
pub mod schema;
pub mod types;

pub use backend::{ModelBackend, Reply, ScriptedBackend};
pub use client::{LlmClient, LlmProvider};
pub use error::{LlmError, Result};
pub use prompt::{PromptBook, PromptKind, PromptSpec, RenderedPrompt};
pub use schema::{ExemptLayers, check_shape, parse_reply};
pub use types::{ChatMessage, ChatRequest, ChatRole, LlmResponse};

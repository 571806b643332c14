//! Error types for the hearth state engine.

use thiserror::Error;

use crate::types::StateTag;

/// Top-level error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A registry lookup, state tag or character name is unknown.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up (`state`, `prompt`, `tool`, `character`, ...).
        kind: String,
        /// The name that failed to resolve.
        name: String,
    },

    /// A prompt placeholder had no value anywhere. This is a configuration bug.
    #[error("cannot bind placeholder `{{{placeholder}}}` of prompt `{prompt}` in state {state}")]
    TemplateBinding {
        /// The placeholder name, without braces.
        placeholder: String,
        /// The prompt being rendered.
        prompt: String,
        /// The state that rendered it.
        state: StateTag,
    },

    /// A character keeps revisiting the same states without breaking the cycle.
    #[error("{character} is stuck in a loop: {state} loop budget reached {loop_budget}")]
    Overlooped {
        /// The character's name.
        character: String,
        /// The active state when the budget was exceeded.
        state: StateTag,
        /// The budget observed.
        loop_budget: i32,
    },

    /// A transition was requested to a state that is not an allowed next state.
    #[error("{from} cannot transition to {to}: not an allowed next state")]
    UnreachableTransition {
        /// The state that made the request.
        from: StateTag,
        /// The requested target.
        to: StateTag,
    },

    /// A hook step failed in a state that has no prompt to retry with.
    #[error("step `{step}` of {state} failed: {message}")]
    Hook {
        /// The failing state.
        state: StateTag,
        /// The failing step.
        step: String,
        /// The step's error message.
        message: String,
    },

    /// An operation that needs an active state ran before the machine started.
    #[error("state machine for {0} has not been started")]
    NotStarted(String),

    /// Model dispatch could not be scheduled.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Model access error that escaped the retry policy.
    #[error("model error: {0}")]
    Llm(#[from] hearth_llm::LlmError),
}

impl EngineError {
    /// Shorthand for [`EngineError::NotFound`].
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

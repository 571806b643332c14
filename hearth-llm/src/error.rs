//! Errors raised while rendering prompts, calling a model or checking its reply.
//!
//! The engine treats these in two groups: [`LlmError::UnboundPlaceholder`]
//! and [`LlmError::ConfigError`] are programming or deployment mistakes,
//! everything else is a bad turn that a retry may fix.

use thiserror::Error;

/// Errors from the model layer.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The endpoint rejected or dropped a single request.
    #[error("model request failed: {0}")]
    RequestFailed(String),

    /// The reply was not a JSON object.
    #[error("reply is not a JSON object: {0}")]
    ParseError(String),

    /// The reply was a JSON object of the wrong shape.
    #[error("reply does not match the example: {0}")]
    SchemaValidation(String),

    /// Every attempt ran past the per-request budget.
    #[error("model did not answer within {0}ms")]
    Timeout(u64),

    /// No backend is configured or reachable.
    #[error("model backend unavailable: {0}")]
    Unavailable(String),

    /// The client gave up after its own HTTP retries.
    #[error("model call failed {attempts} times, last: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error text from the final attempt.
        last_error: String,
    },

    /// A template placeholder had no value.
    #[error("unresolved placeholder `{{{placeholder}}}` in prompt `{prompt}`")]
    UnboundPlaceholder {
        /// The placeholder name, without braces.
        placeholder: String,
        /// The prompt kind being rendered.
        prompt: String,
    },

    /// Unknown provider, profile or prompt file.
    #[error("model configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Whether retrying the same turn can help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::UnboundPlaceholder { .. } | Self::ConfigError(_))
    }
}

/// Result alias for the model layer.
pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_and_config_errors_are_not_transient() {
        assert!(LlmError::Timeout(500).is_transient());
        assert!(LlmError::ParseError("x".into()).is_transient());
        assert!(!LlmError::ConfigError("x".into()).is_transient());
        let unbound = LlmError::UnboundPlaceholder {
            placeholder: "weather".into(),
            prompt: "perceive".into(),
        };
        assert!(!unbound.is_transient());
        assert_eq!(unbound.to_string(), "unresolved placeholder `{weather}` in prompt `perceive`");
    }
}

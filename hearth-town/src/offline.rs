//! A model stand-in for running a town without a language model.
//!
//! Every rendered prompt ends with the example reply its spec declares, so
//! answering with that example always passes validation. Characters then
//! walk through their states with plausible, if repetitive, choices.

use async_trait::async_trait;
use hearth_llm::{ChatRequest, LlmError, LlmResponse, ModelBackend};
use tracing::trace;

/// Marker preceding the example reply in a rendered prompt.
pub const EXAMPLE_MARKER: &str = "shaped like this example:\n";

/// Answers every prompt with the example reply it carries.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExampleBackend;

impl ExampleBackend {
    /// The example reply embedded in `prompt`, if any.
    #[must_use]
    pub fn example_in(prompt: &str) -> Option<&str> {
        let (_, tail) = prompt.rsplit_once(EXAMPLE_MARKER)?;
        let line = tail.lines().next()?.trim();
        (!line.is_empty()).then_some(line)
    }
}

#[async_trait]
impl ModelBackend for ExampleBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse, LlmError> {
        let example = Self::example_in(&request.user)
            .ok_or_else(|| LlmError::RequestFailed("prompt carries no example reply".into()))?;
        trace!(reply = example, "example backend call");
        Ok(LlmResponse::text_only(example, "example"))
    }

    fn name(&self) -> &str {
        "example"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_example_before_warnings() {
        let prompt = "Plan your day.\n\nReply with a single JSON object shaped like this example:\n\
                      {\"Goal\":\"eat\"}\n\nWARNING: last reply was not JSON";
        assert_eq!(ExampleBackend::example_in(prompt), Some("{\"Goal\":\"eat\"}"));
        assert_eq!(ExampleBackend::example_in("no example here"), None);
    }

    #[tokio::test]
    async fn replies_with_the_example() {
        let request = ChatRequest::new("sys", "Go.\n\nReply with a single JSON object shaped like this example:\n{\"ok\":true}");
        let response = ExampleBackend.complete(&request).await.expect("example reply");
        assert_eq!(response.text, "{\"ok\":true}");
        assert!(ExampleBackend.complete(&ChatRequest::new("sys", "Go.")).await.is_err());
    }
}

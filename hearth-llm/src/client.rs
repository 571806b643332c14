//! HTTP model client for Ollama and OpenAI-compatible endpoints.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::backend::ModelBackend;
use crate::error::LlmError;
use crate::types::{ChatMessage, ChatRequest, ChatRole, LlmResponse};

/// Provider backend for model inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible API.
    OpenAiCompatible {
        /// API root without the `/v1` suffix.
        base_url: String,
        /// Bearer token; empty for servers that need none.
        api_key: String,
    },
    /// No model available; every call fails as unavailable.
    None,
}

impl LlmProvider {
    /// Build a provider from its configuration name.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] for an unknown provider name.
    pub fn from_parts(kind: &str, base_url: &str, api_key: Option<String>) -> Result<Self, LlmError> {
        match kind {
            "ollama" => Ok(Self::Ollama { base_url: base_url.to_string() }),
            "openai" | "openai_compatible" => Ok(Self::OpenAiCompatible {
                base_url: base_url.to_string(),
                api_key: api_key.unwrap_or_default(),
            }),
            "none" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown provider '{other}'"))),
        }
    }
}

/// The HTTP model client.
///
/// Requests name a profile (e.g. `"chat"`) which maps to a concrete model;
/// unnamed or unknown profiles use the default model.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    default_model: String,
    profiles: HashMap<String, String>,
    max_retries: u32,
}

impl LlmClient {
    /// Create a new client.
    #[must_use]
    pub fn new(provider: LlmProvider, default_model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            default_model: default_model.into(),
            profiles: HashMap::new(),
            max_retries,
        }
    }

    /// Create a client with no backend (all calls fail).
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), 0)
    }

    /// Map a profile name to a model.
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.profiles.insert(name.into(), model.into());
        self
    }

    /// The model a request resolves to.
    #[must_use]
    pub fn model_for(&self, request: &ChatRequest) -> &str {
        request
            .profile
            .as_deref()
            .and_then(|p| self.profiles.get(p))
            .map_or(self.default_model.as_str(), String::as_str)
    }

    /// Generate a response.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the provider is unavailable or all retries fail.
    pub async fn generate(&self, request: &ChatRequest) -> Result<LlmResponse, LlmError> {
        let model = self.model_for(request).to_string();
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/chat");
                let mut body = json!({
                    "model": model,
                    "messages": wire_messages(request),
                    "stream": false,
                    "options": {
                        "temperature": request.temperature,
                        "num_predict": request.max_tokens,
                    }
                });
                if request.json_mode {
                    body["format"] = json!("json");
                }
                self.send_with_retries(&url, None, &body, request.timeout_ms, &model, |json| {
                    let text = json["message"]["content"].as_str().unwrap_or_default().to_string();
                    let tokens = json["eval_count"].as_u64().unwrap_or(0);
                    (text, tokens)
                })
                .await
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{base_url}/v1/chat/completions");
                let mut body = json!({
                    "model": model,
                    "messages": wire_messages(request),
                    "max_tokens": request.max_tokens,
                    "temperature": request.temperature,
                });
                if request.json_mode {
                    body["response_format"] = json!({ "type": "json_object" });
                }
                self.send_with_retries(&url, Some(api_key), &body, request.timeout_ms, &model, |json| {
                    let text = json["choices"][0]["message"]["content"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    let tokens = json["usage"]["completion_tokens"].as_u64().unwrap_or(0);
                    (text, tokens)
                })
                .await
            }
        }
    }

    async fn send_with_retries(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
        timeout_ms: u64,
        model: &str,
        extract: impl Fn(&Value) -> (String, u64),
    ) -> Result<LlmResponse, LlmError> {
        let mut last_error = String::new();
        let mut timeouts = 0;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying LLM call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let start = Instant::now();
            let mut builder = self
                .http
                .post(url)
                .json(body)
                .timeout(Duration::from_millis(timeout_ms));
            if let Some(key) = api_key {
                builder = builder.header("Authorization", format!("Bearer {key}"));
            }
            let result = builder.send().await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens) = extract(&json);
                    return Ok(LlmResponse {
                        text,
                        tokens_generated: u32::try_from(tokens).unwrap_or(u32::MAX),
                        latency_ms,
                        model: model.to_string(),
                    });
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}: {}", resp.status(), resp.text().await.unwrap_or_default());
                    warn!(url, "model endpoint returned error: {}", last_error);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        timeouts += 1;
                        warn!(url, "model request timed out after {}ms", timeout_ms);
                    } else {
                        warn!(url, "model request failed: {}", last_error);
                    }
                }
            }
        }

        if timeouts > self.max_retries {
            return Err(LlmError::Timeout(timeout_ms));
        }
        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Check if the client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}

fn wire_messages(request: &ChatRequest) -> Vec<Value> {
    let mut out = vec![json!({ "role": "system", "content": request.system })];
    out.extend(request.turns().iter().map(|m: &ChatMessage| {
        let role = match m.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        json!({ "role": role, "content": m.content })
    }));
    out
}

#[async_trait]
impl ModelBackend for LlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse, LlmError> {
        self.generate(request).await
    }

    fn name(&self) -> &str {
        match self.provider {
            LlmProvider::Ollama { .. } => "ollama",
            LlmProvider::OpenAiCompatible { .. } => "openai",
            LlmProvider::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn profiles_resolve_to_models() {
        let client = LlmClient::new(LlmProvider::None, "base-model", 0).with_profile("chat", "chat-model");
        let chat = ChatRequest::new("s", "u").with_profile(Some("chat".into()));
        let unknown = ChatRequest::new("s", "u").with_profile(Some("missing".into()));
        assert_eq!(client.model_for(&chat), "chat-model");
        assert_eq!(client.model_for(&unknown), "base-model");
    }

    #[test]
    fn wire_messages_put_system_first() {
        let req = ChatRequest::new("persona", "now").with_history(vec![ChatMessage::user("before")]);
        let wire = wire_messages(&req);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["content"], "now");
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client.complete(&ChatRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[test]
    fn unknown_provider_name_is_config_error() {
        assert!(LlmProvider::from_parts("carrier-pigeon", "", None).is_err());
        assert!(matches!(
            LlmProvider::from_parts("ollama", "http://localhost:11434", None),
            Ok(LlmProvider::Ollama { .. })
        ));
    }
}

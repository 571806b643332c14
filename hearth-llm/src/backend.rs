//! The seam between the state engine and whatever answers its prompts.
//!
//! [`ModelBackend`] is implemented by the HTTP [`LlmClient`](crate::LlmClient)
//! and by [`ScriptedBackend`], which replays canned replies for offline runs,
//! benchmarks and tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, LlmResponse};

/// Anything that can complete a chat request.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Complete a request.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the provider fails or is unavailable.
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "backend"
    }
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// What a scripted backend does for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this text.
    Text(String),
    /// Fail with a request error carrying this message.
    Fail(String),
    /// Never resolve.
    Hang,
}

#[derive(Default)]
struct Script {
    rules: Vec<(String, Reply)>,
    queue: VecDeque<Reply>,
    fallback: Option<Reply>,
    seen: Vec<ChatRequest>,
}

/// Offline backend answering from a script.
///
/// Selection order for each call: the queued replies (FIFO), then the first
/// rule whose needle occurs in the user prompt, then the fallback. With none
/// of those the call fails as unavailable.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `reply` whenever the user prompt contains `needle`.
    #[must_use]
    pub fn on(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.script.lock().rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    /// Queue a one-shot reply.
    #[must_use]
    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().queue.push_back(reply);
        self
    }

    /// Answer `reply` when nothing else matches.
    #[must_use]
    pub fn otherwise(self, reply: impl Into<String>) -> Self {
        self.script.lock().fallback = Some(Reply::Text(reply.into()));
        self
    }

    /// Never resolve when nothing else matches.
    #[must_use]
    pub fn hanging(self) -> Self {
        self.script.lock().fallback = Some(Reply::Hang);
        self
    }

    /// Queue a one-shot reply on a shared backend.
    pub fn push(&self, reply: Reply) {
        self.script.lock().queue.push_back(reply);
    }

    /// Every request seen so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.script.lock().seen.clone()
    }

    /// Number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().seen.len()
    }

    fn pick(&self, request: &ChatRequest) -> Option<Reply> {
        let mut script = self.script.lock();
        script.seen.push(request.clone());
        if let Some(reply) = script.queue.pop_front() {
            return Some(reply);
        }
        script
            .rules
            .iter()
            .find(|(needle, _)| request.user.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .or_else(|| script.fallback.clone())
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let reply = self.pick(request);
        debug!(reply = ?reply, "scripted backend call");
        match reply {
            Some(Reply::Text(text)) => Ok(LlmResponse::text_only(text, "scripted")),
            Some(Reply::Fail(message)) => Err(LlmError::RequestFailed(message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(LlmError::Unavailable("script exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

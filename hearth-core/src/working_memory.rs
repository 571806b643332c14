//! Working Memory — a character's transient key/value blackboard.
//!
//! States pass results to each other only through here: PLAN records
//! `BestPlan`, ACT reads it, and so on. Entries never expire on their own;
//! a key lives until something overwrites or forgets it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key under which retry warnings are kept.
pub const WARNINGS_KEY: &str = "warnings";

/// Per-character scratch space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    entries: BTreeMap<String, Value>,
}

impl WorkingMemory {
    /// An empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn store(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// The value under `key`, or `default` when absent.
    #[must_use]
    pub fn retrieve(&self, key: &str, default: Value) -> Value {
        self.entries.get(key).cloned().unwrap_or(default)
    }

    /// Borrow the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// The value under `key` as prompt text. Strings are used verbatim,
    /// anything else is rendered as JSON.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(value_text)
    }

    /// Remove `key`, returning its value.
    pub fn forget(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ------------------------------------------------------------------
    // Retry warnings
    // ------------------------------------------------------------------

    /// Append a warning, keeping only the `keep` newest.
    pub fn push_warning(&mut self, message: impl Into<String>, keep: usize) {
        let mut warnings = self.warnings();
        warnings.push(message.into());
        let excess = warnings.len().saturating_sub(keep);
        warnings.drain(..excess);
        self.store(WARNINGS_KEY, warnings);
    }

    /// Retained warnings, oldest first.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        match self.entries.get(WARNINGS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Drop all retained warnings.
    pub fn clear_warnings(&mut self) {
        self.entries.remove(WARNINGS_KEY);
    }
}

/// Render a JSON value as prompt text.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

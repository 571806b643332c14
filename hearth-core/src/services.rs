//! Collaborators shared by every character's engine.
//!
//! Characters never touch each other directly. Everything that crosses a
//! character boundary goes through one of these: the outbound queue, the
//! audit store, the memory sink, the building index, or the [`Roster`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use hearth_llm::ModelBackend;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::OutboundQueue;
use crate::registry::Registry;
use crate::types::{Position, StateTag};

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// One audit record.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEntry {
    /// A rendered prompt about to be dispatched.
    Prompt {
        /// Character name.
        character: String,
        /// Issuing state.
        state: StateTag,
        /// Prompt kind name.
        kind: String,
        /// Rendered user prompt.
        text: String,
    },
    /// A raw model response.
    Response {
        /// Character name.
        character: String,
        /// State the response was applied to.
        state: StateTag,
        /// Raw response text.
        text: String,
    },
    /// Character attributes at a state exit.
    Snapshot {
        /// Character name.
        character: String,
        /// State being exited.
        state: StateTag,
        /// Attribute values.
        attributes: Value,
    },
}

/// Where prompts, responses and snapshots are written for later inspection.
pub trait AuditSink: Send + Sync {
    /// Record one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    fn record(&self, entry: AuditEntry) -> Result<()>;

    /// Store an encoded character checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    fn checkpoint(&self, _character: &str, _tick: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Audit sink that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&self, _entry: AuditEntry) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Long-term memory
// ---------------------------------------------------------------------------

/// Receiver of accepted model responses (a vector store in production).
pub trait MemorySink: Send + Sync {
    /// Remember `content` produced by `character` in `state`.
    fn remember(&self, character: &str, state: StateTag, content: &Value);
}

/// Memory sink that forgets everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecall;

impl MemorySink for NullRecall {
    fn remember(&self, _character: &str, _state: StateTag, _content: &Value) {}
}

/// Memory sink that keeps everything in a list.
#[derive(Debug, Default)]
pub struct InMemoryRecall {
    entries: Mutex<Vec<(String, StateTag, Value)>>,
}

impl InMemoryRecall {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything remembered by `character`, oldest first.
    #[must_use]
    pub fn entries_for(&self, character: &str) -> Vec<(StateTag, Value)> {
        self.entries
            .lock()
            .iter()
            .filter(|(c, _, _)| c == character)
            .map(|(_, s, v)| (*s, v.clone()))
            .collect()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl MemorySink for InMemoryRecall {
    fn remember(&self, character: &str, state: StateTag, content: &Value) {
        self.entries
            .lock()
            .push((character.to_string(), state, content.clone()));
    }
}

// ---------------------------------------------------------------------------
// Places
// ---------------------------------------------------------------------------

/// A building with an axis-aligned footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// Unique name.
    pub name: String,
    /// Description for prompts.
    #[serde(default)]
    pub description: String,
    /// Lower-left corner.
    pub min: Position,
    /// Upper-right corner.
    pub max: Position,
}

impl Place {
    /// Whether `pos` lies inside the footprint (edges included).
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x) && (self.min.y..=self.max.y).contains(&pos.y)
    }

    /// Centre of the footprint.
    #[must_use]
    pub fn center(&self) -> Position {
        Position::new((self.min.x + self.max.x) / 2.0, (self.min.y + self.max.y) / 2.0)
    }
}

/// Read-only building lookup. Clones share the list.
#[derive(Debug, Clone, Default)]
pub struct PlaceIndex {
    places: Arc<Vec<Place>>,
}

impl PlaceIndex {
    /// Index `places`.
    #[must_use]
    pub fn new(places: Vec<Place>) -> Self {
        Self {
            places: Arc::new(places),
        }
    }

    /// The first building containing `pos`.
    #[must_use]
    pub fn locate(&self, pos: Position) -> Option<&Place> {
        self.places.iter().find(|p| p.contains(pos))
    }

    /// Building by name, case-insensitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Place> {
        self.places.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Every building.
    #[must_use]
    pub fn all(&self) -> &[Place] {
        &self.places
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// What other characters can see of a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Game-server id.
    pub guid: String,
    /// Active state.
    pub state: Option<StateTag>,
    /// Position.
    pub position: Position,
    /// Building, if inside one.
    pub building: Option<String>,
}

/// A request from one character to another, delivered before the target's
/// next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Mail {
    /// Push an interrupt onto the target's stack.
    Hang {
        /// Recipient name.
        target: String,
        /// State to interrupt into.
        tag: StateTag,
    },
    /// Store a value in the target's working memory.
    Remember {
        /// Recipient name.
        target: String,
        /// Working-memory key.
        key: String,
        /// Value to store.
        value: Value,
    },
}

impl Mail {
    /// Recipient name.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Hang { target, .. } | Self::Remember { target, .. } => target,
        }
    }
}

/// Town-wide directory of characters plus the mailbox between them.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Arc<DashMap<String, RosterEntry>>,
    mailbox: Arc<Mutex<VecDeque<Mail>>>,
}

impl Roster {
    /// An empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a character's entry.
    pub fn publish(&self, name: &str, entry: RosterEntry) {
        self.entries.insert(name.to_string(), entry);
    }

    /// A character's entry.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<RosterEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// A character's active state.
    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<StateTag> {
        self.entries.get(name).and_then(|e| e.state)
    }

    /// Whether a character with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names of everyone except `name`, sorted.
    #[must_use]
    pub fn others(&self, name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key() != name)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Names of everyone except `name` inside `building`, sorted.
    #[must_use]
    pub fn in_building(&self, building: &str, name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key() != name && e.building.as_deref() == Some(building))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Queue mail for delivery.
    pub fn send(&self, mail: Mail) {
        self.mailbox.lock().push_back(mail);
    }

    /// Remove and return every message addressed to `name`, oldest first.
    #[must_use]
    pub fn collect(&self, name: &str) -> Vec<Mail> {
        let mut mailbox = self.mailbox.lock();
        let mut mine = Vec::new();
        mailbox.retain(|m| {
            if m.target() == name {
                mine.push(m.clone());
                false
            } else {
                true
            }
        });
        mine
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Every collaborator an engine needs. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    /// Frozen state, prompt and tool tables.
    pub registry: Arc<Registry>,
    /// Model backend.
    pub model: Arc<dyn ModelBackend>,
    /// Messages for the game server.
    pub outbound: OutboundQueue,
    /// Audit store.
    pub audit: Arc<dyn AuditSink>,
    /// Long-term memory sink.
    pub recall: Arc<dyn MemorySink>,
    /// Buildings.
    pub places: PlaceIndex,
    /// Other characters.
    pub roster: Roster,
}

impl Services {
    /// Services with no-op audit and memory, no buildings and an empty roster.
    #[must_use]
    pub fn new(registry: Arc<Registry>, model: Arc<dyn ModelBackend>) -> Self {
        Self {
            registry,
            model,
            outbound: OutboundQueue::new(),
            audit: Arc::new(NullAudit),
            recall: Arc::new(NullRecall),
            places: PlaceIndex::default(),
            roster: Roster::new(),
        }
    }

    /// Use `audit` for audit records.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Use `recall` for accepted responses.
    #[must_use]
    pub fn with_recall(mut self, recall: Arc<dyn MemorySink>) -> Self {
        self.recall = recall;
        self
    }

    /// Use `places` as the building index.
    #[must_use]
    pub fn with_places(mut self, places: PlaceIndex) -> Self {
        self.places = places;
        self
    }

    /// Share an existing outbound queue.
    #[must_use]
    pub fn with_outbound(mut self, outbound: OutboundQueue) -> Self {
        self.outbound = outbound;
        self
    }

    /// Share an existing roster.
    #[must_use]
    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("model", &self.model.name())
            .field("outbound", &self.outbound.len())
            .field("places", &self.places.all().len())
            .finish_non_exhaustive()
    }
}

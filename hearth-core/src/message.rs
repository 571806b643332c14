//! Game-server message envelope, catalog and the outbound queue.
//!
//! Outbound messages travel as `"<id>@<json>"` strings. Inbound messages
//! arrive as `{msg_id, msg, from}` records, where `msg` may itself be a
//! JSON-encoded string.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::types::StateTag;

/// Message ids known to the game protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum MessageId {
    /// Walk to a place and interact with it.
    WalkToDo = 1001,
    /// Show an action bubble.
    Action = 1002,
    /// A finished artwork.
    Nft = 1003,
    /// Result of a player buying an artwork.
    UserBuyResult = 1004,
    /// Result of a player selling an artwork.
    UserSellResult = 1005,
    /// Artwork trade between characters.
    AgentArtworkTrade = 1006,
    /// Walk to a position.
    WalkTo = 1007,
    /// Speak a line.
    Speak = 1008,
    /// Artwork recycle price.
    RecyclePrice = 1010,
    /// Subsistence allowance received.
    Subsistence = 1011,
    /// Ask the server for a new character.
    BirthRequest = 1012,
    /// Server finished loading the town.
    Init = 2000,
    /// A walk ended.
    WalkStopped = 2001,
    /// A new day started.
    NewDay = 2002,
    /// A character attribute changed.
    AttrChange = 2003,
    /// A player wants to buy.
    UserBuy = 2004,
    /// A player wants to sell.
    UserSell = 2005,
    /// Operator command.
    Cmd = 2006,
    /// Acknowledgement.
    Ack = 2007,
    /// A new character was born.
    AgentBorn = 2008,
}

impl MessageId {
    const ALL: [MessageId; 20] = [
        Self::WalkToDo,
        Self::Action,
        Self::Nft,
        Self::UserBuyResult,
        Self::UserSellResult,
        Self::AgentArtworkTrade,
        Self::WalkTo,
        Self::Speak,
        Self::RecyclePrice,
        Self::Subsistence,
        Self::BirthRequest,
        Self::Init,
        Self::WalkStopped,
        Self::NewDay,
        Self::AttrChange,
        Self::UserBuy,
        Self::UserSell,
        Self::Cmd,
        Self::Ack,
        Self::AgentBorn,
    ];

    /// Numeric id on the wire.
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<MessageId> for u32 {
    fn from(id: MessageId) -> Self {
        id.code()
    }
}

impl TryFrom<u32> for MessageId {
    type Error = EngineError;

    fn try_from(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.code() == code)
            .ok_or_else(|| EngineError::not_found("message id", code.to_string()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Gold attribute id in [`MessageId::AttrChange`] payloads.
pub const ATTR_GOLD: u64 = 102;

/// Message ids every state consumes regardless of its own expectations.
pub const ACCEPTED_BY_ALL: &[MessageId] = &[MessageId::AgentBorn];

/// Message ids a state consumes, beyond [`ACCEPTED_BY_ALL`].
#[must_use]
pub fn expected_for(tag: StateTag) -> &'static [MessageId] {
    match tag {
        StateTag::Move => &[MessageId::WalkStopped],
        StateTag::UserTrade => &[MessageId::UserBuy, MessageId::UserSell],
        _ => &[],
    }
}

/// Whether `tag` consumes message `code`.
#[must_use]
pub fn accepts(tag: StateTag, code: u32) -> bool {
    expected_for(tag)
        .iter()
        .chain(ACCEPTED_BY_ALL)
        .any(|id| id.code() == code)
}

/// The id a state pushes its own results under, if any.
#[must_use]
pub fn push_id(tag: StateTag) -> Option<MessageId> {
    match tag {
        StateTag::Move | StateTag::Act => Some(MessageId::WalkTo),
        StateTag::Sum => Some(MessageId::Action),
        StateTag::Draw => Some(MessageId::Nft),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A message for the game server.
#[derive(Debug, Clone, PartialEq)]
pub struct GameMessage {
    /// Message id.
    pub id: MessageId,
    /// Id-specific payload.
    pub payload: Value,
}

impl GameMessage {
    /// Create a message.
    #[must_use]
    pub fn new(id: MessageId, payload: Value) -> Self {
        Self { id, payload }
    }

    /// Wire form: `"<id>@<json>"`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}@{}", self.id.code(), self.payload)
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] for a malformed envelope and
    /// [`EngineError::NotFound`] for an unknown id.
    pub fn decode(wire: &str) -> Result<Self> {
        let (id, json) = wire
            .split_once('@')
            .ok_or_else(|| EngineError::Serialization(format!("missing '@' in envelope: {wire}")))?;
        let code: u32 = id
            .trim()
            .parse()
            .map_err(|e| EngineError::Serialization(format!("bad message id '{id}': {e}")))?;
        let payload =
            serde_json::from_str(json).map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(Self {
            id: MessageId::try_from(code)?,
            payload,
        })
    }
}

/// FIFO of messages waiting for the game-server bridge. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    inner: Arc<Mutex<VecDeque<GameMessage>>>,
}

impl OutboundQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message.
    pub fn push(&self, message: GameMessage) {
        self.inner.lock().push_back(message);
    }

    /// Take every queued message, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<GameMessage> {
        self.inner.lock().drain(..).collect()
    }

    /// Copy of the queued messages, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GameMessage> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A message from the game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Numeric message id.
    pub msg_id: u32,
    /// Payload: an object, or a JSON-encoded string of one.
    #[serde(default)]
    pub msg: Value,
    /// Sender.
    #[serde(default)]
    pub from: String,
}

impl ServerMessage {
    /// Create a message with an object payload.
    #[must_use]
    pub fn new(id: MessageId, msg: Value) -> Self {
        Self {
            msg_id: id.code(),
            msg,
            from: "server".to_string(),
        }
    }

    /// Parse a message from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] on malformed input.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// The payload as JSON, decoding a string-encoded payload. A string that
    /// is not JSON is returned as a string value.
    #[must_use]
    pub fn payload(&self) -> Value {
        match &self.msg {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| self.msg.clone()),
            other => other.clone(),
        }
    }

    /// The `agent_guid` the payload addresses, if any.
    #[must_use]
    pub fn agent_guid(&self) -> Option<String> {
        match self.payload().get("agent_guid")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The message as a JSON object, with the payload decoded.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "msg_id": self.msg_id,
            "msg": self.payload(),
            "from": self.from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() {
        let msg = GameMessage::new(MessageId::Action, json!({"content": "hi", "display_duration": 3}));
        let wire = msg.encode();
        assert!(wire.starts_with("1002@{"));
        assert_eq!(GameMessage::decode(&wire).expect("decode"), msg);
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert!(GameMessage::decode("no separator").is_err());
        assert!(GameMessage::decode("abc@{}").is_err());
        assert!(matches!(
            GameMessage::decode("9999@{}"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn string_payloads_are_decoded() {
        let msg = ServerMessage::from_json(
            r#"{"msg_id": 2003, "msg": "{\"attr_id\": 102, \"attr_value\": 50, \"agent_guid\": 7}", "from": "server"}"#,
        )
        .expect("parse");
        assert_eq!(msg.payload()["attr_value"], 50);
        assert_eq!(msg.agent_guid().as_deref(), Some("7"));
    }

    #[test]
    fn expectations_per_state() {
        assert!(accepts(StateTag::Move, 2001));
        assert!(!accepts(StateTag::Plan, 2001));
        assert!(accepts(StateTag::Plan, 2008));
        assert!(accepts(StateTag::UserTrade, 2005));
        assert_eq!(push_id(StateTag::Draw), Some(MessageId::Nft));
        assert_eq!(push_id(StateTag::Idle), None);
    }

    #[test]
    fn queue_is_shared_between_clones() {
        let queue = OutboundQueue::new();
        let producer = queue.clone();
        producer.push(GameMessage::new(MessageId::Speak, json!({})));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain().len(), 1);
        assert!(producer.is_empty());
    }
}

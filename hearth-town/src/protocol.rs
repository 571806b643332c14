//! Typed payloads for the game-server protocol.
//!
//! The engine moves payloads around as JSON; this module gives the ones the
//! town states read or write a shape. Ids are always sent as strings, but
//! the server sends them as numbers, so inbound ids accept both.

use hearth_core::Position;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `content_type` of a speech bubble.
pub const CONTENT_SPEECH: u8 = 1;
/// `content_type` of a status line.
pub const CONTENT_STATUS: u8 = 2;

/// Serialize a payload. Serialization of these types cannot fail, so a
/// failure degrades to `null`.
#[must_use]
pub fn to_payload<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_default()
}

/// Parse a payload, or `None` if it has the wrong shape.
#[must_use]
pub fn from_payload<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    T::deserialize(payload).ok()
}

fn guid<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected an id, got {other}"))),
    }
}

fn optional_guid<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("expected an id, got {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// 1007 WALK_TO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkTo {
    /// Destination.
    pub pos: Position,
    /// Walker.
    #[serde(deserialize_with = "guid")]
    pub agent_guid: String,
    /// Speed multiplier.
    pub speed_rate: f32,
    /// Emoji shown while walking.
    pub emoji_on_the_way: Option<String>,
    /// Seconds between emoji bubbles.
    pub emoji_interval: f32,
    /// Seconds each bubble stays up.
    pub emoji_show_duration: f32,
}

impl WalkTo {
    /// A walk at normal speed.
    #[must_use]
    pub fn new(agent_guid: impl Into<String>, pos: Position, emoji: Option<String>) -> Self {
        Self {
            pos,
            agent_guid: agent_guid.into(),
            speed_rate: 1.0,
            emoji_on_the_way: emoji,
            emoji_interval: 1.0,
            emoji_show_duration: 1.0,
        }
    }
}

/// 1002 ACTION and 1008 SPEAK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// Text shown above the character.
    pub content: String,
    /// Speaker.
    pub agent_guid: String,
    /// [`CONTENT_SPEECH`] or [`CONTENT_STATUS`].
    pub content_type: u8,
    /// Seconds on screen.
    pub display_duration: u32,
}

/// 1003 NFT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artwork {
    /// Artist.
    pub agent_guid: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Theme chosen before drawing.
    pub theme: Option<String>,
    /// Style chosen before drawing.
    pub style: Option<String>,
}

/// 1004 / 1005: the request echoed back with its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeResult<T> {
    /// The original request.
    #[serde(flatten)]
    pub request: T,
    /// Whether the trade went through.
    pub is_succ: bool,
    /// Reason for refusal; empty on success.
    pub error_msg: String,
}

impl<T> TradeResult<T> {
    /// Accept `request`.
    pub fn accepted(request: T) -> Self {
        Self {
            request,
            is_succ: true,
            error_msg: String::new(),
        }
    }

    /// Refuse `request`.
    pub fn refused(request: T, reason: impl Into<String>) -> Self {
        Self {
            request,
            is_succ: false,
            error_msg: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// 2001 WALK_STOPPED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkStopped {
    /// The walker.
    #[serde(deserialize_with = "guid")]
    pub agent_guid: String,
    /// Building reached, if any.
    #[serde(default)]
    pub cur_place_guid: Option<String>,
    /// Where the walk ended.
    pub cur_pos: Position,
}

/// 2004 USER_BUY: a player buys an artwork from a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBuy {
    /// Artwork id.
    #[serde(deserialize_with = "guid")]
    pub artwork_id: String,
    /// Selling character.
    #[serde(deserialize_with = "guid")]
    pub from_agent_id: String,
    /// Buying player.
    pub to_user_name: String,
    /// Offered price.
    #[serde(default)]
    pub price: i64,
}

/// 2005 USER_SELL: a player sells an artwork to a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSell {
    /// Artwork id.
    #[serde(deserialize_with = "guid")]
    pub artwork_id: String,
    /// Buying character.
    #[serde(deserialize_with = "guid")]
    pub to_agent_id: String,
    /// Selling player.
    pub from_user_name: String,
    /// Asking price.
    #[serde(default)]
    pub price: i64,
}

/// 2008 AGENT_BORN: a child of two characters joins the town.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBorn {
    /// The newborn.
    #[serde(deserialize_with = "guid")]
    pub agent_guid: String,
    /// Name; the server may leave it to the town.
    #[serde(default)]
    pub name: Option<String>,
    /// First parent.
    #[serde(default, deserialize_with = "optional_guid")]
    pub parent_agent_guid1: Option<String>,
    /// Second parent.
    #[serde(default, deserialize_with = "optional_guid")]
    pub parent_agent_guid2: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_are_accepted() {
        let stop: WalkStopped =
            from_payload(&json!({"agent_guid": 7, "cur_pos": {"x": 1.0, "y": 2.0}})).expect("parse");
        assert_eq!(stop.agent_guid, "7");
        assert_eq!(stop.cur_place_guid, None);
        assert!(from_payload::<WalkStopped>(&json!({"agent_guid": [], "cur_pos": {"x": 0, "y": 0}})).is_none());
    }

    #[test]
    fn birth_parents_are_optional() {
        let born: AgentBorn =
            from_payload(&json!({"agent_guid": 9, "parent_agent_guid1": 7, "parent_agent_guid2": null}))
                .expect("parse");
        assert_eq!(born.agent_guid, "9");
        assert_eq!(born.name, None);
        assert_eq!(born.parent_agent_guid1.as_deref(), Some("7"));
        assert_eq!(born.parent_agent_guid2, None);
    }

    #[test]
    fn trade_result_flattens_the_request() {
        let request = UserSell {
            artwork_id: "a1".into(),
            to_agent_id: "7".into(),
            from_user_name: "player".into(),
            price: 12,
        };
        let value = to_payload(&TradeResult::refused(request, "not enough gold"));
        assert_eq!(value["artwork_id"], "a1");
        assert_eq!(value["price"], 12);
        assert_eq!(value["is_succ"], false);
        assert_eq!(value["error_msg"], "not enough gold");
    }
}

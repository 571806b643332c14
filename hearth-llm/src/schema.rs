//! Response-shape validation against a bundled example.
//!
//! A model reply is accepted when, at every layer that is not exempt, it
//! carries all the keys the example carries, and every compared value has
//! the same JSON kind as its example counterpart. Layer 0 is the top-level
//! object. Recursion stops at the first exempt layer.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{LlmError, Result};

/// Highest layer index an [`ExemptLayers`] set can name.
pub const MAX_LAYER: u8 = 15;

/// The set of layers excluded from key checking.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ExemptLayers(u16);

impl ExemptLayers {
    /// Nothing exempt: every layer is checked.
    #[must_use]
    pub const fn strict() -> Self {
        Self(0)
    }

    /// Layers 2..=9 exempt: top-level and second-level keys are checked.
    #[must_use]
    pub const fn standard() -> Self {
        Self::range(2, 9)
    }

    /// Layers 1..=9 exempt: only top-level keys are checked.
    #[must_use]
    pub const fn reflective() -> Self {
        Self::range(1, 9)
    }

    const fn range(from: u8, to: u8) -> Self {
        let mut bits = 0u16;
        let mut layer = from;
        while layer <= to {
            bits |= 1 << layer;
            layer += 1;
        }
        Self(bits)
    }

    /// Build from explicit layer numbers. Layers above [`MAX_LAYER`] are ignored.
    #[must_use]
    pub fn from_layers(layers: &[u8]) -> Self {
        Self(
            layers
                .iter()
                .filter(|l| **l <= MAX_LAYER)
                .fold(0, |acc, l| acc | (1 << l)),
        )
    }

    /// Whether `layer` is exempt.
    #[must_use]
    pub fn is_exempt(self, layer: usize) -> bool {
        layer <= usize::from(MAX_LAYER) && self.0 & (1 << layer) != 0
    }

    /// The exempt layers, ascending.
    #[must_use]
    pub fn layers(self) -> Vec<u8> {
        (0..=MAX_LAYER).filter(|l| self.0 & (1 << l) != 0).collect()
    }
}

impl fmt::Debug for ExemptLayers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExemptLayers").field(&self.layers()).finish()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExemptRepr {
    Preset(String),
    Layers(Vec<u8>),
}

impl<'de> Deserialize<'de> for ExemptLayers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match ExemptRepr::deserialize(deserializer)? {
            ExemptRepr::Layers(layers) => Ok(Self::from_layers(&layers)),
            ExemptRepr::Preset(name) => match name.as_str() {
                "strict" => Ok(Self::strict()),
                "standard" => Ok(Self::standard()),
                "reflective" => Ok(Self::reflective()),
                other => Err(serde::de::Error::custom(format!(
                    "unknown exempt preset '{other}' (expected strict, standard or reflective)"
                ))),
            },
        }
    }
}

impl Serialize for ExemptLayers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.layers().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*\n(.*?)```").expect("fence pattern is valid"));

/// Pull the body of the first ```` ```json ```` fence out of `text`, or return
/// `text` unchanged when there is none.
#[must_use]
pub fn extract_json(text: &str) -> &str {
    JSON_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str().trim())
}

/// Extract and parse a reply into a JSON object.
///
/// # Errors
///
/// Returns [`LlmError::ParseError`] when the reply is not a JSON object.
pub fn parse_reply(text: &str) -> Result<Value> {
    let body = extract_json(text);
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| LlmError::ParseError(format!("Must return a JSON object: {e}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(LlmError::ParseError(format!(
            "Must return a JSON object, got {}",
            kind(&value)
        )))
    }
}

// ---------------------------------------------------------------------------
// Shape check
// ---------------------------------------------------------------------------

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check `reply` against `example`.
///
/// # Errors
///
/// Returns [`LlmError::SchemaValidation`] listing every problem found.
pub fn check_shape(example: &Value, reply: &Value, exempt: ExemptLayers) -> Result<()> {
    let mut problems = Vec::new();
    walk(example, reply, 0, exempt, "$", &mut problems);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(LlmError::SchemaValidation(problems.join("; ")))
    }
}

fn walk(
    expected: &Value,
    actual: &Value,
    layer: usize,
    exempt: ExemptLayers,
    path: &str,
    problems: &mut Vec<String>,
) {
    if kind(expected) != kind(actual) {
        problems.push(format!(
            "`{path}` should be {} but is {}",
            kind(expected),
            kind(actual)
        ));
        return;
    }
    let (Value::Object(expected), Value::Object(actual)) = (expected, actual) else {
        return;
    };
    if exempt.is_exempt(layer) {
        return;
    }
    let missing: Vec<&str> = expected
        .keys()
        .filter(|k| !actual.contains_key(*k))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        let all: Vec<&str> = expected.keys().map(String::as_str).collect();
        problems.push(format!(
            "`{path}` must contain all of {all:?}; missing {missing:?}"
        ));
    }
    for (key, child) in expected {
        if let Some(got) = actual.get(key) {
            walk(child, got, layer + 1, exempt, &format!("{path}.{key}"), problems);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presets_cover_expected_layers() {
        assert!(!ExemptLayers::standard().is_exempt(0));
        assert!(!ExemptLayers::standard().is_exempt(1));
        assert!(ExemptLayers::standard().is_exempt(2));
        assert!(ExemptLayers::reflective().is_exempt(1));
        assert!(!ExemptLayers::strict().is_exempt(5));
        assert!(!ExemptLayers::reflective().is_exempt(10));
    }

    #[test]
    fn missing_top_level_key_is_reported() {
        let example = json!({"action": "MOVE", "act_obj": "Bakery"});
        let reply = json!({"action": "MOVE"});
        let err = check_shape(&example, &reply, ExemptLayers::standard()).unwrap_err();
        assert!(err.to_string().contains("act_obj"));
    }

    #[test]
    fn extra_keys_are_allowed() {
        let example = json!({"a": 1});
        let reply = json!({"a": 2, "b": "extra"});
        check_shape(&example, &reply, ExemptLayers::strict()).expect("superset is fine");
    }

    #[test]
    fn type_mismatch_is_reported_even_at_exempt_layer() {
        let example = json!({"a": {"b": 1}});
        let reply = json!({"a": "flat"});
        assert!(check_shape(&example, &reply, ExemptLayers::reflective()).is_err());
    }

    #[test]
    fn exempt_layer_stops_recursion() {
        let example = json!({"emotions": {"pleasure": 0.1, "arousal": 0.0}});
        let reply = json!({"emotions": {"joy": 1}});
        check_shape(&example, &reply, ExemptLayers::reflective()).expect("layer 1 exempt");
        assert!(check_shape(&example, &reply, ExemptLayers::standard()).is_err());
    }

    #[test]
    fn strict_checks_deep_layers() {
        let example = json!({"a": {"b": {"c": true}}});
        let reply = json!({"a": {"b": {}}});
        assert!(check_shape(&example, &reply, ExemptLayers::standard()).is_ok());
        assert!(check_shape(&example, &reply, ExemptLayers::strict()).is_err());
    }

    #[test]
    fn fenced_json_is_extracted() {
        let text = "Sure!\n```json\n{\"a\": 1}\n```\nanything else";
        assert_eq!(extract_json(text), "{\"a\": 1}");
        assert_eq!(parse_reply(text).expect("parse")["a"], 1);
        assert_eq!(extract_json("{\"b\": 2}"), "{\"b\": 2}");
    }

    #[test]
    fn non_object_reply_is_parse_error() {
        assert!(matches!(parse_reply("[1, 2]"), Err(LlmError::ParseError(_))));
        assert!(matches!(parse_reply("not json"), Err(LlmError::ParseError(_))));
    }

    #[test]
    fn exempt_layers_deserialize_from_preset_or_list() {
        #[derive(Deserialize)]
        struct Holder {
            exempt: ExemptLayers,
        }
        let preset: Holder = toml::from_str("exempt = \"reflective\"").expect("preset");
        assert_eq!(preset.exempt, ExemptLayers::reflective());
        let list: Holder = toml::from_str("exempt = [3, 4]").expect("list");
        assert_eq!(list.exempt.layers(), vec![3, 4]);
        assert!(toml::from_str::<Holder>("exempt = \"loose\"").is_err());
    }
}

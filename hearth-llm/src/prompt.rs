//! Prompt catalog and strict template binding.
//!
//! Every prompt kind has a [`PromptSpec`]: a system and a user template with
//! `{name}` placeholders, a bundled example reply, the layers of that example
//! exempt from shape checking, and the reply keys worth remembering.
//! Built-in specs are compiled in; a directory of TOML files can override
//! them one kind at a time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{LlmError, Result};
use crate::schema::ExemptLayers;

/// Header placed before retained validation warnings in a retry prompt.
pub const WARNING_HEADER: &str =
    "Warning: in previous attempts, the returned response met the following errors:";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder pattern is valid"));

/// Placeholder names in `template`, in first-appearance order, without duplicates.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in PLACEHOLDER.captures_iter(template) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Replace every placeholder using `resolve`.
///
/// # Errors
///
/// Returns [`LlmError::UnboundPlaceholder`] for the first placeholder that
/// `resolve` cannot answer.
pub fn render_strict(
    template: &str,
    prompt: &str,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for cap in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let value = resolve(name.as_str()).ok_or_else(|| LlmError::UnboundPlaceholder {
            placeholder: name.as_str().to_string(),
            prompt: prompt.to_string(),
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Format retained warnings for appending to a prompt. Empty input gives an
/// empty string.
#[must_use]
pub fn warning_block(warnings: &[String]) -> String {
    if warnings.is_empty() {
        return String::new();
    }
    let mut block = format!("\n\n{WARNING_HEADER}\n");
    for w in warnings {
        block.push_str("- ");
        block.push_str(w);
        block.push('\n');
    }
    block
}

// ---------------------------------------------------------------------------
// PromptKind
// ---------------------------------------------------------------------------

/// Identifies a prompt by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PromptKind {
    /// Daily plan.
    Plan,
    /// Choose one concrete action.
    Act,
    /// Look around.
    Perceive,
    /// Ask oneself a question about the situation.
    PerceiveQuestion,
    /// Answer that question.
    PerceiveAnswer,
    /// Critique the current plan.
    Critic,
    /// Open a conversation.
    ChatInit,
    /// Hold a conversation.
    Chatting,
    /// Reflect on the last action.
    ActReflection,
    /// Use an object in a building.
    Use,
    /// Pick a drawing subject.
    DrawInit,
    /// Produce a drawing.
    Draw,
    /// Summarize an interaction.
    Summary,
    /// Appreciate a work.
    Appreciate,
    /// Propose a trade.
    Trade,
    /// Bargain over a price.
    Bargain,
    /// Update emotions.
    Emotion,
    /// Estimate a price.
    Estimate,
}

impl PromptKind {
    /// All prompt kinds.
    pub const ALL: [PromptKind; 18] = [
        Self::Plan,
        Self::Act,
        Self::Perceive,
        Self::PerceiveQuestion,
        Self::PerceiveAnswer,
        Self::Critic,
        Self::ChatInit,
        Self::Chatting,
        Self::ActReflection,
        Self::Use,
        Self::DrawInit,
        Self::Draw,
        Self::Summary,
        Self::Appreciate,
        Self::Trade,
        Self::Bargain,
        Self::Emotion,
        Self::Estimate,
    ];

    /// Configuration name, also the TOML file stem.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Act => "act",
            Self::Perceive => "perceive",
            Self::PerceiveQuestion => "perceive_question",
            Self::PerceiveAnswer => "perceive_answer",
            Self::Critic => "critic",
            Self::ChatInit => "chat_init",
            Self::Chatting => "chatting",
            Self::ActReflection => "act_reflection",
            Self::Use => "use",
            Self::DrawInit => "draw_init",
            Self::Draw => "draw",
            Self::Summary => "summary",
            Self::Appreciate => "appreciate",
            Self::Trade => "trade",
            Self::Bargain => "bargain",
            Self::Emotion => "emotion",
            Self::Estimate => "estimate",
        }
    }

    /// The TOML filename for this kind.
    #[must_use]
    pub fn filename(self) -> String {
        format!("{}.toml", self.as_str())
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| LlmError::ConfigError(format!("unknown prompt kind: '{s}'")))
    }
}

impl Serialize for PromptKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PromptKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// PromptSpec
// ---------------------------------------------------------------------------

/// On-disk form of a prompt spec. `example` is JSON text.
#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default = "default_version")]
    version: String,
    system: Option<String>,
    user: String,
    example: String,
    #[serde(default = "ExemptLayers::standard")]
    exempt: ExemptLayers,
    #[serde(default)]
    recordable: Vec<String>,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
}

fn default_version() -> String {
    "1".to_string()
}

/// A ready-to-render prompt.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    /// Which prompt this is.
    pub kind: PromptKind,
    /// Version string, recorded with every audit row.
    pub version: String,
    /// System (persona) template.
    pub system: String,
    /// User template.
    pub user: String,
    /// Example reply; its shape is what replies are checked against.
    pub example: Value,
    /// Layers of `example` excluded from key checking.
    pub exempt: ExemptLayers,
    /// Reply keys copied into working memory after a reply is accepted.
    pub recordable: Vec<String>,
    /// Last-resort placeholder values.
    pub defaults: BTreeMap<String, String>,
}

/// System and user text of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// System text.
    pub system: String,
    /// User text, followed by the example block.
    pub user: String,
}

impl PromptSpec {
    /// Parse a spec from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] for malformed TOML or example JSON.
    pub fn from_toml(kind: PromptKind, text: &str) -> Result<Self> {
        let file: PromptFile = toml::from_str(text)
            .map_err(|e| LlmError::ConfigError(format!("prompt '{kind}': {e}")))?;
        let example = serde_json::from_str(&file.example)
            .map_err(|e| LlmError::ConfigError(format!("prompt '{kind}' example: {e}")))?;
        Ok(Self {
            kind,
            version: file.version,
            system: file.system.unwrap_or_else(|| DEFAULT_SYSTEM.to_string()),
            user: file.user,
            example,
            exempt: file.exempt,
            recordable: file.recordable,
            defaults: file.defaults,
        })
    }

    /// Every placeholder either template needs.
    #[must_use]
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = placeholders(&self.system);
        for name in placeholders(&self.user) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Render both templates. `resolve` is consulted first; the spec's own
    /// defaults answer whatever it cannot.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::UnboundPlaceholder`] if a placeholder has no value.
    pub fn render(&self, mut resolve: impl FnMut(&str) -> Option<String>) -> Result<RenderedPrompt> {
        let name = self.kind.as_str();
        let mut lookup = |key: &str| resolve(key).or_else(|| self.defaults.get(key).cloned());
        let system = render_strict(&self.system, name, &mut lookup)?;
        let mut user = render_strict(&self.user, name, &mut lookup)?;
        user.push_str("\n\nReply with a single JSON object shaped like this example:\n");
        user.push_str(&self.example.to_string());
        Ok(RenderedPrompt { system, user })
    }
}

// ---------------------------------------------------------------------------
// PromptBook
// ---------------------------------------------------------------------------

/// All prompt specs known to a process.
#[derive(Debug, Clone)]
pub struct PromptBook {
    specs: HashMap<PromptKind, PromptSpec>,
}

impl PromptBook {
    /// The compiled-in specs, one per [`PromptKind`].
    #[must_use]
    pub fn builtin() -> Self {
        let mut specs = HashMap::new();
        for (kind, text) in BUILTIN {
            match PromptSpec::from_toml(*kind, text) {
                Ok(spec) => {
                    specs.insert(*kind, spec);
                }
                Err(e) => error!(kind = %kind, "built-in prompt is malformed: {e}"),
            }
        }
        Self { specs }
    }

    /// Built-in specs overridden by any `<kind>.toml` found in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing or a file fails to parse.
    pub fn with_overrides(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LlmError::ConfigError(format!(
                "prompt directory not found: {}",
                dir.display()
            )));
        }
        let mut book = Self::builtin();
        for kind in PromptKind::ALL {
            let path = dir.join(kind.filename());
            if path.exists() {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    LlmError::ConfigError(format!("failed to read {}: {e}", path.display()))
                })?;
                book.insert(PromptSpec::from_toml(kind, &text)?);
                debug!(kind = %kind, path = %path.display(), "prompt override loaded");
            }
        }
        Ok(book)
    }

    /// Add or replace a spec.
    pub fn insert(&mut self, spec: PromptSpec) {
        self.specs.insert(spec.kind, spec);
    }

    /// Look up a spec.
    #[must_use]
    pub fn get(&self, kind: PromptKind) -> Option<&PromptSpec> {
        self.specs.get(&kind)
    }

    /// Number of loaded specs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no specs are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Built-in specs
// ---------------------------------------------------------------------------

/// Persona template shared by every built-in prompt.
pub const DEFAULT_SYSTEM: &str = "You are {name}, a resident of a small town. {bio} \
Your long-term goal: {goal}. Right now you are in state {state}: {description}. \
Stay in character and answer only with JSON.";

const BUILTIN: &[(PromptKind, &str)] = &[
    (PromptKind::Plan, r#"
user = """It is {date}. You are at {building} with {money} gold and you feel {emotion}.
What you noticed recently: {perception}
Make a plan for the rest of the day."""
example = '{"BestPlan": ["walk to the bakery", "buy bread"], "Goal": "eat", "CurrentSituation": "hungry at home"}'
recordable = ["BestPlan", "Goal", "CurrentSituation"]
[defaults]
perception = "nothing in particular"
"#),
    (PromptKind::Act, r#"
user = """Your plan: {BestPlan}
Things you can do right now:
{candidates}
Pick exactly one. `action` must be one of the listed actions and `act_obj` its target."""
example = '{"action": "MOVE", "act_obj": "Bakery", "emoji": "🍞"}'
recordable = ["action", "act_obj", "emoji"]
[defaults]
BestPlan = "no plan yet"
candidates = "nothing"
"#),
    (PromptKind::Perceive, r#"
user = """You are at {building}. People around you: {people}.
Describe what you notice and how it makes you feel."""
example = '{"perception": "the square is busy", "feeling": "curious"}'
exempt = "strict"
recordable = ["perception"]
[defaults]
people = "nobody"
"#),
    (PromptKind::PerceiveQuestion, r#"
user = "Given what you noticed ({perception}), ask yourself one question about what to do next."
example = '{"question": "should I visit the market?"}'
recordable = ["question"]
[defaults]
perception = "nothing in particular"
"#),
    (PromptKind::PerceiveAnswer, r#"
user = "Answer your own question honestly: {question}"
example = '{"answer": "yes, I need flour"}'
recordable = ["answer"]
[defaults]
question = "what should I do next?"
"#),
    (PromptKind::Critic, r#"
user = "Review your current plan and say whether it still makes sense: {BestPlan}"
example = '{"critique": "the plan ignores my empty purse", "revise": true}'
recordable = ["critique"]
[defaults]
BestPlan = "no plan yet"
"#),
    (PromptKind::ChatInit, r#"
user = "You decided to talk to {act_obj}. How do you open the conversation?"
example = '{"init_conversation": "Good morning! Fresh bread today?"}'
recordable = ["init_conversation"]
[defaults]
act_obj = "someone nearby"
"#),
    (PromptKind::Chatting, r#"
user = """You are chatting with {act_obj}. You opened with: {init_conversation}
Write the rest of the short conversation and its outcome."""
example = '{"conversation": [{"speaker": "A", "line": "hello"}], "outcome": "agreed to meet later"}'
recordable = ["conversation", "outcome"]
[defaults]
act_obj = "someone nearby"
init_conversation = "Hello."
"#),
    (PromptKind::ActReflection, r#"
user = """You just did {action} with {act_obj}. Your plan: {BestPlan}
Did that complete the current step of your plan?"""
example = '{"step_complete": true, "reflection": "the bread is bought"}'
exempt = "reflective"
recordable = ["step_complete"]
[defaults]
action = "nothing"
act_obj = "nothing"
BestPlan = "no plan yet"
"#),
    (PromptKind::Use, r#"
user = "You are using {act_obj} inside {building}. What do you do with it and what does it cost you?"
example = '{"usage": "baked two loaves", "cost": 3}'
recordable = ["usage"]
[defaults]
act_obj = "whatever is at hand"
"#),
    (PromptKind::DrawInit, r#"
user = "You feel like making a picture. Feeling {emotion}, what will you draw and in what style?"
example = '{"theme": "the harbour at dusk", "style": "watercolour"}'
exempt = "reflective"
recordable = ["theme", "style"]
"#),
    (PromptKind::Draw, r#"
user = "Draw {theme} in a {style} style. Give the work a title and describe it."
example = '{"title": "Dusk", "description": "boats against an orange sky"}'
exempt = "reflective"
recordable = ["title", "description"]
[defaults]
theme = "anything you like"
style = "your own"
"#),
    (PromptKind::Summary, r#"
user = "Summarize what just happened between you and {act_obj}: {conversation}"
example = '{"interaction_summary": "we talked about bread prices"}'
exempt = "reflective"
recordable = ["interaction_summary"]
[defaults]
act_obj = "no one"
conversation = "nothing was said"
"#),
    (PromptKind::Appreciate, r#"
user = "Look at the work titled {title}: {description}. What do you think of it?"
example = '{"appreciation": "lovely colours", "like_score": 7, "improvement": "more contrast"}'
recordable = ["appreciation", "like_score", "improvement"]
[defaults]
title = "untitled"
description = "a small picture"
"#),
    (PromptKind::Trade, r#"
user = "You have {money} gold. Propose a trade to {act_obj}: which item and at what price?"
example = '{"item": "loaf", "price": 2}'
exempt = "strict"
recordable = ["item", "price"]
[defaults]
act_obj = "the shopkeeper"
"#),
    (PromptKind::Bargain, r#"
user = "You are bargaining over {item}; the asking price is {price}. You have {money} gold. Make an offer and say whether you accept."
example = '{"offer": 1, "deal": false}'
exempt = "strict"
recordable = ["offer", "deal"]
[defaults]
item = "the item"
price = "unknown"
"#),
    (PromptKind::Emotion, r#"
user = "Given what happened ({interaction_summary}), how do you feel now on each axis from -1 to 1?"
example = '{"emotions": {"pleasure": 0.2, "arousal": -0.1, "dominance": 0.0}}'
recordable = ["emotions"]
[defaults]
interaction_summary = "nothing much happened"
"#),
    (PromptKind::Estimate, r#"
user = "Estimate what {item} is worth in gold."
example = '{"expected_price": 4}'
exempt = "strict"
recordable = ["expected_price"]
[defaults]
item = "the item"
"#),
];

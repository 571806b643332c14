//! Engine configuration and per-character state topology.
//!
//! Maps to the `[engine]` and `[topology.*]` sections of `hearth.toml`.
//! Every tolerance here is a tuning knob, not a semantic constant.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use hearth_llm::PromptKind;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::state::ChainKind;
use crate::types::StateTag;

/// What to do with a model completion that arrives after its state moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Exiting a state abandons its in-flight call; late completions are dropped.
    #[default]
    Discard,
    /// Late completions still run the exited state's post-response chain.
    ApplyRegardless,
}

impl fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discard => "discard",
            Self::ApplyRegardless => "apply_regardless",
        })
    }
}

impl FromStr for StalePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discard" => Ok(Self::Discard),
            "apply_regardless" => Ok(Self::ApplyRegardless),
            other => Err(EngineError::Config(format!("unknown stale policy '{other}'"))),
        }
    }
}

/// Engine tolerances and policies shared by every character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Loop budget added on every entry into a state.
    #[serde(default = "default_circle_tolerance")]
    pub circle_tolerance: i32,
    /// Budget above which a state reports itself overlooped.
    #[serde(default = "default_loop_tolerance")]
    pub loop_tolerance: i32,
    /// Budget above which the manager gives up with a fatal error.
    #[serde(default = "default_fatal_loop_budget")]
    pub fatal_loop_budget: i32,
    /// Failed responses before validation is skipped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry warnings kept in working memory.
    #[serde(default = "default_retained_warnings")]
    pub retained_warnings: usize,
    /// Transition history capacity.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Interrupt stack capacity.
    #[serde(default = "default_interrupt_capacity")]
    pub interrupt_capacity: usize,
    /// State forced on a timeout when no state-specific target exists.
    #[serde(default = "default_recovery_state")]
    pub recovery_state: StateTag,
    /// State a character starts in.
    #[serde(default = "default_initial_state")]
    pub initial_state: StateTag,
    /// Handling of late model completions.
    #[serde(default)]
    pub stale_policy: StalePolicy,
    /// Fraction of the way mood relaxes toward neutral each tick.
    #[serde(default = "default_mood_drift_rate")]
    pub mood_drift_rate: f32,
    /// Satiety lost per tick while moving.
    #[serde(default = "default_satiety_drain")]
    pub satiety_drain: f32,
    /// Model request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            circle_tolerance: default_circle_tolerance(),
            loop_tolerance: default_loop_tolerance(),
            fatal_loop_budget: default_fatal_loop_budget(),
            max_retries: default_max_retries(),
            retained_warnings: default_retained_warnings(),
            history_capacity: default_history_capacity(),
            interrupt_capacity: default_interrupt_capacity(),
            recovery_state: default_recovery_state(),
            initial_state: default_initial_state(),
            stale_policy: StalePolicy::default(),
            mood_drift_rate: default_mood_drift_rate(),
            satiety_drain: default_satiety_drain(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the tolerances are mutually consistent.
    ///
    /// # Errors
    /// Returns `EngineError::Config` describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.circle_tolerance <= 0 {
            return Err(EngineError::Config("circle_tolerance must be positive".into()));
        }
        if self.fatal_loop_budget < self.loop_tolerance {
            return Err(EngineError::Config(format!(
                "fatal_loop_budget ({}) must not be below loop_tolerance ({})",
                self.fatal_loop_budget, self.loop_tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.mood_drift_rate) {
            return Err(EngineError::Config("mood_drift_rate must be within 0..=1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// A reference to a registered tool, attached to one of a state's chains.
///
/// Written either as a bare name, which lands just before the last step of
/// the post-response chain, or as a table naming the chain and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookRef {
    /// Bare tool name.
    Name(String),
    /// Tool placed explicitly.
    Placed {
        /// Registered tool name.
        name: String,
        /// Target chain.
        #[serde(default = "default_hook_chain")]
        chain: ChainKind,
        /// List-insert index; negative counts from the end.
        #[serde(default = "default_hook_index")]
        index: isize,
    },
}

impl HookRef {
    /// Registered tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Placed { name, .. } => name,
        }
    }

    /// Target chain.
    #[must_use]
    pub fn chain(&self) -> ChainKind {
        match self {
            Self::Name(_) => default_hook_chain(),
            Self::Placed { chain, .. } => *chain,
        }
    }

    /// Insert index within the chain.
    #[must_use]
    pub fn index(&self) -> isize {
        match self {
            Self::Name(_) => default_hook_index(),
            Self::Placed { index, .. } => *index,
        }
    }
}

/// Construction parameters for one state of one character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSetup {
    /// Allowed next states; empty means the tag's default profile.
    #[serde(default)]
    pub next: Vec<StateTag>,
    /// Extra registered tools.
    #[serde(default)]
    pub hooks: Vec<HookRef>,
    /// Free text shown to the model.
    #[serde(default)]
    pub description: Option<String>,
    /// Turns before timeout; `None` means the profile default.
    #[serde(default)]
    pub duration_tolerance: Option<u32>,
    /// Prompt override; `None` means the profile default.
    #[serde(default)]
    pub prompt: Option<PromptKind>,
    /// Named model profile for this state's requests.
    #[serde(default)]
    pub client: Option<String>,
}

/// A character's state topology: which states exist and how they connect.
pub type Topology = BTreeMap<StateTag, StateSetup>;

/// A topology using every tag's default profile.
#[must_use]
pub fn default_topology() -> Topology {
    StateTag::ALL
        .into_iter()
        .map(|tag| (tag, StateSetup::default()))
        .collect()
}

// ---------------------------------------------------------------------------
// Default value helpers (for serde)
// ---------------------------------------------------------------------------

fn default_circle_tolerance() -> i32 {
    4
}
fn default_loop_tolerance() -> i32 {
    5
}
fn default_fatal_loop_budget() -> i32 {
    20
}
fn default_max_retries() -> u32 {
    4
}
fn default_retained_warnings() -> usize {
    3
}
fn default_history_capacity() -> usize {
    1000
}
fn default_interrupt_capacity() -> usize {
    crate::interrupt::DEFAULT_CAPACITY
}
fn default_recovery_state() -> StateTag {
    StateTag::Persp
}
fn default_initial_state() -> StateTag {
    StateTag::Idle
}
fn default_mood_drift_rate() -> f32 {
    0.05
}
fn default_satiety_drain() -> f32 {
    0.5
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_hook_chain() -> ChainKind {
    ChainKind::PostResponse
}
fn default_hook_index() -> isize {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults are consistent");
        assert_eq!(config.circle_tolerance, 4);
        assert_eq!(config.stale_policy, StalePolicy::Discard);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml(
            "max_retries = 2\nstale_policy = \"apply_regardless\"\nrecovery_state = \"IDLE\"",
        )
        .expect("parse");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.loop_tolerance, 5);
        assert_eq!(config.stale_policy, StalePolicy::ApplyRegardless);
        assert_eq!(config.recovery_state, StateTag::Idle);
    }

    #[test]
    fn inconsistent_budgets_are_rejected() {
        let err = EngineConfig::from_toml("loop_tolerance = 10\nfatal_loop_budget = 3").unwrap_err();
        assert!(err.to_string().contains("fatal_loop_budget"));
    }

    #[test]
    fn hooks_accept_bare_and_placed_forms() {
        let setup: StateSetup = toml::from_str(
            r#"
            next = ["PLAN", "ACT"]
            hooks = ["route_use_or_chat", { name = "break_loop", chain = "update", index = -1 }]
            "#,
        )
        .expect("parse");
        assert_eq!(setup.next, vec![StateTag::Plan, StateTag::Act]);
        assert_eq!(setup.hooks[0].chain(), ChainKind::PostResponse);
        assert_eq!(setup.hooks[1].chain(), ChainKind::Update);
        assert_eq!(setup.hooks[1].name(), "break_loop");
    }

    #[test]
    fn default_topology_covers_every_tag() {
        assert_eq!(default_topology().len(), StateTag::ALL.len());
    }
}

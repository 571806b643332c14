//! Town configuration (`hearth.toml`).
//!
//! One file describes a whole town: logging, engine tolerances, the model
//! client, the simulation clock, buildings, characters and their state
//! topologies. It is read once at startup and never changes afterwards.
//!
//! ```toml
//! [general]
//! log_level = "info"
//! log_format = "pretty"
//!
//! [engine]
//! circle_tolerance = 3
//!
//! [llm]
//! provider = "ollama"
//! default_model = "llama3.2"
//!
//! [[buildings]]
//! name = "Bakery"
//! min = { x = 0.0, y = 0.0 }
//! max = { x = 10.0, y = 10.0 }
//!
//! [[characters]]
//! name = "Mira"
//! guid = "7"
//!
//! [topology.BASE.ACT]
//! hooks = ["route_use_or_chat"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hearth_core::config::{EngineConfig, Topology, default_topology};
use hearth_core::services::Place;
use hearth_core::{Character, Position};
use hearth_llm::{LlmClient, LlmProvider};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TownError};

/// Topology key used for characters without one of their own.
pub const BASE_TOPOLOGY: &str = "BASE";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// `[general]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// `[llm]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `ollama`, `openai` or `none`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Endpoint base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model used when a state names no profile.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Named model profiles, selectable per state with `client = "..."`.
    #[serde(default)]
    pub profiles: BTreeMap<String, String>,
    /// Per-request timeout; overrides `engine.request_timeout_ms` when set.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// HTTP-level retries inside the client.
    #[serde(default = "default_http_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key_env: None,
            default_model: default_model(),
            profiles: BTreeMap::new(),
            timeout_ms: None,
            max_retries: default_http_retries(),
        }
    }
}

impl LlmConfig {
    /// Build the HTTP client this section describes.
    ///
    /// # Errors
    ///
    /// Returns [`TownError::Llm`] for an unknown provider name.
    pub fn client(&self) -> Result<LlmClient> {
        let api_key = self.api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
        let provider = LlmProvider::from_parts(&self.provider, &self.base_url, api_key)?;
        let mut client = LlmClient::new(provider, self.default_model.clone(), self.max_retries);
        for (name, model) in &self.profiles {
            client = client.with_profile(name.clone(), model.clone());
        }
        Ok(client)
    }
}

/// `[simulation]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Real seconds between ticks.
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: f64,
    /// Simulated hours per real second.
    #[serde(default = "default_hours_per_second")]
    pub hours_per_second: f64,
    /// Ticks without a heartbeat (2002) before the town stops; 0 disables.
    #[serde(default = "default_heartbeat_ticks")]
    pub heartbeat_ticks: u64,
    /// Ticks between checkpoints; 0 disables.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// SQLite audit database; in-memory when unset.
    #[serde(default)]
    pub audit_path: Option<PathBuf>,
    /// Directory of prompt overrides (`<kind>.toml`).
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
    /// Answer every walk request with an immediate arrival, standing in for
    /// the game server.
    #[serde(default)]
    pub echo_walks: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            hours_per_second: default_hours_per_second(),
            heartbeat_ticks: default_heartbeat_ticks(),
            checkpoint_interval: default_checkpoint_interval(),
            audit_path: None,
            prompt_dir: None,
            echo_walks: false,
        }
    }
}

/// One `[[characters]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Unique name.
    pub name: String,
    /// Game-server id.
    pub guid: String,
    /// Biography.
    #[serde(default)]
    pub bio: String,
    /// Long-term goal.
    #[serde(default)]
    pub goal: String,
    /// Starting gold.
    #[serde(default)]
    pub money: i64,
    /// Starting position.
    #[serde(default)]
    pub position: Position,
    /// Free-form profile fields (occupation, wage, ...), visible to prompts.
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
}

impl CharacterConfig {
    /// A fresh character from this entry.
    #[must_use]
    pub fn character(&self) -> Character {
        let mut character = Character::new(self.name.clone(), self.guid.clone())
            .with_bio(self.bio.clone())
            .with_goal(self.goal.clone())
            .with_money(self.money)
            .with_position(self.position);
        character.profile.clone_from(&self.profile);
        character
    }
}

// ---------------------------------------------------------------------------
// TownConfig
// ---------------------------------------------------------------------------

/// The whole `hearth.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TownConfig {
    /// `[general]`
    #[serde(default)]
    pub general: GeneralConfig,
    /// `[engine]`
    #[serde(default)]
    pub engine: EngineConfig,
    /// `[llm]`
    #[serde(default)]
    pub llm: LlmConfig,
    /// `[simulation]`
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// `[[buildings]]`
    #[serde(default)]
    pub buildings: Vec<Place>,
    /// `[[characters]]`
    #[serde(default)]
    pub characters: Vec<CharacterConfig>,
    /// `[topology.<character>.<TAG>]`
    #[serde(default)]
    pub topology: BTreeMap<String, Topology>,
}

impl TownConfig {
    /// Parse and validate a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TownError::Config`] for malformed TOML (including unknown
    /// state tags) or inconsistent values.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| TownError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`TownError::Io`] if the file cannot be read, otherwise as
    /// [`TownConfig::from_toml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Check cross-section consistency.
    ///
    /// # Errors
    ///
    /// Returns [`TownError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.simulation.update_interval_secs <= 0.0 {
            return Err(TownError::Config("update_interval_secs must be positive".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for character in &self.characters {
            if !seen.insert(character.name.as_str()) {
                return Err(TownError::Config(format!("duplicate character '{}'", character.name)));
            }
        }
        for name in self.topology.keys() {
            if name != BASE_TOPOLOGY && !seen.contains(name.as_str()) {
                return Err(TownError::Config(format!("topology for unknown character '{name}'")));
            }
        }
        for building in &self.buildings {
            if building.min.x > building.max.x || building.min.y > building.max.y {
                return Err(TownError::Config(format!("building '{}' has inverted bounds", building.name)));
            }
        }
        Ok(())
    }

    /// Engine settings with the model timeout applied.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        if let Some(timeout) = self.llm.timeout_ms {
            engine.request_timeout_ms = timeout;
        }
        engine
    }

    /// The topology for `character`: its own, else `BASE`, else every tag
    /// with its default profile.
    #[must_use]
    pub fn topology_for(&self, character: &str) -> Topology {
        self.topology
            .get(character)
            .or_else(|| self.topology.get(BASE_TOPOLOGY))
            .cloned()
            .unwrap_or_else(default_topology)
    }
}

// ---------------------------------------------------------------------------
// Default value helpers (for serde)
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}
fn default_provider() -> String {
    "ollama".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2".to_string()
}
fn default_http_retries() -> u32 {
    2
}
fn default_update_interval() -> f64 {
    1.0
}
fn default_hours_per_second() -> f64 {
    0.1
}
fn default_heartbeat_ticks() -> u64 {
    600
}
fn default_checkpoint_interval() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::StateTag;
    use hearth_core::config::{HookRef, StalePolicy};
    use hearth_core::state::ChainKind;

    const TOWN: &str = r#"
[general]
log_format = "json"

[engine]
circle_tolerance = 3
stale_policy = "apply_regardless"

[llm]
provider = "none"
timeout_ms = 5000
profiles = { chat = "small-model" }

[[buildings]]
name = "Bakery"
description = "warm and busy"
min = { x = 0.0, y = 0.0 }
max = { x = 10.0, y = 10.0 }

[[characters]]
name = "Mira"
guid = "7"
money = 20
position = { x = 2.0, y = 3.0 }
profile = { occupation = "baker", wage = "5" }

[[characters]]
name = "Tom"
guid = "8"

[topology.BASE.IDLE]
next = ["PERSP"]

[topology.Mira.IDLE]
next = ["PLAN"]
duration_tolerance = 2

[topology.Mira.PLAN]
hooks = ["mute_followed_states", { name = "break_loop", chain = "update", index = -1 }]
client = "chat"
"#;

    #[test]
    fn full_file_parses() {
        let config = TownConfig::from_toml(TOWN).expect("parse");
        assert_eq!(config.general.log_format, LogFormat::Json);
        assert_eq!(config.engine.circle_tolerance, 3);
        assert_eq!(config.engine.stale_policy, StalePolicy::ApplyRegardless);
        assert_eq!(config.engine.loop_tolerance, 5, "unset fields keep defaults");
        assert_eq!(config.engine_config().request_timeout_ms, 5000);
        assert_eq!(config.buildings[0].name, "Bakery");
        assert_eq!(config.characters[0].character().money, 20);
        assert_eq!(config.characters[0].character().attribute("occupation").as_deref(), Some("baker"));

        let plan = &config.topology_for("Mira")[&StateTag::Plan];
        assert_eq!(plan.hooks[0], HookRef::Name("mute_followed_states".into()));
        assert_eq!(plan.hooks[1].chain(), ChainKind::Update);
        assert_eq!(plan.hooks[1].index(), -1);
        assert_eq!(plan.client.as_deref(), Some("chat"));
    }

    #[test]
    fn characters_without_topology_fall_back_to_base() {
        let config = TownConfig::from_toml(TOWN).expect("parse");
        let tom = config.topology_for("Tom");
        assert_eq!(tom.len(), 1);
        assert_eq!(tom[&StateTag::Idle].next, vec![StateTag::Persp]);

        let bare = TownConfig::default();
        assert_eq!(bare.topology_for("anyone").len(), StateTag::ALL.len());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = TownConfig::from_toml("[topology.BASE.DANCE]\nnext = [\"IDLE\"]").unwrap_err();
        assert!(matches!(err, TownError::Config(_)), "{err}");
    }

    #[test]
    fn topology_for_unknown_character_is_rejected() {
        let err = TownConfig::from_toml("[topology.Ghost.IDLE]\nnext = [\"PERSP\"]").unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn inconsistent_engine_tolerances_are_rejected() {
        let err = TownConfig::from_toml("[engine]\nloop_tolerance = 9\nfatal_loop_budget = 3").unwrap_err();
        assert!(matches!(err, TownError::Engine(_)), "{err}");
    }

    #[test]
    fn llm_section_builds_a_client() {
        let config = TownConfig::from_toml(TOWN).expect("parse");
        config.llm.client().expect("none provider is valid");

        let mut bad = config.llm.clone();
        bad.provider = "carrier-pigeon".into();
        assert!(bad.client().is_err());
    }
}

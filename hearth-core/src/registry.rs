//! Startup-time lookup tables: state installers, prompt specs and tools.
//!
//! A [`RegistryBuilder`] is filled once while the process loads, then frozen
//! into a [`Registry`] shared by `Arc`. Nothing mutates a frozen registry.
//!
//! | kind   | key          | value                 |
//! |--------|--------------|-----------------------|
//! | state  | [`StateTag`] | [`StateInstaller`]    |
//! | prompt | [`PromptKind`] | [`PromptSpec`]      |
//! | tool   | name         | [`Step`]              |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hearth_llm::{PromptBook, PromptKind, PromptSpec};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::state::{BehaviorState, Step};
use crate::steps;
use crate::types::StateTag;

/// Customizes the chains of a freshly built state.
///
/// # Errors
///
/// An installer fails when the chains it expects to edit are missing a step
/// it anchors on.
pub type StateInstaller = fn(&mut BehaviorState) -> Result<()>;

/// The three disjoint tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    /// State installers.
    State,
    /// Prompt specs.
    Prompt,
    /// Hook tools.
    Tool,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::State => "state",
            Self::Prompt => "prompt",
            Self::Tool => "tool",
        })
    }
}

/// A resolved registry entry.
#[derive(Debug, Clone)]
pub enum Entry<'r> {
    /// A state installer.
    State(StateInstaller),
    /// A prompt spec.
    Prompt(&'r PromptSpec),
    /// A hook tool.
    Tool(&'r Step),
}

/// Mutable registry, used only while loading.
pub struct RegistryBuilder {
    states: HashMap<StateTag, StateInstaller>,
    prompts: PromptBook,
    tools: HashMap<String, Step>,
}

impl RegistryBuilder {
    /// A builder holding the built-in prompt catalog and nothing else.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            prompts: PromptBook::builtin(),
            tools: HashMap::new(),
        }
    }

    /// Replace the whole prompt table.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptBook) -> Self {
        self.prompts = prompts;
        self
    }

    /// Register every built-in tool.
    #[must_use]
    pub fn with_builtin_tools(mut self) -> Self {
        for tool in steps::builtin_tools() {
            self.register_tool(tool);
        }
        self
    }

    /// Register the installer for `tag`. A second registration overwrites.
    pub fn register_state(&mut self, tag: StateTag, installer: StateInstaller) -> &mut Self {
        if self.states.insert(tag, installer).is_some() {
            debug!(state = %tag, "state installer overwritten");
        }
        self
    }

    /// Register a prompt spec under its kind. A second registration overwrites.
    pub fn register_prompt(&mut self, spec: PromptSpec) -> &mut Self {
        self.prompts.insert(spec);
        self
    }

    /// Register a tool under its step name. A second registration overwrites.
    pub fn register_tool(&mut self, step: Step) -> &mut Self {
        let name = step.name().to_string();
        if self.tools.insert(name.clone(), step).is_some() {
            debug!(tool = %name, "tool overwritten");
        }
        self
    }

    /// Freeze into a shareable registry.
    #[must_use]
    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            states: self.states,
            prompts: self.prompts,
            tools: self.tools,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen registry.
pub struct Registry {
    states: HashMap<StateTag, StateInstaller>,
    prompts: PromptBook,
    tools: HashMap<String, Step>,
}

impl Registry {
    /// Start a builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Installer for `tag`, if one was registered.
    #[must_use]
    pub fn installer(&self, tag: StateTag) -> Option<StateInstaller> {
        self.states.get(&tag).copied()
    }

    /// Installer for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if none was registered.
    pub fn state(&self, tag: StateTag) -> Result<StateInstaller> {
        self.installer(tag)
            .ok_or_else(|| EngineError::not_found(RegistryKind::State.to_string(), tag.as_str()))
    }

    /// Prompt spec for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if none was registered.
    pub fn prompt(&self, kind: PromptKind) -> Result<&PromptSpec> {
        self.prompts
            .get(kind)
            .ok_or_else(|| EngineError::not_found(RegistryKind::Prompt.to_string(), kind.as_str()))
    }

    /// Tool called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if none was registered.
    pub fn tool(&self, name: &str) -> Result<&Step> {
        self.tools
            .get(name)
            .ok_or_else(|| EngineError::not_found(RegistryKind::Tool.to_string(), name))
    }

    /// Resolve `name` in the table of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the name does not parse as a key
    /// of that table or nothing is registered under it.
    pub fn resolve(&self, kind: RegistryKind, name: &str) -> Result<Entry<'_>> {
        let missing = || EngineError::not_found(kind.to_string(), name);
        match kind {
            RegistryKind::State => {
                let tag: StateTag = name.parse().map_err(|_| missing())?;
                self.state(tag).map(Entry::State)
            }
            RegistryKind::Prompt => {
                let prompt: PromptKind = name.parse().map_err(|_| missing())?;
                self.prompt(prompt).map(Entry::Prompt)
            }
            RegistryKind::Tool => self.tool(name).map(Entry::Tool),
        }
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("states", &self.states.len())
            .field("prompts", &self.prompts.len())
            .field("tools", &self.tool_names())
            .finish()
    }
}

//! State Machine Manager — owns a character, its states and its history.
//!
//! ```text
//!  update(inbound, clock)
//!    ├─ deliver mail (interrupts, working-memory notes)
//!    ├─ fatal if loop budget > fatal_loop_budget
//!    ├─ [ApplyRegardless] settle late completions of exited states
//!    ├─ active.update(...)
//!    └─ decided? ─▶ change_to(next)
//!                     ├─ post-exit for every distinct state in history
//!                     ├─ purge states whose budget went negative
//!                     ├─ exit active, push to history
//!                     └─ enter next (previous = old active)
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::character::{Character, CharacterCheckpoint};
use crate::config::{EngineConfig, StalePolicy, Topology};
use crate::error::{EngineError, Result};
use crate::interrupt::InterruptStack;
use crate::message::ServerMessage;
use crate::services::{Mail, RosterEntry, Services};
use crate::state::{BehaviorState, StateCore, TurnSignals};
use crate::steps::LOOP_BREAK_TARGET;
use crate::types::{GameClock, StateTag};

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// State that ran the tick.
    pub state: StateTag,
    /// Elapsed turns exceeded the duration tolerance.
    pub overduration: bool,
    /// Loop budget exceeded the loop tolerance.
    pub overlooped: bool,
    /// Transition taken at the end of the tick.
    pub transition: Option<(StateTag, StateTag)>,
}

/// One character's state machine.
#[derive(Debug)]
pub struct StateMachine {
    character: Character,
    states: BTreeMap<StateTag, BehaviorState>,
    active: Option<StateTag>,
    history: VecDeque<StateTag>,
    services: Services,
    config: Arc<EngineConfig>,
}

impl StateMachine {
    /// Build every state of `topology` for `character`.
    ///
    /// RECEIVECHAT is added when the topology omits it. Each state gets the
    /// standard chains, then its registered installer, then its configured
    /// hooks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unregistered prompt or tool,
    /// and [`EngineError::Config`] when a next state, a timeout target or the
    /// `break_loop` target is not configured.
    pub fn build(
        mut character: Character,
        topology: &Topology,
        services: Services,
        config: Arc<EngineConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let mut topology = topology.clone();
        topology.entry(StateTag::RECEIVE_INTERRUPT).or_default();

        let mut states = BTreeMap::new();
        for (tag, setup) in &topology {
            let profile = tag.profile();
            let next = if setup.next.is_empty() { profile.next } else { &setup.next[..] };
            let mut core = StateCore::new(*tag, next, setup.duration_tolerance.unwrap_or(profile.duration_tolerance));
            core.description = setup
                .description
                .clone()
                .unwrap_or_else(|| format!("{} state", tag.as_str().to_lowercase()));
            core.prompt = setup.prompt.or(profile.prompt);
            core.client.clone_from(&setup.client);
            if let Some(kind) = core.prompt {
                services.registry.prompt(kind)?;
            }

            let mut state = BehaviorState::new(core);
            if let Some(install) = services.registry.installer(*tag) {
                install(&mut state)?;
            }
            for hook in &setup.hooks {
                if hook.name() == "break_loop" && !topology.contains_key(&LOOP_BREAK_TARGET) {
                    return Err(EngineError::Config(format!(
                        "{tag} uses break_loop but {LOOP_BREAK_TARGET} is not configured for {}",
                        character.name
                    )));
                }
                let tool = services.registry.tool(hook.name())?.clone();
                state.chains.get_mut(hook.chain()).insert(hook.index(), tool);
            }
            states.insert(*tag, state);
        }

        for state in states.values_mut() {
            if let Some(missing) = state.core.allowed().iter().find(|t| !topology.contains_key(*t)) {
                return Err(EngineError::Config(format!(
                    "{} lists {missing} as a next state but {missing} is not configured for {}",
                    state.tag(),
                    character.name
                )));
            }
            if state.core.timeout_target.is_none() {
                let fallback = if topology.contains_key(&config.recovery_state) {
                    config.recovery_state
                } else {
                    state.core.first_next()
                };
                state.core.timeout_target = Some(fallback);
            }
            if let Some(target) = state.core.timeout_target.filter(|t| !topology.contains_key(t)) {
                return Err(EngineError::Config(format!(
                    "timeout target {target} of {} is not configured for {}",
                    state.tag(),
                    character.name
                )));
            }
        }

        character.interrupts = InterruptStack::new(config.interrupt_capacity);
        info!(character = %character.name, states = states.len(), "state machine built");
        Ok(Self {
            character,
            states,
            active: None,
            history: VecDeque::new(),
            services,
            config,
        })
    }

    /// Enter the configured initial state.
    ///
    /// # Errors
    ///
    /// See [`StateMachine::change_to`].
    pub fn start(&mut self) -> Result<()> {
        let initial = self.config.initial_state;
        self.change_to(initial)?;
        self.publish();
        Ok(())
    }

    /// Restore a checkpoint and enter its state (or the initial state).
    ///
    /// # Errors
    ///
    /// See [`StateMachine::change_to`].
    pub fn resume(&mut self, checkpoint: &CharacterCheckpoint) -> Result<()> {
        self.character.restore(checkpoint);
        let state = checkpoint
            .state
            .filter(|t| self.states.contains_key(t))
            .unwrap_or(self.config.initial_state);
        self.change_to(state)?;
        self.publish();
        Ok(())
    }

    /// Switch to `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if `tag` is not configured, leaving
    /// the active state unchanged. Fatal step errors propagate; a fatal exit
    /// also leaves the active state and history unchanged.
    pub fn change_to(&mut self, tag: StateTag) -> Result<()> {
        if !self.states.contains_key(&tag) {
            return Err(EngineError::not_found("state", tag.as_str()));
        }

        let seen: BTreeSet<StateTag> = self.history.iter().copied().collect();
        for past in &seen {
            if let Some(state) = self.states.get_mut(past) {
                state.post_exit(&mut self.character, &self.services, &self.config)?;
            }
        }
        let before = self.history.len();
        let states = &self.states;
        self.history
            .retain(|t| states.get(t).is_some_and(|s| s.core.loop_budget >= 0));
        if self.history.len() < before {
            debug!(character = %self.character.name, purged = before - self.history.len(), "history purged");
        }

        // A fatal exit leaves the current state active.
        let previous = self.active;
        if let Some(current) = previous {
            if let Some(state) = self.states.get_mut(&current) {
                state.exit(&mut self.character, &self.services, &self.config)?;
            }
            self.history.push_back(current);
            while self.history.len() > self.config.history_capacity {
                self.history.pop_front();
            }
        }

        self.active = Some(tag);
        if let Some(state) = self.states.get_mut(&tag) {
            state.enter(&mut self.character, &self.services, &self.config, previous)?;
        }
        Ok(())
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotStarted`] before [`StateMachine::start`],
    /// [`EngineError::Overlooped`] once the active state's budget passes the
    /// fatal limit, and any fatal step error.
    pub fn update(&mut self, inbound: Option<&ServerMessage>, clock: GameClock) -> Result<TickReport> {
        let tag = self
            .active
            .ok_or_else(|| EngineError::NotStarted(self.character.name.clone()))?;
        self.deliver_mail();

        let budget = self.states.get(&tag).map_or(0, |s| s.core.loop_budget);
        if budget > self.config.fatal_loop_budget {
            return Err(EngineError::Overlooped {
                character: self.character.name.clone(),
                state: tag,
                loop_budget: budget,
            });
        }

        if self.config.stale_policy == StalePolicy::ApplyRegardless {
            self.settle_exited()?;
        }

        let state = self
            .states
            .get_mut(&tag)
            .ok_or_else(|| EngineError::not_found("state", tag.as_str()))?;
        let TurnSignals { overduration, overlooped } =
            state.update(&mut self.character, &self.services, &self.config, inbound, clock)?;

        let mut transition = None;
        if let Some(next) = state.core.take_decision() {
            info!(character = %self.character.name, from = %tag, to = %next, "transition");
            self.change_to(next)?;
            transition = Some((tag, next));
        }
        Ok(TickReport {
            state: tag,
            overduration,
            overlooped,
            transition,
        })
    }

    /// Wait for the active state's in-flight model call to resolve. Returns
    /// `false` when nothing was in flight.
    pub async fn settle(&mut self) -> bool {
        let Some(tag) = self.active else {
            return false;
        };
        match self.states.get_mut(&tag) {
            Some(state) => state.core.wait_completion().await,
            None => false,
        }
    }

    /// Publish this character's snapshot to the roster.
    pub fn publish(&self) {
        self.services.roster.publish(
            &self.character.name,
            RosterEntry {
                guid: self.character.guid.clone(),
                state: self.active,
                position: self.character.position,
                building: self.character.building.clone(),
            },
        );
    }

    fn deliver_mail(&mut self) {
        for mail in self.services.roster.collect(&self.character.name) {
            match mail {
                Mail::Hang { tag, .. } => {
                    if let Some(dropped) = self.character.interrupts.push(tag) {
                        warn!(character = %self.character.name, dropped = %dropped, "interrupt stack full");
                    }
                    debug!(character = %self.character.name, interrupt = %tag, "interrupt received");
                }
                Mail::Remember { key, value, .. } => self.character.memory.store(key, value),
            }
        }
    }

    fn settle_exited(&mut self) -> Result<()> {
        let exited: BTreeSet<StateTag> = self
            .history
            .iter()
            .copied()
            .filter(|t| Some(*t) != self.active)
            .collect();
        for tag in exited {
            if let Some(state) = self.states.get_mut(&tag) {
                if let Some(completion) = state.core.take_completion() {
                    debug!(character = %self.character.name, state = %tag, "applying late completion");
                    state.apply_completion(completion, &mut self.character, &self.services, &self.config)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The active state.
    #[must_use]
    pub fn active(&self) -> Option<StateTag> {
        self.active
    }

    /// The state instance for `tag`.
    #[must_use]
    pub fn state(&self, tag: StateTag) -> Option<&BehaviorState> {
        self.states.get(&tag)
    }

    /// Configured tags.
    pub fn tags(&self) -> impl Iterator<Item = StateTag> + '_ {
        self.states.keys().copied()
    }

    /// Retained history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<StateTag> {
        self.history.iter().copied().collect()
    }

    /// The character.
    #[must_use]
    pub fn character(&self) -> &Character {
        &self.character
    }

    /// The character, mutably.
    pub fn character_mut(&mut self) -> &mut Character {
        &mut self.character
    }

    /// Shared collaborators.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Checkpoint of the character and its active state.
    #[must_use]
    pub fn checkpoint(&self) -> CharacterCheckpoint {
        self.character.checkpoint(self.active)
    }
}

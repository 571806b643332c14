//! Behavioral State — one node of a character's state machine.
//!
//! A state owns five hook chains and the bookkeeping of a single visit:
//!
//! ```text
//!  enter ──▶ [dispatch] ─ ─ ─ completion ─ ─ ─▶ post-response ──▶ route
//!    │                                               │
//!    │          update (every tick) ◀────────────────┘ retry: re-run enter
//!    │            └─ enforce_timeout / check_transition ──▶ decided
//!    ▼
//!  exit ──▶ history ──▶ post-exit (every change) ──▶ purged once budget < 0
//! ```
//!
//! Model calls run on a spawned task and report back over a channel. The
//! state pulls completions at the start of its next update, so a chain step
//! never runs another chain. Every dispatch carries a generation number; a
//! completion for an older generation is stale and is dropped.
//!
//! Instances are built once per character and reused for every visit.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hearth_llm::{ChatMessage, LlmError, LlmResponse, PromptKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chain::{ChainContext, ChainFailure, HookChain, HookError, NamedStep, Partial, StepResult};
use crate::character::Character;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::message::{GameMessage, MessageId, ServerMessage};
use crate::services::Services;
use crate::steps;
use crate::types::{GameClock, StateTag};
use crate::working_memory::value_text;

// ---------------------------------------------------------------------------
// Chain kinds and steps
// ---------------------------------------------------------------------------

/// The five chains every state owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    /// Runs on entry and on every retry.
    Enter,
    /// Runs once per tick.
    Update,
    /// Runs on exit.
    Exit,
    /// Runs when a model response arrives.
    PostResponse,
    /// Runs once per state change while the state is in history.
    PostExit,
}

impl ChainKind {
    /// Every kind.
    pub const ALL: [ChainKind; 5] = [
        Self::Enter,
        Self::Update,
        Self::Exit,
        Self::PostResponse,
        Self::PostExit,
    ];

    /// Snake-case name used in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Update => "update",
            Self::Exit => "exit",
            Self::PostResponse => "post_response",
            Self::PostExit => "post_exit",
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| EngineError::Config(format!("unknown chain '{s}'")))
    }
}

/// Signature of a state step.
pub type StepFn = dyn for<'a, 'b> Fn(&'b mut Turn<'a>, &ChainContext) -> StepResult + Send + Sync;

/// A named state step.
pub type Step = NamedStep<StepFn>;

/// A chain of state steps.
pub type Chain = HookChain<StepFn>;

/// Wrap a function as a named state step.
pub fn step<F>(name: &'static str, needs: &'static [&'static str], func: F) -> Step
where
    F: for<'a, 'b> Fn(&'b mut Turn<'a>, &ChainContext) -> StepResult + Send + Sync + 'static,
{
    let func: Arc<StepFn> = Arc::new(func);
    NamedStep::new(name, needs, func)
}

/// What a step can touch while it runs.
pub struct Turn<'a> {
    /// The running state's bookkeeping.
    pub core: &'a mut StateCore,
    /// The character the state belongs to.
    pub character: &'a mut Character,
    /// Shared collaborators.
    pub services: &'a Services,
    /// Engine tolerances.
    pub config: &'a EngineConfig,
}

impl Turn<'_> {
    /// Queue a message for the game server.
    pub fn push(&self, id: MessageId, payload: Value) {
        self.services.outbound.push(GameMessage::new(id, payload));
    }

    /// Whether shape validation is skipped for this response.
    #[must_use]
    pub fn lenient(&self) -> bool {
        self.core.retry_attempts >= self.config.max_retries
    }
}

// ---------------------------------------------------------------------------
// StateCore
// ---------------------------------------------------------------------------

/// A resolved model call.
#[derive(Debug)]
pub struct Completion {
    /// Dispatch generation that produced it.
    pub generation: u64,
    /// The backend's answer.
    pub result: std::result::Result<LlmResponse, LlmError>,
}

/// Everything about a state except its chains.
pub struct StateCore {
    /// This state's tag.
    pub tag: StateTag,
    /// Free text shown to the model.
    pub description: String,
    /// Turns before a forced timeout.
    pub duration_tolerance: u32,
    /// Turns spent in the current visit.
    pub elapsed_turns: u32,
    /// Revisit credit; negative means purge from history.
    pub loop_budget: i32,
    /// The state active before this visit.
    pub previous_state: Option<StateTag>,
    /// State forced when the visit times out.
    pub timeout_target: Option<StateTag>,
    /// Prompt sent on entry, if any.
    pub prompt: Option<PromptKind>,
    /// Named model profile.
    pub client: Option<String>,
    /// Custom attributes visible to prompts and other characters' snapshots.
    pub attributes: Partial,
    /// Turns exchanged with the model during this visit.
    pub conversation: Vec<ChatMessage>,
    allowed: Vec<StateTag>,
    requested: Option<StateTag>,
    forced: Option<StateTag>,
    decided: Option<StateTag>,
    retry_attempts: u32,
    retry_pending: bool,
    last_reply: Option<Value>,
    generation: u64,
    awaiting: Option<u64>,
    parked: Option<Completion>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl StateCore {
    /// Bookkeeping for `tag` with the given next states.
    ///
    /// The allowed set is `next`, then the state itself, then the
    /// receive-interrupt state, without duplicates.
    #[must_use]
    pub fn new(tag: StateTag, next: &[StateTag], duration_tolerance: u32) -> Self {
        let mut allowed = Vec::with_capacity(next.len() + 2);
        for t in next.iter().copied().chain([tag, StateTag::RECEIVE_INTERRUPT]) {
            if !allowed.contains(&t) {
                allowed.push(t);
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tag,
            description: String::new(),
            duration_tolerance,
            elapsed_turns: 0,
            loop_budget: 0,
            previous_state: None,
            timeout_target: None,
            prompt: None,
            client: None,
            attributes: Partial::new(),
            conversation: Vec::new(),
            allowed,
            requested: None,
            forced: None,
            decided: None,
            retry_attempts: 0,
            retry_pending: false,
            last_reply: None,
            generation: 0,
            awaiting: None,
            parked: None,
            tx,
            rx,
        }
    }

    /// Allowed next states, configured ones first.
    #[must_use]
    pub fn allowed(&self) -> &[StateTag] {
        &self.allowed
    }

    /// Whether `tag` is an allowed next state.
    #[must_use]
    pub fn allows(&self, tag: StateTag) -> bool {
        self.allowed.contains(&tag)
    }

    /// The first allowed state other than this one.
    #[must_use]
    pub fn first_next(&self) -> StateTag {
        self.allowed
            .iter()
            .copied()
            .find(|t| *t != self.tag)
            .unwrap_or(StateTag::RECEIVE_INTERRUPT)
    }

    /// Mark `tag` ready. Returns `Ok(false)` and keeps the earlier request
    /// when one is already pending.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnreachableTransition`] if `tag` is not allowed.
    pub fn turn_on(&mut self, tag: StateTag) -> Result<bool> {
        if !self.allows(tag) {
            return Err(EngineError::UnreachableTransition { from: self.tag, to: tag });
        }
        if let Some(existing) = self.requested {
            warn!(state = %self.tag, kept = %existing, ignored = %tag, "transition already requested");
            return Ok(false);
        }
        self.requested = Some(tag);
        Ok(true)
    }

    /// Clear any pending request.
    pub fn mute(&mut self) {
        self.requested = None;
        self.forced = None;
    }

    /// Demand a transition to `tag`, bypassing the allowed set. The target
    /// must still be configured for the character.
    pub fn force(&mut self, tag: StateTag) {
        self.forced = Some(tag);
    }

    /// The pending target: a forced one wins over a requested one.
    #[must_use]
    pub fn ready_target(&self) -> Option<StateTag> {
        self.forced.or(self.requested)
    }

    /// Whether a transition is pending.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_target().is_some()
    }

    /// Record the final transition target.
    pub fn decide(&mut self, tag: StateTag) {
        self.decided = Some(tag);
    }

    /// Take the decided transition, if any.
    pub fn take_decision(&mut self) -> Option<StateTag> {
        self.decided.take()
    }

    /// Failed responses in this visit.
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Whether the enter chain re-runs on the next tick.
    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// The last accepted reply of this visit.
    #[must_use]
    pub fn last_reply(&self) -> Option<&Value> {
        self.last_reply.as_ref()
    }

    /// Current dispatch generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a model call is in flight.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        self.awaiting.is_some() || self.parked.is_some()
    }

    /// Start a new dispatch. Returns its generation and the channel the
    /// result must be sent on.
    pub fn begin_dispatch(&mut self) -> (u64, mpsc::UnboundedSender<Completion>) {
        self.generation += 1;
        self.awaiting = Some(self.generation);
        (self.generation, self.tx.clone())
    }

    /// Abandon whatever is in flight; its completion will be stale.
    pub fn abandon(&mut self) {
        if self.awaiting.take().is_some() {
            debug!(state = %self.tag, generation = self.generation, "in-flight call abandoned");
        }
        self.generation += 1;
        self.parked = None;
    }

    /// Pull the completion of the current dispatch if it has arrived.
    /// Stale completions are dropped on the way.
    pub fn take_completion(&mut self) -> Option<Completion> {
        loop {
            let completion = match self.parked.take() {
                Some(c) => c,
                None => self.rx.try_recv().ok()?,
            };
            if self.awaiting == Some(completion.generation) {
                self.awaiting = None;
                return Some(completion);
            }
            debug!(
                state = %self.tag,
                generation = completion.generation,
                current = self.generation,
                "stale completion dropped"
            );
        }
    }

    /// Wait until the current dispatch has resolved, without consuming it.
    /// Returns `false` when nothing is in flight.
    ///
    /// A backend that never answers makes this wait forever; wrap it in
    /// `tokio::time::timeout` when that matters.
    pub async fn wait_completion(&mut self) -> bool {
        while self.parked.is_none() {
            let Some(current) = self.awaiting else {
                return false;
            };
            match self.rx.recv().await {
                Some(c) if c.generation == current => self.parked = Some(c),
                Some(c) => debug!(state = %self.tag, generation = c.generation, "stale completion dropped"),
                None => return false,
            }
        }
        true
    }

    /// Prompt-visible value of a state attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "state" => Some(self.tag.to_string()),
            "description" => Some(self.description.clone()),
            "next_states" => Some(
                self.allowed
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            "previous_state" => self.previous_state.map(|t| t.to_string()),
            other => self.attributes.get(other).map(value_text),
        }
    }

    /// The attributes written to exit snapshots.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let mut out = self.attributes.clone();
        out.insert("state".into(), json!(self.tag));
        out.insert("description".into(), json!(self.description));
        out.insert("next_states".into(), json!(self.allowed));
        out.insert("elapsed_turns".into(), json!(self.elapsed_turns));
        out.insert("loop_budget".into(), json!(self.loop_budget));
        Value::Object(out)
    }

    fn reset_for_entry(&mut self, circle_tolerance: i32, previous: Option<StateTag>) {
        self.elapsed_turns = 0;
        self.loop_budget += circle_tolerance;
        self.requested = None;
        self.forced = None;
        self.decided = None;
        self.retry_attempts = 0;
        self.retry_pending = false;
        self.last_reply = None;
        self.conversation.clear();
        self.previous_state = previous;
        self.abandon();
    }

    fn fall_back(&mut self) {
        if self.ready_target().is_none() {
            let target = self.first_next();
            warn!(state = %self.tag, to = %target, "giving up on this visit");
            self.requested = Some(target);
        }
    }
}

impl fmt::Debug for StateCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCore")
            .field("tag", &self.tag)
            .field("allowed", &self.allowed)
            .field("elapsed_turns", &self.elapsed_turns)
            .field("duration_tolerance", &self.duration_tolerance)
            .field("loop_budget", &self.loop_budget)
            .field("requested", &self.requested)
            .field("forced", &self.forced)
            .field("retry_attempts", &self.retry_attempts)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// BehaviorState
// ---------------------------------------------------------------------------

/// The five chains of a state.
#[derive(Debug, Clone, Default)]
pub struct Chains {
    /// Entry and retry.
    pub enter: Chain,
    /// Per tick.
    pub update: Chain,
    /// Exit.
    pub exit: Chain,
    /// Response handling.
    pub post_response: Chain,
    /// History decay.
    pub post_exit: Chain,
}

impl Chains {
    /// The default steps every state starts with.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            enter: steps::default_enter(),
            update: steps::default_update(),
            exit: steps::default_exit(),
            post_response: steps::default_post_response(),
            post_exit: steps::default_post_exit(),
        }
    }

    /// The chain of `kind`.
    #[must_use]
    pub fn get(&self, kind: ChainKind) -> &Chain {
        match kind {
            ChainKind::Enter => &self.enter,
            ChainKind::Update => &self.update,
            ChainKind::Exit => &self.exit,
            ChainKind::PostResponse => &self.post_response,
            ChainKind::PostExit => &self.post_exit,
        }
    }

    /// The chain of `kind`, mutably.
    pub fn get_mut(&mut self, kind: ChainKind) -> &mut Chain {
        match kind {
            ChainKind::Enter => &mut self.enter,
            ChainKind::Update => &mut self.update,
            ChainKind::Exit => &mut self.exit,
            ChainKind::PostResponse => &mut self.post_response,
            ChainKind::PostExit => &mut self.post_exit,
        }
    }
}

/// Flags reported by one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnSignals {
    /// Elapsed turns exceed the duration tolerance.
    pub overduration: bool,
    /// Loop budget exceeds the loop tolerance.
    pub overlooped: bool,
}

/// One node of the state machine.
#[derive(Debug)]
pub struct BehaviorState {
    /// Bookkeeping.
    pub core: StateCore,
    /// Hook chains.
    pub chains: Chains,
}

impl BehaviorState {
    /// A state with the standard chains.
    #[must_use]
    pub fn new(core: StateCore) -> Self {
        Self {
            core,
            chains: Chains::standard(),
        }
    }

    /// This state's tag.
    #[must_use]
    pub fn tag(&self) -> StateTag {
        self.core.tag
    }

    fn run(
        &mut self,
        kind: ChainKind,
        character: &mut Character,
        services: &Services,
        config: &EngineConfig,
        seed: Partial,
    ) -> std::result::Result<Partial, ChainFailure> {
        let mut turn = Turn {
            core: &mut self.core,
            character,
            services,
            config,
        };
        self.chains.get(kind).execute(&mut turn, seed)
    }

    /// Begin a visit.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors, and any step error of a promptless state.
    pub fn enter(
        &mut self,
        character: &mut Character,
        services: &Services,
        config: &EngineConfig,
        previous: Option<StateTag>,
    ) -> Result<()> {
        self.core.reset_for_entry(config.circle_tolerance, previous);
        info!(
            character = %character.name,
            state = %self.core.tag,
            loop_budget = self.core.loop_budget,
            "entered state"
        );
        self.run_enter(character, services, config)
    }

    fn run_enter(&mut self, character: &mut Character, services: &Services, config: &EngineConfig) -> Result<()> {
        match self.run(ChainKind::Enter, character, services, config, Partial::new()) {
            Ok(_) => Ok(()),
            Err(failure) => self.recover(failure, character, config),
        }
    }

    /// Run one tick of this state.
    ///
    /// Order: a scheduled retry re-runs the enter chain; a resolved model
    /// call runs the post-response chain; then the update chain runs.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors, and any step error of a promptless state.
    pub fn update(
        &mut self,
        character: &mut Character,
        services: &Services,
        config: &EngineConfig,
        inbound: Option<&ServerMessage>,
        clock: GameClock,
    ) -> Result<TurnSignals> {
        self.core.elapsed_turns += 1;
        let signals = TurnSignals {
            overduration: self.core.elapsed_turns > self.core.duration_tolerance,
            overlooped: self.core.loop_budget > config.loop_tolerance,
        };

        if self.core.retry_pending {
            self.core.retry_pending = false;
            debug!(
                character = %character.name,
                state = %self.core.tag,
                attempt = self.core.retry_attempts,
                "retrying"
            );
            self.run_enter(character, services, config)?;
        }

        if let Some(completion) = self.core.take_completion() {
            self.apply_completion(completion, character, services, config)?;
        }

        let mut seed = Partial::new();
        seed.insert("overduration".into(), json!(signals.overduration));
        seed.insert("overlooped".into(), json!(signals.overlooped));
        seed.insert("elapsed_turns".into(), json!(self.core.elapsed_turns));
        seed.insert("tick".into(), json!(clock.tick));
        seed.insert("hours".into(), json!(clock.hours));
        if let Some(message) = inbound {
            seed.insert("inbound".into(), message.to_value());
        }
        if let Err(failure) = self.run(ChainKind::Update, character, services, config, seed) {
            self.recover(failure, character, config)?;
        }
        Ok(signals)
    }

    /// Run the post-response chain over a resolved model call.
    ///
    /// A failed call counts as a recoverable failure of this visit, unless
    /// retrying cannot help.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors.
    pub fn apply_completion(
        &mut self,
        completion: Completion,
        character: &mut Character,
        services: &Services,
        config: &EngineConfig,
    ) -> Result<()> {
        let response = match completion.result {
            Ok(response) => response,
            Err(e) if !e.is_transient() => return Err(e.into()),
            Err(e) => {
                warn!(character = %character.name, state = %self.core.tag, error = %e, "model call failed");
                let failure = ChainFailure {
                    step: "dispatch",
                    error: HookError::step(e.to_string()),
                };
                return self.recover(failure, character, config);
            }
        };
        debug!(
            character = %character.name,
            state = %self.core.tag,
            latency_ms = response.latency_ms,
            "response received"
        );
        let mut seed = Partial::new();
        seed.insert("response".into(), Value::String(response.text));
        match self.run(ChainKind::PostResponse, character, services, config, seed) {
            Ok(merged) => {
                character.memory.clear_warnings();
                self.core.retry_attempts = 0;
                self.core.last_reply = merged.get("reply").cloned();
                Ok(())
            }
            Err(failure) => self.recover(failure, character, config),
        }
    }

    /// End a visit.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors. Recoverable exit failures are logged.
    pub fn exit(&mut self, character: &mut Character, services: &Services, config: &EngineConfig) -> Result<()> {
        let result = self.run(ChainKind::Exit, character, services, config, Partial::new());
        if config.stale_policy == crate::config::StalePolicy::Discard {
            self.core.abandon();
        }
        self.core.mute();
        self.core.decided = None;
        match result {
            Ok(_) => Ok(()),
            Err(ChainFailure { error: HookError::Fatal(e), .. }) => Err(*e),
            Err(failure) => {
                warn!(character = %character.name, state = %self.core.tag, "{failure}");
                Ok(())
            }
        }
    }

    /// Run the post-exit chain once.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors. Recoverable failures are logged.
    pub fn post_exit(&mut self, character: &mut Character, services: &Services, config: &EngineConfig) -> Result<()> {
        match self.run(ChainKind::PostExit, character, services, config, Partial::new()) {
            Ok(_) => Ok(()),
            Err(ChainFailure { error: HookError::Fatal(e), .. }) => Err(*e),
            Err(failure) => {
                warn!(character = %character.name, state = %self.core.tag, "{failure}");
                Ok(())
            }
        }
    }

    fn recover(&mut self, failure: ChainFailure, character: &mut Character, config: &EngineConfig) -> Result<()> {
        let message = failure.message();
        let ChainFailure { step, error } = failure;
        match error {
            HookError::Fatal(e) => Err(*e),
            HookError::Step(detail) if self.core.prompt.is_none() => Err(EngineError::Hook {
                state: self.core.tag,
                step: step.to_string(),
                message: detail,
            }),
            HookError::Step(_) if self.core.retry_attempts >= config.max_retries => {
                warn!(character = %character.name, state = %self.core.tag, "{message}");
                self.core.fall_back();
                Ok(())
            }
            HookError::Step(_) => {
                warn!(
                    character = %character.name,
                    state = %self.core.tag,
                    attempt = self.core.retry_attempts + 1,
                    "{message}"
                );
                character.memory.push_warning(message, config.retained_warnings);
                self.core.retry_attempts += 1;
                self.core.retry_pending = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use hearth_llm::ScriptedBackend;

    fn services() -> Services {
        Services::new(Registry::builder().with_builtin_tools().build(), Arc::new(ScriptedBackend::new()))
    }

    fn bare(tag: StateTag, next: &[StateTag]) -> BehaviorState {
        BehaviorState::new(StateCore::new(tag, next, 3))
    }

    #[test]
    fn allowed_set_includes_self_and_interrupt_once() {
        let core = StateCore::new(StateTag::Plan, &[StateTag::Act, StateTag::Plan], 10);
        assert_eq!(core.allowed(), &[StateTag::Act, StateTag::Plan, StateTag::ReceiveChat]);
        assert_eq!(core.first_next(), StateTag::Act);
    }

    #[test]
    fn at_most_one_request_is_kept() {
        let mut core = StateCore::new(StateTag::Act, &[StateTag::Use, StateTag::Move], 10);
        assert!(core.turn_on(StateTag::Use).expect("allowed"));
        assert!(!core.turn_on(StateTag::Move).expect("allowed"));
        assert_eq!(core.ready_target(), Some(StateTag::Use));
        core.mute();
        assert!(!core.is_ready());
    }

    #[test]
    fn unreachable_request_is_an_error() {
        let mut core = StateCore::new(StateTag::Act, &[StateTag::Use], 10);
        match core.turn_on(StateTag::Sleeping) {
            Err(EngineError::UnreachableTransition { from, to }) => {
                assert_eq!((from, to), (StateTag::Act, StateTag::Sleeping));
            }
            other => panic!("unexpected {other:?}"),
        }
        core.turn_on(StateTag::ReceiveChat).expect("interrupt state is always allowed");
    }

    #[test]
    fn enter_resets_visit_bookkeeping() {
        let services = services();
        let config = EngineConfig::default();
        let mut character = Character::new("Mira", "1");
        let mut state = bare(StateTag::Idle, &[StateTag::Persp]);
        state.core.elapsed_turns = 7;
        state.core.turn_on(StateTag::Persp).expect("allowed");
        state.enter(&mut character, &services, &config, Some(StateTag::Move)).expect("enter");

        assert_eq!(state.core.elapsed_turns, 0);
        assert!(!state.core.is_ready());
        assert_eq!(state.core.loop_budget, 4);
        assert_eq!(state.core.previous_state, Some(StateTag::Move));
        let outbound = services.outbound.drain();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].payload["content"], "Mira entered state IDLE");
    }

    #[test]
    fn budget_decays_once_per_post_exit() {
        let services = services();
        let config = EngineConfig::default();
        let mut character = Character::new("Mira", "1");
        let mut state = bare(StateTag::Idle, &[StateTag::Persp]);
        state.enter(&mut character, &services, &config, None).expect("enter");
        state.exit(&mut character, &services, &config).expect("exit");
        for _ in 0..5 {
            state.post_exit(&mut character, &services, &config).expect("post-exit");
        }
        assert_eq!(state.core.loop_budget, -1);
    }

    #[test]
    fn stale_completions_are_dropped() {
        let mut core = StateCore::new(StateTag::Plan, &[StateTag::Act], 10);
        let (old, tx) = core.begin_dispatch();
        core.abandon();
        let (current, _) = core.begin_dispatch();
        tx.send(Completion {
            generation: old,
            result: Ok(LlmResponse::text_only("late", "test")),
        })
        .expect("send");
        assert!(core.take_completion().is_none());
        tx.send(Completion {
            generation: current,
            result: Ok(LlmResponse::text_only("fresh", "test")),
        })
        .expect("send");
        let got = core.take_completion().expect("current completion");
        assert_eq!(got.generation, current);
        assert!(!core.is_awaiting());
    }

    #[test]
    fn promptless_step_error_is_fatal_hook_error() {
        let services = services();
        let config = EngineConfig::default();
        let mut character = Character::new("Mira", "1");
        let mut state = bare(StateTag::Idle, &[StateTag::Persp]);
        state.chains.update.push(step("explode", &[], |_, _| Err(HookError::step("boom"))));
        state.enter(&mut character, &services, &config, None).expect("enter");
        let err = state
            .update(&mut character, &services, &config, None, GameClock::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Hook { state: StateTag::Idle, .. }), "{err}");
    }

    #[test]
    fn chain_kind_parses_config_names() {
        for kind in ChainKind::ALL {
            assert_eq!(kind.as_str().parse::<ChainKind>().expect("parse"), kind);
        }
        assert!("teardown".parse::<ChainKind>().is_err());
    }
}

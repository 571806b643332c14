//! The town tick loop.
//!
//! ```text
//!  ingest(server message)
//!    ├─ 2000 INIT      start every character (resuming checkpoints)
//!    ├─ 2002 NEWDAY    re-arm the heartbeat
//!    ├─ 2008 BORN      build the newborn, then tell everyone
//!    └─ anything else  queue for the character it addresses, or broadcast
//!
//!  tick()
//!    ├─ heartbeat expired? stop
//!    ├─ for each running character, in config order:
//!    │    ├─ hand it at most one message it can use: its own mail first,
//!    │    │  else the oldest usable broadcast
//!    │    ├─ update ── error? halt this character only
//!    │    └─ publish to the roster
//!    ├─ collect outbound messages (echoing walks when configured)
//!    └─ checkpoint every `checkpoint_interval` ticks
//! ```
//!
//! Characters never share a tick: the roster and the mailbox are the only
//! way one character sees another, and both are read at the start of the
//! next update. A broadcast is shared: every character that can use it gets
//! a copy, and it leaves the queue once anyone has taken it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use hearth_core::message::{ACCEPTED_BY_ALL, GameMessage, MessageId, ServerMessage, accepts};
use hearth_core::services::{AuditSink, PlaceIndex, Services};
use hearth_core::{EngineConfig, GameClock, SqliteAudit, StateMachine, StateTag};
use hearth_llm::{ModelBackend, PromptBook};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{CharacterConfig, SimulationConfig, TownConfig};
use crate::error::Result;
use crate::protocol::{AgentBorn, WalkStopped, WalkTo, from_payload, to_payload};
use crate::states;

/// Ticks an inbound message may wait for a taker before it is dropped.
pub const INBOX_TTL: u64 = 32;

/// What one town tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    /// Tick number.
    pub tick: u64,
    /// Characters updated.
    pub updated: usize,
    /// `(character, from, to)` for every transition taken.
    pub transitions: Vec<(String, StateTag, StateTag)>,
    /// Characters halted during this tick, with the reason.
    pub halted: Vec<(String, String)>,
    /// Outbound messages produced.
    pub outbound: usize,
}

/// A running town.
pub struct Simulation {
    machines: Vec<StateMachine>,
    services: Services,
    audit: Arc<SqliteAudit>,
    settings: SimulationConfig,
    town: TownConfig,
    engine: Arc<EngineConfig>,
    inbox: VecDeque<(u64, ServerMessage)>,
    broadcast: VecDeque<(u64, ServerMessage)>,
    sent: Vec<GameMessage>,
    started: bool,
    stopped: bool,
    tick: u64,
    last_heartbeat: u64,
    halted: BTreeMap<String, String>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("characters", &self.machines.len())
            .field("tick", &self.tick)
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Build every character of `config` against `model`.
    ///
    /// # Errors
    ///
    /// Returns [`TownError::Llm`](crate::TownError::Llm) for unreadable
    /// prompt overrides and [`TownError::Engine`](crate::TownError::Engine)
    /// for an unusable audit database or topology.
    pub fn new(config: &TownConfig, model: Arc<dyn ModelBackend>) -> Result<Self> {
        let prompts = match &config.simulation.prompt_dir {
            Some(dir) => PromptBook::with_overrides(dir)?,
            None => PromptBook::builtin(),
        };
        let registry = states::catalog(prompts).build();
        let audit = Arc::new(match &config.simulation.audit_path {
            Some(path) => SqliteAudit::open(path, true)?,
            None => SqliteAudit::open_in_memory()?,
        });
        let services = Services::new(registry, model)
            .with_audit(audit.clone())
            .with_places(PlaceIndex::new(config.buildings.clone()));

        let engine = Arc::new(config.engine_config());
        let mut machines = Vec::with_capacity(config.characters.len());
        for entry in &config.characters {
            let topology = config.topology_for(&entry.name);
            let machine =
                StateMachine::build(entry.character(), &topology, services.clone(), Arc::clone(&engine))?;
            machines.push(machine);
        }
        info!(
            characters = machines.len(),
            buildings = config.buildings.len(),
            model = services.model.name(),
            "town built"
        );

        Ok(Self {
            machines,
            services,
            audit,
            settings: config.simulation.clone(),
            town: config.clone(),
            engine,
            inbox: VecDeque::new(),
            broadcast: VecDeque::new(),
            sent: Vec::new(),
            started: false,
            stopped: false,
            tick: 0,
            last_heartbeat: 0,
            halted: BTreeMap::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Accept one message from the game server.
    pub fn ingest(&mut self, message: ServerMessage) {
        match MessageId::try_from(message.msg_id) {
            Ok(MessageId::Init) => self.start(),
            Ok(MessageId::NewDay) => {
                debug!(tick = self.tick, "heartbeat");
                self.last_heartbeat = self.tick;
                if self.stopped {
                    info!(tick = self.tick, "heartbeat back, resuming");
                    self.stopped = false;
                }
            }
            Ok(MessageId::AgentBorn) => {
                if self.welcome(&message) {
                    self.enqueue(message);
                }
            }
            Ok(_) => self.enqueue(message),
            Err(e) => warn!(msg_id = message.msg_id, "dropping message: {e}"),
        }
    }

    fn enqueue(&mut self, message: ServerMessage) {
        if addressee(&message).is_some() {
            self.inbox.push_back((self.tick, message));
        } else {
            self.broadcast.push_back((self.tick, message));
        }
    }

    /// Build a character for a birth announcement. The newborn stands where
    /// its first parent stands and its biography is made of its parents'.
    /// A running town starts it at once. Returns whether the newborn joined.
    fn welcome(&mut self, message: &ServerMessage) -> bool {
        let Some(born) = from_payload::<AgentBorn>(&message.payload()) else {
            warn!("birth announcement without an agent_guid");
            return false;
        };
        let name = born.name.clone().unwrap_or_else(|| format!("Agent {}", born.agent_guid));
        if self
            .machines
            .iter()
            .any(|m| m.character().guid == born.agent_guid || m.character().name == name)
        {
            warn!(agent = %born.agent_guid, character = %name, "already in town, ignoring birth");
            return false;
        }

        let parents: Vec<_> = [&born.parent_agent_guid1, &born.parent_agent_guid2]
            .into_iter()
            .flatten()
            .filter_map(|guid| self.machines.iter().find(|m| &m.character().guid == guid))
            .map(StateMachine::character)
            .collect();
        let bio = match parents.as_slice() {
            [] => String::new(),
            [only] => format!("The biography of your parent is: {}", only.bio),
            [a, b, ..] => format!(
                "The biography of your parents are: Parent A: {} and Parent B: {}",
                a.bio, b.bio
            ),
        };
        let entry = CharacterConfig {
            name: name.clone(),
            guid: born.agent_guid.clone(),
            bio,
            goal: String::new(),
            money: 0,
            position: parents.first().map(|p| p.position).unwrap_or_default(),
            profile: BTreeMap::new(),
        };

        let topology = self.town.topology_for(&name);
        let mut machine =
            match StateMachine::build(entry.character(), &topology, self.services.clone(), Arc::clone(&self.engine)) {
                Ok(machine) => machine,
                Err(e) => {
                    error!(character = %name, error = %e, "newborn could not be built");
                    return false;
                }
            };
        if self.started {
            if let Err(e) = machine.start() {
                error!(character = %name, error = %e, "newborn failed to start");
                self.halted.insert(name.clone(), e.to_string());
            }
        }
        info!(agent = %born.agent_guid, character = %name, parents = parents.len(), "agent born");
        self.machines.push(machine);
        true
    }

    /// Start every character, resuming from its latest checkpoint when one
    /// exists. A character that fails to start is halted. Starting twice is
    /// a no-op.
    pub fn start(&mut self) {
        if self.started {
            debug!("already started");
            return;
        }
        self.started = true;
        for machine in &mut self.machines {
            let name = machine.character().name.clone();
            let outcome = match self.audit.load_checkpoint(&name) {
                Ok(Some((tick, checkpoint))) => {
                    info!(character = %name, tick, state = ?checkpoint.state, "resuming from checkpoint");
                    self.tick = self.tick.max(tick);
                    machine.resume(&checkpoint)
                }
                Ok(None) => machine.start(),
                Err(e) => {
                    warn!(character = %name, "checkpoint unreadable, starting fresh: {e}");
                    machine.start()
                }
            };
            if let Err(e) = outcome {
                error!(character = %name, error = %e, "character failed to start");
                self.halted.insert(name, e.to_string());
            }
        }
        self.last_heartbeat = self.tick;
        info!(tick = self.tick, running = self.machines.len() - self.halted.len(), "town started");
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick. Before [`Simulation::start`] or after the heartbeat
    /// expired this does nothing.
    pub fn tick(&mut self) -> TickSummary {
        if !self.is_running() {
            return TickSummary {
                tick: self.tick,
                ..TickSummary::default()
            };
        }
        self.tick += 1;
        let tick = self.tick;
        let mut summary = TickSummary {
            tick,
            ..TickSummary::default()
        };

        if self.settings.heartbeat_ticks > 0 && tick - self.last_heartbeat > self.settings.heartbeat_ticks {
            warn!(tick, last = self.last_heartbeat, "no heartbeat from the game server, stopping");
            self.stopped = true;
            return summary;
        }

        let before = self.pending_inbound();
        self.inbox.retain(|(arrived, _)| tick - arrived <= INBOX_TTL);
        self.broadcast.retain(|(arrived, _)| tick - arrived <= INBOX_TTL);
        if self.pending_inbound() < before {
            debug!(dropped = before - self.pending_inbound(), "unclaimed messages expired");
        }

        let clock = GameClock::at(tick, self.settings.update_interval_secs, self.settings.hours_per_second);
        let mut taken = BTreeSet::new();
        for machine in &mut self.machines {
            let name = machine.character().name.clone();
            if self.halted.contains_key(&name) {
                continue;
            }
            let inbound = machine.active().and_then(|active| {
                claim(&mut self.inbox, active, &machine.character().guid).or_else(|| {
                    let index = offer(&self.broadcast, active)?;
                    taken.insert(index);
                    self.broadcast.get(index).map(|(_, message)| message.clone())
                })
            });
            match machine.update(inbound.as_ref(), clock) {
                Ok(report) => {
                    summary.updated += 1;
                    if let Some((from, to)) = report.transition {
                        summary.transitions.push((name.clone(), from, to));
                    }
                }
                Err(e) => {
                    error!(character = %name, error = %e, "character halted");
                    summary.halted.push((name.clone(), e.to_string()));
                    self.halted.insert(name, e.to_string());
                }
            }
            machine.publish();
        }
        for index in taken.into_iter().rev() {
            self.broadcast.remove(index);
        }

        let outbound = self.services.outbound.drain();
        summary.outbound = outbound.len();
        if self.settings.echo_walks {
            self.echo_walks(&outbound);
        }
        self.sent.extend(outbound);

        let interval = self.settings.checkpoint_interval;
        if interval > 0 && tick % interval == 0 {
            if let Err(e) = self.checkpoint() {
                warn!(tick, "checkpoint failed: {e}");
            }
        }
        summary
    }

    /// Wait for every running character's in-flight model call. Returns how
    /// many calls were awaited.
    pub async fn settle(&mut self) -> usize {
        let mut settled = 0;
        for machine in &mut self.machines {
            if self.halted.contains_key(&machine.character().name) {
                continue;
            }
            if machine.settle().await {
                settled += 1;
            }
        }
        settled
    }

    /// Write a checkpoint of every running character. Returns how many were
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`TownError::Checkpoint`](crate::TownError::Checkpoint) if a
    /// checkpoint does not encode, or
    /// [`TownError::Engine`](crate::TownError::Engine) if it cannot be
    /// stored.
    pub fn checkpoint(&self) -> Result<usize> {
        let mut written = 0;
        for machine in &self.machines {
            let name = &machine.character().name;
            if self.halted.contains_key(name) {
                continue;
            }
            let data = rmp_serde::to_vec(&machine.checkpoint())?;
            self.audit.checkpoint(name, self.tick, &data)?;
            written += 1;
        }
        debug!(tick = self.tick, written, "checkpoint written");
        Ok(written)
    }

    /// Stand in for the game server: every walk started by a walking
    /// character ends where it was headed on the next tick.
    fn echo_walks(&mut self, outbound: &[GameMessage]) {
        for message in outbound.iter().filter(|m| m.id == MessageId::WalkTo) {
            let Some(walk) = from_payload::<WalkTo>(&message.payload) else {
                continue;
            };
            let walking = self
                .machines
                .iter()
                .any(|m| m.character().guid == walk.agent_guid && m.active() == Some(StateTag::Move));
            if !walking {
                continue;
            }
            let stop = WalkStopped {
                agent_guid: walk.agent_guid,
                cur_place_guid: None,
                cur_pos: walk.pos,
            };
            self.inbox
                .push_back((self.tick, ServerMessage::new(MessageId::WalkStopped, to_payload(&stop))));
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Take every message produced for the game server so far.
    pub fn drain_outbound(&mut self) -> Vec<GameMessage> {
        std::mem::take(&mut self.sent)
    }

    /// Whether the town has started and the heartbeat is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started && !self.stopped
    }

    /// Ticks run so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// A character's state machine.
    #[must_use]
    pub fn machine(&self, name: &str) -> Option<&StateMachine> {
        self.machines.iter().find(|m| m.character().name == name)
    }

    /// Every character's machine, in config order.
    pub fn machines(&self) -> impl Iterator<Item = &StateMachine> {
        self.machines.iter()
    }

    /// Halted characters and why they stopped.
    #[must_use]
    pub fn halted(&self) -> &BTreeMap<String, String> {
        &self.halted
    }

    /// Messages waiting for a character to take them, addressed or not.
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.inbox.len() + self.broadcast.len()
    }

    /// The shared collaborators.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The audit store.
    #[must_use]
    pub fn audit(&self) -> &SqliteAudit {
        &self.audit
    }
}

/// The character id a message is meant for, if it names one. News for
/// everyone has no addressee even when it names a character.
fn addressee(message: &ServerMessage) -> Option<String> {
    if ACCEPTED_BY_ALL.iter().any(|id| id.code() == message.msg_id) {
        return None;
    }
    if let Some(guid) = message.agent_guid() {
        return Some(guid);
    }
    let payload = message.payload();
    ["to_agent_id", "from_agent_id"].iter().find_map(|key| match payload.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn usable(active: StateTag, message: &ServerMessage) -> bool {
    message.msg_id == MessageId::AttrChange.code() || accepts(active, message.msg_id)
}

/// Remove and return the oldest message addressed to `guid` that the
/// character in `active` can use.
fn claim(inbox: &mut VecDeque<(u64, ServerMessage)>, active: StateTag, guid: &str) -> Option<ServerMessage> {
    let index = inbox
        .iter()
        .position(|(_, message)| usable(active, message) && addressee(message).is_some_and(|to| to == guid))?;
    inbox.remove(index).map(|(_, message)| message)
}

/// Index of the oldest broadcast the character in `active` can use.
fn offer(broadcast: &VecDeque<(u64, ServerMessage)>, active: StateTag) -> Option<usize> {
    broadcast.iter().position(|(_, message)| usable(active, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued(messages: Vec<ServerMessage>) -> VecDeque<(u64, ServerMessage)> {
        messages.into_iter().map(|m| (0, m)).collect()
    }

    #[test]
    fn claim_respects_addressee_and_state() {
        let mut inbox = queued(vec![
            ServerMessage::new(MessageId::WalkStopped, json!({"agent_guid": "8", "cur_pos": {"x": 0, "y": 0}})),
            ServerMessage::new(MessageId::UserBuy, json!({"from_agent_id": 7, "artwork_id": "a", "to_user_name": "p"})),
            ServerMessage::new(MessageId::WalkStopped, json!({"agent_guid": 7, "cur_pos": {"x": 0, "y": 0}})),
        ]);

        assert!(claim(&mut inbox, StateTag::Idle, "7").is_none());
        let walk = claim(&mut inbox, StateTag::Move, "7").expect("own walk");
        assert_eq!(walk.agent_guid().as_deref(), Some("7"));
        let buy = claim(&mut inbox, StateTag::UserTrade, "7").expect("trade");
        assert_eq!(buy.msg_id, MessageId::UserBuy.code());
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn unaddressed_messages_are_never_claimed() {
        let mut inbox = queued(vec![ServerMessage::new(
            MessageId::AttrChange,
            json!({"attr_id": 102, "attr_value": 5}),
        )]);
        assert!(claim(&mut inbox, StateTag::Idle, "7").is_none());
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn births_are_news_for_everyone() {
        let born = ServerMessage::new(MessageId::AgentBorn, json!({"agent_guid": 9, "parent_agent_guid1": 7}));
        assert_eq!(addressee(&born), None);
    }

    #[test]
    fn offer_picks_the_oldest_usable_broadcast() {
        let broadcast = queued(vec![
            ServerMessage::new(MessageId::UserBuy, json!({"artwork_id": "a", "to_user_name": "p"})),
            ServerMessage::new(MessageId::AttrChange, json!({"attr_id": 102, "attr_value": 5})),
            ServerMessage::new(MessageId::AgentBorn, json!({"agent_guid": 9})),
        ]);
        assert_eq!(offer(&broadcast, StateTag::Sleeping), Some(1));
        assert_eq!(offer(&broadcast, StateTag::UserTrade), Some(0));
        assert_eq!(offer(&queued(Vec::new()), StateTag::Idle), None);
    }

    #[test]
    fn gold_changes_reach_any_state() {
        let mut inbox = queued(vec![ServerMessage::new(
            MessageId::AttrChange,
            json!({"agent_guid": "7", "attr_id": 102, "attr_value": 5}),
        )]);
        assert!(claim(&mut inbox, StateTag::Sleeping, "8").is_none());
        assert!(claim(&mut inbox, StateTag::Sleeping, "7").is_some());
    }
}

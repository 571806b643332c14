//! # hearth-core — per-character behavioral state engine
//!
//! Every town resident runs its own [`StateMachine`]. The machine owns one
//! [`BehaviorState`] per configured [`StateTag`]; each state owns five
//! [`HookChain`]s (enter, update, exit, post-response, post-exit) that
//! assemble a prompt, dispatch it to a model without blocking the tick,
//! validate the reply, and pick the next state.
//!
//! - **Liveness:** a state that overstays its duration tolerance is forced
//!   out; a state revisited too often trips its loop budget.
//! - **Interrupts:** other characters push onto a small bounded
//!   [`InterruptStack`] that pre-empts interruptible transitions.
//! - **Degradation:** malformed replies are retried with warnings, then
//!   accepted as-is so a character always makes progress.
//!
//! Cross-character traffic goes only through [`Services`]: the outbound
//! queue, the audit store, the memory sink and the [`Roster`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod binding;
pub mod chain;
pub mod character;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod manager;
pub mod message;
pub mod persistence;
pub mod registry;
pub mod services;
pub mod state;
pub mod steps;
pub mod types;
pub mod working_memory;

pub use chain::{ChainContext, ChainFailure, HookChain, HookError, NamedStep, Partial, StepOutcome, StepResult};
pub use character::{Character, CharacterCheckpoint};
pub use config::{EngineConfig, HookRef, StalePolicy, StateSetup, Topology, default_topology};
pub use error::{EngineError, Result};
pub use interrupt::InterruptStack;
pub use manager::{StateMachine, TickReport};
pub use message::{GameMessage, MessageId, OutboundQueue, ServerMessage};
pub use persistence::{AuditTable, SqliteAudit};
pub use registry::{Registry, RegistryBuilder, RegistryKind, StateInstaller};
pub use services::{
    AuditEntry, AuditSink, InMemoryRecall, Mail, MemorySink, Place, PlaceIndex, Roster, RosterEntry, Services,
};
pub use state::{BehaviorState, ChainKind, Chains, Step, StateCore, Turn, step};
pub use types::{GameClock, Mood, Position, StateTag};
pub use working_memory::WorkingMemory;

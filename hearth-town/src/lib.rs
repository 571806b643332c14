//! # hearth-town — a town of characters on top of hearth-core
//!
//! This crate turns the game-agnostic engine into a runnable town: it owns
//! the state catalog, the game-server protocol and the tick loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 game server                  │
//! └───────────────▲───────────────┬──────────────┘
//!     GameMessage │               │ ServerMessage
//! ┌───────────────┴───────────────▼──────────────┐
//! │  hearth-town                                 │
//! │  ┌────────────┐  ┌────────┐  ┌────────────┐  │
//! │  │ simulation │─▶│ states │─▶│  protocol  │  │
//! │  └─────┬──────┘  └───┬────┘  └────────────┘  │
//! │        ▼             ▼                        │
//! │  ┌─────────────────────────┐  ┌───────────┐  │
//! │  │      hearth-core        │─▶│hearth-llm │  │
//! │  └─────────────────────────┘  └───────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config` — `hearth.toml`: engine, model, clock, buildings, characters
//! - `states` — what each of the 24 states does on top of the standard chains
//! - `protocol` — typed payloads for the game-server messages
//! - `simulation` — the tick loop: inbound routing, error isolation, checkpoints
//! - `offline` — a model stand-in for runs without a language model
//! - `logging` — tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod logging;
pub mod offline;
pub mod protocol;
pub mod simulation;
pub mod states;

pub use config::TownConfig;
pub use error::{Result, TownError};
pub use offline::ExampleBackend;
pub use simulation::{Simulation, TickSummary};

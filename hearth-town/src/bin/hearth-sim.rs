//! `hearth-sim` — run a town from a configuration file.
//!
//! The runner plays the game server's part: it sends INIT, a NEWDAY
//! heartbeat at every simulated midnight, and prints every outbound message
//! on stdout in wire form (`<id>@<json>`). Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hearth_core::{GameClock, MessageId, ServerMessage};
use hearth_llm::ModelBackend;
use hearth_town::{ExampleBackend, Simulation, TownConfig, logging};
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "hearth-sim", version, about = "Run a town of LLM-driven characters")]
struct Args {
    /// Town configuration file.
    #[arg(short, long, env = "HEARTH_CONFIG", default_value = "hearth.toml")]
    config: PathBuf,

    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,

    /// Answer prompts with their example replies instead of calling a model.
    #[arg(long)]
    offline: bool,

    /// Wait for every model call before the next tick instead of ticking on
    /// the wall clock.
    #[arg(long)]
    lockstep: bool,

    /// Log level, overriding the configuration.
    #[arg(long, env = "HEARTH_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = TownConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.general.log_level = level;
    }
    logging::init(&config.general)?;

    let model: Arc<dyn ModelBackend> = if args.offline {
        Arc::new(ExampleBackend)
    } else {
        Arc::new(config.llm.client().context("building the model client")?)
    };
    let mut town = Simulation::new(&config, model).context("building the town")?;
    town.ingest(ServerMessage::new(MessageId::Init, json!({})));

    let settings = &config.simulation;
    let day_of = |tick| GameClock::at(tick, settings.update_interval_secs, settings.hours_per_second).day();
    let mut interval = tokio::time::interval(Duration::from_secs_f64(settings.update_interval_secs));

    loop {
        if args.ticks.is_some_and(|limit| town.tick_count() >= limit) {
            info!(ticks = town.tick_count(), "tick limit reached");
            break;
        }
        if !town.is_running() {
            warn!(ticks = town.tick_count(), "town stopped");
            break;
        }

        let day = day_of(town.tick_count());
        let summary = town.tick();
        if day_of(summary.tick) > day {
            town.ingest(ServerMessage::new(MessageId::NewDay, json!({ "day": day_of(summary.tick) })));
        }
        for message in town.drain_outbound() {
            println!("{}", message.encode());
        }

        if args.lockstep {
            town.settle().await;
            continue;
        }
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    let written = town.checkpoint().context("final checkpoint")?;
    info!(
        ticks = town.tick_count(),
        checkpoints = written,
        halted = town.halted().len(),
        "town shut down"
    );
    for (name, reason) in town.halted() {
        warn!(character = %name, reason = %reason, "halted");
    }
    Ok(())
}

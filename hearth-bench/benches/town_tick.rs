//! hearth benchmark suite
//!
//! Targets on a laptop-class machine:
//!   wire_decode_action ............... < 5μs
//!   parse_fenced_reply ............... < 10μs
//!   town_tick_offline/2 (10 ticks) ... < 5ms
//!   town_tick_offline/20 (10 ticks) .. < 50ms
//!
//! The town benches answer every prompt with its example reply, so they
//! measure the engine and not a model.

use std::fmt::Write as _;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use hearth_core::{GameMessage, MessageId, ServerMessage};
use hearth_llm::parse_reply;
use hearth_town::{ExampleBackend, Simulation, TownConfig};
use serde_json::json;

fn town_with(characters: usize) -> TownConfig {
    let mut text = String::from(
        r#"
[engine]
circle_tolerance = 3
loop_tolerance = 1000
fatal_loop_budget = 100000

[simulation]
heartbeat_ticks = 0
checkpoint_interval = 0
echo_walks = true

[[buildings]]
name = "Bakery"
min = { x = 0.0, y = 0.0 }
max = { x = 10.0, y = 10.0 }

[[buildings]]
name = "Square"
min = { x = 20.0, y = 0.0 }
max = { x = 40.0, y = 20.0 }
"#,
    );
    for i in 0..characters {
        let x = if i % 2 == 0 { 5.0 } else { 30.0 };
        let _ = write!(
            text,
            "\n[[characters]]\nname = \"npc{i}\"\nguid = \"{}\"\nmoney = 20\nposition = {{ x = {x:.1}, y = 5.0 }}\n",
            100 + i
        );
    }
    TownConfig::from_toml(&text).expect("bench town parses")
}

fn running_town(config: &TownConfig, rt: &tokio::runtime::Runtime) -> Simulation {
    let _guard = rt.enter();
    let mut sim = Simulation::new(config, Arc::new(ExampleBackend)).expect("bench town builds");
    sim.ingest(ServerMessage::new(MessageId::Init, json!({})));
    sim
}

/// Benchmark: decode one outbound action message from its wire form.
fn bench_wire_decode(c: &mut Criterion) {
    let wire = GameMessage::new(
        MessageId::Action,
        json!({"agent_guid": "7", "content": "kneading dough", "emoji": "🍞"}),
    )
    .encode();
    c.bench_function("wire_decode_action", |b| {
        b.iter(|| GameMessage::decode(black_box(&wire)).expect("decodes"));
    });
}

/// Benchmark: pull a JSON object out of a fenced model reply.
fn bench_parse_reply(c: &mut Criterion) {
    let reply = "Sure! Here is my answer:\n```json\n{\"action\": \"MOVE\", \"act_obj\": \"Bakery\", \"emoji\": \"🚶\"}\n```\n";
    c.bench_function("parse_fenced_reply", |b| {
        b.iter(|| parse_reply(black_box(reply)).expect("parses"));
    });
}

/// Benchmark: ten ticks, settling every model call each one started.
fn bench_town_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("town_tick_offline");
    for characters in [2usize, 20] {
        let config = town_with(characters);
        group.bench_function(format!("{characters}"), |b| {
            b.iter_batched(
                || running_town(&config, &rt),
                |mut sim| {
                    rt.block_on(async {
                        for _ in 0..10 {
                            black_box(sim.tick());
                            sim.settle().await;
                        }
                    });
                    sim
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_wire_decode, bench_parse_reply, bench_town_tick);
criterion_main!(benches);

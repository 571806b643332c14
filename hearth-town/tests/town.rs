//! End-to-end tests of a running town.

use std::sync::Arc;

use hearth_core::{GameMessage, MessageId, ServerMessage, StateTag};
use hearth_llm::{ModelBackend, ScriptedBackend};
use hearth_town::states::commerce::NOT_ENOUGH_GOLD;
use hearth_town::{ExampleBackend, Simulation, TownConfig};
use serde_json::{Value, json};

const TOWN: &str = r#"
[engine]
circle_tolerance = 3
loop_tolerance = 50
fatal_loop_budget = 100

[simulation]
heartbeat_ticks = 0
checkpoint_interval = 0

[[buildings]]
name = "Bakery"
min = { x = 0.0, y = 0.0 }
max = { x = 10.0, y = 10.0 }

[[buildings]]
name = "Square"
min = { x = 20.0, y = 0.0 }
max = { x = 40.0, y = 20.0 }

[[characters]]
name = "Mira"
guid = "7"
money = 40
position = { x = 5.0, y = 5.0 }

[[characters]]
name = "Tom"
guid = "8"
money = 12
position = { x = 30.0, y = 10.0 }
"#;

const TRADER: &str = r#"
[topology.Mira.IDLE]
next = ["USERTRADE"]
[topology.Mira.USERTRADE]
next = ["USERTRADE"]
[topology.Mira.RECEIVECHAT]
next = ["IDLE"]

[topology.Tom.IDLE]
next = ["USERTRADE"]
[topology.Tom.USERTRADE]
next = ["USERTRADE"]
[topology.Tom.RECEIVECHAT]
next = ["IDLE"]
"#;

fn town(extra: &str) -> TownConfig {
    TownConfig::from_toml(&format!("{TOWN}{extra}")).expect("test town parses")
}

fn started(config: &TownConfig, model: Arc<dyn ModelBackend>) -> Simulation {
    let mut sim = Simulation::new(config, model).expect("town builds");
    sim.ingest(ServerMessage::new(MessageId::Init, json!({})));
    assert!(sim.is_running());
    sim
}

async fn run(sim: &mut Simulation, ticks: usize) -> Vec<GameMessage> {
    for _ in 0..ticks {
        sim.tick();
        sim.settle().await;
    }
    sim.drain_outbound()
}

fn from(messages: &[GameMessage], id: MessageId, guid: &str) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.id == id && m.payload["agent_guid"] == guid)
        .map(|m| m.payload.clone())
        .collect()
}

#[tokio::test]
async fn offline_town_walks_between_buildings() {
    let mut config = town("");
    config.simulation.echo_walks = true;
    let mut sim = started(&config, Arc::new(ExampleBackend));

    let outbound = run(&mut sim, 20).await;

    assert!(sim.halted().is_empty(), "halted: {:?}", sim.halted());
    let tom = sim.machine("Tom").expect("tom");
    assert!(tom.history().contains(&StateTag::Move));
    assert_eq!(tom.character().building.as_deref(), Some("Bakery"));
    assert!(!from(&outbound, MessageId::WalkTo, "8").is_empty());
    assert!(!from(&outbound, MessageId::Action, "7").is_empty());
}

#[tokio::test]
async fn two_characters_hold_a_conversation() {
    let config = town(
        r#"
[topology.Mira.IDLE]
next = ["PERSP"]
[topology.Mira.PERSP]
next = ["PLAN", "ACT"]
[topology.Mira.PLAN]
next = ["ACT"]
[topology.Mira.ACT]
next = ["CHATINIT", "MOVE"]
[topology.Mira.MOVE]
next = ["PERSP"]
[topology.Mira.CHATINIT]
next = ["CHATTING"]
[topology.Mira.CHATTING]
next = ["SUM"]
[topology.Mira.SUM]
next = ["IDLE"]

[topology.Tom.IDLE]
next = ["PERSP"]
[topology.Tom.PERSP]
next = ["PLAN"]
[topology.Tom.PLAN]
next = ["IDLE"]
[topology.Tom.RECEIVECHAT]
next = ["SUM"]
[topology.Tom.SUM]
next = ["IDLE"]
"#,
    );
    let model = ScriptedBackend::new()
        .on("Describe what you notice", r#"{"perception": "a quiet morning", "feeling": "calm"}"#)
        .on(
            "Make a plan",
            r#"{"BestPlan": ["say hello to Tom"], "Goal": "company", "CurrentSituation": "at work"}"#,
        )
        .on(
            "Things you can do right now",
            r#"{"action": "CHATINIT", "act_obj": "Tom", "emoji": "👋"}"#,
        )
        .on("How do you open the conversation", r#"{"init_conversation": "Morning, Tom!"}"#)
        .on(
            "You are chatting with",
            r#"{"conversation": [{"speaker": "Mira", "line": "Morning"}], "outcome": "bread for two"}"#,
        )
        .on("Summarize what just happened", r#"{"interaction_summary": "we talked about bread"}"#);
    let mut sim = started(&config, Arc::new(model));

    let outbound = run(&mut sim, 7).await;

    assert!(sim.halted().is_empty(), "halted: {:?}", sim.halted());
    let mira = sim.machine("Mira").expect("mira");
    let tom = sim.machine("Tom").expect("tom");
    for tag in [StateTag::ChatInit, StateTag::Chatting, StateTag::Sum] {
        assert!(mira.history().contains(&tag), "Mira never visited {tag}");
    }
    assert!(tom.history().contains(&StateTag::ReceiveChat));
    assert!(tom.history().contains(&StateTag::Sum));
    assert_eq!(tom.character().memory.text("act_obj").as_deref(), Some("Mira"));
    assert!(tom.character().memory.contains("conversation"));

    let speech = from(&outbound, MessageId::Speak, "7");
    assert_eq!(speech[0]["content"], "Morning, Tom!");
    let approach = from(&outbound, MessageId::WalkTo, "7");
    assert_eq!(approach[0]["pos"], json!({"x": 30.0, "y": 10.0}));
    let summaries = from(&outbound, MessageId::Action, "8");
    assert!(summaries.iter().any(|p| p["content"] == "we talked about bread"));
}

#[tokio::test]
async fn players_trade_artworks_with_a_character() {
    let config = town(TRADER);
    let mut sim = started(&config, Arc::new(ScriptedBackend::new()));
    let sell = |price: i64| {
        ServerMessage::new(
            MessageId::UserSell,
            json!({"artwork_id": "a1", "to_agent_id": 7, "from_user_name": "player", "price": price}),
        )
    };
    sim.ingest(sell(30));
    sim.ingest(sell(30));
    sim.ingest(ServerMessage::new(
        MessageId::UserBuy,
        json!({"artwork_id": "a2", "from_agent_id": "7", "to_user_name": "player", "price": 15}),
    ));

    let outbound = run(&mut sim, 4).await;

    let mira = sim.machine("Mira").expect("mira");
    assert_eq!(mira.active(), Some(StateTag::UserTrade));
    assert_eq!(mira.character().money, 40 - 30 + 15);
    assert_eq!(sim.pending_inbound(), 0);

    let sells: Vec<&GameMessage> = outbound.iter().filter(|m| m.id == MessageId::UserSellResult).collect();
    assert_eq!(sells.len(), 2);
    assert_eq!(sells[0].payload["is_succ"], true);
    assert_eq!(sells[1].payload["is_succ"], false);
    assert_eq!(sells[1].payload["error_msg"], NOT_ENOUGH_GOLD);
    let buys: Vec<&GameMessage> = outbound.iter().filter(|m| m.id == MessageId::UserBuyResult).collect();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].payload["artwork_id"], "a2");
}

#[tokio::test]
async fn a_failing_character_does_not_stop_the_town() {
    let prompts = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        prompts.path().join("perceive.toml"),
        "user = \"Look at the {weather}.\"\nexample = '{\"perception\": \"rain\"}'\n",
    )
    .expect("write override");
    let mut config = town(
        r#"
[topology.Tom.IDLE]
next = ["USERTRADE"]
[topology.Tom.USERTRADE]
next = ["USERTRADE"]
[topology.Tom.RECEIVECHAT]
next = ["IDLE"]
"#,
    );
    config.simulation.prompt_dir = Some(prompts.path().to_path_buf());
    let mut sim = started(&config, Arc::new(ExampleBackend));

    let first = sim.tick();
    assert_eq!(first.halted.len(), 1);
    assert_eq!(first.halted[0].0, "Mira");
    assert!(first.halted[0].1.contains("weather"));

    let second = sim.tick();
    assert_eq!(second.updated, 1);
    assert!(sim.halted().contains_key("Mira"));
    assert_eq!(sim.machine("Tom").and_then(|m| m.active()), Some(StateTag::UserTrade));
}

#[tokio::test]
async fn checkpoints_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = town(TRADER);
    config.simulation.audit_path = Some(dir.path().join("town.db"));
    config.simulation.checkpoint_interval = 2;

    let mut sim = started(&config, Arc::new(ScriptedBackend::new()));
    sim.ingest(ServerMessage::new(
        MessageId::UserSell,
        json!({"artwork_id": "a1", "to_agent_id": "7", "from_user_name": "player", "price": 25}),
    ));
    run(&mut sim, 4).await;
    assert_eq!(sim.machine("Mira").expect("mira").character().money, 15);
    drop(sim);

    let restarted = started(&config, Arc::new(ScriptedBackend::new()));
    assert_eq!(restarted.tick_count(), 4);
    let mira = restarted.machine("Mira").expect("mira");
    assert_eq!(mira.character().money, 15);
    assert_eq!(mira.active(), Some(StateTag::UserTrade));
}

#[tokio::test]
async fn missing_heartbeat_stops_the_town_until_the_next_day() {
    let mut config = town(TRADER);
    config.simulation.heartbeat_ticks = 3;
    let mut sim = started(&config, Arc::new(ScriptedBackend::new()));

    for _ in 0..3 {
        assert_eq!(sim.tick().updated, 2);
    }
    assert_eq!(sim.tick().updated, 0);
    assert!(!sim.is_running());
    assert_eq!(sim.tick().tick, 4);

    sim.ingest(ServerMessage::new(MessageId::NewDay, json!({})));
    assert!(sim.is_running());
    assert_eq!(sim.tick().updated, 2);
}

#[tokio::test]
async fn unaddressed_gold_changes_reach_every_character() {
    let config = town(TRADER);
    let mut sim = started(&config, Arc::new(ScriptedBackend::new()));
    sim.ingest(ServerMessage::new(MessageId::AttrChange, json!({"attr_id": 102, "attr_value": 99})));
    assert_eq!(sim.pending_inbound(), 1);

    run(&mut sim, 1).await;

    assert_eq!(sim.machine("Mira").expect("mira").character().money, 99);
    assert_eq!(sim.machine("Tom").expect("tom").character().money, 99);
    assert_eq!(sim.pending_inbound(), 0);
}

#[tokio::test]
async fn a_newborn_joins_the_running_town() {
    let config = town("");
    let mut sim = started(&config, Arc::new(ExampleBackend));
    let born = || {
        ServerMessage::new(
            MessageId::AgentBorn,
            json!({"agent_guid": 9, "name": "Pip", "parent_agent_guid1": 7, "parent_agent_guid2": "8"}),
        )
    };
    sim.ingest(born());
    sim.ingest(born());

    assert_eq!(sim.machines().count(), 3);
    let pip = sim.machine("Pip").expect("pip");
    assert_eq!(pip.character().guid, "9");
    assert!(pip.active().is_some());
    assert!(pip.character().bio.contains("Parent A"));
    assert_eq!(pip.character().position, sim.machine("Mira").expect("mira").character().position);

    let summary = sim.tick();
    assert_eq!(summary.updated, 3);
    assert_eq!(sim.pending_inbound(), 0);
}

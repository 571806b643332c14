//! Default chain steps and the built-in tools.
//!
//! Every state starts with these chains; installers and configured hooks
//! edit them afterwards.
//!
//! | chain         | steps                                                                    |
//! |---------------|--------------------------------------------------------------------------|
//! | enter         | `sync_location` `announce_state` `build_prompt` `record_prompt` `dispatch` |
//! | update        | `advance_clock` `read_inbound` `passive_drift` `enforce_timeout` `check_transition` |
//! | exit          | `snapshot_attributes` `announce_exit`                                     |
//! | post-response | `record_response` `validate_response` `remember_fields` `emit_memory` `route` |
//! | post-exit     | `decay_loop_budget`                                                       |
//!
//! `build_prompt` stops the enter chain for promptless states, so anything
//! that must run on every entry goes before it.

use std::sync::Arc;

use hearth_llm::{ChatMessage, ChatRequest, check_shape, parse_reply, prompt::warning_block};
use rand::Rng;
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use crate::binding;
use crate::chain::{ChainContext, HookError, Partial, StepOutcome, StepResult};
use crate::error::EngineError;
use crate::message::{ATTR_GOLD, MessageId, accepts};
use crate::services::AuditEntry;
use crate::state::{Chain, Completion, Step, Turn, step};
use crate::types::{GameClock, Mood, StateTag};

/// Attribute set while a character is walking.
pub const IS_MOVING: &str = "is_moving";

/// Where `break_loop` sends an overlooped state. A topology that uses the
/// tool must configure it.
pub const LOOP_BREAK_TARGET: StateTag = StateTag::Idle;

fn chain(steps: Vec<Step>) -> Chain {
    let mut chain = Chain::new();
    for s in steps {
        chain.push(s);
    }
    chain
}

/// Default enter chain.
#[must_use]
pub fn default_enter() -> Chain {
    chain(vec![
        step("sync_location", &[], sync_location),
        step("announce_state", &[], announce_state),
        step("build_prompt", &[], build_prompt),
        step("record_prompt", &["user", "prompt_kind"], record_prompt),
        step("dispatch", &["system", "user"], dispatch),
    ])
}

/// Default update chain.
#[must_use]
pub fn default_update() -> Chain {
    chain(vec![
        step("advance_clock", &["tick", "hours"], advance_clock),
        step("read_inbound", &[], read_inbound),
        step("passive_drift", &[], passive_drift),
        step("enforce_timeout", &["overduration"], enforce_timeout),
        step("check_transition", &[], check_transition),
    ])
}

/// Default exit chain.
#[must_use]
pub fn default_exit() -> Chain {
    chain(vec![
        step("snapshot_attributes", &[], snapshot_attributes),
        step("announce_exit", &[], announce_exit),
    ])
}

/// Default post-response chain.
#[must_use]
pub fn default_post_response() -> Chain {
    chain(vec![
        step("record_response", &["response"], record_response),
        step("validate_response", &["response"], validate_response),
        step("remember_fields", &["reply"], remember_fields),
        step("emit_memory", &["reply"], emit_memory),
        step("route", &[], route_first_next),
    ])
}

/// Default post-exit chain.
#[must_use]
pub fn default_post_exit() -> Chain {
    chain(vec![step("decay_loop_budget", &[], decay_loop_budget)])
}

// ---------------------------------------------------------------------------
// Enter
// ---------------------------------------------------------------------------

/// Set the character's building from its position.
pub fn sync_location(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    if turn.services.places.all().is_empty() {
        return Ok(StepOutcome::next());
    }
    let building = turn
        .services
        .places
        .locate(turn.character.position)
        .map(|p| p.name.clone());
    if building != turn.character.building {
        debug!(character = %turn.character.name, building = ?building, "location changed");
        turn.character.building = building;
    }
    Ok(StepOutcome::next())
}

/// Tell the game server which state the character entered.
pub fn announce_state(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.push(
        MessageId::Action,
        json!({
            "content": format!("{} entered state {}", turn.character.name, turn.core.tag),
            "agent_guid": turn.character.guid,
            "content_type": 2,
            "display_duration": 3,
        }),
    );
    Ok(StepOutcome::next())
}

/// Bind the state's prompt. Stops the chain for promptless states.
pub fn build_prompt(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(kind) = turn.core.prompt else {
        return Ok(StepOutcome::stop());
    };
    let rendered = binding::render(turn, ctx, kind)?;
    let version = turn.services.registry.prompt(kind)?.version.clone();
    let mut user = rendered.user;
    user.push_str(&warning_block(&turn.character.memory.warnings()));

    let mut partial = Partial::new();
    partial.insert("system".into(), Value::String(rendered.system));
    partial.insert("user".into(), Value::String(user));
    partial.insert("prompt_kind".into(), json!(kind.as_str()));
    partial.insert("prompt_version".into(), Value::String(version));
    Ok(StepOutcome::Continue(partial))
}

/// Write the rendered prompt to the audit store. Audit failures are logged.
pub fn record_prompt(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let entry = AuditEntry::Prompt {
        character: turn.character.name.clone(),
        state: turn.core.tag,
        kind: ctx.str("prompt_kind").unwrap_or_default().to_string(),
        text: ctx.str("user").unwrap_or_default().to_string(),
    };
    if let Err(e) = turn.services.audit.record(entry) {
        warn!(character = %turn.character.name, "prompt audit failed: {e}");
    }
    Ok(StepOutcome::next())
}

/// Start the model call on the current tokio runtime.
pub fn dispatch(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| EngineError::Dispatch(format!("no async runtime: {e}")))?;
    let user = ctx.str("user").unwrap_or_default().to_string();
    let request = ChatRequest::new(ctx.str("system").unwrap_or_default(), user.clone())
        .with_history(turn.core.conversation.clone())
        .with_profile(turn.core.client.clone())
        .with_timeout(turn.config.request_timeout_ms);

    let (generation, tx) = turn.core.begin_dispatch();
    let model = Arc::clone(&turn.services.model);
    handle.spawn(async move {
        let result = model.complete(&request).await;
        if tx.send(Completion { generation, result }).is_err() {
            trace!(generation, "completion receiver dropped");
        }
    });
    turn.core.conversation.push(ChatMessage::user(user));
    debug!(
        character = %turn.character.name,
        state = %turn.core.tag,
        generation,
        "request dispatched"
    );
    Ok(StepOutcome::with("generation", generation))
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Record the simulated time.
pub fn advance_clock(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    turn.character.clock = GameClock {
        tick: ctx.uint("tick").unwrap_or_default(),
        hours: ctx.float("hours").unwrap_or_default(),
    };
    Ok(StepOutcome::next())
}

/// Apply gold changes, and hand a message this state expects to later steps
/// as `message`.
pub fn read_inbound(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(inbound) = ctx.get("inbound") else {
        return Ok(StepOutcome::next());
    };
    let Some(id) = inbound.get("msg_id").and_then(Value::as_u64) else {
        return Ok(StepOutcome::next());
    };
    let payload = inbound.get("msg").cloned().unwrap_or(Value::Null);

    if id == u64::from(MessageId::AttrChange.code()) {
        if payload.get("attr_id").and_then(Value::as_u64) == Some(ATTR_GOLD) {
            let value = payload.get("attr_value").and_then(|v| {
                v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            });
            if let Some(money) = value {
                info!(character = %turn.character.name, from = turn.character.money, to = money, "gold changed");
                turn.character.money = money;
            }
        }
        return Ok(StepOutcome::next());
    }

    match u32::try_from(id) {
        Ok(code) if accepts(turn.core.tag, code) => Ok(StepOutcome::with("message", payload)),
        _ => {
            trace!(state = %turn.core.tag, msg_id = id, "message ignored");
            Ok(StepOutcome::next())
        }
    }
}

/// Relax mood toward neutral; drain satiety while walking.
pub fn passive_drift(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let character = &mut *turn.character;
    character.mood = character.mood.lerp(&Mood::NEUTRAL, turn.config.mood_drift_rate);
    let moving = turn
        .core
        .attributes
        .get(IS_MOVING)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if moving {
        character.satiety = (character.satiety - turn.config.satiety_drain).max(0.0);
    }
    Ok(StepOutcome::next())
}

/// Force the timeout target once the visit is overdue and nothing else is
/// pending. Abandons any in-flight call.
pub fn enforce_timeout(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    if !ctx.flag("overduration") || turn.core.is_ready() {
        return Ok(StepOutcome::next());
    }
    let target = turn.core.timeout_target.unwrap_or_else(|| turn.core.first_next());
    warn!(
        character = %turn.character.name,
        state = %turn.core.tag,
        elapsed = turn.core.elapsed_turns,
        to = %target,
        "state timed out"
    );
    turn.core.abandon();
    turn.core.force(target);
    Ok(StepOutcome::with("timed_out", true))
}

/// Settle the pending transition, letting a pending interrupt pre-empt an
/// interruptible target.
pub fn check_transition(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let Some(target) = turn.core.ready_target() else {
        return Ok(StepOutcome::next());
    };
    let mut decided = target;
    if target.is_interruptible() {
        if let Some(interrupt) = turn.character.interrupts.pop() {
            if !turn.core.allows(interrupt) {
                return Err(EngineError::UnreachableTransition {
                    from: turn.core.tag,
                    to: interrupt,
                }
                .into());
            }
            info!(
                character = %turn.character.name,
                planned = %target,
                interrupt = %interrupt,
                "transition pre-empted by interrupt"
            );
            decided = interrupt;
        }
    }
    turn.core.decide(decided);
    Ok(StepOutcome::with("transition", decided.as_str()))
}

// ---------------------------------------------------------------------------
// Exit and post-exit
// ---------------------------------------------------------------------------

/// Write the state's and character's attributes to the audit store.
pub fn snapshot_attributes(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let mut attributes = turn.core.snapshot();
    if let Value::Object(map) = &mut attributes {
        let ch = &turn.character;
        map.insert("money".into(), json!(ch.money));
        map.insert("satiety".into(), json!(ch.satiety));
        map.insert("mood".into(), json!(ch.mood));
        map.insert("building".into(), json!(ch.building));
    }
    let entry = AuditEntry::Snapshot {
        character: turn.character.name.clone(),
        state: turn.core.tag,
        attributes,
    };
    if let Err(e) = turn.services.audit.record(entry) {
        warn!(character = %turn.character.name, "snapshot audit failed: {e}");
    }
    Ok(StepOutcome::next())
}

/// Tell the game server the state ended.
pub fn announce_exit(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.push(
        MessageId::Action,
        json!({
            "content": format!("{} ends", turn.core.tag),
            "agent_guid": turn.character.guid,
            "content_type": 2,
            "display_duration": 2,
        }),
    );
    Ok(StepOutcome::next())
}

/// Spend one unit of loop budget.
pub fn decay_loop_budget(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.core.loop_budget -= 1;
    trace!(state = %turn.core.tag, budget = turn.core.loop_budget, "loop budget decayed");
    Ok(StepOutcome::next())
}

// ---------------------------------------------------------------------------
// Post-response
// ---------------------------------------------------------------------------

/// Audit the raw response and add it to the conversation.
pub fn record_response(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let text = ctx.str("response").unwrap_or_default().to_string();
    let entry = AuditEntry::Response {
        character: turn.character.name.clone(),
        state: turn.core.tag,
        text: text.clone(),
    };
    if let Err(e) = turn.services.audit.record(entry) {
        warn!(character = %turn.character.name, "response audit failed: {e}");
    }
    turn.core.conversation.push(ChatMessage::assistant(text));
    Ok(StepOutcome::next())
}

/// Parse the response and check its shape. After the retry limit the check
/// is skipped and unparseable text is accepted as `{"raw": text}`.
pub fn validate_response(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let text = ctx.str("response").unwrap_or_default();
    if turn.lenient() {
        let reply = parse_reply(text).unwrap_or_else(|_| json!({ "raw": text }));
        debug!(state = %turn.core.tag, "validation skipped after repeated failures");
        return Ok(StepOutcome::with("reply", reply));
    }
    let reply = parse_reply(text).map_err(|e| HookError::step(e.to_string()))?;
    if let Some(kind) = turn.core.prompt {
        let spec = turn.services.registry.prompt(kind)?;
        check_shape(&spec.example, &reply, spec.exempt).map_err(|e| HookError::step(e.to_string()))?;
    }
    Ok(StepOutcome::with("reply", reply))
}

/// Copy the prompt's recordable keys from the reply into working memory.
pub fn remember_fields(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(kind) = turn.core.prompt else {
        return Ok(StepOutcome::next());
    };
    let reply = ctx.get("reply").cloned().unwrap_or(Value::Null);
    let lenient = turn.lenient();
    let spec = turn.services.registry.prompt(kind)?;
    for key in &spec.recordable {
        match reply.get(key) {
            Some(value) => turn.character.memory.store(key.clone(), value.clone()),
            None if lenient => trace!(key = %key, "recordable key missing, skipped"),
            None => return Err(HookError::step(format!("response is missing `{key}`"))),
        }
    }
    Ok(StepOutcome::next())
}

/// Hand the accepted reply to the long-term memory sink.
pub fn emit_memory(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    if let Some(reply) = ctx.get("reply") {
        turn.services
            .recall
            .remember(&turn.character.name, turn.core.tag, reply);
    }
    Ok(StepOutcome::next())
}

/// Turn on the first allowed state other than this one.
pub fn route_first_next(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let target = turn.core.first_next();
    turn.core.turn_on(target)?;
    Ok(StepOutcome::next())
}

// ---------------------------------------------------------------------------
// Built-in tools
// ---------------------------------------------------------------------------

/// Every built-in tool, for registration by name.
#[must_use]
pub fn builtin_tools() -> Vec<Step> {
    vec![
        step("mute_followed_states", &[], mute_followed_states),
        step("route_use_or_chat", &[], route_use_or_chat),
        step("route_idle_or_question", &[], route_idle_or_question),
        step("break_loop", &[], break_loop),
    ]
}

/// Clear any pending transition request.
pub fn mute_followed_states(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.core.mute();
    Ok(StepOutcome::next())
}

/// Route to CHATINIT when `act_obj` names another character, else to USE.
pub fn route_use_or_chat(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let act_obj = ctx
        .get("reply")
        .and_then(|r| r.get("act_obj"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| turn.character.memory.text("act_obj"))
        .unwrap_or_default();
    let target = if turn.services.roster.contains(&act_obj) && act_obj != turn.character.name {
        StateTag::ChatInit
    } else {
        StateTag::Use
    };
    turn.core.turn_on(target)?;
    Ok(StepOutcome::with("routed", target.as_str()))
}

/// Pick IDLE or PERSPQ with equal odds.
pub fn route_idle_or_question(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let target = if rand::thread_rng().gen_bool(0.5) {
        StateTag::Idle
    } else {
        StateTag::PerspQ
    };
    turn.core.turn_on(target)?;
    Ok(StepOutcome::with("routed", target.as_str()))
}

/// Force [`LOOP_BREAK_TARGET`] while the state is overlooped.
pub fn break_loop(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    if ctx.flag("overlooped") {
        warn!(
            character = %turn.character.name,
            state = %turn.core.tag,
            budget = turn.core.loop_budget,
            "breaking loop"
        );
        turn.core.force(LOOP_BREAK_TARGET);
        return Ok(StepOutcome::with("loop_broken", true));
    }
    Ok(StepOutcome::next())
}

//! Conversations between characters.
//!
//! The initiator hangs a RECEIVECHAT interrupt on its partner, waits until
//! the partner is listening, then tells it who is talking:
//!
//! ```text
//!  initiator                          partner
//!  CHATINIT ── Mail::Hang ──────────▶ (interrupt stack)
//!     │                               RECEIVECHAT
//!     │◀── roster: partner listening ──┘
//!     ├─ Mail::Remember act_obj ─────▶ knows the initiator
//!  CHATTING ── Mail::Remember conversation ▶
//!  SUM                                SUM (once the initiator moved on)
//! ```

use hearth_core::chain::{ChainContext, StepOutcome, StepResult};
use hearth_core::message::MessageId;
use hearth_core::services::Mail;
use hearth_core::state::{BehaviorState, Turn, step};
use hearth_core::working_memory::value_text;
use hearth_core::{Result, StateTag};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{before, reply, reroute};
use crate::protocol::{CONTENT_SPEECH, CONTENT_STATUS, Notice, to_payload};

const REPLIED: &str = "replied";

fn partner(turn: &Turn<'_>) -> Option<String> {
    turn.character
        .memory
        .text("act_obj")
        .filter(|p| *p != turn.character.name && turn.services.roster.contains(p))
}

fn notice(turn: &Turn<'_>, content: String, content_type: u8) -> Value {
    to_payload(&Notice {
        content,
        agent_guid: turn.character.guid.clone(),
        content_type,
        display_duration: 3,
    })
}

fn leave(turn: &mut Turn<'_>) -> StepResult {
    let target = turn.core.first_next();
    turn.core.turn_on(target)?;
    Ok(StepOutcome::with("routed", target.as_str()))
}

// ---------------------------------------------------------------------------
// CHATINIT
// ---------------------------------------------------------------------------

/// CHATINIT opens a conversation and waits for the partner to listen.
pub fn chat_init(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.enter, "build_prompt", step("hang_on_partner", &[], hang_on_partner))?;
    reroute(state, step("mark_replied", &["reply"], mark_replied));
    before(&mut state.chains.update, "check_transition", step("await_partner", &[], await_partner))
}

fn hang_on_partner(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.core.attributes.insert(REPLIED.into(), json!(false));
    let Some(target) = partner(turn) else {
        debug!(character = %turn.character.name, "no partner to call on");
        return Ok(StepOutcome::next());
    };
    info!(character = %turn.character.name, partner = %target, "starting a conversation");
    turn.services.roster.send(Mail::Hang {
        target,
        tag: StateTag::RECEIVE_INTERRUPT,
    });
    Ok(StepOutcome::next())
}

fn mark_replied(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    turn.core.attributes.insert(REPLIED.into(), json!(true));
    if let Some(opening) = reply(ctx).get("init_conversation") {
        let payload = notice(turn, value_text(opening), CONTENT_SPEECH);
        turn.push(MessageId::Speak, payload);
    }
    Ok(StepOutcome::next())
}

fn await_partner(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let replied = turn.core.attributes.get(REPLIED).and_then(Value::as_bool).unwrap_or(false);
    if !replied || turn.core.is_ready() {
        return Ok(StepOutcome::next());
    }
    let Some(target) = partner(turn) else {
        return leave(turn);
    };
    if turn.services.roster.state_of(&target) != Some(StateTag::RECEIVE_INTERRUPT) {
        return Ok(StepOutcome::next());
    }
    turn.services.roster.send(Mail::Remember {
        target,
        key: "act_obj".into(),
        value: json!(turn.character.name),
    });
    turn.core.turn_on(StateTag::Chatting)?;
    Ok(StepOutcome::with("routed", StateTag::Chatting.as_str()))
}

// ---------------------------------------------------------------------------
// CHATTING
// ---------------------------------------------------------------------------

/// CHATTING voices the conversation and shares it with the partner.
pub fn chatting(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.post_response, "route", step("speak", &["reply"], speak))
}

fn speak(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(conversation) = reply(ctx).get("conversation").cloned() else {
        return Ok(StepOutcome::next());
    };
    let payload = notice(turn, value_text(&conversation), CONTENT_SPEECH);
    turn.push(MessageId::Speak, payload);
    if let Some(target) = partner(turn) {
        turn.services.roster.send(Mail::Remember {
            target,
            key: "conversation".into(),
            value: conversation,
        });
    }
    Ok(StepOutcome::next())
}

// ---------------------------------------------------------------------------
// RECEIVECHAT
// ---------------------------------------------------------------------------

/// RECEIVECHAT listens until the initiator has finished talking.
pub fn receive_chat(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.enter, "build_prompt", step("forget_initiator", &[], forget_initiator))?;
    before(
        &mut state.chains.update,
        "check_transition",
        step("follow_initiator", &[], follow_initiator),
    )
}

fn forget_initiator(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.character.memory.forget("act_obj");
    turn.character.memory.forget("conversation");
    Ok(StepOutcome::next())
}

fn follow_initiator(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    if turn.core.is_ready() {
        return Ok(StepOutcome::next());
    }
    let Some(initiator) = partner(turn) else {
        return Ok(StepOutcome::next());
    };
    match turn.services.roster.state_of(&initiator) {
        Some(StateTag::ChatInit | StateTag::Chatting) => Ok(StepOutcome::next()),
        _ => {
            debug!(character = %turn.character.name, initiator = %initiator, "conversation over");
            leave(turn)
        }
    }
}

// ---------------------------------------------------------------------------
// SUM
// ---------------------------------------------------------------------------

/// SUM shows the summary above the character.
pub fn summarize(state: &mut BehaviorState) -> Result<()> {
    before(
        &mut state.chains.post_response,
        "route",
        step("announce_summary", &["reply"], announce_summary),
    )
}

fn announce_summary(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    if let Some(summary) = reply(ctx).get("interaction_summary") {
        let payload = notice(turn, value_text(summary), CONTENT_STATUS);
        turn.push(MessageId::Action, payload);
    }
    Ok(StepOutcome::next())
}

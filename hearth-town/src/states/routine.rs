//! Promptless everyday states: IDLE, SLEEPING, WORK and MOVE.

use hearth_core::chain::{ChainContext, StepOutcome, StepResult};
use hearth_core::message::MessageId;
use hearth_core::state::{BehaviorState, Turn, step};
use hearth_core::steps::IS_MOVING;
use hearth_core::Result;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{before, inbound_id};
use crate::protocol::{WalkStopped, WalkTo, from_payload, to_payload};

/// Hour of day a sleeper wakes up.
pub const WAKE_HOUR: f64 = 6.0;
/// Hour of day the town goes to bed.
pub const BED_HOUR: f64 = 22.0;
/// Working hours, start inclusive.
pub const SHIFT: (f64, f64) = (8.0, 18.0);

fn hour_of_day(turn: &Turn<'_>) -> f64 {
    turn.character.clock.hours.rem_euclid(24.0)
}

fn leave(turn: &mut Turn<'_>) -> StepResult {
    let target = turn.core.first_next();
    turn.core.turn_on(target)?;
    Ok(StepOutcome::with("leaving_for", target.as_str()))
}

// ---------------------------------------------------------------------------
// IDLE
// ---------------------------------------------------------------------------

/// IDLE moves on after a single tick; its timeout target is its first next
/// state rather than the recovery state.
pub fn idle(state: &mut BehaviorState) -> Result<()> {
    state.core.timeout_target = Some(state.core.first_next());
    before(&mut state.chains.update, "check_transition", step("idle_done", &[], idle_done))
}

fn idle_done(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    leave(turn)
}

// ---------------------------------------------------------------------------
// SLEEPING
// ---------------------------------------------------------------------------

/// SLEEPING waits for daytime.
pub fn sleeping(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.update, "check_transition", step("wake_at_dawn", &[], wake_at_dawn))
}

fn wake_at_dawn(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let hour = hour_of_day(turn);
    if (WAKE_HOUR..BED_HOUR).contains(&hour) {
        debug!(character = %turn.character.name, hour, "waking up");
        return leave(turn);
    }
    Ok(StepOutcome::next())
}

// ---------------------------------------------------------------------------
// WORK
// ---------------------------------------------------------------------------

/// WORK lasts until the shift ends and pays the profile's `wage` on exit.
pub fn work(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.update, "check_transition", step("clock_out", &[], clock_out))?;
    state.chains.exit.push(step("collect_wage", &[], collect_wage));
    Ok(())
}

fn clock_out(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let hour = hour_of_day(turn);
    if (SHIFT.0..SHIFT.1).contains(&hour) {
        return Ok(StepOutcome::next());
    }
    leave(turn)
}

fn collect_wage(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let wage = turn
        .character
        .profile
        .get("wage")
        .and_then(|w| w.trim().parse::<i64>().ok())
        .unwrap_or(0);
    if wage > 0 {
        turn.character.money += wage;
        info!(character = %turn.character.name, wage, money = turn.character.money, "wage paid");
    }
    Ok(StepOutcome::with("wage", wage))
}

// ---------------------------------------------------------------------------
// MOVE
// ---------------------------------------------------------------------------

/// MOVE walks to the building named by `act_obj` and leaves once the game
/// server reports the walk stopped.
pub fn movement(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.enter, "build_prompt", step("walk_to", &[], walk_to))?;
    before(&mut state.chains.update, "enforce_timeout", step("arrive", &[], arrive))?;
    state.chains.exit.push(step("stop_walking", &[], stop_walking));
    Ok(())
}

fn walk_to(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let target = turn.character.memory.text("act_obj").unwrap_or_default();
    let Some(place) = turn.services.places.get(&target) else {
        warn!(character = %turn.character.name, target = %target, "no such building, not walking");
        return leave(turn);
    };
    let destination = place.name.clone();
    let walk = WalkTo::new(
        turn.character.guid.clone(),
        place.center(),
        turn.character.memory.text("emoji"),
    );
    turn.core.attributes.insert(IS_MOVING.into(), json!(true));
    turn.core.attributes.insert("destination".into(), json!(destination));
    turn.push(MessageId::WalkTo, to_payload(&walk));
    info!(character = %turn.character.name, to = %destination, "walking");
    Ok(StepOutcome::with("destination", destination))
}

fn arrive(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    if inbound_id(ctx) != Some(u64::from(MessageId::WalkStopped.code())) {
        return Ok(StepOutcome::next());
    }
    let Some(stop) = ctx.get("message").and_then(from_payload::<WalkStopped>) else {
        warn!(character = %turn.character.name, "malformed walk-stopped message");
        return Ok(StepOutcome::next());
    };
    if stop.agent_guid != turn.character.guid {
        return Ok(StepOutcome::next());
    }

    turn.character.position = stop.cur_pos;
    turn.character.building = turn
        .services
        .places
        .locate(stop.cur_pos)
        .map(|p| p.name.clone())
        .or(stop.cur_place_guid);
    turn.core.attributes.insert(IS_MOVING.into(), json!(false));
    info!(
        character = %turn.character.name,
        position = %turn.character.position,
        building = ?turn.character.building,
        "arrived"
    );
    leave(turn)
}

fn stop_walking(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.core.attributes.remove(IS_MOVING);
    turn.core.attributes.remove("destination");
    Ok(StepOutcome::next())
}

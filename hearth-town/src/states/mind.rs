//! Deliberation: perceiving, planning, acting, reflecting, criticising and
//! feeling.
//!
//! ```text
//!   PERSP ──(plan known)──▶ ACT ──▶ MOVE / USE / CHATINIT / DRAWINIT
//!     │                      ▲
//!     └──(no plan)──▶ PLAN ──┘
//!
//!   CRITIC ──(revise)──▶ PLAN        ACTREFLECTION ──(step open)──▶ WORK
//!          └──────────▶ ACT                        └──────────────▶ PERSP
//! ```

use std::str::FromStr;

use hearth_core::chain::{ChainContext, HookError, StepOutcome, StepResult};
use hearth_core::message::MessageId;
use hearth_core::state::{BehaviorState, Turn, step};
use hearth_core::{Mood, Position, Result, StateTag};
use serde_json::Value;
use tracing::{debug, info};

use super::{before, reply, reroute};
use crate::protocol::{WalkTo, to_payload};

/// Turn on `preferred`, or the first next state if it is not allowed.
fn route_or_first(turn: &mut Turn<'_>, preferred: StateTag) -> StepResult {
    let target = if turn.core.allows(preferred) && preferred != turn.core.tag {
        preferred
    } else {
        turn.core.first_next()
    };
    turn.core.turn_on(target)?;
    Ok(StepOutcome::with("routed", target.as_str()))
}

// ---------------------------------------------------------------------------
// PERSP
// ---------------------------------------------------------------------------

/// PERSP looks at who is around and then plans, or acts on a plan it
/// already has.
pub fn perceive(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.enter, "build_prompt", step("look_around", &[], look_around))?;
    reroute(state, step("route_by_plan", &[], route_by_plan));
    Ok(())
}

fn look_around(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let me = &turn.character.name;
    let people = match &turn.character.building {
        Some(building) => turn.services.roster.in_building(building, me),
        None => turn.services.roster.others(me),
    };
    if people.is_empty() {
        return Ok(StepOutcome::with("people", "nobody"));
    }
    Ok(StepOutcome::with("people", people.join(", ")))
}

fn route_by_plan(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let preferred = if turn.character.memory.contains("BestPlan") {
        StateTag::Act
    } else {
        StateTag::Plan
    };
    route_or_first(turn, preferred)
}

// ---------------------------------------------------------------------------
// PLAN
// ---------------------------------------------------------------------------

/// PLAN starts a fresh plan, so the step reflection of the old one is void.
pub fn plan(state: &mut BehaviorState) -> Result<()> {
    before(
        &mut state.chains.post_response,
        "route",
        step("reset_plan_step", &[], reset_plan_step),
    )
}

fn reset_plan_step(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    turn.character.memory.forget("step_complete");
    Ok(StepOutcome::next())
}

// ---------------------------------------------------------------------------
// ACT
// ---------------------------------------------------------------------------

/// ACT offers the model a list of concrete actions and routes to the one it
/// picks.
pub fn act(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.enter, "build_prompt", step("list_candidates", &[], list_candidates))?;
    reroute(state, step("route_action", &["reply"], route_action));
    Ok(())
}

/// One line per action the character could take right now, restricted to
/// `allowed`.
#[must_use]
pub fn candidates(
    allowed: &[StateTag],
    buildings: &[String],
    people: &[String],
    here: Option<&str>,
) -> Vec<String> {
    let mut lines = Vec::new();
    if allowed.contains(&StateTag::Move) {
        lines.extend(
            buildings
                .iter()
                .filter(|b| Some(b.as_str()) != here)
                .map(|b| format!("MOVE {b}")),
        );
    }
    if allowed.contains(&StateTag::ChatInit) {
        lines.extend(people.iter().map(|p| format!("CHATINIT {p}")));
    }
    if allowed.contains(&StateTag::Use) {
        if let Some(building) = here {
            lines.push(format!("USE {building}"));
        }
    }
    if allowed.contains(&StateTag::DrawInit) {
        lines.push("DRAWINIT anything".to_string());
    }
    lines
}

fn list_candidates(turn: &mut Turn<'_>, _ctx: &ChainContext) -> StepResult {
    let buildings: Vec<String> = turn.services.places.all().iter().map(|p| p.name.clone()).collect();
    let people = turn.services.roster.others(&turn.character.name);
    let lines = candidates(
        turn.core.allowed(),
        &buildings,
        &people,
        turn.character.building.as_deref(),
    );
    if lines.is_empty() {
        return Ok(StepOutcome::next());
    }
    Ok(StepOutcome::with("candidates", lines.join("\n")))
}

fn route_action(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let reply = reply(ctx);
    let action = reply.get("action").and_then(Value::as_str).unwrap_or_default();
    let act_obj = reply.get("act_obj").and_then(Value::as_str).unwrap_or_default();

    let target = StateTag::from_str(action).map_err(|_| HookError::step(format!("`{action}` is not an action")))?;
    if target == turn.core.tag || !turn.core.allows(target) {
        return Err(HookError::step(format!("`{target}` cannot be chosen from {}", turn.core.tag)));
    }

    let approach: Option<Position> = match target {
        StateTag::Move => {
            if turn.services.places.get(act_obj).is_none() {
                return Err(HookError::step(format!("`{act_obj}` is not a building")));
            }
            None
        }
        StateTag::ChatInit => {
            if act_obj == turn.character.name {
                return Err(HookError::step("you cannot chat with yourself"));
            }
            let Some(partner) = turn.services.roster.lookup(act_obj) else {
                return Err(HookError::step(format!("nobody called `{act_obj}` lives here")));
            };
            Some(partner.position)
        }
        StateTag::Use => turn
            .character
            .building
            .as_deref()
            .and_then(|b| turn.services.places.get(b))
            .map(|p| p.center()),
        _ => None,
    };

    turn.core.turn_on(target)?;
    if let Some(pos) = approach {
        let walk = WalkTo::new(turn.character.guid.clone(), pos, turn.character.memory.text("emoji"));
        turn.push(MessageId::WalkTo, to_payload(&walk));
    }
    info!(character = %turn.character.name, action = %target, act_obj, "action chosen");
    Ok(StepOutcome::with("routed", target.as_str()))
}

// ---------------------------------------------------------------------------
// ACTREFLECTION
// ---------------------------------------------------------------------------

/// ACTREFLECTION goes to WORK while the plan step is unfinished and the
/// character has an occupation.
pub fn act_reflection(state: &mut BehaviorState) -> Result<()> {
    reroute(state, step("route_after_reflection", &[], route_after_reflection));
    Ok(())
}

fn route_after_reflection(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let complete = reply(ctx)
        .get("step_complete")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let employed = turn.character.profile.contains_key("occupation");
    if !complete && employed && turn.core.allows(StateTag::Work) {
        debug!(character = %turn.character.name, "back to work");
        turn.core.turn_on(StateTag::Work)?;
        return Ok(StepOutcome::with("routed", StateTag::Work.as_str()));
    }
    let next = turn.core.first_next();
    route_or_first(turn, next)
}

// ---------------------------------------------------------------------------
// CRITIC
// ---------------------------------------------------------------------------

/// CRITIC throws the plan away when the model asks for a revision.
pub fn critic(state: &mut BehaviorState) -> Result<()> {
    reroute(state, step("route_after_critique", &[], route_after_critique));
    Ok(())
}

fn route_after_critique(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let revise = reply(ctx).get("revise").and_then(Value::as_bool).unwrap_or(false);
    if revise {
        turn.character.memory.forget("BestPlan");
        return route_or_first(turn, StateTag::Plan);
    }
    route_or_first(turn, StateTag::Act)
}

// ---------------------------------------------------------------------------
// EMOTION
// ---------------------------------------------------------------------------

/// EMOTION writes the reported mood onto the character.
pub fn emotion(state: &mut BehaviorState) -> Result<()> {
    before(
        &mut state.chains.post_response,
        "route",
        step("apply_mood", &["reply"], apply_mood),
    )
}

fn apply_mood(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(emotions) = reply(ctx).get("emotions") else {
        return Ok(StepOutcome::next());
    };
    let current = turn.character.mood;
    #[allow(clippy::cast_possible_truncation)]
    let axis = |key: &str, fallback: f32| {
        emotions
            .get(key)
            .and_then(Value::as_f64)
            .map_or(fallback, |v| v as f32)
    };
    let mood = Mood::new(
        axis("pleasure", current.pleasure),
        axis("arousal", current.arousal),
        axis("dominance", current.dominance),
    );
    turn.character.mood = mood;
    debug!(character = %turn.character.name, mood = mood.describe(), "mood updated");
    Ok(StepOutcome::with("mood", mood.describe()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn candidates_follow_the_allowed_set() {
        let buildings = names(&["Bakery", "Square"]);
        let people = names(&["Tom"]);
        let lines = candidates(
            &[StateTag::Use, StateTag::ChatInit, StateTag::Move, StateTag::DrawInit],
            &buildings,
            &people,
            Some("Bakery"),
        );
        assert_eq!(lines, vec!["MOVE Square", "CHATINIT Tom", "USE Bakery", "DRAWINIT anything"]);

        let only_move = candidates(&[StateTag::Move], &buildings, &people, None);
        assert_eq!(only_move, vec!["MOVE Bakery", "MOVE Square"]);
    }

    #[test]
    fn use_needs_a_building() {
        let lines = candidates(&[StateTag::Use], &[], &[], None);
        assert!(lines.is_empty());
    }
}

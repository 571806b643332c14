//! The town's state catalog.
//!
//! Every [`StateTag`] gets an installer that customizes the standard chains
//! of a freshly built state. The match in [`installer`] is exhaustive, so a
//! new tag cannot be added without deciding how it behaves.
//!
//! | module       | states                                                        |
//! |--------------|---------------------------------------------------------------|
//! | [`routine`]  | IDLE, SLEEPING, WORK, MOVE                                     |
//! | [`mind`]     | PERSP, PLAN, ACT, ACTREFLECTION, CRITIC, EMOTION               |
//! | [`social`]   | CHATINIT, CHATTING, RECEIVECHAT, SUM                           |
//! | [`commerce`] | USE, BARGAIN, USERTRADE, DRAW                                  |
//!
//! PERSPQ, PERSPA, DRAWINIT, APPRECIATE, TRADE and ESTIMATE run the standard
//! chains unchanged.

pub mod commerce;
pub mod mind;
pub mod routine;
pub mod social;

use hearth_core::chain::ChainContext;
use hearth_core::registry::{RegistryBuilder, StateInstaller};
use hearth_core::state::{BehaviorState, Chain, Step};
use hearth_core::{EngineError, Result, StateTag};
use hearth_llm::PromptBook;
use serde_json::Value;

static NULL: Value = Value::Null;

/// The installer for `tag`.
#[must_use]
pub fn installer(tag: StateTag) -> StateInstaller {
    match tag {
        StateTag::Idle => routine::idle,
        StateTag::Sleeping => routine::sleeping,
        StateTag::Work => routine::work,
        StateTag::Move => routine::movement,
        StateTag::Persp => mind::perceive,
        StateTag::Plan => mind::plan,
        StateTag::Act => mind::act,
        StateTag::ActReflection => mind::act_reflection,
        StateTag::Critic => mind::critic,
        StateTag::Emotion => mind::emotion,
        StateTag::ChatInit => social::chat_init,
        StateTag::Chatting => social::chatting,
        StateTag::ReceiveChat => social::receive_chat,
        StateTag::Sum => social::summarize,
        StateTag::Use => commerce::use_object,
        StateTag::Bargain => commerce::bargain,
        StateTag::UserTrade => commerce::user_trade,
        StateTag::Draw => commerce::draw,
        StateTag::PerspQ
        | StateTag::PerspA
        | StateTag::DrawInit
        | StateTag::Appreciate
        | StateTag::Trade
        | StateTag::Estimate => standard,
    }
}

/// A registry builder holding `prompts`, the built-in tools and the whole
/// state catalog.
#[must_use]
pub fn catalog(prompts: PromptBook) -> RegistryBuilder {
    let mut builder = RegistryBuilder::new().with_prompts(prompts).with_builtin_tools();
    for tag in StateTag::ALL {
        builder.register_state(tag, installer(tag));
    }
    builder
}

fn standard(_state: &mut BehaviorState) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Chain editing helpers
// ---------------------------------------------------------------------------

fn before(chain: &mut Chain, anchor: &str, step: Step) -> Result<()> {
    let name = step.name();
    if chain.insert_before(anchor, step) {
        Ok(())
    } else {
        Err(EngineError::Config(format!("cannot place `{name}`: no `{anchor}` step")))
    }
}

/// Swap the post-response routing step.
fn reroute(state: &mut BehaviorState, route: Step) {
    let chain = &mut state.chains.post_response;
    if chain.position("route").is_some() {
        chain.replace("route", route);
    } else {
        chain.push(route);
    }
}

/// The validated reply in a post-response chain, or `null`.
fn reply(ctx: &ChainContext) -> &Value {
    ctx.get("reply").unwrap_or(&NULL)
}

/// The inbound message id of an update chain, if any.
fn inbound_id(ctx: &ChainContext) -> Option<u64> {
    ctx.get("inbound")?.get("msg_id")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::state::StateCore;

    fn built(tag: StateTag) -> BehaviorState {
        let profile = tag.profile();
        let mut state = BehaviorState::new(StateCore::new(tag, profile.next, profile.duration_tolerance));
        installer(tag)(&mut state).expect("installer runs on standard chains");
        state
    }

    #[test]
    fn every_installer_accepts_standard_chains() {
        for tag in StateTag::ALL {
            built(tag);
        }
    }

    #[test]
    fn installers_place_steps_where_expected() {
        let act = built(StateTag::Act);
        assert_eq!(act.chains.enter.position("list_candidates"), Some(2));
        assert!(act.chains.post_response.position("route").is_none());
        assert!(act.chains.post_response.position("route_action").is_some());

        let movement = built(StateTag::Move);
        assert!(movement.chains.enter.position("walk_to") < movement.chains.enter.position("build_prompt"));
        assert!(movement.chains.update.position("arrive") < movement.chains.update.position("enforce_timeout"));

        let idle = built(StateTag::Idle);
        assert_eq!(idle.core.timeout_target, Some(StateTag::Persp));
    }

    #[test]
    fn misplaced_anchor_is_a_config_error() {
        let mut state = BehaviorState::new(StateCore::new(StateTag::Idle, &[StateTag::Persp], 1));
        state.chains.update.remove("check_transition");
        assert!(matches!(routine::idle(&mut state), Err(EngineError::Config(_))));
    }
}

//! Money and goods: USE, BARGAIN, USERTRADE and DRAW.

use hearth_core::chain::{ChainContext, StepOutcome, StepResult};
use hearth_core::message::MessageId;
use hearth_core::state::{BehaviorState, Turn, step};
use hearth_core::working_memory::value_text;
use hearth_core::Result;
use serde_json::Value;
use tracing::{info, warn};

use super::{before, inbound_id, reply};
use crate::protocol::{Artwork, TradeResult, UserBuy, UserSell, from_payload, to_payload};

/// Refusal reason when a character cannot afford a player's artwork.
pub const NOT_ENOUGH_GOLD: &str = "not enough gold";

/// Whole gold from a reply value; models sometimes answer `2.0` or `"2"`.
#[allow(clippy::cast_possible_truncation)]
fn gold(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn spend(turn: &mut Turn<'_>, amount: i64, what: &str) -> i64 {
    let before = turn.character.money;
    turn.character.money = (before - amount.max(0)).max(0);
    let spent = before - turn.character.money;
    info!(character = %turn.character.name, spent, money = turn.character.money, "{what}");
    spent
}

// ---------------------------------------------------------------------------
// USE
// ---------------------------------------------------------------------------

/// USE charges the cost the model reports. Money never goes below zero.
pub fn use_object(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.post_response, "route", step("pay_cost", &["reply"], pay_cost))
}

fn pay_cost(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(cost) = gold(reply(ctx).get("cost")) else {
        return Ok(StepOutcome::next());
    };
    let spent = spend(turn, cost, "paid for use");
    Ok(StepOutcome::with("spent", spent))
}

// ---------------------------------------------------------------------------
// BARGAIN
// ---------------------------------------------------------------------------

/// BARGAIN pays the offer once a deal is struck.
pub fn bargain(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.post_response, "route", step("settle_deal", &["reply"], settle_deal))
}

fn settle_deal(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let reply = reply(ctx);
    if !reply.get("deal").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(StepOutcome::next());
    }
    let offer = gold(reply.get("offer")).unwrap_or(0);
    let spent = spend(turn, offer, "deal settled");
    Ok(StepOutcome::with("spent", spent))
}

// ---------------------------------------------------------------------------
// USERTRADE
// ---------------------------------------------------------------------------

/// USERTRADE answers players buying from or selling to the character.
pub fn user_trade(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.update, "check_transition", step("serve_player", &[], serve_player))
}

fn serve_player(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let Some(message) = ctx.get("message") else {
        return Ok(StepOutcome::next());
    };
    let id = inbound_id(ctx);
    if id == Some(u64::from(MessageId::UserBuy.code())) {
        let Some(buy) = from_payload::<UserBuy>(message) else {
            warn!(character = %turn.character.name, "malformed user-buy message");
            return Ok(StepOutcome::next());
        };
        if buy.from_agent_id != turn.character.guid {
            return Ok(StepOutcome::next());
        }
        turn.character.money += buy.price.max(0);
        info!(
            character = %turn.character.name,
            player = %buy.to_user_name,
            price = buy.price,
            "artwork sold to player"
        );
        turn.push(MessageId::UserBuyResult, to_payload(&TradeResult::accepted(buy)));
        return Ok(StepOutcome::with("traded", true));
    }
    if id == Some(u64::from(MessageId::UserSell.code())) {
        let Some(sell) = from_payload::<UserSell>(message) else {
            warn!(character = %turn.character.name, "malformed user-sell message");
            return Ok(StepOutcome::next());
        };
        if sell.to_agent_id != turn.character.guid {
            return Ok(StepOutcome::next());
        }
        let price = sell.price.max(0);
        let result = if turn.character.money >= price {
            turn.character.money -= price;
            info!(
                character = %turn.character.name,
                player = %sell.from_user_name,
                price,
                "artwork bought from player"
            );
            TradeResult::accepted(sell)
        } else {
            info!(character = %turn.character.name, price, money = turn.character.money, "cannot afford artwork");
            TradeResult::refused(sell, NOT_ENOUGH_GOLD)
        };
        let traded = result.is_succ;
        turn.push(MessageId::UserSellResult, to_payload(&result));
        return Ok(StepOutcome::with("traded", traded));
    }
    Ok(StepOutcome::next())
}

// ---------------------------------------------------------------------------
// DRAW
// ---------------------------------------------------------------------------

/// DRAW publishes the finished work.
pub fn draw(state: &mut BehaviorState) -> Result<()> {
    before(&mut state.chains.post_response, "route", step("mint_artwork", &["reply"], mint_artwork))
}

fn mint_artwork(turn: &mut Turn<'_>, ctx: &ChainContext) -> StepResult {
    let reply = reply(ctx);
    let text = |key: &str| reply.get(key).map(value_text).unwrap_or_default();
    let artwork = Artwork {
        agent_guid: turn.character.guid.clone(),
        title: text("title"),
        description: text("description"),
        theme: turn.character.memory.text("theme"),
        style: turn.character.memory.text("style"),
    };
    info!(character = %turn.character.name, title = %artwork.title, "artwork finished");
    turn.push(MessageId::Nft, to_payload(&artwork));
    Ok(StepOutcome::with("artwork", artwork.title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gold_accepts_loose_numbers() {
        assert_eq!(gold(Some(&json!(3))), Some(3));
        assert_eq!(gold(Some(&json!(2.6))), Some(3));
        assert_eq!(gold(Some(&json!(" 4 "))), Some(4));
        assert_eq!(gold(Some(&json!("four"))), None);
        assert_eq!(gold(None), None);
    }
}

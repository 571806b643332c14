//! A simulated character: identity, attributes, and the per-character
//! blackboards (Working Memory and the Interrupt Stack).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::interrupt::InterruptStack;
use crate::types::{GameClock, Mood, Position, StateTag};
use crate::working_memory::WorkingMemory;

/// Full satiety.
pub const MAX_SATIETY: f32 = 100.0;

/// One town resident.
#[derive(Debug, Clone)]
pub struct Character {
    /// Display name; unique within a town.
    pub name: String,
    /// Game-server id.
    pub guid: String,
    /// Short biography for prompts.
    pub bio: String,
    /// Long-term goal for prompts.
    pub goal: String,
    /// Gold.
    pub money: i64,
    /// Current mood.
    pub mood: Mood,
    /// 0 (starving) to [`MAX_SATIETY`].
    pub satiety: f32,
    /// Map position.
    pub position: Position,
    /// Building the character stands in, if any.
    pub building: Option<String>,
    /// Last clock reading the character saw.
    pub clock: GameClock,
    /// Extra free-form attributes available to prompts.
    pub profile: BTreeMap<String, String>,
    /// Scratch space shared by the character's states.
    pub memory: WorkingMemory,
    /// Pending interrupts pushed by other characters.
    pub interrupts: InterruptStack,
}

impl Character {
    /// A character with neutral defaults.
    #[must_use]
    pub fn new(name: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guid: guid.into(),
            bio: String::new(),
            goal: String::new(),
            money: 0,
            mood: Mood::NEUTRAL,
            satiety: MAX_SATIETY,
            position: Position::default(),
            building: None,
            clock: GameClock::default(),
            profile: BTreeMap::new(),
            memory: WorkingMemory::new(),
            interrupts: InterruptStack::default(),
        }
    }

    /// Set the biography.
    #[must_use]
    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = bio.into();
        self
    }

    /// Set the goal.
    #[must_use]
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    /// Set the starting gold.
    #[must_use]
    pub fn with_money(mut self, money: i64) -> Self {
        self.money = money;
        self
    }

    /// Set the starting position.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Attribute value for prompt binding.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "guid" | "agent_guid" => Some(self.guid.clone()),
            "bio" => Some(self.bio.clone()),
            "goal" => Some(self.goal.clone()),
            "money" | "gold" => Some(self.money.to_string()),
            "emotion" | "mood" => Some(self.mood.describe().to_string()),
            "satiety" => Some(format!("{:.0}", self.satiety)),
            "building" => Some(self.building.clone().unwrap_or_else(|| "outdoors".to_string())),
            "position" => Some(self.position.to_string()),
            "date" => Some(self.clock.to_string()),
            other => self.profile.get(other).cloned(),
        }
    }

    /// Serializable copy of everything worth restoring.
    #[must_use]
    pub fn checkpoint(&self, state: Option<StateTag>) -> CharacterCheckpoint {
        CharacterCheckpoint {
            name: self.name.clone(),
            guid: self.guid.clone(),
            money: self.money,
            mood: self.mood,
            satiety: self.satiety,
            position: self.position,
            building: self.building.clone(),
            clock: self.clock,
            state,
            memory: self.memory.clone(),
            interrupts: self.interrupts.to_vec(),
        }
    }

    /// Restore the mutable parts of a checkpoint onto this character.
    pub fn restore(&mut self, checkpoint: &CharacterCheckpoint) {
        self.money = checkpoint.money;
        self.mood = checkpoint.mood;
        self.satiety = checkpoint.satiety;
        self.position = checkpoint.position;
        self.building.clone_from(&checkpoint.building);
        self.clock = checkpoint.clock;
        self.memory = checkpoint.memory.clone();
        self.interrupts = InterruptStack::new(self.interrupts.capacity());
        for tag in &checkpoint.interrupts {
            self.interrupts.push(*tag);
        }
    }
}

/// Persisted form of a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterCheckpoint {
    /// Name.
    pub name: String,
    /// Game-server id.
    pub guid: String,
    /// Gold.
    pub money: i64,
    /// Mood.
    pub mood: Mood,
    /// Satiety.
    pub satiety: f32,
    /// Position.
    pub position: Position,
    /// Building.
    pub building: Option<String>,
    /// Clock.
    pub clock: GameClock,
    /// Active state at checkpoint time.
    pub state: Option<StateTag>,
    /// Working memory.
    pub memory: WorkingMemory,
    /// Pending interrupts, oldest first.
    pub interrupts: Vec<StateTag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_cover_prompt_fields() {
        let mut ch = Character::new("Mira", "17").with_money(42).with_goal("open a bakery");
        ch.profile.insert("job".into(), "baker".into());
        assert_eq!(ch.attribute("money").as_deref(), Some("42"));
        assert_eq!(ch.attribute("building").as_deref(), Some("outdoors"));
        assert_eq!(ch.attribute("job").as_deref(), Some("baker"));
        assert_eq!(ch.attribute("date").as_deref(), Some("day 1, 00:00"));
        assert!(ch.attribute("nonexistent").is_none());
    }

    #[test]
    fn checkpoint_restores_state() {
        let mut ch = Character::new("Tom", "3").with_money(5);
        ch.memory.store("BestPlan", "sleep");
        ch.interrupts.push(StateTag::ReceiveChat);
        let saved = ch.checkpoint(Some(StateTag::Plan));
        let bytes = rmp_serde::to_vec(&saved).expect("encode");
        let decoded: CharacterCheckpoint = rmp_serde::from_slice(&bytes).expect("decode");

        let mut fresh = Character::new("Tom", "3");
        fresh.restore(&decoded);
        assert_eq!(fresh.money, 5);
        assert_eq!(fresh.memory.text("BestPlan").as_deref(), Some("sleep"));
        assert_eq!(fresh.interrupts.pop(), Some(StateTag::ReceiveChat));
        assert_eq!(decoded.state, Some(StateTag::Plan));
    }
}

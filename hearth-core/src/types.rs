//! Core type definitions for the hearth state engine.
//!
//! The state catalog is closed: every behavior a character can be in is a
//! [`StateTag`], and each tag carries a compile-time default profile.

use std::fmt;
use std::str::FromStr;

use hearth_llm::PromptKind;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// State catalog
// ---------------------------------------------------------------------------

/// Identifies one behavioral state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateTag {
    /// Doing nothing in particular.
    Idle,
    /// Walking somewhere.
    Move,
    /// Asleep.
    Sleeping,
    /// Making a plan.
    Plan,
    /// Choosing an action.
    Act,
    /// Perceiving the surroundings.
    Persp,
    /// Asking oneself a question.
    PerspQ,
    /// Answering that question.
    PerspA,
    /// Criticising the plan.
    Critic,
    /// Opening a conversation.
    ChatInit,
    /// In a conversation.
    Chatting,
    /// Reflecting on the last action.
    ActReflection,
    /// Using an object.
    Use,
    /// Drawing.
    Draw,
    /// Choosing what to draw.
    DrawInit,
    /// Summarising an interaction.
    Sum,
    /// Appreciating a work.
    Appreciate,
    /// Trading with another character.
    Trade,
    /// Bargaining over a price.
    Bargain,
    /// Updating emotions.
    Emotion,
    /// Working a shift.
    Work,
    /// Serving a trade request from a player.
    UserTrade,
    /// Estimating a price.
    Estimate,
    /// Being addressed by another character.
    ReceiveChat,
}

/// Compile-time defaults for a [`StateTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateProfile {
    /// Default allowed next states, in routing preference order.
    pub next: &'static [StateTag],
    /// Prompt the state sends, if any.
    pub prompt: Option<PromptKind>,
    /// Turns before the state times out.
    pub duration_tolerance: u32,
}

impl StateTag {
    /// Every tag, in declaration order.
    pub const ALL: [StateTag; 24] = [
        Self::Idle,
        Self::Move,
        Self::Sleeping,
        Self::Plan,
        Self::Act,
        Self::Persp,
        Self::PerspQ,
        Self::PerspA,
        Self::Critic,
        Self::ChatInit,
        Self::Chatting,
        Self::ActReflection,
        Self::Use,
        Self::Draw,
        Self::DrawInit,
        Self::Sum,
        Self::Appreciate,
        Self::Trade,
        Self::Bargain,
        Self::Emotion,
        Self::Work,
        Self::UserTrade,
        Self::Estimate,
        Self::ReceiveChat,
    ];

    /// The state every other state may be interrupted into.
    pub const RECEIVE_INTERRUPT: StateTag = StateTag::ReceiveChat;

    /// Upper-case name used in configuration, logs and model replies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Move => "MOVE",
            Self::Sleeping => "SLEEPING",
            Self::Plan => "PLAN",
            Self::Act => "ACT",
            Self::Persp => "PERSP",
            Self::PerspQ => "PERSPQ",
            Self::PerspA => "PERSPA",
            Self::Critic => "CRITIC",
            Self::ChatInit => "CHATINIT",
            Self::Chatting => "CHATTING",
            Self::ActReflection => "ACTREFLECTION",
            Self::Use => "USE",
            Self::Draw => "DRAW",
            Self::DrawInit => "DRAWINIT",
            Self::Sum => "SUM",
            Self::Appreciate => "APPRECIATE",
            Self::Trade => "TRADE",
            Self::Bargain => "BARGAIN",
            Self::Emotion => "EMOTION",
            Self::Work => "WORK",
            Self::UserTrade => "USERTRADE",
            Self::Estimate => "ESTIMATE",
            Self::ReceiveChat => "RECEIVECHAT",
        }
    }

    /// Whether a pending interrupt may pre-empt a transition into this state.
    #[must_use]
    pub fn is_interruptible(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Persp | Self::Plan | Self::Act | Self::Move | Self::ChatInit
        )
    }

    /// The default profile for this tag.
    #[must_use]
    pub fn profile(self) -> StateProfile {
        use StateTag as T;
        let (next, prompt, duration_tolerance): (&'static [StateTag], _, _) = match self {
            T::Idle => (&[T::Persp], None, 1),
            T::Move => (&[T::Persp, T::Emotion], None, 10),
            T::Sleeping => (&[T::Persp], None, 10),
            T::Plan => (&[T::Act], Some(PromptKind::Plan), 10),
            T::Act => (
                &[T::Use, T::ChatInit, T::Move, T::DrawInit],
                Some(PromptKind::Act),
                10,
            ),
            T::Persp => (&[T::Plan, T::Act, T::Emotion], Some(PromptKind::Perceive), 10),
            T::PerspQ => (&[T::PerspA], Some(PromptKind::PerceiveQuestion), 10),
            T::PerspA => (&[T::Plan], Some(PromptKind::PerceiveAnswer), 10),
            T::Critic => (&[T::Plan, T::Act], Some(PromptKind::Critic), 10),
            T::ChatInit => (&[T::Chatting], Some(PromptKind::ChatInit), 10),
            T::Chatting => (&[T::Sum], Some(PromptKind::Chatting), 10),
            T::ActReflection => (&[T::Persp, T::Work], Some(PromptKind::ActReflection), 10),
            T::Use => (&[T::Sum, T::Appreciate], Some(PromptKind::Use), 10),
            T::Draw => (&[T::Appreciate], Some(PromptKind::Draw), 10),
            T::DrawInit => (&[T::Draw], Some(PromptKind::DrawInit), 10),
            T::Sum => (&[T::Emotion], Some(PromptKind::Summary), 10),
            T::Appreciate => (&[T::Emotion], Some(PromptKind::Appreciate), 10),
            T::Trade => (&[T::Sum], Some(PromptKind::Trade), 10),
            T::Bargain => (&[T::Emotion], Some(PromptKind::Bargain), 10),
            T::Emotion => (
                &[T::ActReflection, T::Bargain, T::Persp],
                Some(PromptKind::Emotion),
                10,
            ),
            T::Work => (&[T::Persp], None, 24),
            T::UserTrade => (&[T::UserTrade], None, 10),
            T::Estimate => (&[T::Persp], Some(PromptKind::Estimate), 10),
            T::ReceiveChat => (&[T::Sum], None, 100),
        };
        StateProfile {
            next,
            prompt,
            duration_tolerance,
        }
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateTag {
    type Err = EngineError;

    /// Case-insensitive; model replies are not always upper-case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EngineError::not_found("state", wanted))
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A 2D position on the town map.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Simulated town time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GameClock {
    /// Simulation tick that produced this time.
    pub tick: u64,
    /// Simulated hours since the town started.
    pub hours: f64,
}

impl GameClock {
    /// Clock reading for `tick`, given real seconds per tick and simulated
    /// hours per real second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn at(tick: u64, update_interval_secs: f64, hours_per_second: f64) -> Self {
        Self {
            tick,
            hours: tick as f64 * update_interval_secs * hours_per_second,
        }
    }

    /// One-based day number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn day(&self) -> u64 {
        (self.hours / 24.0).floor() as u64 + 1
    }
}

impl fmt::Display for GameClock {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = (self.hours.rem_euclid(24.0) * 60.0).round() as u64;
        write!(f, "day {}, {:02}:{:02}", self.day(), (minutes / 60) % 24, minutes % 60)
    }
}

// ---------------------------------------------------------------------------
// Emotional Model — PAD (Pleasure-Arousal-Dominance)
// ---------------------------------------------------------------------------

/// PAD mood. Each axis ranges from -1.0 to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    /// Unhappy (-1.0) to happy (+1.0).
    pub pleasure: f32,
    /// Calm (-1.0) to excited (+1.0).
    pub arousal: f32,
    /// Submissive (-1.0) to dominant (+1.0).
    pub dominance: f32,
}

impl Mood {
    /// Neutral mood.
    pub const NEUTRAL: Self = Self {
        pleasure: 0.0,
        arousal: 0.0,
        dominance: 0.0,
    };

    /// Create a mood, clamping values to [-1, 1].
    #[must_use]
    pub fn new(pleasure: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            pleasure: pleasure.clamp(-1.0, 1.0),
            arousal: arousal.clamp(-1.0, 1.0),
            dominance: dominance.clamp(-1.0, 1.0),
        }
    }

    /// Blend two moods with a weight (0.0 = self, 1.0 = other).
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.pleasure + (other.pleasure - self.pleasure) * t,
            self.arousal + (other.arousal - self.arousal) * t,
            self.dominance + (other.dominance - self.dominance) * t,
        )
    }

    /// Add a delta to every axis, clamping the result.
    #[must_use]
    pub fn shifted(&self, pleasure: f32, arousal: f32, dominance: f32) -> Self {
        Self::new(
            self.pleasure + pleasure,
            self.arousal + arousal,
            self.dominance + dominance,
        )
    }

    /// A word or two for prompts.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match (self.pleasure, self.arousal) {
            (p, a) if p > 0.3 && a > 0.3 => "excited",
            (p, _) if p > 0.3 => "happy",
            (p, a) if p < -0.3 && a > 0.3 => "angry",
            (p, _) if p < -0.3 => "sad",
            (_, a) if a > 0.3 => "restless",
            (_, a) if a < -0.3 => "tired",
            _ => "content",
        }
    }
}

impl Default for Mood {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_round_trip() {
        for tag in StateTag::ALL {
            assert_eq!(tag.to_string().parse::<StateTag>().expect("parse"), tag);
        }
        assert_eq!("chatinit".parse::<StateTag>().expect("case"), StateTag::ChatInit);
        assert!(matches!(
            "UNKNOWN".parse::<StateTag>(),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let json = serde_json::to_string(&StateTag::ActReflection).expect("serialize");
        assert_eq!(json, "\"ACTREFLECTION\"");
        let tag: StateTag = serde_json::from_str("\"PERSPQ\"").expect("deserialize");
        assert_eq!(tag, StateTag::PerspQ);
    }

    #[test]
    fn interruptible_set_is_fixed() {
        let interruptible: Vec<_> = StateTag::ALL
            .into_iter()
            .filter(|t| t.is_interruptible())
            .collect();
        assert_eq!(
            interruptible,
            vec![
                StateTag::Idle,
                StateTag::Move,
                StateTag::Plan,
                StateTag::Act,
                StateTag::Persp,
                StateTag::ChatInit
            ]
        );
    }

    #[test]
    fn every_profile_has_a_next_state() {
        for tag in StateTag::ALL {
            let profile = tag.profile();
            assert!(!profile.next.is_empty(), "{tag} has no next state");
            assert!(profile.duration_tolerance > 0);
        }
        assert_eq!(StateTag::ReceiveChat.profile().duration_tolerance, 100);
        assert!(StateTag::Idle.profile().prompt.is_none());
    }

    #[test]
    fn clock_formats_day_and_time() {
        let clock = GameClock::at(30, 1.0, 1.0);
        assert_eq!(clock.day(), 2);
        assert_eq!(clock.to_string(), "day 2, 06:00");
        assert_eq!(GameClock::default().to_string(), "day 1, 00:00");
    }

    #[test]
    fn mood_lerp_moves_toward_target() {
        let mood = Mood::new(0.8, -0.4, 0.0);
        let relaxed = mood.lerp(&Mood::NEUTRAL, 0.5);
        assert!((relaxed.pleasure - 0.4).abs() < 1e-6);
        assert!((relaxed.arousal + 0.2).abs() < 1e-6);
        assert_eq!(Mood::new(3.0, 0.0, 0.0).pleasure, 1.0);
        assert_eq!(Mood::NEUTRAL.describe(), "content");
    }
}

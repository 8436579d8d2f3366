//! Onboarding sequencer: derives progress from project state. Nothing here is stored.
//!
//! `status_count` counts satisfied steps regardless of order, while `next_step` is the
//! first unsatisfied step in list order. A project can have `status_count == 2` and
//! `next_step == Vision` at the same time; both values are reported as-is.

use crate::models::DomainSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Onboarding steps in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Vision,
    LongTermGoals,
    ShortTermGoals,
    Telegram,
}

pub const STEPS: [OnboardingStep; 4] = [
    OnboardingStep::Vision,
    OnboardingStep::LongTermGoals,
    OnboardingStep::ShortTermGoals,
    OnboardingStep::Telegram,
];

/// Value reported in place of a step key once every step is satisfied or onboarding
/// has been marked complete.
pub const STEP_COMPLETE: &str = "complete";

impl OnboardingStep {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::LongTermGoals => "long_term_goals",
            Self::ShortTermGoals => "short_term_goals",
            Self::Telegram => "telegram",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Vision => "your vision",
            Self::LongTermGoals => "your long-term goals",
            Self::ShortTermGoals => "your short-term goals",
            Self::Telegram => "connecting Telegram",
        }
    }

    /// Reminder appended to ordinary replies while this is the next step.
    pub fn nudge(&self) -> &'static str {
        match self {
            Self::Vision => "Next onboarding step: describe your vision for this project so I can keep every answer pointed at it.",
            Self::LongTermGoals => "Next onboarding step: add a few long-term goals in the Goals panel.",
            Self::ShortTermGoals => "Next onboarding step: break your long-term goals into short-term goals for the coming weeks.",
            Self::Telegram => "Next onboarding step: connect Telegram so I can reach you outside the dashboard.",
        }
    }

    /// Whether the backing condition for this step holds.
    pub fn is_satisfied(&self, state: &OnboardingState) -> bool {
        match self {
            Self::Vision => state.vision_set,
            Self::LongTermGoals => state.long_term_goals > 0,
            Self::ShortTermGoals => state.short_term_goals > 0,
            Self::Telegram => state.telegram_linked,
        }
    }
}

/// Inputs the sequencer needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardingState {
    pub vision_set: bool,
    pub long_term_goals: usize,
    pub short_term_goals: usize,
    pub telegram_linked: bool,
    pub completed_flag: bool,
}

impl OnboardingState {
    pub fn from_snapshot(snapshot: &DomainSnapshot, completed_flag: bool) -> Self {
        let non_blank = |s: &String| !s.trim().is_empty();
        Self {
            vision_set: snapshot.vision.as_ref().map(non_blank).unwrap_or(false),
            long_term_goals: snapshot.long_term_goals.iter().filter(|g| non_blank(g)).count(),
            short_term_goals: snapshot.short_term_goals.iter().filter(|g| non_blank(g)).count(),
            telegram_linked: snapshot.telegram_chat_id.as_ref().map(non_blank).unwrap_or(false),
            completed_flag,
        }
    }
}

/// Sequencer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingProgress {
    pub active: bool,
    pub next_step: Option<OnboardingStep>,
    pub status_count: u8,
}

impl OnboardingProgress {
    /// Step key for the response, `"complete"` when there is no next step or the flag is set.
    pub fn step_key(&self) -> &'static str {
        match (self.active, self.next_step) {
            (true, Some(step)) => step.key(),
            _ => STEP_COMPLETE,
        }
    }

    /// Reminder to append to an ordinary reply, when one applies.
    pub fn nudge(&self) -> Option<&'static str> {
        match (self.active, self.next_step) {
            (true, Some(step)) => Some(step.nudge()),
            _ => None,
        }
    }

    /// Direct answer to "what onboarding step am I on?".
    pub fn describe(&self) -> String {
        match (self.active, self.next_step) {
            (true, Some(step)) => format!(
                "You have completed {} of {} onboarding steps. The next one is {}. {}",
                self.status_count,
                STEPS.len(),
                step.label(),
                step.nudge()
            ),
            _ => "Onboarding is complete. There are no remaining setup steps.".to_string(),
        }
    }
}

/// Derive progress from state. Pure and deterministic.
pub fn sequence(state: &OnboardingState) -> OnboardingProgress {
    let status_count = STEPS.iter().filter(|s| s.is_satisfied(state)).count() as u8;
    let next_step = STEPS.iter().copied().find(|s| !s.is_satisfied(state));
    if state.completed_flag {
        return OnboardingProgress {
            active: false,
            next_step,
            status_count,
        };
    }
    OnboardingProgress {
        active: next_step.is_some(),
        next_step,
        status_count,
    }
}

// Only questions about the user's own progress; "onboarding" as a topic (a client
// onboarding sequence, an employee checklist) goes to the assistant.
static ONBOARDING_QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*(?:what|which)(?:['’]s|\s+is)?\s+(?:my\s+)?(?:next\s+|current\s+)?onboarding\s+step\b
        | \bmy\s+onboarding\s+(?:progress|status|steps?)\b
        | ^\s*(?:how\s+far(?:\s+along)?|where)\s+am\s+i\s+(?:in|with|through)\s+(?:my\s+|the\s+)?onboarding\W*$
        ",
    )
    .expect("onboarding question pattern is valid")
});

/// True when the raw message is a direct question about onboarding progress.
pub fn is_onboarding_question(message: &str) -> bool {
    ONBOARDING_QUESTION.is_match(message)
}

//! Turn classification
//!
//! Decides what a single turn means for the aggregates: whether it starts an
//! attempt, whether it answered correctly or incorrectly, and whether it
//! completed the lesson.

use crate::config::TurnRules;
use crate::types::{ActionView, Turn};

/// Facts inferred from one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnFacts {
    pub is_attempt_start: bool,
    pub is_correct: bool,
    pub is_incorrect: bool,
    pub is_completion: bool,
}

impl TurnFacts {
    pub fn classify(turn: &Turn, rules: &TurnRules) -> Self {
        let event = turn.input_event();

        Self {
            is_attempt_start: is_attempt_start(turn, rules),
            is_correct: is_correct_event(&event),
            is_incorrect: is_incorrect_event(&event),
            is_completion: is_completion(turn),
        }
    }

    /// This turn's contribution to the correct-answer counter (0 or 1)
    pub fn correct_count(&self) -> i64 {
        i64::from(self.is_correct)
    }

    /// This turn's contribution to the incorrect-answer counter (0 or 1)
    pub fn incorrect_count(&self) -> i64 {
        i64::from(self.is_incorrect)
    }
}

pub fn is_attempt_start(turn: &Turn, rules: &TurnRules) -> bool {
    turn.turn_id() == Some(rules.attempt_start_turn_id)
}

/// `event` must already be trimmed and lower-cased
pub fn is_correct_event(event: &str) -> bool {
    event == "correct"
}

/// `event` must already be trimmed and lower-cased
pub fn is_incorrect_event(event: &str) -> bool {
    event.starts_with("incorrect")
}

/// True when any action is the system ending the lesson.
pub fn is_completion(turn: &Turn) -> bool {
    turn.transitions()
        .flat_map(|transition| transition.actions())
        .any(|action| is_lesson_end(&action))
}

fn is_lesson_end(action: &ActionView<'_>) -> bool {
    action.agent().trim().eq_ignore_ascii_case("system")
        && action.act().trim().eq_ignore_ascii_case("end")
}

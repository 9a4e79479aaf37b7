//! Core domain types for turnlog
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Turn** | One posted interaction record for a student within a lesson attempt |
//! | **Attempt** | One pass through a lesson, opened by a turn whose `TurnID` is the attempt-start id |
//! | **Transition** | A rule firing recorded in a turn (`RuleID`, `StateID`, `Actions`) |
//! | **Action** | An effect performed by an agent during a transition (`Agent`, `Act`, `Data`) |
//! | **Session** | The (lesson, student) pair and its entire turn log |
//!
//! Turns are kept exactly as posted. [`Turn`] wraps the raw JSON object and
//! exposes extract-or-default accessors: a field with the wrong shape reads as
//! absent or empty instead of failing. The aggregate documents ([`Student`],
//! [`Lesson`], [`Class`], [`SessionAggregate`]) use the field names of the
//! stored documents, which is why they serialize in PascalCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================
// Raw turn
// ============================================

/// Field names of a posted turn.
pub mod fields {
    pub const LESSON_ID: &str = "LessonID";
    pub const USER_ID: &str = "UserID";
    pub const TURN_ID: &str = "TurnID";
    pub const DURATION: &str = "Duration";
    pub const DB_TIMESTAMP: &str = "DBTimestamp";
    pub const TRANSITIONS: &str = "Transitions";
    pub const INPUT: &str = "Input";
    pub const EVENT: &str = "Event";
    pub const STATE_ID: &str = "StateID";
    pub const RULE_ID: &str = "RuleID";
    pub const ACTIONS: &str = "Actions";
    pub const AGENT: &str = "Agent";
    pub const ACT: &str = "Act";
    pub const DATA: &str = "Data";
}

/// A single posted turn, stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Turn(Map<String, Value>);

impl Turn {
    pub fn new(doc: Map<String, Value>) -> Self {
        Self(doc)
    }

    /// The raw JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Posted lesson id, if it is a string
    pub fn lesson_id(&self) -> Option<&str> {
        str_field(&self.0, fields::LESSON_ID)
    }

    /// Posted user id, if it is a string
    pub fn user_id(&self) -> Option<&str> {
        str_field(&self.0, fields::USER_ID)
    }

    /// Position of the turn within its attempt.
    ///
    /// Floats are truncated; anything that is not a number reads as `None`.
    pub fn turn_id(&self) -> Option<i64> {
        match self.0.get(fields::TURN_ID)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// Turn duration in milliseconds (never negative)
    pub fn duration(&self) -> f64 {
        f64_field(&self.0, fields::DURATION).max(0.0)
    }

    /// Server-side timestamp in milliseconds since the Unix epoch
    pub fn db_timestamp(&self) -> f64 {
        f64_field(&self.0, fields::DB_TIMESTAMP)
    }

    pub fn set_db_timestamp(&mut self, millis: f64) {
        self.0
            .insert(fields::DB_TIMESTAMP.to_string(), Value::from(millis));
    }

    /// `Input.Event`, trimmed and lower-cased ("" when missing)
    pub fn input_event(&self) -> String {
        object_field(&self.0, fields::INPUT)
            .and_then(|input| str_field(input, fields::EVENT))
            .map(|evt| evt.trim().to_lowercase())
            .unwrap_or_default()
    }

    /// Well-formed transitions of this turn; malformed entries are skipped.
    pub fn transitions(&self) -> impl Iterator<Item = TransitionView<'_>> {
        array_field(&self.0, fields::TRANSITIONS)
            .iter()
            .filter_map(Value::as_object)
            .map(TransitionView)
    }
}

impl From<Map<String, Value>> for Turn {
    fn from(doc: Map<String, Value>) -> Self {
        Self(doc)
    }
}

/// Borrowed view of one entry in `Transitions`.
#[derive(Debug, Clone, Copy)]
pub struct TransitionView<'a>(&'a Map<String, Value>);

impl<'a> TransitionView<'a> {
    pub fn rule_id(&self) -> &'a str {
        str_field(self.0, fields::RULE_ID).unwrap_or("")
    }

    pub fn state_id(&self) -> &'a str {
        str_field(self.0, fields::STATE_ID).unwrap_or("")
    }

    /// `RuleID` trimmed and lower-cased, for rule matching
    pub fn normalized_rule_id(&self) -> String {
        self.rule_id().trim().to_lowercase()
    }

    pub fn actions(&self) -> impl Iterator<Item = ActionView<'a>> {
        array_field(self.0, fields::ACTIONS)
            .iter()
            .filter_map(Value::as_object)
            .map(ActionView)
    }
}

/// Borrowed view of one entry in a transition's `Actions`.
#[derive(Debug, Clone, Copy)]
pub struct ActionView<'a>(&'a Map<String, Value>);

impl<'a> ActionView<'a> {
    pub fn agent(&self) -> &'a str {
        str_field(self.0, fields::AGENT).unwrap_or("")
    }

    pub fn act(&self) -> &'a str {
        str_field(self.0, fields::ACT).unwrap_or("")
    }

    /// Free-form action payload
    pub fn data(&self) -> Option<&'a Value> {
        self.0.get(fields::DATA)
    }
}

fn str_field<'a>(doc: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    doc.get(name).and_then(Value::as_str)
}

fn f64_field(doc: &Map<String, Value>, name: &str) -> f64 {
    doc.get(name).and_then(Value::as_f64).unwrap_or(0.0)
}

fn object_field<'a>(doc: &'a Map<String, Value>, name: &str) -> Option<&'a Map<String, Value>> {
    doc.get(name).and_then(Value::as_object)
}

fn array_field<'a>(doc: &'a Map<String, Value>, name: &str) -> &'a [Value] {
    doc.get(name)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ============================================
// Aggregates
// ============================================

/// A student, created implicitly by their first turn or by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Student {
    #[serde(rename = "_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_created: Option<bool>,
    /// Reading material the student has opened, oldest first
    #[serde(default, rename = "ReadingURLs")]
    pub reading_urls: Vec<MediaVisit>,
}

/// One visit to a piece of reading material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaVisit {
    #[serde(rename = "TargetURL")]
    pub target_url: String,
    #[serde(rename = "VisitTime")]
    pub visit_time: DateTime<Utc>,
}

/// A lesson and who has seen, attempted and completed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Lesson {
    #[serde(rename = "_id")]
    pub lesson_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_count: Option<i64>,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default)]
    pub attempt_times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub students_attempted: Vec<String>,
    #[serde(default)]
    pub students_completed: Vec<String>,
    /// Raw URL forms this lesson id was posted as
    #[serde(default, rename = "URLs")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_created: Option<bool>,
}

/// A class at a location, with its students and lessons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Class {
    #[serde(rename = "_id")]
    pub class_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_time: Option<String>,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_created: Option<bool>,
}

/// Everything recorded for one student in one lesson.
///
/// `turns` is the append-only log and the source of truth; the counters are
/// a cache of replaying it (see [`crate::aggregate::replay_counters`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionAggregate {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "LessonID", default)]
    pub lesson_id: String,
    #[serde(rename = "UserID", default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub turn_count: i64,
    #[serde(default)]
    pub attempts: i64,
    #[serde(default)]
    pub completions: i64,
    #[serde(default)]
    pub correct_answers: i64,
    #[serde(default)]
    pub incorrect_answers: i64,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl SessionAggregate {
    /// Sum of all turn durations, in milliseconds
    pub fn total_duration(&self) -> f64 {
        self.turns.iter().map(Turn::duration).sum()
    }

    /// Mean turn duration, in milliseconds
    pub fn mean_duration(&self) -> f64 {
        if self.turns.is_empty() {
            return 0.0;
        }
        self.total_duration() / self.turns.len() as f64
    }

    /// Correct rate from the cached counters, 0 when nothing was correct
    pub fn correct_answer_rate(&self) -> f64 {
        if self.correct_answers < 1 {
            return 0.0;
        }
        self.correct_answers as f64 / (self.correct_answers + self.incorrect_answers) as f64
    }
}

/// (lesson, user, turn count) row for overview listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SessionSummary {
    pub lesson_id: String,
    pub user_id: String,
    pub turn_count: i64,
}

/// Sort key that orders `lesson2` before `lesson10`.
///
/// A leading `lesson` is stripped and the remainder left-padded with zeros
/// to eight characters. Ids without the prefix sort by their lower-cased form.
pub fn lesson_sort_key(lesson_id: &str) -> String {
    let id = lesson_id.trim().to_lowercase();
    match id.strip_prefix("lesson") {
        Some(rest) => format!("{:0>8}", rest),
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(value: Value) -> Turn {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_turn_accessors() {
        let t = turn(json!({
            "LessonID": "lesson1",
            "UserID": "alice",
            "TurnID": 3,
            "Duration": 120.5,
            "DBTimestamp": 1000.0,
            "Input": {"Event": "  Correct "},
            "Extra": {"kept": true}
        }));

        assert_eq!(t.lesson_id(), Some("lesson1"));
        assert_eq!(t.user_id(), Some("alice"));
        assert_eq!(t.turn_id(), Some(3));
        assert_eq!(t.duration(), 120.5);
        assert_eq!(t.db_timestamp(), 1000.0);
        assert_eq!(t.input_event(), "correct");
        assert_eq!(t.as_map()["Extra"], json!({"kept": true}));
    }

    #[test]
    fn test_turn_defaults_on_bad_shapes() {
        let t = turn(json!({
            "TurnID": "one",
            "Duration": -5,
            "Input": "not an object",
            "Transitions": {"RuleID": "read"}
        }));

        assert_eq!(t.turn_id(), None);
        assert_eq!(t.duration(), 0.0);
        assert_eq!(t.db_timestamp(), 0.0);
        assert_eq!(t.input_event(), "");
        assert_eq!(t.transitions().count(), 0);
    }

    #[test]
    fn test_float_turn_id_truncates() {
        let t = turn(json!({"TurnID": 1.0}));
        assert_eq!(t.turn_id(), Some(1));
    }

    #[test]
    fn test_transition_views_skip_malformed_entries() {
        let t = turn(json!({
            "Transitions": [
                "garbage",
                {"RuleID": " Read ", "StateID": "s1", "Actions": [
                    7,
                    {"Agent": "System", "Act": "End", "Data": "x"}
                ]},
                {"Actions": "nope"}
            ]
        }));

        let transitions: Vec<_> = t.transitions().collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].normalized_rule_id(), "read");
        assert_eq!(transitions[0].state_id(), "s1");

        let actions: Vec<_> = transitions[0].actions().collect();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].agent(), "System");
        assert_eq!(actions[0].act(), "End");
        assert_eq!(actions[0].data(), Some(&json!("x")));

        assert_eq!(transitions[1].rule_id(), "");
        assert_eq!(transitions[1].actions().count(), 0);
    }

    #[test]
    fn test_lesson_sort_key() {
        assert_eq!(lesson_sort_key("lesson2"), "00000002");
        assert_eq!(lesson_sort_key("Lesson10"), "00000010");
        assert!(lesson_sort_key("lesson2") < lesson_sort_key("lesson10"));
        assert_eq!(lesson_sort_key("Algebra"), "algebra");
    }

    #[test]
    fn test_lesson_document_defaults_lists() {
        let lesson: Lesson = serde_json::from_value(json!({"_id": "lesson1"})).unwrap();
        assert!(lesson.students.is_empty());
        assert!(lesson.urls.is_empty());
        assert!(lesson.attempt_times.is_empty());
        assert_eq!(lesson.turn_count, None);
    }

    #[test]
    fn test_session_durations_and_rate() {
        let session = SessionAggregate {
            correct_answers: 3,
            incorrect_answers: 1,
            turns: vec![
                turn(json!({"Duration": 100.0})),
                turn(json!({"Duration": 300.0})),
            ],
            ..Default::default()
        };
        assert_eq!(session.total_duration(), 400.0);
        assert_eq!(session.mean_duration(), 200.0);
        assert_eq!(session.correct_answer_rate(), 0.75);

        let empty = SessionAggregate::default();
        assert_eq!(empty.mean_duration(), 0.0);
        assert_eq!(empty.correct_answer_rate(), 0.0);
    }
}

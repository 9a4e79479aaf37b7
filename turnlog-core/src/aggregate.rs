//! Aggregate updates for one ingested turn
//!
//! A turn touches up to four documents. Rather than hiding the student,
//! lesson and class writes behind the session upsert, [`AggregateIntent`]
//! lists every write explicitly and [`AggregateIntent::apply`] runs them in a
//! fixed order: session, student, class, lesson.
//!
//! Each write is a single-document upsert. Retrying one after a failure
//! re-applies only that turn's deltas.

use crate::classify::TurnFacts;
use crate::config::TurnRules;
use crate::db::{Collection, DocUpdate, DocumentStore};
use crate::error::Result;
use crate::keys::DerivedKeys;
use crate::types::{fields, Turn};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// One pending write.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub collection: Collection,
    pub id: String,
    pub update: DocUpdate,
}

/// All writes implied by one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateIntent {
    pub session: EntityUpdate,
    pub student: EntityUpdate,
    pub class: Option<EntityUpdate>,
    pub lesson: EntityUpdate,
}

impl AggregateIntent {
    pub fn build(keys: &DerivedKeys, facts: &TurnFacts, turn: &Turn, now: DateTime<Utc>) -> Self {
        let now_value = Value::from(now.to_rfc3339());

        Self {
            session: EntityUpdate {
                collection: Collection::Sessions,
                id: keys.session_key.clone(),
                update: session_update(keys, facts, turn, &now_value),
            },
            student: EntityUpdate {
                collection: Collection::Students,
                id: keys.user_key.clone(),
                update: DocUpdate::new()
                    .set("LastTurnTime", now_value.clone())
                    .inc("TurnCount", 1)
                    .set_on_insert("AutoCreated", true),
            },
            class: keys.class().map(|class_key| EntityUpdate {
                collection: Collection::Classes,
                id: class_key.to_string(),
                update: DocUpdate::new()
                    .set("Location", keys.location_key.clone().unwrap_or_default())
                    .add_to_set("Lessons", keys.lesson_key.as_str())
                    .add_to_set("Students", keys.user_key.as_str())
                    .set_on_insert("MeetingTime", "")
                    .set_on_insert("AutoCreated", true),
            }),
            lesson: EntityUpdate {
                collection: Collection::Lessons,
                id: keys.lesson_key.clone(),
                update: lesson_update(keys, facts, &now_value),
            },
        }
    }

    /// Writes in application order
    pub fn updates(&self) -> impl Iterator<Item = &EntityUpdate> {
        std::iter::once(&self.session)
            .chain(std::iter::once(&self.student))
            .chain(self.class.iter())
            .chain(std::iter::once(&self.lesson))
    }

    /// Apply every write. The first store failure is returned as-is; writes
    /// already applied stay applied.
    pub fn apply<S: DocumentStore + ?Sized>(&self, store: &S) -> Result<()> {
        for entity in self.updates() {
            store.upsert(entity.collection, &entity.id, &entity.update)?;
        }
        Ok(())
    }
}

fn session_update(keys: &DerivedKeys, facts: &TurnFacts, turn: &Turn, now: &Value) -> DocUpdate {
    let mut update = DocUpdate::new()
        .set("LastTurnTime", now.clone())
        .set(fields::LESSON_ID, keys.lesson_key.as_str())
        .set(fields::USER_ID, keys.user_key.as_str())
        .inc("TurnCount", 1)
        .push("Turns", Value::Object(turn.as_map().clone()));

    // An attempt start resets the running answer counts to this turn's
    // contribution instead of adding to them
    update = if facts.is_attempt_start {
        update
            .inc("Attempts", 1)
            .set("CorrectAnswers", facts.correct_count())
            .set("IncorrectAnswers", facts.incorrect_count())
    } else {
        update
            .inc("CorrectAnswers", facts.correct_count())
            .inc("IncorrectAnswers", facts.incorrect_count())
    };

    if facts.is_completion {
        update = update.inc("Completions", 1);
    }

    update
}

fn lesson_update(keys: &DerivedKeys, facts: &TurnFacts, now: &Value) -> DocUpdate {
    let empty = || Value::Array(Vec::new());

    let mut update = DocUpdate::new()
        .set("LastTurnTime", now.clone())
        .add_to_set("Students", keys.user_key.as_str())
        .inc("TurnCount", 1)
        .set_on_insert("AutoCreated", true)
        .set_on_insert("ShortName", keys.lesson_key.as_str());

    // List fields default to [] on insert so readers never see them missing
    update = if facts.is_attempt_start {
        update
            .add_to_set("StudentsAttempted", keys.user_key.as_str())
            .push("AttemptTimes", now.clone())
    } else {
        update
            .set_on_insert("StudentsAttempted", empty())
            .set_on_insert("AttemptTimes", empty())
    };

    update = if facts.is_completion {
        update.add_to_set("StudentsCompleted", keys.user_key.as_str())
    } else {
        update.set_on_insert("StudentsCompleted", empty())
    };

    match &keys.lesson_url_seen {
        Some(url) => update.add_to_set("URLs", url.as_str()),
        None => update.set_on_insert("URLs", empty()),
    }
}

/// Session counters derived purely from a turn log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub turn_count: i64,
    pub attempts: i64,
    pub completions: i64,
    pub correct_answers: i64,
    pub incorrect_answers: i64,
}

impl SessionCounters {
    /// Fold one turn in, with the same semantics as the session upsert
    pub fn observe(&mut self, facts: &TurnFacts) {
        self.turn_count += 1;
        if facts.is_attempt_start {
            self.attempts += 1;
            self.correct_answers = facts.correct_count();
            self.incorrect_answers = facts.incorrect_count();
        } else {
            self.correct_answers += facts.correct_count();
            self.incorrect_answers += facts.incorrect_count();
        }
        if facts.is_completion {
            self.completions += 1;
        }
    }
}

/// Replay a session's turn log from empty state.
///
/// The stored counters on a session must always equal this replay.
pub fn replay_counters(turns: &[Turn], rules: &TurnRules) -> SessionCounters {
    let mut counters = SessionCounters::default();
    for turn in turns {
        counters.observe(&TurnFacts::classify(turn, rules));
    }
    counters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UpdateOp;
    use serde_json::json;

    fn turn(value: Value) -> Turn {
        serde_json::from_value(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn facts(attempt: bool, correct: bool, completion: bool) -> TurnFacts {
        TurnFacts {
            is_attempt_start: attempt,
            is_correct: correct,
            is_incorrect: false,
            is_completion: completion,
        }
    }

    #[test]
    fn test_simple_user_has_no_class_write() {
        let keys = DerivedKeys::derive("lesson1", "alice");
        let intent = AggregateIntent::build(&keys, &TurnFacts::default(), &Turn::default(), now());

        assert!(intent.class.is_none());
        let order: Vec<_> = intent.updates().map(|u| u.collection).collect();
        assert_eq!(
            order,
            vec![Collection::Sessions, Collection::Students, Collection::Lessons]
        );
        assert_eq!(intent.session.id, "alice:lesson1");
        assert_eq!(intent.student.id, "alice");
        assert_eq!(intent.lesson.id, "lesson1");
    }

    #[test]
    fn test_class_write_for_compound_user() {
        let keys = DerivedKeys::derive("lesson1", "memphis-semiotics-fozzy-bear");
        let intent = AggregateIntent::build(&keys, &TurnFacts::default(), &Turn::default(), now());

        let class = intent.class.as_ref().unwrap();
        assert_eq!(class.id, "semiotics");
        assert_eq!(
            class.update.op_for("Location"),
            Some(&UpdateOp::Set("Location".to_string(), json!("memphis")))
        );
        assert_eq!(
            class.update.op_for("Students"),
            Some(&UpdateOp::AddToSet("Students".to_string(), json!("fozzy-bear")))
        );
        let order: Vec<_> = intent.updates().map(|u| u.collection).collect();
        assert_eq!(order[2], Collection::Classes);
    }

    #[test]
    fn test_attempt_start_sets_answer_counts() {
        let keys = DerivedKeys::derive("lesson1", "alice");
        let intent = AggregateIntent::build(&keys, &facts(true, true, false), &Turn::default(), now());

        let update = &intent.session.update;
        assert_eq!(
            update.op_for("CorrectAnswers"),
            Some(&UpdateOp::Set("CorrectAnswers".to_string(), json!(1)))
        );
        assert_eq!(
            update.op_for("Attempts"),
            Some(&UpdateOp::Inc("Attempts".to_string(), 1))
        );
        assert_eq!(update.op_for("Completions"), None);

        let lesson = &intent.lesson.update;
        assert_eq!(
            lesson.op_for("AttemptTimes"),
            Some(&UpdateOp::Push(
                "AttemptTimes".to_string(),
                json!("2024-03-01T12:00:00+00:00")
            ))
        );
    }

    #[test]
    fn test_non_attempt_increments_answer_counts() {
        let keys = DerivedKeys::derive("lesson1", "alice");
        let intent = AggregateIntent::build(&keys, &facts(false, true, true), &Turn::default(), now());

        let update = &intent.session.update;
        assert_eq!(
            update.op_for("CorrectAnswers"),
            Some(&UpdateOp::Inc("CorrectAnswers".to_string(), 1))
        );
        assert_eq!(
            update.op_for("Completions"),
            Some(&UpdateOp::Inc("Completions".to_string(), 1))
        );

        let lesson = &intent.lesson.update;
        assert_eq!(
            lesson.op_for("StudentsAttempted"),
            Some(&UpdateOp::SetOnInsert(
                "StudentsAttempted".to_string(),
                json!([])
            ))
        );
        assert_eq!(
            lesson.op_for("StudentsCompleted"),
            Some(&UpdateOp::AddToSet(
                "StudentsCompleted".to_string(),
                json!("alice")
            ))
        );
    }

    #[test]
    fn test_session_log_gets_raw_turn() {
        let keys = DerivedKeys::derive("lesson1", "alice");
        let raw = turn(json!({"LessonID": "Lesson1", "UserID": "Alice", "Custom": [1, 2]}));
        let intent = AggregateIntent::build(&keys, &TurnFacts::default(), &raw, now());

        assert_eq!(
            intent.session.update.op_for("Turns"),
            Some(&UpdateOp::Push(
                "Turns".to_string(),
                json!({"LessonID": "Lesson1", "UserID": "Alice", "Custom": [1, 2]})
            ))
        );
    }

    #[test]
    fn test_url_variant_recorded() {
        let keys = DerivedKeys::derive("http://host/scripts/lesson5/go", "alice");
        let intent = AggregateIntent::build(&keys, &TurnFacts::default(), &Turn::default(), now());
        assert_eq!(
            intent.lesson.update.op_for("URLs"),
            Some(&UpdateOp::AddToSet(
                "URLs".to_string(),
                json!("http://host/scripts/lesson5/go")
            ))
        );
    }

    #[test]
    fn test_replay_counters() {
        let rules = TurnRules::default();
        let turns = vec![
            turn(json!({"TurnID": 1, "Input": {"Event": "correct"}})),
            turn(json!({"TurnID": 2, "Input": {"Event": "incorrect"}})),
            turn(json!({"TurnID": 3, "Transitions": [{"Actions": [{"Agent": "system", "Act": "end"}]}]})),
            turn(json!({"TurnID": 1, "Input": {"Event": "incorrect"}})),
            turn(json!({"TurnID": 2, "Input": {"Event": "correct"}})),
        ];

        let counters = replay_counters(&turns, &rules);
        assert_eq!(
            counters,
            SessionCounters {
                turn_count: 5,
                attempts: 2,
                completions: 1,
                correct_answers: 1,
                incorrect_answers: 1,
            }
        );
        assert_eq!(replay_counters(&[], &rules), SessionCounters::default());
    }
}

//! Turn ingestion
//!
//! [`TurnIngestor`] is the write path: validate a posted turn, stamp its
//! server timestamp, derive keys, classify it and apply the resulting
//! aggregate writes to the store.
//!
//! Validation happens before any write. Once writes start, a store failure is
//! returned unchanged and the writes already made stay in place.

use crate::aggregate::AggregateIntent;
use crate::classify::TurnFacts;
use crate::config::TurnRules;
use crate::db::{Collection, DocUpdate, DocumentStore};
use crate::error::{Error, Result};
use crate::keys::{split_user_id, DerivedKeys};
use crate::types::{fields, Turn};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::io::BufRead;

/// What one successful ingest did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedTurn {
    pub keys: DerivedKeys,
    pub facts: TurnFacts,
    /// Server timestamp as stored (ms since the Unix epoch)
    pub db_timestamp: f64,
}

/// Result of ingesting a batch of JSON lines.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Number of turns stored
    pub turns_ingested: usize,
    /// Number of blank lines skipped
    pub blank_lines: usize,
    /// Rejected lines (1-based line number → reason)
    pub rejected: Vec<(usize, String)>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Applies posted turns to a document store.
pub struct TurnIngestor<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    rules: TurnRules,
}

impl<'a, S: DocumentStore + ?Sized> TurnIngestor<'a, S> {
    pub fn new(store: &'a S, rules: TurnRules) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &TurnRules {
        &self.rules
    }

    /// Parse one JSON object and ingest it
    pub fn ingest_json(&self, raw: &str) -> Result<IngestedTurn> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(doc) => self.ingest(doc),
            other => Err(Error::Validation(format!(
                "turn must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Ingest one turn, received now
    pub fn ingest(&self, doc: Map<String, Value>) -> Result<IngestedTurn> {
        self.ingest_at(doc, Utc::now())
    }

    /// Ingest one turn as if received at `now`.
    pub fn ingest_at(&self, doc: Map<String, Value>, now: DateTime<Utc>) -> Result<IngestedTurn> {
        let mut turn = Turn::new(doc);

        let lesson_raw = required_id(&turn, fields::LESSON_ID)?.to_string();
        let user_raw = required_id(&turn, fields::USER_ID)?.to_string();

        if turn.db_timestamp() <= 0.0 {
            turn.set_db_timestamp(now.timestamp_millis() as f64);
        }

        let keys = DerivedKeys::derive(&lesson_raw, &user_raw);
        if keys.lesson_key.trim().is_empty() {
            return Err(Error::Validation(format!("{} has an empty lesson key", fields::LESSON_ID)));
        }
        if keys.user_key.trim().is_empty() {
            return Err(Error::Validation(format!("{} has an empty user part", fields::USER_ID)));
        }
        let facts = TurnFacts::classify(&turn, &self.rules);

        let _span = tracing::debug_span!("ingest", session = %keys.session_key).entered();

        AggregateIntent::build(&keys, &facts, &turn, now).apply(self.store)?;

        tracing::debug!(
            turn_id = ?turn.turn_id(),
            attempt_start = facts.is_attempt_start,
            completion = facts.is_completion,
            "Ingested turn"
        );

        Ok(IngestedTurn {
            keys,
            facts,
            db_timestamp: turn.db_timestamp(),
        })
    }

    /// Ingest newline-delimited JSON turns.
    ///
    /// Malformed or invalid lines are recorded in the report and skipped.
    /// Read failures and store failures stop the batch.
    pub fn ingest_batch<R: BufRead>(&self, reader: R) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = i + 1;

            if line.trim().is_empty() {
                report.blank_lines += 1;
                continue;
            }

            match self.ingest_json(&line) {
                Ok(_) => report.turns_ingested += 1,
                Err(e @ (Error::Json(_) | Error::Validation(_))) => {
                    tracing::warn!(line = line_no, error = %e, "Skipping turn");
                    report.rejected.push((line_no, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            ingested = report.turns_ingested,
            rejected = report.rejected.len(),
            "Batch ingest finished"
        );
        Ok(report)
    }

    /// Record a reading-material visit posted as `{UserID, TargetURL}`
    pub fn save_reading_target(&self, raw: &str) -> Result<()> {
        let doc = match serde_json::from_str::<Value>(raw)? {
            Value::Object(doc) => doc,
            other => {
                return Err(Error::Validation(format!(
                    "reading target must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let user = non_blank(&doc, fields::USER_ID)?;
        let target = non_blank(&doc, "TargetURL")?;
        self.save_reading_visit(user, target, Utc::now()).map(|_| ())
    }

    /// Append a visit to the student's `ReadingURLs`, creating the student if needed.
    ///
    /// Returns the student key the visit was stored under.
    pub fn save_reading_visit(
        &self,
        user_raw: &str,
        target_url: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if user_raw.trim().is_empty() {
            return Err(Error::Validation(format!("{} is required", fields::USER_ID)));
        }
        if target_url.trim().is_empty() {
            return Err(Error::Validation("TargetURL is required".to_string()));
        }

        let (_, _, user_key) = split_user_id(&user_raw.to_lowercase());
        if user_key.trim().is_empty() {
            return Err(Error::Validation(format!("{} has an empty user part", fields::USER_ID)));
        }
        let visit = json!({
            "TargetURL": target_url,
            "VisitTime": now.to_rfc3339(),
        });
        let update = DocUpdate::new()
            .push("ReadingURLs", visit)
            .set_on_insert("AutoCreated", true);

        self.store.upsert(Collection::Students, &user_key, &update)?;
        tracing::debug!(user = %user_key, target_url, "Saved reading visit");
        Ok(user_key)
    }
}

fn required_id<'t>(turn: &'t Turn, field: &str) -> Result<&'t str> {
    let value = match field {
        fields::LESSON_ID => turn.lesson_id(),
        _ => turn.user_id(),
    };
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Validation(format!("{} is required", field)))
}

fn non_blank<'d>(doc: &'d Map<String, Value>, field: &str) -> Result<&'d str> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Validation(format!("{} is required", field)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_blank_ids_rejected_without_writes() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        for bad in [
            json!({"LessonID": "", "UserID": "alice"}),
            json!({"LessonID": "lesson1", "UserID": "   "}),
            json!({"LessonID": "lesson1"}),
            json!({"LessonID": 7, "UserID": "alice"}),
        ] {
            let result = ingestor.ingest_at(obj(bad), now());
            assert!(matches!(result, Err(Error::Validation(_))));
        }

        for collection in [
            Collection::Students,
            Collection::Lessons,
            Collection::Classes,
            Collection::Sessions,
        ] {
            assert_eq!(db.count(collection).unwrap(), 0);
        }
    }

    #[test]
    fn test_empty_user_part_rejected_without_writes() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        for user in ["loc-cls-", "loc-cls- "] {
            let result = ingestor.ingest_at(obj(json!({"LessonID": "L", "UserID": user})), now());
            assert!(matches!(result, Err(Error::Validation(_))), "accepted {user:?}");
        }
        assert!(matches!(
            ingestor.save_reading_visit("loc-cls-", "http://read/one", now()),
            Err(Error::Validation(_))
        ));

        for collection in [
            Collection::Students,
            Collection::Lessons,
            Collection::Classes,
            Collection::Sessions,
        ] {
            assert_eq!(db.count(collection).unwrap(), 0);
        }
    }

    #[test]
    fn test_missing_timestamp_is_stamped() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        let out = ingestor
            .ingest_at(obj(json!({"LessonID": "l1", "UserID": "u1", "DBTimestamp": -4})), now())
            .unwrap();
        assert_eq!(out.db_timestamp, now().timestamp_millis() as f64);

        let session = db.find_one(Collection::Sessions, "u1:l1", None).unwrap().unwrap();
        assert_eq!(
            session["Turns"][0]["DBTimestamp"].as_f64(),
            Some(now().timestamp_millis() as f64)
        );
    }

    #[test]
    fn test_posted_timestamp_is_kept() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        let out = ingestor
            .ingest_at(obj(json!({"LessonID": "l1", "UserID": "u1", "DBTimestamp": 1234.0})), now())
            .unwrap();
        assert_eq!(out.db_timestamp, 1234.0);
    }

    #[test]
    fn test_ingest_json_rejects_non_objects() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        assert!(matches!(ingestor.ingest_json("[1, 2]"), Err(Error::Validation(_))));
        assert!(matches!(ingestor.ingest_json("{nope"), Err(Error::Json(_))));
    }

    #[test]
    fn test_ingest_batch_collects_rejections() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        let input = concat!(
            "{\"LessonID\": \"l1\", \"UserID\": \"u1\", \"TurnID\": 1}\n",
            "\n",
            "not json\n",
            "{\"LessonID\": \"l1\", \"UserID\": \"\"}\n",
            "{\"LessonID\": \"l1\", \"UserID\": \"u1\", \"TurnID\": 2}\n",
        );

        let report = ingestor.ingest_batch(input.as_bytes()).unwrap();
        assert_eq!(report.turns_ingested, 2);
        assert_eq!(report.blank_lines, 1);
        assert_eq!(
            report.rejected.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert!(!report.is_clean());
        assert_eq!(db.count(Collection::Sessions).unwrap(), 1);
    }

    #[test]
    fn test_ingest_batch_stops_on_store_failure() {
        let db = Database::open_in_memory().unwrap();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        let result = ingestor.ingest_batch("{\"LessonID\": \"l1\", \"UserID\": \"u1\"}\n".as_bytes());
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[test]
    fn test_save_reading_target() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        let key = ingestor
            .save_reading_visit("Memphis-Semiotics-Alice", "http://read/one", now())
            .unwrap();
        assert_eq!(key, "alice");
        ingestor
            .save_reading_target(r#"{"UserID": "alice", "TargetURL": "http://read/two"}"#)
            .unwrap();

        let student = db.find_one(Collection::Students, "alice", None).unwrap().unwrap();
        let visits = student["ReadingURLs"].as_array().unwrap();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0]["TargetURL"], json!("http://read/one"));
        assert_eq!(visits[0]["VisitTime"], json!("2024-03-01T12:00:00+00:00"));
        assert_eq!(visits[1]["TargetURL"], json!("http://read/two"));
        assert_eq!(student["AutoCreated"], json!(true));
    }

    #[test]
    fn test_save_reading_target_requires_fields() {
        let db = test_db();
        let ingestor = TurnIngestor::new(&db, TurnRules::default());

        assert!(matches!(
            ingestor.save_reading_target(r#"{"UserID": "alice"}"#),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ingestor.save_reading_target(r#"{"UserID": " ", "TargetURL": "http://x"}"#),
            Err(Error::Validation(_))
        ));
        assert_eq!(db.count(Collection::Students).unwrap(), 0);
    }
}

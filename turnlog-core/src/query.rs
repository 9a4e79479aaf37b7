//! Read side and administrative writes
//!
//! [`Catalog`] answers the questions the reporting screens ask: who and what
//! exists, which sessions match a lesson or student, and per-lesson totals.
//! Lookups case-fold their keys the same way ingest does.

use crate::db::{Collection, Document, DocumentStore};
use crate::error::{Error, Result};
use crate::types::{lesson_sort_key, Class, Lesson, SessionAggregate, SessionSummary, Student};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Placeholder for summary fields that are missing or not strings.
const UNKNOWN: &str = "???";

/// Query surface over a document store.
pub struct Catalog<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> Catalog<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    // ============================================
    // Lessons
    // ============================================

    /// All lessons, `lesson2` before `lesson10`
    pub fn find_lessons(&self) -> Result<Vec<Lesson>> {
        let mut lessons: Vec<Lesson> = self.find_all_as(Collection::Lessons)?;
        lessons.sort_by_cached_key(|l| (lesson_sort_key(&l.lesson_id), l.lesson_id.to_lowercase()));
        Ok(lessons)
    }

    pub fn find_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>> {
        self.find_one_as(Collection::Lessons, lesson_id)
    }

    /// Lesson key → display name.
    ///
    /// Lessons without a usable `ShortName` map to their own key.
    pub fn find_lesson_names(&self) -> Result<BTreeMap<String, String>> {
        let docs = self.store.find_all(Collection::Lessons, Some(&["ShortName"]))?;

        let names = docs
            .iter()
            .filter_map(|doc| {
                let id = doc_str(doc, "_id")?;
                let name = doc_str(doc, "ShortName")
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(id);
                Some((id.to_string(), name.to_string()))
            })
            .collect();
        Ok(names)
    }

    /// Lesson key → (correct, incorrect) answers summed over its sessions.
    ///
    /// Counts are the per-session counters, so each session contributes only
    /// its current attempt.
    pub fn find_lesson_answer_totals(&self) -> Result<BTreeMap<String, (i64, i64)>> {
        let docs = self.store.find_all(
            Collection::Sessions,
            Some(&["LessonID", "CorrectAnswers", "IncorrectAnswers"]),
        )?;

        let mut totals: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for doc in &docs {
            let Some(lesson_id) = doc_str(doc, "LessonID") else {
                continue;
            };
            let entry = totals.entry(lesson_id.to_string()).or_default();
            entry.0 += doc_i64(doc, "CorrectAnswers");
            entry.1 += doc_i64(doc, "IncorrectAnswers");
        }
        Ok(totals)
    }

    pub fn save_lesson(&self, lesson: &Lesson) -> Result<()> {
        self.save(Collection::Lessons, &lesson.lesson_id, lesson)
    }

    // ============================================
    // Students
    // ============================================

    pub fn find_students(&self) -> Result<Vec<Student>> {
        let mut students: Vec<Student> = self.find_all_as(Collection::Students)?;
        students.sort_by_cached_key(|s| s.user_id.to_lowercase());
        Ok(students)
    }

    pub fn find_student(&self, user_id: &str) -> Result<Option<Student>> {
        self.find_one_as(Collection::Students, user_id)
    }

    /// Students enrolled in any class held at `location`
    pub fn find_students_by_location(&self, location: &str) -> Result<Vec<Student>> {
        let Some(location) = normalize_filter(Some(location)) else {
            return Ok(Vec::new());
        };
        let classes = self
            .store
            .find_where(Collection::Classes, &[("Location", location.as_str())])?;

        let student_keys: BTreeSet<String> = classes
            .into_iter()
            .map(decode::<Class>)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flat_map(|class| class.students)
            .filter(|s| !s.trim().is_empty())
            .collect();

        let mut students = Vec::with_capacity(student_keys.len());
        for key in &student_keys {
            if let Some(student) = self.find_student(key)? {
                students.push(student);
            }
        }
        students.sort_by_cached_key(|s| s.user_id.to_lowercase());
        Ok(students)
    }

    pub fn save_student(&self, student: &Student) -> Result<()> {
        self.save(Collection::Students, &student.user_id, student)
    }

    // ============================================
    // Classes
    // ============================================

    pub fn find_classes(&self) -> Result<Vec<Class>> {
        let mut classes: Vec<Class> = self.find_all_as(Collection::Classes)?;
        classes.sort_by_cached_key(|c| c.class_id.to_lowercase());
        Ok(classes)
    }

    pub fn find_class(&self, class_id: &str) -> Result<Option<Class>> {
        self.find_one_as(Collection::Classes, class_id)
    }

    pub fn save_class(&self, class: &Class) -> Result<()> {
        self.save(Collection::Classes, &class.class_id, class)
    }

    // ============================================
    // Sessions
    // ============================================

    /// Sessions matching a lesson and/or student.
    ///
    /// `None` or a blank id matches everything.
    pub fn find_sessions(&self, lesson_id: Option<&str>, user_id: Option<&str>) -> Result<Vec<SessionAggregate>> {
        let mut sessions = self
            .find_sessions_raw(lesson_id, user_id)?
            .into_iter()
            .map(decode::<SessionAggregate>)
            .collect::<Result<Vec<_>>>()?;
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    /// Like [`Catalog::find_sessions`], without decoding or sorting.
    ///
    /// Turn logs are stored as posted, so this works even for sessions whose
    /// documents no longer decode.
    pub fn find_sessions_raw(&self, lesson_id: Option<&str>, user_id: Option<&str>) -> Result<Vec<Document>> {
        let lesson = normalize_filter(lesson_id);
        let user = normalize_filter(user_id);

        let mut filters: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(lesson) = lesson.as_deref() {
            filters.push(("LessonID", lesson));
        }
        if let Some(user) = user.as_deref() {
            filters.push(("UserID", user));
        }

        if filters.is_empty() {
            self.store.find_all(Collection::Sessions, None)
        } else {
            self.store.find_where(Collection::Sessions, &filters)
        }
    }

    /// One session by lesson and student
    pub fn find_session(&self, lesson_id: &str, user_id: &str) -> Result<SessionAggregate> {
        self.find_sessions(Some(lesson_id), Some(user_id))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::SessionNotFound(format!(
                    "{}:{}",
                    user_id.trim().to_lowercase(),
                    lesson_id.trim().to_lowercase()
                ))
            })
    }

    /// Sessions of any of the given students
    pub fn find_sessions_for_students<I, T>(&self, user_ids: I) -> Result<Vec<SessionAggregate>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let users: BTreeSet<String> = user_ids
            .into_iter()
            .filter_map(|u| normalize_filter(Some(u.as_ref())))
            .collect();

        let mut sessions = Vec::new();
        for user in &users {
            for doc in self
                .store
                .find_where(Collection::Sessions, &[("UserID", user.as_str())])?
            {
                sessions.push(decode::<SessionAggregate>(doc)?);
            }
        }
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    /// (lesson, user, turn count) for every session, sorted
    pub fn find_session_summary(&self) -> Result<Vec<SessionSummary>> {
        let docs = self.store.find_all(
            Collection::Sessions,
            Some(&["LessonID", "UserID", "TurnCount"]),
        )?;

        let mut summary: Vec<SessionSummary> = docs
            .iter()
            .map(|doc| SessionSummary {
                lesson_id: doc_str(doc, "LessonID").unwrap_or(UNKNOWN).to_string(),
                user_id: doc_str(doc, "UserID").unwrap_or(UNKNOWN).to_string(),
                turn_count: doc_i64(doc, "TurnCount"),
            })
            .collect();
        summary.sort();
        Ok(summary)
    }

    // ============================================
    // Helpers
    // ============================================

    fn find_all_as<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>> {
        self.store
            .find_all(collection, None)?
            .into_iter()
            .map(decode)
            .collect()
    }

    fn find_one_as<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<Option<T>> {
        let Some(id) = normalize_filter(Some(id)) else {
            return Ok(None);
        };
        self.store
            .find_one(collection, &id, None)?
            .map(decode)
            .transpose()
    }

    /// Overwrite a document under its case-folded id
    fn save<T: Serialize>(&self, collection: Collection, id: &str, entity: &T) -> Result<()> {
        let Some(id) = normalize_filter(Some(id)) else {
            return Err(Error::Validation(format!(
                "cannot save to {} without an id",
                collection
            )));
        };

        let Value::Object(doc) = serde_json::to_value(entity)? else {
            return Err(Error::Store(format!("{} entity is not a JSON object", collection)));
        };

        self.store.replace(collection, &id, doc)?;
        tracing::info!(%collection, id = %id, "Saved document");
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Trimmed, lower-cased id; blank means "no filter"
fn normalize_filter(id: Option<&str>) -> Option<String> {
    id.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_lowercase)
}

fn sort_sessions(sessions: &mut [SessionAggregate]) {
    sessions.sort_by_cached_key(|s| {
        (
            lesson_sort_key(&s.lesson_id),
            s.lesson_id.to_lowercase(),
            s.user_id.to_lowercase(),
        )
    });
}

fn doc_str<'d>(doc: &'d Document, field: &str) -> Option<&'d str> {
    doc.get(field).and_then(Value::as_str)
}

fn doc_i64(doc: &Document, field: &str) -> i64 {
    doc.get(field)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DocUpdate};
    use serde_json::json;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn put(db: &Database, collection: Collection, id: &str, body: Value) {
        db.replace(collection, id, body.as_object().cloned().unwrap())
            .unwrap();
    }

    #[test]
    fn test_find_lessons_sorted_numerically() {
        let db = test_db();
        for id in ["lesson10", "lesson2", "algebra", "lesson1"] {
            put(&db, Collection::Lessons, id, json!({}));
        }

        let ids: Vec<String> = Catalog::new(&db)
            .find_lessons()
            .unwrap()
            .into_iter()
            .map(|l| l.lesson_id)
            .collect();
        assert_eq!(ids, vec!["lesson1", "lesson2", "lesson10", "algebra"]);
    }

    #[test]
    fn test_find_lesson_names_falls_back_to_key() {
        let db = test_db();
        put(&db, Collection::Lessons, "lesson1", json!({"ShortName": "Intro"}));
        put(&db, Collection::Lessons, "lesson2", json!({"ShortName": "  "}));
        put(&db, Collection::Lessons, "lesson3", json!({"ShortName": 42}));
        put(&db, Collection::Lessons, "lesson4", json!({}));

        let names = Catalog::new(&db).find_lesson_names().unwrap();
        assert_eq!(names["lesson1"], "Intro");
        assert_eq!(names["lesson2"], "lesson2");
        assert_eq!(names["lesson3"], "lesson3");
        assert_eq!(names["lesson4"], "lesson4");
    }

    #[test]
    fn test_find_lesson_answer_totals() {
        let db = test_db();
        put(&db, Collection::Sessions, "a:l1", json!({"LessonID": "l1", "CorrectAnswers": 2, "IncorrectAnswers": 1}));
        put(&db, Collection::Sessions, "b:l1", json!({"LessonID": "l1", "CorrectAnswers": 3}));
        put(&db, Collection::Sessions, "a:l2", json!({"LessonID": "l2", "IncorrectAnswers": "x"}));
        put(&db, Collection::Sessions, "orphan", json!({"CorrectAnswers": 9}));

        let totals = Catalog::new(&db).find_lesson_answer_totals().unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals["l1"], (5, 1));
        assert_eq!(totals["l2"], (0, 0));
    }

    #[test]
    fn test_find_one_case_folds() {
        let db = test_db();
        put(&db, Collection::Students, "alice", json!({"FirstName": "Alice"}));

        let catalog = Catalog::new(&db);
        let found = catalog.find_student("  ALICE ").unwrap().unwrap();
        assert_eq!(found.first_name.as_deref(), Some("Alice"));
        assert!(catalog.find_student("bob").unwrap().is_none());
        assert!(catalog.find_student("").unwrap().is_none());
    }

    #[test]
    fn test_save_lowercases_and_rejects_blank() {
        let db = test_db();
        let catalog = Catalog::new(&db);

        let class = Class {
            class_id: "Semiotics".to_string(),
            teacher_name: Some("Kermit".to_string()),
            ..Default::default()
        };
        catalog.save_class(&class).unwrap();
        let saved = catalog.find_class("semiotics").unwrap().unwrap();
        assert_eq!(saved.class_id, "semiotics");
        assert_eq!(saved.teacher_name.as_deref(), Some("Kermit"));

        let blank = Student {
            user_id: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(catalog.save_student(&blank), Err(Error::Validation(_))));
        assert_eq!(db.count(Collection::Students).unwrap(), 0);
    }

    #[test]
    fn test_save_lesson_replaces_document() {
        let db = test_db();
        db.upsert(
            Collection::Lessons,
            "lesson1",
            &DocUpdate::new().inc("TurnCount", 3),
        )
        .unwrap();

        let catalog = Catalog::new(&db);
        let mut lesson = catalog.find_lesson("lesson1").unwrap().unwrap();
        lesson.short_name = Some("Checkbooks".to_string());
        catalog.save_lesson(&lesson).unwrap();

        let names = catalog.find_lesson_names().unwrap();
        assert_eq!(names["lesson1"], "Checkbooks");
        assert_eq!(catalog.find_lesson("lesson1").unwrap().unwrap().turn_count, Some(3));
    }

    #[test]
    fn test_find_sessions_wildcards() {
        let db = test_db();
        for (id, lesson, user) in [
            ("bob:lesson10", "lesson10", "bob"),
            ("alice:lesson2", "lesson2", "alice"),
            ("bob:lesson2", "lesson2", "bob"),
        ] {
            put(&db, Collection::Sessions, id, json!({"LessonID": lesson, "UserID": user}));
        }

        let catalog = Catalog::new(&db);
        let ids = |found: Vec<SessionAggregate>| found.into_iter().map(|s| s.id).collect::<Vec<_>>();

        assert_eq!(
            ids(catalog.find_sessions(None, None).unwrap()),
            vec!["alice:lesson2", "bob:lesson2", "bob:lesson10"]
        );
        assert_eq!(
            ids(catalog.find_sessions(Some(""), Some("BOB")).unwrap()),
            vec!["bob:lesson2", "bob:lesson10"]
        );
        assert_eq!(
            ids(catalog.find_sessions(Some("Lesson2"), None).unwrap()),
            vec!["alice:lesson2", "bob:lesson2"]
        );
        assert_eq!(catalog.find_sessions_raw(Some("lesson2"), Some("alice")).unwrap().len(), 1);
        assert!(catalog.find_sessions(Some("nope"), None).unwrap().is_empty());
    }

    #[test]
    fn test_find_session_not_found() {
        let db = test_db();
        let result = Catalog::new(&db).find_session("lesson1", "Alice");
        match result {
            Err(Error::SessionNotFound(key)) => assert_eq!(key, "alice:lesson1"),
            other => panic!("expected SessionNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_find_students_by_location() {
        let db = test_db();
        put(&db, Collection::Classes, "c1", json!({"Location": "memphis", "Students": ["bob", "alice", " "]}));
        put(&db, Collection::Classes, "c2", json!({"Location": "memphis", "Students": ["alice", "ghost"]}));
        put(&db, Collection::Classes, "c3", json!({"Location": "tulsa", "Students": ["carol"]}));
        for id in ["alice", "bob", "carol"] {
            put(&db, Collection::Students, id, json!({}));
        }

        let catalog = Catalog::new(&db);
        let ids: Vec<String> = catalog
            .find_students_by_location("memphis")
            .unwrap()
            .into_iter()
            .map(|s| s.user_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob"]);
        assert!(catalog.find_students_by_location("nowhere").unwrap().is_empty());
    }

    #[test]
    fn test_find_students_by_location_case_folds() {
        let db = test_db();
        put(&db, Collection::Classes, "c1", json!({"Location": "memphis", "Students": ["bob"]}));
        put(&db, Collection::Students, "bob", json!({}));

        let catalog = Catalog::new(&db);
        let found = catalog.find_students_by_location(" Memphis ").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "bob");
        assert!(catalog.find_students_by_location("  ").unwrap().is_empty());
    }

    #[test]
    fn test_find_sessions_for_students() {
        let db = test_db();
        for (id, lesson, user) in [
            ("a:l1", "l1", "a"),
            ("b:l1", "l1", "b"),
            ("c:l1", "l1", "c"),
        ] {
            put(&db, Collection::Sessions, id, json!({"LessonID": lesson, "UserID": user}));
        }

        let catalog = Catalog::new(&db);
        let found = catalog.find_sessions_for_students(["A", "c", "a"]).unwrap();
        assert_eq!(found.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["a:l1", "c:l1"]);
        assert!(catalog
            .find_sessions_for_students(Vec::<String>::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_find_session_summary() {
        let db = test_db();
        put(&db, Collection::Sessions, "b:l1", json!({"LessonID": "l1", "UserID": "b", "TurnCount": 4}));
        put(&db, Collection::Sessions, "a:l1", json!({"LessonID": "l1", "UserID": "a", "TurnCount": 2}));
        put(&db, Collection::Sessions, "weird", json!({"UserID": 5}));

        let summary = Catalog::new(&db).find_session_summary().unwrap();
        assert_eq!(
            summary,
            vec![
                SessionSummary { lesson_id: "???".into(), user_id: "???".into(), turn_count: 0 },
                SessionSummary { lesson_id: "l1".into(), user_id: "a".into(), turn_count: 2 },
                SessionSummary { lesson_id: "l1".into(), user_id: "b".into(), turn_count: 4 },
            ]
        );
    }
}

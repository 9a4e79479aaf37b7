//! Text and JSON output for query commands.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use turnlog_core::format::{format_duration_ms, format_rate, format_timestamp_opt};
use turnlog_core::{AttemptRollup, Class, Lesson, SessionAggregate, Student};

pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

pub fn lessons(lessons: &[Lesson], names: &BTreeMap<String, String>) {
    if lessons.is_empty() {
        println!("No lessons found.");
        return;
    }

    println!(
        "{:<20} {:<24} {:>6} {:>9} {:>9} {:>9}",
        "LESSON", "NAME", "TURNS", "STUDENTS", "ATTEMPTED", "COMPLETED"
    );
    for lesson in lessons {
        let name = names
            .get(&lesson.lesson_id)
            .map(String::as_str)
            .unwrap_or(&lesson.lesson_id);
        println!(
            "{:<20} {:<24} {:>6} {:>9} {:>9} {:>9}",
            lesson.lesson_id,
            name,
            lesson.turn_count.unwrap_or(0),
            lesson.students.len(),
            lesson.students_attempted.len(),
            lesson.students_completed.len(),
        );
    }
}

pub fn students(students: &[Student]) {
    if students.is_empty() {
        println!("No students found.");
        return;
    }

    println!("{:<24} {:>6} {:>8}  {}", "STUDENT", "TURNS", "READINGS", "LAST TURN");
    for student in students {
        println!(
            "{:<24} {:>6} {:>8}  {}",
            student.user_id,
            student.turn_count.unwrap_or(0),
            student.reading_urls.len(),
            format_timestamp_opt(student.last_turn_time),
        );
    }
}

pub fn classes(classes: &[Class]) {
    if classes.is_empty() {
        println!("No classes found.");
        return;
    }

    println!(
        "{:<20} {:<16} {:<16} {:>8} {:>7}",
        "CLASS", "LOCATION", "TEACHER", "STUDENTS", "LESSONS"
    );
    for class in classes {
        println!(
            "{:<20} {:<16} {:<16} {:>8} {:>7}",
            class.class_id,
            class.location.as_deref().unwrap_or("-"),
            class.teacher_name.as_deref().unwrap_or("-"),
            class.students.len(),
            class.lessons.len(),
        );
    }
}

pub fn sessions(sessions: &[SessionAggregate]) {
    if sessions.is_empty() {
        println!("No sessions found.");
        return;
    }

    println!(
        "{:<20} {:<24} {:>6} {:>8} {:>11} {:>8}  {}",
        "LESSON", "STUDENT", "TURNS", "ATTEMPTS", "COMPLETIONS", "CORRECT", "MEAN TURN"
    );
    for session in sessions {
        let answered = session.correct_answers + session.incorrect_answers;
        println!(
            "{:<20} {:<24} {:>6} {:>8} {:>11} {:>8}  {}",
            session.lesson_id,
            session.user_id,
            session.turn_count,
            session.attempts,
            session.completions,
            format_rate((answered > 0).then(|| session.correct_answer_rate())),
            format_duration_ms(session.mean_duration()),
        );
    }
}

pub fn rollup(session: &SessionAggregate, rollup: &[AttemptRollup]) {
    println!("Session {} ({} turns)", session.id, session.turn_count);
    if rollup.is_empty() {
        println!("No attempts recorded.");
        return;
    }

    println!(
        "{:>3}  {:<19}  {:<19}  {:>7}  {:<8}  {:>9}  {:>9}  {}",
        "#", "START", "END", "CORRECT", "PATH", "READING", "TOTAL", "DONE"
    );
    for (i, attempt) in rollup.iter().enumerate() {
        println!(
            "{:>3}  {:<19}  {:<19}  {:>7}  {:<8}  {:>9}  {:>9}  {}",
            i + 1,
            format_timestamp_opt(attempt.start_time),
            format_timestamp_opt(attempt.end_time),
            format_rate(attempt.correct_answer_rate),
            if attempt.lesson_path.is_empty() { "-" } else { attempt.lesson_path.as_str() },
            format_duration_ms(attempt.reading_time_ms),
            format_duration_ms(attempt.total_time_ms),
            if attempt.completed { "yes" } else { "no" },
        );
    }
}

/// One row of the per-lesson answer totals.
#[derive(Debug, Serialize)]
pub struct TotalsRow<'a> {
    pub lesson_id: &'a str,
    pub correct: i64,
    pub incorrect: i64,
}

pub fn totals_rows(totals: &BTreeMap<String, (i64, i64)>) -> Vec<TotalsRow<'_>> {
    totals
        .iter()
        .map(|(lesson_id, (correct, incorrect))| TotalsRow {
            lesson_id,
            correct: *correct,
            incorrect: *incorrect,
        })
        .collect()
}

pub fn totals(totals: &BTreeMap<String, (i64, i64)>) {
    if totals.is_empty() {
        println!("No sessions found.");
        return;
    }

    println!("{:<20} {:>8} {:>10}", "LESSON", "CORRECT", "INCORRECT");
    for row in totals_rows(totals) {
        println!("{:<20} {:>8} {:>10}", row.lesson_id, row.correct, row.incorrect);
    }
}

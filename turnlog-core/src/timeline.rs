//! Session timeline analytics
//!
//! Read-only computations over a snapshot of one session's turn log:
//! attempt segmentation, completion detection, reading time, total active
//! time, difficulty path and ad-hoc correct-answer rates.
//!
//! ## Timestamps
//!
//! Turns can arrive out of order, so their `DBTimestamp`s are not reliable.
//! The timeline repairs them once, in a single forward pass: any turn that
//! does not start after its predecessor ended is moved to
//! `previous start + previous duration + margin`. Repaired timestamps are
//! working values only; the turns themselves are never modified.
//!
//! ## Ranges
//!
//! Operations take a zero-based inclusive range `start..=end`, where `end`
//! of `None` means the last turn. Empty or out-of-range requests return the
//! neutral value for the operation. Each operation also has a `current_*`
//! form covering the most recent attempt.

use crate::classify::{is_completion, is_correct_event, is_incorrect_event};
use crate::config::TurnRules;
use crate::types::{SessionAggregate, Turn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::RangeInclusive;

/// Turn id of legacy filler turns.
pub const FILLER_TURN_ID: i64 = 0;

/// Which turns a timeline indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TotalTimeMode {
    /// Every turn in the log
    #[default]
    AllTurns,
    /// Drop turn-id 0 filler turns first (legacy rollup behaviour)
    SkipFillerTurns,
}

/// Difficulty state of the lesson path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    fn from_rule_id(rule_id: &str) -> Option<Self> {
        if rule_id.ends_with("easy") {
            Some(Difficulty::Easy)
        } else if rule_id.ends_with("medium") {
            Some(Difficulty::Medium)
        } else if rule_id.ends_with("hard") {
            Some(Difficulty::Hard)
        } else {
            None
        }
    }

    fn letter(self) -> char {
        match self {
            Difficulty::Easy => 'E',
            Difficulty::Medium => 'M',
            Difficulty::Hard => 'H',
        }
    }
}

/// Summary of one attempt, as shown in a session rollup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRollup {
    /// Index of the first turn (in timeline indexing)
    pub first_turn: usize,
    /// Index of the last turn (in timeline indexing)
    pub last_turn: usize,
    pub start_time: Option<DateTime<Utc>>,
    /// Last turn's timestamp plus its duration
    pub end_time: Option<DateTime<Utc>>,
    /// `None` when the attempt has no answers at all
    pub correct_answer_rate: Option<f64>,
    pub lesson_path: String,
    pub reading_time_ms: f64,
    pub total_time_ms: f64,
    pub completed: bool,
}

/// Analytics view over a session's turns.
#[derive(Debug, Clone)]
pub struct SessionTimeline<'a> {
    turns: Vec<&'a Turn>,
    timestamps: Vec<f64>,
    attempt_start_turn_id: i64,
}

impl<'a> SessionTimeline<'a> {
    /// Timeline over every turn
    pub fn new(turns: &'a [Turn], rules: &TurnRules) -> Self {
        Self::with_mode(turns, rules, TotalTimeMode::AllTurns)
    }

    pub fn with_mode(turns: &'a [Turn], rules: &TurnRules, mode: TotalTimeMode) -> Self {
        let turns: Vec<&Turn> = match mode {
            TotalTimeMode::AllTurns => turns.iter().collect(),
            TotalTimeMode::SkipFillerTurns => turns
                .iter()
                .filter(|t| t.turn_id() != Some(FILLER_TURN_ID))
                .collect(),
        };
        let timestamps = repair_timestamps(&turns, rules.timestamp_margin_ms);

        Self {
            turns,
            timestamps,
            attempt_start_turn_id: rules.attempt_start_turn_id,
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[&'a Turn] {
        &self.turns
    }

    pub fn repaired_timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    fn is_attempt_start(&self, index: usize) -> bool {
        self.turns[index].turn_id() == Some(self.attempt_start_turn_id)
    }

    fn range(&self, start: usize, end: Option<usize>) -> Option<RangeInclusive<usize>> {
        let last = self.turns.len().checked_sub(1)?;
        let end = end.unwrap_or(last);
        (start <= end && end <= last).then_some(start..=end)
    }

    fn end_time(&self, index: usize) -> f64 {
        self.timestamps[index] + self.turns[index].duration()
    }

    /// Index of the most recent attempt start.
    ///
    /// `None` only for an empty log; a log without any attempt start
    /// reports index 0.
    pub fn last_attempt_index(&self) -> Option<usize> {
        if self.turns.is_empty() {
            return None;
        }
        let found = (0..self.turns.len())
            .rev()
            .find(|&i| self.is_attempt_start(i))
            .unwrap_or(0);
        Some(found)
    }

    /// True when any turn in the range completed the lesson
    pub fn sequence_completed(&self, start: usize, end: Option<usize>) -> bool {
        self.range(start, end)
            .map(|range| range.into_iter().any(|i| is_completion(self.turns[i])))
            .unwrap_or(false)
    }

    /// Milliseconds spent between `read` and `donereading` rule firings.
    pub fn reading_time(&self, start: usize, end: Option<usize>) -> f64 {
        let Some(range) = self.range(start, end) else {
            return 0.0;
        };
        let last = *range.end();

        let mut total = 0.0;
        let mut read_start: Option<f64> = None;

        for i in range {
            let at = self.timestamps[i];
            for transition in self.turns[i].transitions() {
                let rule_id = transition.normalized_rule_id();
                if rule_id == "read" {
                    // Reading again without finishing: bank the span so far
                    if let Some(opened) = read_start {
                        total += at - opened;
                    }
                    read_start = Some(at);
                } else if rule_id.starts_with("donereading") {
                    match read_start.take() {
                        Some(opened) => total += self.end_time(i) - opened,
                        None => tracing::debug!(
                            turn = i,
                            "Reading interval closed without being opened"
                        ),
                    }
                }
            }
        }

        // Still reading at the end of the range
        if let Some(opened) = read_start {
            total += self.end_time(last) - opened;
        }

        total
    }

    /// Active time across the range in milliseconds.
    ///
    /// Starts from the wall-clock span of the range. For every attempt start
    /// after the first turn, the idle gap before it is removed and the
    /// previous turn's own duration is kept.
    pub fn total_time(&self, start: usize, end: Option<usize>) -> f64 {
        let Some(range) = self.range(start, end) else {
            return 0.0;
        };
        let (first, last) = (*range.start(), *range.end());

        let mut total = self.end_time(last) - self.timestamps[first];
        for i in (first + 1)..=last {
            if self.is_attempt_start(i) {
                total -= self.timestamps[i] - self.timestamps[i - 1];
                total += self.turns[i - 1].duration();
            }
        }

        total
    }

    /// Difficulty changes as a string of `E`/`M`/`H`.
    ///
    /// Every lesson starts at medium, so a leading `M` is never emitted.
    pub fn lesson_path(&self, start: usize, end: Option<usize>) -> String {
        let Some(range) = self.range(start, end) else {
            return String::new();
        };

        let mut path = String::new();
        let mut state = Difficulty::Medium;

        for i in range {
            for transition in self.turns[i].transitions() {
                let Some(next) = Difficulty::from_rule_id(&transition.normalized_rule_id()) else {
                    continue;
                };
                if next != state {
                    path.push(next.letter());
                    state = next;
                }
            }
        }

        path
    }

    /// Share of correct answers in the range.
    ///
    /// Returns `no_answers_value` when the range has no answers at all, so
    /// callers can tell "no data" from "0% correct".
    pub fn adhoc_correct_rate(&self, start: usize, end: Option<usize>, no_answers_value: f64) -> f64 {
        let Some(range) = self.range(start, end) else {
            return no_answers_value;
        };

        let (mut correct, mut incorrect) = (0u32, 0u32);
        for i in range {
            let event = self.turns[i].input_event();
            if is_correct_event(&event) {
                correct += 1;
            } else if is_incorrect_event(&event) {
                incorrect += 1;
            }
        }

        match (correct, incorrect) {
            (0, 0) => no_answers_value,
            (0, _) => 0.0,
            _ => f64::from(correct) / f64::from(correct + incorrect),
        }
    }

    pub fn current_sequence_completed(&self) -> bool {
        self.last_attempt_index()
            .map(|start| self.sequence_completed(start, None))
            .unwrap_or(false)
    }

    pub fn current_reading_time(&self) -> f64 {
        self.last_attempt_index()
            .map(|start| self.reading_time(start, None))
            .unwrap_or(0.0)
    }

    pub fn current_total_time(&self) -> f64 {
        self.last_attempt_index()
            .map(|start| self.total_time(start, None))
            .unwrap_or(0.0)
    }

    pub fn current_lesson_path(&self) -> String {
        self.last_attempt_index()
            .map(|start| self.lesson_path(start, None))
            .unwrap_or_default()
    }

    pub fn current_correct_rate(&self, no_answers_value: f64) -> f64 {
        self.last_attempt_index()
            .map(|start| self.adhoc_correct_rate(start, None, no_answers_value))
            .unwrap_or(no_answers_value)
    }

    /// Split the log into attempts at every attempt start after the first turn.
    pub fn attempt_ranges(&self) -> Vec<RangeInclusive<usize>> {
        if self.turns.is_empty() {
            return Vec::new();
        }

        let mut ranges = Vec::new();
        let mut start = 0;
        for i in 1..self.turns.len() {
            if self.is_attempt_start(i) {
                ranges.push(start..=i - 1);
                start = i;
            }
        }
        ranges.push(start..=self.turns.len() - 1);
        ranges
    }

    /// One summary per attempt
    pub fn rollup(&self) -> Vec<AttemptRollup> {
        self.attempt_ranges()
            .into_iter()
            .map(|range| {
                let (first, last) = (*range.start(), *range.end());
                let rate = self.adhoc_correct_rate(first, Some(last), f64::NAN);
                let first_turn = self.turns[first];
                let last_turn = self.turns[last];

                AttemptRollup {
                    first_turn: first,
                    last_turn: last,
                    start_time: millis_to_datetime(first_turn.db_timestamp()),
                    end_time: millis_to_datetime(last_turn.db_timestamp() + last_turn.duration()),
                    correct_answer_rate: (!rate.is_nan()).then_some(rate),
                    lesson_path: self.lesson_path(first, Some(last)),
                    reading_time_ms: self.reading_time(first, Some(last)),
                    total_time_ms: self.total_time(first, Some(last)),
                    completed: self.sequence_completed(first, Some(last)),
                }
            })
            .collect()
    }
}

impl SessionAggregate {
    /// Timeline over this session's full log
    pub fn timeline(&self, rules: &TurnRules) -> SessionTimeline<'_> {
        SessionTimeline::new(&self.turns, rules)
    }

    /// Per-attempt rollup, honouring the configured filler-turn mode
    pub fn rollup(&self, rules: &TurnRules) -> Vec<AttemptRollup> {
        let mode = if rules.skip_filler_turns {
            TotalTimeMode::SkipFillerTurns
        } else {
            TotalTimeMode::AllTurns
        };
        SessionTimeline::with_mode(&self.turns, rules, mode).rollup()
    }
}

/// Repair out-of-order timestamps in one forward pass.
pub fn repair_timestamps(turns: &[&Turn], margin_ms: f64) -> Vec<f64> {
    let mut timestamps: Vec<f64> = Vec::with_capacity(turns.len());

    for (i, turn) in turns.iter().enumerate() {
        let mut ts = turn.db_timestamp();
        if i > 0 {
            let prev_end = timestamps[i - 1] + turns[i - 1].duration();
            if ts <= prev_end {
                ts = prev_end + margin_ms;
            }
        }
        timestamps.push(ts);
    }

    timestamps
}

fn millis_to_datetime(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() || millis <= 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

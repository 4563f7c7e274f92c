//! Timestamped note log and the bracket markers embedded in it.
//!
//! The upstream store keeps snooze and completion state inside the free-text
//! `internalWeekdayNotes` field, one entry per line, oldest first:
//!
//! ```text
//! [2024-01-01] called
//! [2024-01-05] [SNOOZE: 2024-01-10] follow up
//! [SUBMITTED: 2024-01-12]
//! ```

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

pub const NOTE_DATE_FORMAT: &str = "%Y-%m-%d";

static SNOOZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[SNOOZE:\s*(\d{4}-\d{2}-\d{2})\]").expect("snooze marker pattern is valid")
});

static COMPLETION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:COMPLETED|SUBMITTED):\s*\d{4}-\d{2}-\d{2}\]")
        .expect("completion marker pattern is valid")
});

static LEADING_STAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\d{4}-\d{2}-\d{2}\]\s*").expect("entry stamp pattern is valid")
});

static ANY_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:SNOOZE|COMPLETED|SUBMITTED):.*?\]\s*").expect("marker pattern is valid")
});

pub fn format_note_date(date: NaiveDate) -> String {
    date.format(NOTE_DATE_FORMAT).to_string()
}

pub fn parse_note_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), NOTE_DATE_FORMAT).ok()
}

/// Date of the last `[SNOOZE: ...]` marker. Entries are appended, so the last one is the newest.
pub fn latest_snooze(notes: &str) -> Option<String> {
    SNOOZE_RE
        .captures_iter(notes)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_completed(notes: &str) -> bool {
    COMPLETION_RE.is_match(notes)
}

pub fn comment_entry(date: NaiveDate, text: &str) -> String {
    format!("[{}] {}", format_note_date(date), text.trim())
}

pub fn snooze_comment(until: NaiveDate, text: &str) -> String {
    format!("[SNOOZE: {}] {}", format_note_date(until), text.trim())
}

/// Appends `entry` as the newest line. Existing content is kept byte for byte.
pub fn append_entry(existing: &str, entry: &str) -> String {
    if existing.trim().is_empty() {
        entry.to_string()
    } else {
        format!("{existing}\n{entry}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionMarker {
    Completed,
    #[default]
    Submitted,
}

impl CompletionMarker {
    pub fn keyword(self) -> &'static str {
        match self {
            CompletionMarker::Completed => "COMPLETED",
            CompletionMarker::Submitted => "SUBMITTED",
        }
    }

    pub fn entry(self, date: NaiveDate) -> String {
        format!("[{}: {}]", self.keyword(), format_note_date(date))
    }
}

impl FromStr for CompletionMarker {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" => Ok(CompletionMarker::Completed),
            "SUBMITTED" => Ok(CompletionMarker::Submitted),
            _ => Err(ParseEnumError::new("completion marker", s)),
        }
    }
}

/// Newest entry with its stamp and markers removed, for card previews.
pub fn latest_note_preview(notes: &str) -> Option<String> {
    let last = notes.lines().rev().find(|line| !line.trim().is_empty())?;
    let stripped = LEADING_STAMP_RE.replace(last.trim(), "");
    let stripped = ANY_MARKER_RE.replace_all(&stripped, "");
    let text = stripped.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

pub fn snooze_days_left(snooze_until: &str, today: NaiveDate) -> Option<i64> {
    parse_note_date(snooze_until).map(|d| (d - today).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn last_snooze_marker_wins() {
        let notes = "[2024-01-01] called\n[SNOOZE: 2024-01-10] follow up\n[SNOOZE: 2024-01-20] pushed again";
        assert_eq!(latest_snooze(notes).as_deref(), Some("2024-01-20"));
    }

    #[test]
    fn snooze_marker_tolerates_missing_space() {
        assert_eq!(latest_snooze("[SNOOZE:2024-03-01] x").as_deref(), Some("2024-03-01"));
        assert_eq!(latest_snooze("[SNOOZE: soon] x"), None);
        assert_eq!(latest_snooze(""), None);
    }

    #[test]
    fn both_completion_keywords_count() {
        assert!(is_completed("[2024-01-01] hi\n[COMPLETED: 2024-01-02]"));
        assert!(is_completed("[SUBMITTED: 2024-01-02]"));
        assert!(!is_completed("[2024-01-01] completed the call"));
        assert!(!is_completed("[COMPLETED: yesterday]"));
    }

    #[test]
    fn append_keeps_prior_lines_in_order() {
        let existing = "[2024-01-01] a\n[2024-01-02] b";
        let appended = append_entry(existing, "[2024-01-03] c");
        assert_eq!(appended, "[2024-01-01] a\n[2024-01-02] b\n[2024-01-03] c");
        assert_eq!(append_entry("  ", "[2024-01-03] c"), "[2024-01-03] c");
    }

    #[test]
    fn entries_are_formatted_with_stamps() {
        let today = date(2024, 5, 6);
        let snoozed = snooze_comment(date(2024, 5, 9), "  call back ");
        assert_eq!(snoozed, "[SNOOZE: 2024-05-09] call back");
        assert_eq!(comment_entry(today, &snoozed), "[2024-05-06] [SNOOZE: 2024-05-09] call back");
        assert_eq!(CompletionMarker::Submitted.entry(today), "[SUBMITTED: 2024-05-06]");
        assert_eq!(CompletionMarker::Completed.entry(today), "[COMPLETED: 2024-05-06]");
    }

    #[test]
    fn preview_strips_stamp_and_markers() {
        let notes = "[2024-01-01] old\n[2024-01-05] [SNOOZE: 2024-01-10] ping on Monday\n";
        assert_eq!(latest_note_preview(notes).as_deref(), Some("ping on Monday"));
        assert_eq!(latest_note_preview("[SUBMITTED: 2024-01-12]"), None);
        assert_eq!(latest_note_preview("   "), None);
        assert_eq!(latest_note_preview("free text").as_deref(), Some("free text"));
    }

    #[test]
    fn days_left_is_signed() {
        let today = date(2024, 1, 10);
        assert_eq!(snooze_days_left("2024-01-13", today), Some(3));
        assert_eq!(snooze_days_left("2024-01-08", today), Some(-2));
        assert_eq!(snooze_days_left("nope", today), None);
    }

    #[test]
    fn completion_marker_parses_case_insensitively() {
        assert_eq!("completed".parse::<CompletionMarker>(), Ok(CompletionMarker::Completed));
        assert_eq!("SUBMITTED".parse::<CompletionMarker>(), Ok(CompletionMarker::Submitted));
        assert!("done".parse::<CompletionMarker>().is_err());
    }

    proptest! {
        #[test]
        fn prop_latest_snooze_is_last_marker(days in proptest::collection::vec(0u32..3000, 1..8)) {
            let base = date(2020, 1, 1);
            let dates: Vec<NaiveDate> = days
                .iter()
                .map(|d| base + chrono::Duration::days(i64::from(*d)))
                .collect();
            let notes = dates
                .iter()
                .enumerate()
                .map(|(i, d)| format!("[2020-01-01] [SNOOZE: {}] entry {i}", format_note_date(*d)))
                .collect::<Vec<_>>()
                .join("\n");
            let expected = dates.last().map(|d| format_note_date(*d));
            prop_assert_eq!(latest_snooze(&notes), expected);
        }
    }
}

//! Core domain model for the KAM actionables dashboard.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub mod notes;
pub mod views;

pub const CRATE_NAME: &str = "kamdash-core";

/// Label shown for items whose account manager field is empty.
pub const UNASSIGNED_KAM: &str = "Unassigned";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Upstream schema an item was normalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "POST_TBR")]
    PostTbr,
    #[serde(rename = "IC")]
    Ic,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::PostTbr, Source::Ic];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::PostTbr => "POST_TBR",
            Source::Ic => "IC",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Source::PostTbr => "Post-TBR",
            Source::Ic => "IC Actionables",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POST_TBR" | "POST-TBR" | "POSTTBR" => Ok(Source::PostTbr),
            "IC" => Ok(Source::Ic),
            _ => Err(ParseEnumError::new("source", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Extreme,
}

impl Severity {
    /// Bands are inclusive on their lower bound.
    pub fn from_pending_days(days: u32) -> Self {
        match days {
            45.. => Severity::Extreme,
            30..=44 => Severity::Critical,
            15..=29 => Severity::High,
            10..=14 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Extreme => "extreme",
        }
    }
}

/// Dashboard column an item lands in, by pending days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Swimlane {
    Critical,
    Attention,
    Normal,
}

impl Swimlane {
    pub const ORDER: [Swimlane; 3] = [Swimlane::Critical, Swimlane::Attention, Swimlane::Normal];

    pub fn for_pending_days(days: u32) -> Self {
        match days {
            45.. => Swimlane::Critical,
            30..=44 => Swimlane::Attention,
            _ => Swimlane::Normal,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Swimlane::Critical => "Critical (45+ Days)",
            Swimlane::Attention => "Attention (30-44 Days)",
            Swimlane::Normal => "Normal (10-29 Days)",
        }
    }

    pub fn empty_text(self) -> &'static str {
        match self {
            Swimlane::Critical => "No critical items",
            Swimlane::Attention => "No items needing attention",
            Swimlane::Normal => "No normal items",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Swimlane::Critical => "critical",
            Swimlane::Attention => "attention",
            Swimlane::Normal => "normal",
        }
    }
}

/// Unified actionable record produced by the per-source normalizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionableItem {
    pub id: String,
    pub source: Source,
    pub candidate_name: String,
    pub company: String,
    pub role: String,
    pub status: String,
    pub stage: String,
    pub pending_days: u32,
    pub severity: Severity,
    /// The writable `internalWeekdayNotes` value as fetched.
    pub kam_notes: String,
    pub display_notes: String,
    pub snooze_until: Option<String>,
    pub jd_uid: i64,
    pub public_identifier: String,
    pub kam: String,
    pub platform_link: String,
    pub role_active: JsonValue,
    pub scheduler_notes: String,
    pub interview_process_final: String,
    pub raw: Map<String, JsonValue>,
}

impl ActionableItem {
    pub fn kam_label(&self) -> &str {
        if self.kam.trim().is_empty() {
            UNASSIGNED_KAM
        } else {
            &self.kam
        }
    }

    pub fn has_notes(&self) -> bool {
        !self.display_notes.trim().is_empty()
    }

    pub fn is_completed(&self) -> bool {
        notes::is_completed(&self.display_notes)
    }

    pub fn snooze_date(&self) -> Option<NaiveDate> {
        self.snooze_until.as_deref().and_then(notes::parse_note_date)
    }

    /// A snooze whose date is today or earlier.
    pub fn is_snooze_elapsed(&self, today: NaiveDate) -> bool {
        self.snooze_date().is_some_and(|d| d <= today)
    }

    /// A snooze date still in the future.
    pub fn is_snoozed(&self, today: NaiveDate) -> bool {
        self.snooze_date().is_some_and(|d| d > today)
    }

    pub fn notes_patch(&self) -> NotesPatch {
        NotesPatch {
            kam_notes: self.kam_notes.clone(),
            display_notes: self.display_notes.clone(),
            snooze_until: self.snooze_until.clone(),
        }
    }

    pub fn apply_patch(&mut self, patch: NotesPatch) {
        self.kam_notes = patch.kam_notes;
        self.display_notes = patch.display_notes;
        self.snooze_until = patch.snooze_until;
    }
}

/// Local overwrite of the note-derived fields, also used as the rollback snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesPatch {
    pub kam_notes: String,
    pub display_notes: String,
    pub snooze_until: Option<String>,
}

impl NotesPatch {
    /// Patch for an entry appended from the action form.
    pub fn appended(item: &ActionableItem, entry: &str, snooze: Option<NaiveDate>) -> Self {
        item.notes_patch().then(entry, snooze)
    }

    /// The same values with one more entry appended.
    pub fn then(&self, entry: &str, snooze: Option<NaiveDate>) -> Self {
        Self {
            kam_notes: notes::append_entry(&self.kam_notes, entry),
            display_notes: notes::append_entry(&self.display_notes, entry),
            snooze_until: snooze
                .map(notes::format_note_date)
                .or_else(|| self.snooze_until.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KamStat {
    pub name: String,
    pub count: usize,
}

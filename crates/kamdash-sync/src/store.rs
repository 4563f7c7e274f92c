//! Explicit dashboard state container. Every derived view is computed by
//! `kamdash_core::views` over a snapshot of this state.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use kamdash_core::views::{derive_view, DashboardView, Overlay, Selection, SourceFilter, TimelineFilter, ViewFilter};
use kamdash_core::{ActionableItem, NotesPatch};
use serde::Serialize;

use crate::fetch::RefreshOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

impl Alert {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Error,
            message: message.into(),
        }
    }
}

/// Ids dropped from the overlay sets by a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub pruned_completed: Vec<String>,
    pub pruned_handled: Vec<String>,
}

/// Identifies one optimistic submission for `confirm_optimistic` and `rollback`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditToken {
    id: String,
    seq: u64,
}

impl EditToken {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone)]
struct PendingEdit {
    seq: u64,
    entry: String,
    snooze: Option<NaiveDate>,
    confirmed: bool,
}

/// Note values from before the first unsettled submission, plus every
/// submission since, in order.
#[derive(Debug, Clone)]
struct OptimisticEdits {
    base: NotesPatch,
    edits: Vec<PendingEdit>,
}

impl OptimisticEdits {
    fn replay(&self) -> NotesPatch {
        self.edits
            .iter()
            .fold(self.base.clone(), |patch, edit| patch.then(&edit.entry, edit.snooze))
    }

    fn is_settled(&self) -> bool {
        self.edits.iter().all(|edit| edit.confirmed)
    }
}

#[derive(Debug, Default)]
pub struct DashboardStore {
    items: Vec<ActionableItem>,
    overlay: Overlay,
    selection: Selection,
    loading: bool,
    warnings: Vec<String>,
    last_refreshed: Option<DateTime<Utc>>,
    optimistic: HashMap<String, OptimisticEdits>,
    next_edit: u64,
    completing: HashSet<String>,
    alerts: VecDeque<Alert>,
}

impl DashboardStore {
    pub fn new(completed_ids: HashSet<String>) -> Self {
        Self {
            overlay: Overlay {
                completed_ids,
                handled_ids: HashSet::new(),
            },
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[ActionableItem] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&ActionableItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }

    /// Swaps in a fresh fetch wholesale, then reconciles the overlay against it.
    /// Pending optimistic edits are discarded: fetched data is authoritative.
    pub fn replace_items(&mut self, outcome: RefreshOutcome, at: DateTime<Utc>) -> Reconciliation {
        self.items = outcome.items;
        self.warnings = outcome.warnings;
        self.last_refreshed = Some(at);
        self.optimistic.clear();

        let present = self.items.iter().map(|item| item.id.as_str()).collect::<HashSet<_>>();
        let mut pruned_completed = self
            .overlay
            .completed_ids
            .iter()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect::<Vec<_>>();

        let mut pruned_handled = self
            .items
            .iter()
            .filter(|item| self.overlay.handled_ids.contains(&item.id))
            .filter(|item| item.has_notes())
            .map(|item| item.id.clone())
            .collect::<Vec<_>>();

        for id in &pruned_completed {
            self.overlay.completed_ids.remove(id);
        }
        for id in &pruned_handled {
            self.overlay.handled_ids.remove(id);
        }
        pruned_completed.sort();
        pruned_handled.sort();

        Reconciliation {
            pruned_completed,
            pruned_handled,
        }
    }

    /// Hides the item locally. Returns false when it was already hidden.
    pub fn mark_complete(&mut self, id: &str) -> bool {
        self.overlay.completed_ids.insert(id.to_string())
    }

    pub fn mark_handled(&mut self, id: &str) -> bool {
        self.overlay.handled_ids.insert(id.to_string())
    }

    /// Appends `entry` to the item's notes in place. Returns None for an
    /// unknown id.
    pub fn apply_optimistic(&mut self, id: &str, entry: &str, snooze: Option<NaiveDate>) -> Option<EditToken> {
        let item = self.items.iter_mut().find(|item| item.id == id)?;
        let seq = self.next_edit;
        self.next_edit += 1;

        let pending = self
            .optimistic
            .entry(id.to_string())
            .or_insert_with(|| OptimisticEdits {
                base: item.notes_patch(),
                edits: Vec::new(),
            });
        pending.edits.push(PendingEdit {
            seq,
            entry: entry.to_string(),
            snooze,
            confirmed: false,
        });
        item.apply_patch(pending.replay());
        Some(EditToken { id: id.to_string(), seq })
    }

    /// Removes only this submission's entry; other submissions on the same
    /// item stay applied. Returns false when a refresh already replaced the
    /// values.
    pub fn rollback(&mut self, token: &EditToken) -> bool {
        let Some(pending) = self.optimistic.get_mut(&token.id) else {
            return false;
        };
        let before = pending.edits.len();
        pending.edits.retain(|edit| edit.seq != token.seq);
        if pending.edits.len() == before {
            return false;
        }

        let patch = pending.replay();
        if pending.is_settled() {
            self.optimistic.remove(&token.id);
        }
        match self.items.iter_mut().find(|item| item.id == token.id) {
            Some(item) => {
                item.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    /// Keeps this submission's entry after a successful write.
    pub fn confirm_optimistic(&mut self, token: &EditToken) {
        let Some(pending) = self.optimistic.get_mut(&token.id) else {
            return;
        };
        if let Some(edit) = pending.edits.iter_mut().find(|edit| edit.seq == token.seq) {
            edit.confirmed = true;
        }
        if pending.is_settled() {
            self.optimistic.remove(&token.id);
        }
    }

    pub fn begin_completion(&mut self, id: &str) -> bool {
        self.completing.insert(id.to_string())
    }

    pub fn finish_completion(&mut self, id: &str) {
        self.completing.remove(id);
    }

    pub fn is_completing(&self, id: &str) -> bool {
        self.completing.contains(id)
    }

    pub fn set_source_filter(&mut self, source: SourceFilter) {
        self.selection.source = source;
    }

    pub fn set_view_filter(&mut self, view: ViewFilter) {
        self.selection.view = view;
    }

    pub fn toggle_kam(&mut self, name: &str) {
        self.selection.toggle_kam(name);
    }

    pub fn set_search(&mut self, query: &str) {
        self.selection.search = query.trim().to_string();
    }

    pub fn set_timeline(&mut self, timeline: TimelineFilter) {
        self.selection.timeline = timeline;
    }

    pub fn push_alert(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
    }

    pub fn take_alert(&mut self) -> Option<Alert> {
        self.alerts.pop_front()
    }

    pub fn view(&self, today: NaiveDate) -> DashboardView {
        derive_view(&self.items, &self.overlay, &self.selection, today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kamdash_core::{Severity, Source};
    use serde_json::{Map, Value as JsonValue};

    fn item(id: &str, days: u32, notes: &str) -> ActionableItem {
        ActionableItem {
            id: id.to_string(),
            source: Source::PostTbr,
            candidate_name: id.to_uppercase(),
            company: "Acme".to_string(),
            role: "Engineer".to_string(),
            status: "Pending".to_string(),
            stage: String::new(),
            pending_days: days,
            severity: Severity::from_pending_days(days),
            kam_notes: notes.to_string(),
            display_notes: notes.to_string(),
            snooze_until: kamdash_core::notes::latest_snooze(notes),
            jd_uid: 7,
            public_identifier: id.to_string(),
            kam: "Asha".to_string(),
            platform_link: "#".to_string(),
            role_active: JsonValue::Null,
            scheduler_notes: String::new(),
            interview_process_final: String::new(),
            raw: Map::new(),
        }
    }

    fn outcome(items: Vec<ActionableItem>) -> RefreshOutcome {
        RefreshOutcome {
            items,
            warnings: Vec::new(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 9).expect("date")
    }

    #[test]
    fn refresh_prunes_completed_ids_absent_from_fetch() {
        let mut store = DashboardStore::new(["gone".to_string(), "a".to_string()].into_iter().collect());
        let rec = store.replace_items(outcome(vec![item("a", 12, ""), item("b", 20, "")]), Utc::now());
        assert_eq!(rec.pruned_completed, vec!["gone".to_string()]);
        assert!(store.overlay().completed_ids.contains("a"));
        assert_eq!(store.view(today()).items.len(), 1);
    }

    #[test]
    fn refresh_prunes_handled_ids_that_now_have_notes() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 12, ""), item("b", 12, ""), item("c", 12, "")]), Utc::now());
        for id in ["a", "b", "c"] {
            store.mark_handled(id);
        }
        let rec = store.replace_items(
            outcome(vec![
                item("a", 12, "[2024-01-08] called"),
                item("b", 12, ""),
                item("c", 12, "[SNOOZE: 2024-01-20] later"),
            ]),
            Utc::now(),
        );
        assert_eq!(rec.pruned_handled, vec!["a".to_string(), "c".to_string()]);
        assert!(store.overlay().handled_ids.contains("b"));
    }

    #[test]
    fn optimistic_patch_rolls_back_to_prior_values() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 12, "[2024-01-01] old")]), Utc::now());
        let before = store.item("a").cloned().expect("item");

        let token = store
            .apply_optimistic("a", "[2024-01-09] [SNOOZE: 2024-01-12] ping", NaiveDate::from_ymd_opt(2024, 1, 12))
            .expect("token");
        assert_eq!(token.id(), "a");
        assert_eq!(store.item("a").map(|i| i.snooze_until.clone()), Some(Some("2024-01-12".to_string())));
        assert!(store.item("a").is_some_and(|i| i.display_notes.ends_with("ping")));

        assert!(store.rollback(&token));
        assert_eq!(store.item("a"), Some(&before));
        assert!(!store.rollback(&token));
        assert!(store.apply_optimistic("missing", "x", None).is_none());
    }

    #[test]
    fn rollback_after_an_earlier_confirm_removes_only_the_failed_entry() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 12, "[2024-01-01] old")]), Utc::now());
        let first = store.apply_optimistic("a", "[2024-01-09] first", None).expect("token");
        let second = store
            .apply_optimistic("a", "[2024-01-09] [SNOOZE: 2024-01-12] second", NaiveDate::from_ymd_opt(2024, 1, 12))
            .expect("token");

        store.confirm_optimistic(&first);
        assert!(store.rollback(&second));

        let a = store.item("a").expect("item");
        assert_eq!(a.display_notes, "[2024-01-01] old\n[2024-01-09] first");
        assert_eq!(a.kam_notes, "[2024-01-01] old\n[2024-01-09] first");
        assert_eq!(a.snooze_until, None);
    }

    #[test]
    fn rollback_of_an_earlier_entry_keeps_a_later_one() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 12, "")]), Utc::now());
        let first = store
            .apply_optimistic("a", "[2024-01-09] [SNOOZE: 2024-01-12] first", NaiveDate::from_ymd_opt(2024, 1, 12))
            .expect("token");
        let second = store.apply_optimistic("a", "[2024-01-09] second", None).expect("token");

        store.confirm_optimistic(&second);
        assert!(store.rollback(&first));

        let a = store.item("a").expect("item");
        assert_eq!(a.display_notes, "[2024-01-09] second");
        assert_eq!(a.snooze_until, None);
        // Both settled, nothing left to undo.
        assert!(!store.rollback(&second));
    }

    #[test]
    fn refresh_between_patch_and_rollback_wins() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 12, "")]), Utc::now());
        let token = store.apply_optimistic("a", "[2024-01-09] x", None).expect("token");

        let fresh = item("a", 13, "[2024-01-09] x");
        store.replace_items(outcome(vec![fresh.clone()]), Utc::now());
        assert!(!store.rollback(&token));
        assert_eq!(store.item("a"), Some(&fresh));

        // A new edit after the refresh is not touched by the stale token.
        let newer = store.apply_optimistic("a", "[2024-01-10] y", None).expect("token");
        assert_ne!(newer, token);
        assert!(!store.rollback(&token));
        assert!(store.item("a").is_some_and(|i| i.display_notes.ends_with("y")));
    }

    #[test]
    fn completion_hides_item_and_tracks_in_flight() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 50, "")]), Utc::now());
        assert!(store.begin_completion("a"));
        assert!(!store.begin_completion("a"));
        assert!(store.mark_complete("a"));
        assert!(store.view(today()).items.is_empty());
        store.finish_completion("a");
        assert!(!store.is_completing("a"));
    }

    #[test]
    fn selection_setters_feed_the_view() {
        let mut store = DashboardStore::default();
        store.replace_items(outcome(vec![item("a", 50, ""), item("b", 12, "")]), Utc::now());
        store.set_timeline(TimelineFilter::FortyFivePlus);
        assert_eq!(store.view(today()).items.len(), 1);
        store.set_timeline(TimelineFilter::All);
        store.set_search("  zzz ");
        assert_eq!(store.selection().search, "zzz");
        assert!(store.view(today()).items.is_empty());
    }

    #[test]
    fn alerts_drain_in_order() {
        let mut store = DashboardStore::default();
        store.push_alert(Alert::success("one"));
        store.push_alert(Alert::error("two"));
        assert_eq!(store.take_alert().map(|a| a.message), Some("one".to_string()));
        assert_eq!(store.take_alert().map(|a| a.level), Some(AlertLevel::Error));
        assert_eq!(store.take_alert(), None);
    }
}

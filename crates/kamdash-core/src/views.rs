//! Pure derivation of every dashboard slice from one state snapshot.
//!
//! Stages run in order, each over the output of the previous one:
//! base (completion exclusion) → source + search → view → KAM → timeline.
//! Counters read from fixed stages; see the doc on each.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{ActionableItem, KamStat, ParseEnumError, Source, Swimlane, UNASSIGNED_KAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceFilter {
    #[default]
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "POST_TBR")]
    PostTbr,
    #[serde(rename = "IC")]
    Ic,
}

impl SourceFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFilter::All => "ALL",
            SourceFilter::PostTbr => "POST_TBR",
            SourceFilter::Ic => "IC",
        }
    }

    pub fn admits(self, source: Source) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::PostTbr => source == Source::PostTbr,
            SourceFilter::Ic => source == Source::Ic,
        }
    }
}

impl FromStr for SourceFilter {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("ALL") {
            return Ok(SourceFilter::All);
        }
        match s.parse::<Source>() {
            Ok(Source::PostTbr) => Ok(SourceFilter::PostTbr),
            Ok(Source::Ic) => Ok(SourceFilter::Ic),
            Err(_) => Err(ParseEnumError::new("source filter", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViewFilter {
    #[default]
    All,
    New,
}

impl ViewFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewFilter::All => "ALL",
            ViewFilter::New => "NEW",
        }
    }
}

impl FromStr for ViewFilter {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(ViewFilter::All),
            "NEW" => Ok(ViewFilter::New),
            _ => Err(ParseEnumError::new("view", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimelineFilter {
    #[default]
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "10_PLUS")]
    TenPlus,
    #[serde(rename = "30_PLUS")]
    ThirtyPlus,
    #[serde(rename = "45_PLUS")]
    FortyFivePlus,
}

impl TimelineFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            TimelineFilter::All => "ALL",
            TimelineFilter::TenPlus => "10_PLUS",
            TimelineFilter::ThirtyPlus => "30_PLUS",
            TimelineFilter::FortyFivePlus => "45_PLUS",
        }
    }

    /// Each tile selects one band, not an open-ended range.
    pub fn admits(self, pending_days: u32) -> bool {
        match self {
            TimelineFilter::All => true,
            TimelineFilter::FortyFivePlus => pending_days >= 45,
            TimelineFilter::ThirtyPlus => (30..45).contains(&pending_days),
            TimelineFilter::TenPlus => (10..30).contains(&pending_days),
        }
    }
}

impl FromStr for TimelineFilter {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(TimelineFilter::All),
            "10_PLUS" => Ok(TimelineFilter::TenPlus),
            "30_PLUS" => Ok(TimelineFilter::ThirtyPlus),
            "45_PLUS" => Ok(TimelineFilter::FortyFivePlus),
            _ => Err(ParseEnumError::new("timeline filter", s)),
        }
    }
}

/// Every filter dimension the user controls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub source: SourceFilter,
    pub view: ViewFilter,
    /// Empty means every KAM. The empty account manager is selected as "Unassigned".
    pub kams: BTreeSet<String>,
    pub search: String,
    pub timeline: TimelineFilter,
}

impl Selection {
    /// `ALL` clears the selection; any other name flips its membership.
    pub fn toggle_kam(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("ALL") {
            self.kams.clear();
        } else if !self.kams.remove(name) {
            self.kams.insert(name.to_string());
        }
    }
}

/// Local state layered over the fetched collection, never written into it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Overlay {
    pub completed_ids: HashSet<String>,
    pub handled_ids: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KpiCounts {
    pub total: usize,
    pub critical: usize,
    pub attention: usize,
    pub normal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewCounts {
    pub all: usize,
    pub new: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceCounts {
    pub all: usize,
    pub post_tbr: usize,
    pub ic: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwimlaneView {
    pub lane: Swimlane,
    pub title: String,
    pub items: Vec<ActionableItem>,
}

/// Everything the presentation layer reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub today: NaiveDate,
    pub selection: Selection,
    pub items: Vec<ActionableItem>,
    pub swimlanes: Vec<SwimlaneView>,
    pub kpis: KpiCounts,
    pub view_counts: ViewCounts,
    pub source_counts: SourceCounts,
    pub leaderboard: Vec<KamStat>,
    pub all_kams: Vec<String>,
}

impl DashboardView {
    pub fn lane(&self, lane: Swimlane) -> &[ActionableItem] {
        self.swimlanes
            .iter()
            .find(|s| s.lane == lane)
            .map(|s| s.items.as_slice())
            .unwrap_or_default()
    }
}

/// Drops locally completed ids and anything carrying a completion marker.
pub fn base_actionables<'a>(items: &'a [ActionableItem], overlay: &Overlay) -> Vec<&'a ActionableItem> {
    items
        .iter()
        .filter(|item| !overlay.completed_ids.contains(&item.id))
        .filter(|item| !item.is_completed())
        .collect()
}

pub fn matches_search(item: &ActionableItem, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    item.candidate_name.to_lowercase().contains(&query) || item.company.to_lowercase().contains(&query)
}

/// Source and search filters; items snoozed past `today` are hidden here as well.
pub fn source_search_filtered<'a>(
    items: &[&'a ActionableItem],
    selection: &Selection,
    today: NaiveDate,
) -> Vec<&'a ActionableItem> {
    items
        .iter()
        .copied()
        .filter(|item| selection.source.admits(item.source))
        .filter(|item| matches_search(item, &selection.search))
        .filter(|item| !item.is_snoozed(today))
        .collect()
}

/// An item counts as new until a KAM has touched it in this session or left a note,
/// and again once its latest snooze has run out.
pub fn is_new(item: &ActionableItem, overlay: &Overlay, today: NaiveDate) -> bool {
    (!item.has_notes() || item.is_snooze_elapsed(today)) && !overlay.handled_ids.contains(&item.id)
}

pub fn view_filtered<'a>(
    items: &[&'a ActionableItem],
    view: ViewFilter,
    overlay: &Overlay,
    today: NaiveDate,
) -> Vec<&'a ActionableItem> {
    match view {
        ViewFilter::All => items.to_vec(),
        ViewFilter::New => items
            .iter()
            .copied()
            .filter(|item| is_new(item, overlay, today))
            .collect(),
    }
}

pub fn kam_filtered<'a>(items: &[&'a ActionableItem], kams: &BTreeSet<String>) -> Vec<&'a ActionableItem> {
    if kams.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .copied()
        .filter(|item| kams.contains(item.kam_label()))
        .collect()
}

pub fn timeline_filtered<'a>(items: &[&'a ActionableItem], timeline: TimelineFilter) -> Vec<&'a ActionableItem> {
    items
        .iter()
        .copied()
        .filter(|item| timeline.admits(item.pending_days))
        .collect()
}

/// Elapsed snoozes first, then the oldest pending. Stable, so fetch order breaks ties.
pub fn sort_for_lane(items: &mut [&ActionableItem], today: NaiveDate) {
    items.sort_by(|a, b| {
        b.is_snooze_elapsed(today)
            .cmp(&a.is_snooze_elapsed(today))
            .then_with(|| b.pending_days.cmp(&a.pending_days))
    });
}

pub fn swimlanes<'a>(items: &[&'a ActionableItem], today: NaiveDate) -> Vec<(Swimlane, Vec<&'a ActionableItem>)> {
    Swimlane::ORDER
        .iter()
        .map(|lane| {
            let mut bucket = items
                .iter()
                .copied()
                .filter(|item| Swimlane::for_pending_days(item.pending_days) == *lane)
                .collect::<Vec<_>>();
            sort_for_lane(&mut bucket, today);
            (*lane, bucket)
        })
        .collect()
}

/// Counted after the KAM filter but before the timeline filter, so every tile
/// keeps its number while one of them is active.
pub fn kpi_counts(kam_stage: &[&ActionableItem]) -> KpiCounts {
    let mut counts = KpiCounts {
        total: kam_stage.len(),
        ..KpiCounts::default()
    };
    for item in kam_stage {
        match Swimlane::for_pending_days(item.pending_days) {
            Swimlane::Critical => counts.critical += 1,
            Swimlane::Attention => counts.attention += 1,
            Swimlane::Normal => counts.normal += 1,
        }
    }
    counts
}

/// Source + search stage with the KAM filter, skipping the view filter itself.
pub fn view_counts(
    source_search_stage: &[&ActionableItem],
    selection: &Selection,
    overlay: &Overlay,
    today: NaiveDate,
) -> ViewCounts {
    let scoped = kam_filtered(source_search_stage, &selection.kams);
    ViewCounts {
        all: scoped.len(),
        new: scoped.iter().filter(|item| is_new(item, overlay, today)).count(),
    }
}

/// Base stage with search applied; the source filter is ignored.
pub fn source_counts(base: &[&ActionableItem], search: &str) -> SourceCounts {
    let mut counts = SourceCounts::default();
    for item in base.iter().filter(|item| matches_search(item, search)) {
        counts.all += 1;
        match item.source {
            Source::PostTbr => counts.post_tbr += 1,
            Source::Ic => counts.ic += 1,
        }
    }
    counts
}

/// Reads the view stage, before the KAM filter, so selecting a KAM never hides the others.
pub fn leaderboard(view_stage: &[&ActionableItem]) -> Vec<KamStat> {
    let mut counts = BTreeMap::<&str, usize>::new();
    for item in view_stage {
        *counts.entry(item.kam_label()).or_default() += 1;
    }
    let mut stats = counts
        .into_iter()
        .map(|(name, count)| KamStat {
            name: name.to_string(),
            count,
        })
        .collect::<Vec<_>>();
    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    stats
}

pub fn all_kams(base: &[&ActionableItem]) -> Vec<String> {
    base.iter()
        .filter(|item| !item.kam.trim().is_empty() && item.kam != UNASSIGNED_KAM)
        .map(|item| item.kam.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn derive_view(
    items: &[ActionableItem],
    overlay: &Overlay,
    selection: &Selection,
    today: NaiveDate,
) -> DashboardView {
    let base = base_actionables(items, overlay);
    let source_search = source_search_filtered(&base, selection, today);
    let viewed = view_filtered(&source_search, selection.view, overlay, today);
    let kam_stage = kam_filtered(&viewed, &selection.kams);
    let displayed = timeline_filtered(&kam_stage, selection.timeline);

    let swimlanes = swimlanes(&displayed, today)
        .into_iter()
        .map(|(lane, bucket)| SwimlaneView {
            lane,
            title: lane.title().to_string(),
            items: bucket.into_iter().cloned().collect(),
        })
        .collect();

    DashboardView {
        today,
        selection: selection.clone(),
        items: displayed.iter().map(|item| (*item).clone()).collect(),
        swimlanes,
        kpis: kpi_counts(&kam_stage),
        view_counts: view_counts(&source_search, selection, overlay, today),
        source_counts: source_counts(&base, &selection.search),
        leaderboard: leaderboard(&viewed),
        all_kams: all_kams(&base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use proptest::prelude::*;
    use serde_json::{Map, Value as JsonValue};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
    }

    fn mk_item(id: &str, source: Source, days: u32, kam: &str, notes: &str) -> ActionableItem {
        ActionableItem {
            id: id.to_string(),
            source,
            candidate_name: format!("Candidate {id}"),
            company: format!("Company {id}"),
            role: "Engineer".into(),
            status: "Pending".into(),
            stage: String::new(),
            pending_days: days,
            severity: Severity::from_pending_days(days),
            kam_notes: notes.to_string(),
            display_notes: notes.to_string(),
            snooze_until: crate::notes::latest_snooze(notes),
            jd_uid: 1,
            public_identifier: format!("pub-{id}"),
            kam: kam.to_string(),
            platform_link: "#".into(),
            role_active: JsonValue::Bool(true),
            scheduler_notes: String::new(),
            interview_process_final: String::new(),
            raw: Map::new(),
        }
    }

    fn ids(items: &[ActionableItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn severity_band_edges() {
        assert_eq!(Severity::from_pending_days(45), Severity::Extreme);
        assert_eq!(Severity::from_pending_days(44), Severity::Critical);
        assert_eq!(Severity::from_pending_days(30), Severity::Critical);
        assert_eq!(Severity::from_pending_days(29), Severity::High);
        assert_eq!(Severity::from_pending_days(15), Severity::High);
        assert_eq!(Severity::from_pending_days(14), Severity::Medium);
        assert_eq!(Severity::from_pending_days(10), Severity::Medium);
        assert_eq!(Severity::from_pending_days(9), Severity::Low);
        assert_eq!(Severity::from_pending_days(0), Severity::Low);
    }

    #[test]
    fn completed_items_are_absent_from_every_slice() {
        let items = vec![
            mk_item("a", Source::PostTbr, 50, "Asha", "[2024-01-01] hi\n[COMPLETED: 2024-01-02]"),
            mk_item("b", Source::Ic, 50, "Asha", "[SUBMITTED: 2024-01-02]"),
            mk_item("c", Source::PostTbr, 50, "Asha", ""),
        ];
        let view = derive_view(&items, &Overlay::default(), &Selection::default(), today());
        assert_eq!(ids(&view.items), vec!["c"]);
        assert_eq!(view.kpis.total, 1);
        assert_eq!(view.source_counts.all, 1);
        assert_eq!(view.leaderboard, vec![KamStat { name: "Asha".into(), count: 1 }]);
        assert_eq!(ids(view.lane(Swimlane::Critical)), vec!["c"]);
    }

    #[test]
    fn locally_completed_ids_are_hidden() {
        let items = vec![mk_item("a", Source::PostTbr, 12, "", ""), mk_item("b", Source::Ic, 12, "", "")];
        let mut overlay = Overlay::default();
        overlay.completed_ids.insert("a".into());
        let view = derive_view(&items, &overlay, &Selection::default(), today());
        assert_eq!(ids(&view.items), vec!["b"]);
    }

    #[test]
    fn forty_six_days_lands_in_critical_lane() {
        let items = vec![mk_item("a", Source::PostTbr, 46, "", "")];
        let view = derive_view(&items, &Overlay::default(), &Selection::default(), today());
        assert_eq!(view.items[0].severity, Severity::Extreme);
        assert_eq!(view.items[0].snooze_until, None);
        assert_eq!(view.swimlanes[0].title, "Critical (45+ Days)");
        assert_eq!(ids(&view.swimlanes[0].items), vec!["a"]);
    }

    #[test]
    fn lanes_put_elapsed_snoozes_first_then_oldest() {
        let items = vec![
            mk_item("young", Source::PostTbr, 12, "", ""),
            mk_item("old", Source::PostTbr, 28, "", ""),
            mk_item("woke", Source::PostTbr, 11, "", "[2024-01-01] [SNOOZE: 2024-01-14] later"),
            mk_item("today", Source::PostTbr, 10, "", "[2024-01-01] [SNOOZE: 2024-01-15] later"),
        ];
        let view = derive_view(&items, &Overlay::default(), &Selection::default(), today());
        assert_eq!(ids(view.lane(Swimlane::Normal)), vec!["woke", "today", "old", "young"]);
    }

    #[test]
    fn future_snoozes_are_hidden() {
        let items = vec![
            mk_item("later", Source::PostTbr, 40, "", "[2024-01-01] [SNOOZE: 2024-01-16] later"),
            mk_item("now", Source::PostTbr, 40, "", ""),
        ];
        let view = derive_view(&items, &Overlay::default(), &Selection::default(), today());
        assert_eq!(ids(&view.items), vec!["now"]);
    }

    #[test]
    fn new_view_keeps_untouched_and_woken_items() {
        let items = vec![
            mk_item("fresh", Source::PostTbr, 20, "", ""),
            mk_item("noted", Source::PostTbr, 20, "", "[2024-01-10] called"),
            mk_item("woke", Source::PostTbr, 20, "", "[2024-01-01] [SNOOZE: 2024-01-10] x"),
            mk_item("handled", Source::Ic, 20, "", ""),
        ];
        let mut overlay = Overlay::default();
        overlay.handled_ids.insert("handled".into());
        let selection = Selection {
            view: ViewFilter::New,
            ..Selection::default()
        };
        let view = derive_view(&items, &overlay, &selection, today());
        assert_eq!(ids(&view.items), vec!["fresh", "woke"]);
        assert_eq!(view.view_counts, ViewCounts { all: 4, new: 2 });
    }

    #[test]
    fn source_and_search_filters_apply() {
        let mut items = vec![
            mk_item("a", Source::PostTbr, 20, "", ""),
            mk_item("b", Source::Ic, 20, "", ""),
            mk_item("c", Source::Ic, 20, "", ""),
        ];
        items[2].company = "Acme Robotics".into();
        let selection = Selection {
            source: SourceFilter::Ic,
            search: "  acme ".into(),
            ..Selection::default()
        };
        let view = derive_view(&items, &Overlay::default(), &selection, today());
        assert_eq!(ids(&view.items), vec!["c"]);
        assert_eq!(view.source_counts, SourceCounts { all: 1, post_tbr: 0, ic: 1 });
    }

    #[test]
    fn leaderboard_ignores_kam_selection() {
        let items = vec![
            mk_item("a", Source::PostTbr, 20, "Asha", ""),
            mk_item("b", Source::PostTbr, 20, "Ravi", ""),
            mk_item("c", Source::Ic, 20, "Ravi", ""),
            mk_item("d", Source::Ic, 20, "", ""),
        ];
        let mut selection = Selection::default();
        selection.toggle_kam("Asha");
        let view = derive_view(&items, &Overlay::default(), &selection, today());
        assert_eq!(ids(&view.items), vec!["a"]);
        assert_eq!(view.kpis.total, 1);
        assert_eq!(
            view.leaderboard,
            vec![
                KamStat { name: "Ravi".into(), count: 2 },
                KamStat { name: "Asha".into(), count: 1 },
                KamStat { name: "Unassigned".into(), count: 1 },
            ]
        );
        assert_eq!(view.all_kams, vec!["Asha".to_string(), "Ravi".to_string()]);
    }

    #[test]
    fn unassigned_is_selectable() {
        let items = vec![mk_item("a", Source::PostTbr, 20, "Asha", ""), mk_item("b", Source::PostTbr, 20, " ", "")];
        let mut selection = Selection::default();
        selection.toggle_kam(UNASSIGNED_KAM);
        let view = derive_view(&items, &Overlay::default(), &selection, today());
        assert_eq!(ids(&view.items), vec!["b"]);
    }

    #[test]
    fn toggle_kam_flips_and_all_clears() {
        let mut selection = Selection::default();
        selection.toggle_kam("Asha");
        selection.toggle_kam("Ravi");
        selection.toggle_kam("Asha");
        assert_eq!(selection.kams.iter().collect::<Vec<_>>(), vec!["Ravi"]);
        selection.toggle_kam("ALL");
        assert!(selection.kams.is_empty());
    }

    #[test]
    fn timeline_selects_one_band_and_kpis_ignore_it() {
        let items = vec![
            mk_item("a", Source::PostTbr, 5, "", ""),
            mk_item("b", Source::PostTbr, 12, "", ""),
            mk_item("c", Source::PostTbr, 31, "", ""),
            mk_item("d", Source::PostTbr, 45, "", ""),
            mk_item("e", Source::PostTbr, 90, "", ""),
        ];
        let mut selection = Selection {
            timeline: TimelineFilter::ThirtyPlus,
            ..Selection::default()
        };
        let view = derive_view(&items, &Overlay::default(), &selection, today());
        assert_eq!(ids(&view.items), vec!["c"]);
        assert_eq!(
            view.kpis,
            KpiCounts {
                total: 5,
                critical: 2,
                attention: 1,
                normal: 2
            }
        );

        selection.timeline = TimelineFilter::TenPlus;
        let view = derive_view(&items, &Overlay::default(), &selection, today());
        assert_eq!(ids(&view.items), vec!["b"]);

        selection.timeline = TimelineFilter::FortyFivePlus;
        let view = derive_view(&items, &Overlay::default(), &selection, today());
        assert_eq!(ids(&view.items), vec!["d", "e"]);
        assert_eq!(ids(view.lane(Swimlane::Critical)), vec!["e", "d"]);
    }

    #[test]
    fn same_backend_key_from_both_sources_stays_distinct() {
        let items = vec![mk_item("rec1", Source::PostTbr, 20, "", ""), mk_item("rec2", Source::Ic, 20, "", "")];
        let view = derive_view(&items, &Overlay::default(), &Selection::default(), today());
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.items[0].public_identifier, "pub-rec1");
        assert_eq!(view.source_counts, SourceCounts { all: 2, post_tbr: 1, ic: 1 });
    }

    #[test]
    fn filter_names_parse() {
        assert_eq!("post_tbr".parse::<SourceFilter>(), Ok(SourceFilter::PostTbr));
        assert_eq!("ALL".parse::<SourceFilter>(), Ok(SourceFilter::All));
        assert_eq!("new".parse::<ViewFilter>(), Ok(ViewFilter::New));
        assert_eq!("45_PLUS".parse::<TimelineFilter>(), Ok(TimelineFilter::FortyFivePlus));
        assert!("60_PLUS".parse::<TimelineFilter>().is_err());
    }

    proptest! {
        #[test]
        fn prop_severity_matches_exactly_one_band(days in 0u32..10_000) {
            let bands = [
                (Severity::Extreme, days >= 45),
                (Severity::Critical, (30..45).contains(&days)),
                (Severity::High, (15..30).contains(&days)),
                (Severity::Medium, (10..15).contains(&days)),
                (Severity::Low, days < 10),
            ];
            let matching = bands.iter().filter(|(_, hit)| *hit).collect::<Vec<_>>();
            prop_assert_eq!(matching.len(), 1);
            prop_assert_eq!(Severity::from_pending_days(days), matching[0].0);
        }

        #[test]
        fn prop_swimlanes_partition_displayed_items(days in proptest::collection::vec(0u32..120, 0..30)) {
            let items = days
                .iter()
                .enumerate()
                .map(|(i, d)| mk_item(&i.to_string(), Source::PostTbr, *d, "", ""))
                .collect::<Vec<_>>();
            let view = derive_view(&items, &Overlay::default(), &Selection::default(), today());
            let lane_total: usize = view.swimlanes.iter().map(|s| s.items.len()).sum();
            prop_assert_eq!(lane_total, view.items.len());
            prop_assert_eq!(view.kpis.total, items.len());
        }
    }
}

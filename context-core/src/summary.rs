//! Activity summaries over a time range.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::decisions::{DecisionRecord, Impact};
use crate::memory::{ContextStore, EventKind, Tier};

/// Number of patterns and entities listed in a summary.
const TOP_N: usize = 5;

/// Error share at or above which a summary flags instability.
const ERROR_RATIO_ALERT: f64 = 0.25;

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeframe {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timeframe {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `hours` before `now`. Spans reaching past the earliest
    /// representable time start there instead.
    pub fn last_hours(hours: i64, now: DateTime<Utc>) -> Self {
        Self::ending_at(Duration::try_hours(hours.max(0)), now)
    }

    pub fn last_days(days: i64, now: DateTime<Utc>) -> Self {
        Self::ending_at(Duration::try_days(days.max(0)), now)
    }

    fn ending_at(span: Option<Duration>, now: DateTime<Utc>) -> Self {
        let start = span
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(start, now)
    }

    /// Everything ever recorded.
    pub fn all() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// A recurring event or relation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    pub label: String,
    pub occurrences: usize,
}

/// Activity report for a timeframe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub timeframe: Timeframe,
    pub total_entries: usize,
    pub by_kind: BTreeMap<EventKind, usize>,
    pub by_tier: BTreeMap<Tier, usize>,
    /// Decisions recorded within the timeframe
    pub decisions: Vec<DecisionRecord>,
    /// All decisions overdue at generation time
    pub overdue: Vec<DecisionRecord>,
    pub top_patterns: Vec<Pattern>,
    pub top_entities: Vec<(String, usize)>,
    pub recommendations: Vec<String>,
}

/// Build a summary of the entries and decisions in `timeframe`.
pub fn generate(store: &ContextStore, timeframe: Timeframe, now: DateTime<Utc>) -> SummaryReport {
    let mut by_kind: BTreeMap<EventKind, usize> = BTreeMap::new();
    let mut by_tier: BTreeMap<Tier, usize> = BTreeMap::new();
    let mut total_entries = 0;

    for entry in store.entries().filter(|e| timeframe.contains(e.timestamp)) {
        total_entries += 1;
        *by_kind.entry(entry.kind).or_insert(0) += 1;
        for tier in &entry.tiers {
            *by_tier.entry(*tier).or_insert(0) += 1;
        }
    }

    let mut decisions: Vec<DecisionRecord> = store
        .decisions()
        .filter(|d| timeframe.contains(d.timestamp))
        .cloned()
        .collect();
    decisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.entry_id.cmp(&b.entry_id)));

    let mut overdue: Vec<DecisionRecord> = store
        .decisions()
        .filter(|d| d.is_overdue(now))
        .cloned()
        .collect();
    overdue.sort_by(|a, b| a.review_date.cmp(&b.review_date).then_with(|| a.entry_id.cmp(&b.entry_id)));

    let mut patterns: Vec<Pattern> = by_kind
        .iter()
        .map(|(kind, count)| Pattern {
            label: format!("event:{}", kind),
            occurrences: *count,
        })
        .collect();
    let mut relation_counts: BTreeMap<String, usize> = BTreeMap::new();
    for edge in store.graph().edges() {
        if timeframe.contains(edge.last_seen) {
            *relation_counts.entry(format!("relation:{}", edge.kind)).or_insert(0) += 1;
        }
    }
    patterns.extend(relation_counts.into_iter().map(|(label, occurrences)| Pattern { label, occurrences }));
    patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.label.cmp(&b.label)));
    patterns.truncate(TOP_N);

    let recommendations = recommend(&by_kind, total_entries, &decisions, &overdue, store.dropped_relations());

    SummaryReport {
        timeframe,
        total_entries,
        by_kind,
        by_tier,
        decisions,
        overdue,
        top_patterns: patterns,
        top_entities: store.graph().top_entities(TOP_N),
        recommendations,
    }
}

fn recommend(
    by_kind: &BTreeMap<EventKind, usize>,
    total_entries: usize,
    decisions: &[DecisionRecord],
    overdue: &[DecisionRecord],
    dropped_relations: u64,
) -> Vec<String> {
    let mut out = Vec::new();

    if !overdue.is_empty() {
        out.push(format!(
            "Review {} overdue decision(s): {}",
            overdue.len(),
            overdue.iter().map(|d| d.title.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }

    let errors = by_kind.get(&EventKind::Error).copied().unwrap_or(0);
    if total_entries > 0 && errors as f64 / total_entries as f64 >= ERROR_RATIO_ALERT {
        out.push(format!(
            "Errors make up {} of {} recent events; investigate recurring failures",
            errors, total_entries
        ));
    }

    let unplanned = decisions
        .iter()
        .filter(|d| d.impact == Impact::Critical && !d.follow_up_required)
        .count();
    if unplanned > 0 {
        out.push(format!(
            "Schedule follow-up for {} critical decision(s) without a review date",
            unplanned
        ));
    }

    if dropped_relations > 0 {
        out.push(format!(
            "{} extracted relation(s) were dropped as malformed; check event payloads",
            dropped_relations
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::DecisionFields;
    use crate::graph::{ExtractedRelation, RelationKind};
    use crate::memory::{new_entry, EntryMetadata, Payload};
    use std::collections::BTreeSet;

    fn add(store: &mut ContextStore, kind: EventKind, at: DateTime<Utc>) -> crate::memory::EntryId {
        store
            .insert_entry(new_entry(kind, Payload::empty(), EntryMetadata::new(), at))
            .unwrap()
    }

    #[test]
    fn test_timeframe_bounds_inclusive() {
        let now = Utc::now();
        let frame = Timeframe::last_hours(2, now);
        assert!(frame.contains(now));
        assert!(frame.contains(now - Duration::hours(2)));
        assert!(!frame.contains(now - Duration::hours(3)));
        assert!(Timeframe::all().contains(now));
    }

    #[test]
    fn test_huge_timeframes_saturate() {
        let now = Utc::now();
        for frame in [
            Timeframe::last_hours(i64::MAX, now),
            Timeframe::last_days(i64::MAX, now),
            Timeframe::last_days(2_000_000_000, now),
        ] {
            assert_eq!(frame.start, DateTime::<Utc>::MIN_UTC);
            assert_eq!(frame.end, now);
        }

        let negative = Timeframe::last_days(-3, now);
        assert_eq!(negative.start, now);
    }

    #[test]
    fn test_counts_only_entries_in_range() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::days(10));
        add(&mut store, EventKind::Meeting, now - Duration::hours(1));
        add(&mut store, EventKind::Milestone, now - Duration::hours(2));
        add(&mut store, EventKind::Meeting, now - Duration::days(5));

        let report = generate(&store, Timeframe::last_days(1, now), now);
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.by_kind.get(&EventKind::Meeting), Some(&1));
        assert_eq!(report.by_tier.get(&Tier::Immediate), Some(&2));
        assert_eq!(report.by_tier.get(&Tier::LongTerm), Some(&1));
    }

    #[test]
    fn test_patterns_and_entities() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::days(1));
        let a = add(&mut store, EventKind::Error, now);
        add(&mut store, EventKind::Error, now);
        add(&mut store, EventKind::Deployment, now);
        store.link(
            a,
            vec![
                ExtractedRelation::between_entities("api", "db", RelationKind::Causal, 0.7),
                ExtractedRelation::between_entities("api", "cache", RelationKind::Causal, 0.4),
            ],
            now,
        );

        let report = generate(&store, Timeframe::all(), now);
        assert_eq!(report.top_patterns[0], Pattern { label: "event:error".into(), occurrences: 2 });
        assert_eq!(report.top_patterns[1], Pattern { label: "relation:causal".into(), occurrences: 2 });
        assert_eq!(report.top_entities[0], ("api".to_string(), 2));
    }

    #[test]
    fn test_recommendations() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::days(1));
        add(&mut store, EventKind::Error, now);

        let overdue_id = add(&mut store, EventKind::Decision, now - Duration::days(1));
        store
            .insert_decision(DecisionRecord::from_fields(
                overdue_id,
                now - Duration::days(1),
                DecisionFields::new("Adopt queue", Impact::Medium).with_follow_up(now - Duration::hours(1)),
                BTreeSet::new(),
            ))
            .unwrap();
        let critical_id = add(&mut store, EventKind::Decision, now);
        store
            .insert_decision(DecisionRecord::from_fields(
                critical_id,
                now,
                DecisionFields::new("Drop region", Impact::Critical),
                BTreeSet::new(),
            ))
            .unwrap();
        store.record_dropped(2);

        let report = generate(&store, Timeframe::last_days(7, now), now);
        assert_eq!(report.overdue.len(), 1);
        assert_eq!(report.decisions.len(), 2);
        assert_eq!(report.recommendations.len(), 4);
        assert!(report.recommendations[0].contains("Adopt queue"));
    }

    #[test]
    fn test_quiet_period_has_no_recommendations() {
        let now = Utc::now();
        let mut store = ContextStore::new(now);
        add(&mut store, EventKind::Milestone, now);
        let report = generate(&store, Timeframe::all(), now);
        assert!(report.recommendations.is_empty());
        assert!(report.overdue.is_empty());
    }
}

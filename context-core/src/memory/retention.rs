//! Tier retention: staleness, promotion, eviction and collection.
//!
//! Per tier an entry moves `Active -> Stale -> Collected`. A sweep:
//!
//! 1. promotes well-connected ShortTerm members into LongTerm,
//! 2. marks members older than the tier's max age as stale,
//! 3. evicts from over-capacity tiers, stale members first, then by
//!    ascending significance, oldest first on ties,
//! 4. expires the remaining stale members of age-bounded tiers,
//! 5. removes entries that no tier claims any more, with their edges.
//!
//! Eviction only drops a tier's claim. An entry is physically removed only
//! once it has no membership left.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::{TierAge, TierPolicies, TierPolicy};
use crate::memory::store::ContextStore;
use crate::memory::types::{ContextEntry, EntryId, Tier};

/// Retention state of an entry within one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionState {
    Active,
    Stale,
    Collected,
}

/// Retention state of `entry` in `tier` at `now`.
pub fn retention_state(
    entry: Option<&ContextEntry>,
    tier: Tier,
    policy: &TierPolicy,
    session_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RetentionState {
    match entry {
        Some(entry) if entry.in_tier(tier) => {
            if is_stale(entry, policy, session_started_at, now) {
                RetentionState::Stale
            } else {
                RetentionState::Active
            }
        }
        _ => RetentionState::Collected,
    }
}

fn is_stale(
    entry: &ContextEntry,
    policy: &TierPolicy,
    session_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match policy.max_age {
        TierAge::Session => entry.timestamp < session_started_at,
        TierAge::Days(_) => policy
            .max_age_duration()
            .is_some_and(|max_age| now - entry.timestamp > max_age),
        TierAge::Unbounded => false,
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale members found per tier
    pub stale: BTreeMap<Tier, usize>,
    /// Tier claims dropped, by capacity or age
    pub evicted: Vec<(EntryId, Tier)>,
    /// Entries promoted into LongTerm
    pub promoted: Vec<EntryId>,
    /// Entries removed from the store
    pub collected: Vec<EntryId>,
    pub edges_removed: usize,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.evicted.is_empty() && self.promoted.is_empty() && self.collected.is_empty()
    }
}

/// Run one retention sweep over every tier.
pub fn sweep(
    store: &mut ContextStore,
    policies: &TierPolicies,
    promotion_min_degree: usize,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();
    let session_start = store.session_started_at();

    if promotion_min_degree > 0 {
        for id in store.tier_ids(Tier::ShortTerm) {
            let connected = store.graph().entry_degree(&id) >= promotion_min_degree;
            if connected && matches!(store.promote(&id, Tier::LongTerm), Ok(true)) {
                report.promoted.push(id);
            }
        }
    }

    let mut touched: BTreeSet<EntryId> = BTreeSet::new();

    for tier in Tier::ALL {
        let policy = policies.get(tier);
        let mut members: Vec<(&ContextEntry, bool)> = store
            .tier_ids(tier)
            .iter()
            .filter_map(|id| store.get(id))
            .map(|entry| (entry, is_stale(entry, policy, session_start, now)))
            .collect();

        let stale_count = members.iter().filter(|(_, stale)| *stale).count();
        if stale_count > 0 {
            report.stale.insert(tier, stale_count);
        }

        members.sort_by(|(a, a_stale), (b, b_stale)| eviction_order(a, *a_stale, b, *b_stale));

        let over = policy
            .capacity
            .map_or(0, |cap| members.len().saturating_sub(cap));
        let age_bounded = policy.max_age != TierAge::Unbounded;

        let claims: Vec<EntryId> = members
            .iter()
            .enumerate()
            .filter(|(i, (_, stale))| *i < over || (age_bounded && *stale))
            .map(|(_, (entry, _))| entry.id)
            .collect();

        for id in claims {
            store.remove_membership(&id, tier);
            report.evicted.push((id, tier));
            touched.insert(id);
        }
    }

    for id in touched {
        if let Some(edges) = store.collect(&id) {
            report.edges_removed += edges;
            report.collected.push(id);
        }
    }

    if report.is_noop() {
        debug!("Retention sweep: nothing to do");
    } else {
        info!(
            evicted = report.evicted.len(),
            promoted = report.promoted.len(),
            collected = report.collected.len(),
            edges_removed = report.edges_removed,
            "Retention sweep complete"
        );
    }

    report
}

/// Stale first, then lowest significance, then oldest.
fn eviction_order(a: &ContextEntry, a_stale: bool, b: &ContextEntry, b_stale: bool) -> Ordering {
    b_stale
        .cmp(&a_stale)
        .then_with(|| a.significance.total_cmp(&b.significance))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ExtractedRelation, RelationKind};
    use crate::memory::store::new_entry;
    use crate::memory::types::{EntryMetadata, EventKind, Payload};
    use chrono::Duration;

    fn add(store: &mut ContextStore, kind: EventKind, at: DateTime<Utc>) -> EntryId {
        store
            .insert_entry(new_entry(kind, Payload::empty(), EntryMetadata::new(), at))
            .unwrap()
    }

    #[test]
    fn test_immediate_expires_with_session() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::hours(1));
        let generic = add(&mut store, EventKind::Generic, now - Duration::minutes(30));
        let milestone = add(&mut store, EventKind::Milestone, now - Duration::minutes(30));

        store.begin_session(now);
        let report = sweep(&mut store, &TierPolicies::default(), 0, now);

        assert_eq!(report.stale.get(&Tier::Immediate), Some(&2));
        assert!(!store.contains(&generic));
        assert_eq!(report.collected, vec![generic]);

        // Long-term membership keeps the milestone alive.
        let kept = store.get(&milestone).unwrap();
        assert!(!kept.in_tier(Tier::Immediate));
        assert!(kept.in_tier(Tier::LongTerm));
    }

    #[test]
    fn test_short_term_expires_after_seven_days() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::days(30));
        let old = add(&mut store, EventKind::Error, now - Duration::days(8));
        let fresh = add(&mut store, EventKind::Error, now - Duration::days(6));

        sweep(&mut store, &TierPolicies::default(), 0, now);

        assert!(!store.get(&old).unwrap().in_tier(Tier::ShortTerm));
        assert!(store.get(&fresh).unwrap().in_tier(Tier::ShortTerm));
        // Still in Immediate: same session.
        assert!(store.get(&old).unwrap().in_tier(Tier::Immediate));
    }

    #[test]
    fn test_capacity_evicts_lowest_significance_oldest_first() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::days(1));
        let mut policies = TierPolicies::default();
        policies.long_term.capacity = Some(2);
        policies.immediate.capacity = None;

        let old_decision = add(&mut store, EventKind::Decision, now - Duration::hours(3));
        let new_decision = add(&mut store, EventKind::Decision, now - Duration::hours(1));
        let milestone = add(&mut store, EventKind::Milestone, now - Duration::hours(5));

        let report = sweep(&mut store, &policies, 0, now);

        assert_eq!(report.evicted, vec![(old_decision, Tier::LongTerm)]);
        assert!(!store.get(&old_decision).unwrap().in_tier(Tier::LongTerm));
        assert!(store.get(&new_decision).unwrap().in_tier(Tier::LongTerm));
        assert!(store.get(&milestone).unwrap().in_tier(Tier::LongTerm));
        // Still claimed by Immediate, so not collected.
        assert!(report.collected.is_empty());
    }

    #[test]
    fn test_full_eviction_removes_edges() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::hours(2));
        let id = add(&mut store, EventKind::Meeting, now - Duration::hours(1));
        store.link(
            id,
            vec![ExtractedRelation::between_entities("ana", "bo", RelationKind::Topical, 0.6)],
            now,
        );

        store.begin_session(now);
        let report = sweep(&mut store, &TierPolicies::default(), 0, now);

        assert_eq!(report.collected, vec![id]);
        assert_eq!(report.edges_removed, 1);
        assert!(!store.graph().references(&id));
    }

    #[test]
    fn test_institutional_never_expires() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::days(400));
        let id = add(&mut store, EventKind::Generic, now - Duration::days(365));
        store.promote(&id, Tier::Institutional).unwrap();

        store.begin_session(now);
        sweep(&mut store, &TierPolicies::default(), 0, now);

        let entry = store.get(&id).unwrap();
        assert_eq!(entry.tiers.iter().copied().collect::<Vec<_>>(), vec![Tier::Institutional]);
        assert_eq!(
            retention_state(Some(entry), Tier::Institutional, &TierPolicies::default().institutional, now, now),
            RetentionState::Active
        );
    }

    #[test]
    fn test_connected_short_term_promoted() {
        let now = Utc::now();
        let mut store = ContextStore::new(now - Duration::hours(1));
        let id = add(&mut store, EventKind::Error, now);
        let relations: Vec<_> = ["b", "c", "d"]
            .iter()
            .map(|t| ExtractedRelation::between_entities("a", *t, RelationKind::Causal, 0.5))
            .collect();
        store.link(id, relations, now);

        let report = sweep(&mut store, &TierPolicies::default(), 4, now);

        assert_eq!(report.promoted, vec![id]);
        assert!(store.get(&id).unwrap().in_tier(Tier::LongTerm));
    }

    #[test]
    fn test_retention_state_of_missing_entry() {
        let now = Utc::now();
        assert_eq!(
            retention_state(None, Tier::Immediate, &TierPolicies::default().immediate, now, now),
            RetentionState::Collected
        );
    }
}

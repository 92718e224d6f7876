//! In-memory entry store with tier indexes, relationship graph and
//! decision records.
//!
//! `ContextStore` is a plain data structure with no interior locking.
//! [`ContextEngine`](crate::engine::ContextEngine) owns it behind a
//! read/write lock so that each multi-step update is atomic to readers.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::decisions::DecisionRecord;
use crate::error::{Error, Result};
use crate::graph::{ExtractedRelation, LinkReport, RelationshipEdge, RelationshipGraph};
use crate::memory::scoring::{significance, LONG_TERM_THRESHOLD, SHORT_TERM_THRESHOLD};
use crate::memory::types::*;

/// Build a new entry: score it and place it into its initial tiers.
pub fn new_entry(
    kind: EventKind,
    payload: Payload,
    metadata: EntryMetadata,
    now: DateTime<Utc>,
) -> ContextEntry {
    let score = significance(kind, payload.size_bytes());
    let mut entry = ContextEntry::new(kind, payload, metadata, score).with_timestamp(now);
    if score >= LONG_TERM_THRESHOLD {
        entry.tiers.insert(Tier::LongTerm);
    } else if score >= SHORT_TERM_THRESHOLD {
        entry.tiers.insert(Tier::ShortTerm);
    }
    entry
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub entries_by_tier: BTreeMap<Tier, usize>,
    pub entries_by_kind: BTreeMap<EventKind, usize>,
    pub total_edges: usize,
    pub decisions: usize,
    pub dropped_relations: u64,
}

/// The engine's complete in-memory state.
#[derive(Debug, Clone)]
pub struct ContextStore {
    entries: HashMap<EntryId, ContextEntry>,
    tiers: BTreeMap<Tier, BTreeSet<EntryId>>,
    graph: RelationshipGraph,
    decisions: HashMap<EntryId, DecisionRecord>,
    session_started_at: DateTime<Utc>,
    dropped_relations: u64,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ContextStore {
    /// Create an empty store whose current session starts at `session_start`.
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            entries: HashMap::new(),
            tiers: Tier::ALL.iter().map(|t| (*t, BTreeSet::new())).collect(),
            graph: RelationshipGraph::new(),
            decisions: HashMap::new(),
            session_started_at: session_start,
            dropped_relations: 0,
        }
    }

    /// Rebuild a store from persisted parts.
    ///
    /// Tier lists and each entry's own membership are merged, so the
    /// indexes and the entries agree afterwards. Edges and decisions that
    /// refer to missing entries are discarded.
    pub fn from_parts(
        entries: impl IntoIterator<Item = ContextEntry>,
        tier_lists: &BTreeMap<Tier, Vec<EntryId>>,
        edges: impl IntoIterator<Item = RelationshipEdge>,
        decisions: impl IntoIterator<Item = DecisionRecord>,
        session_start: DateTime<Utc>,
        dropped_relations: u64,
    ) -> Self {
        let mut store = Self::new(session_start);
        store.dropped_relations = dropped_relations;

        for mut entry in entries {
            for (tier, ids) in tier_lists {
                if ids.contains(&entry.id) {
                    entry.tiers.insert(*tier);
                }
            }
            if entry.tiers.is_empty() {
                continue;
            }
            for tier in &entry.tiers {
                store.tiers.entry(*tier).or_default().insert(entry.id);
            }
            store.entries.insert(entry.id, entry);
        }

        let entries = &store.entries;
        store.graph = RelationshipGraph::from_edges(edges.into_iter().filter_map(|mut edge| {
            edge.evidence.retain(|id| entries.contains_key(id));
            let endpoints_live = [&edge.source, &edge.target]
                .iter()
                .all(|n| n.entry_id().map_or(true, |id| entries.contains_key(&id)));
            (endpoints_live && !edge.evidence.is_empty()).then_some(edge)
        }));

        for record in decisions {
            if store.entries.contains_key(&record.entry_id) {
                store.decisions.insert(record.entry_id, record);
            }
        }

        store
    }

    // ==================== Entry Operations ====================

    /// Insert a fully built entry. Fails if the id is already present.
    pub fn insert_entry(&mut self, entry: ContextEntry) -> Result<EntryId> {
        if self.entries.contains_key(&entry.id) {
            return Err(Error::Internal(format!("duplicate entry id {}", entry.id)));
        }
        let id = entry.id;
        for tier in &entry.tiers {
            self.tiers.entry(*tier).or_default().insert(id);
        }
        self.entries.insert(id, entry);
        Ok(id)
    }

    pub fn get(&self, id: &EntryId) -> Option<&ContextEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.values()
    }

    /// Ids of the members of a tier, in id order.
    pub fn tier_ids(&self, tier: Tier) -> Vec<EntryId> {
        self.tiers
            .get(&tier)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entries that belong to at least one of `tiers`, each listed once.
    pub fn entries_in(&self, tiers: &[Tier]) -> Vec<&ContextEntry> {
        let mut ids: BTreeSet<EntryId> = BTreeSet::new();
        for tier in tiers {
            if let Some(members) = self.tiers.get(tier) {
                ids.extend(members.iter().copied());
            }
        }
        ids.iter().filter_map(|id| self.entries.get(id)).collect()
    }

    /// Add tier membership to an existing entry.
    ///
    /// Returns `false` if the entry was already a member.
    pub fn promote(&mut self, id: &EntryId, tier: Tier) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let added = entry.tiers.insert(tier);
        self.tiers.entry(tier).or_default().insert(*id);
        Ok(added)
    }

    /// Drop one tier's claim on an entry. The entry itself stays.
    pub fn remove_membership(&mut self, id: &EntryId, tier: Tier) -> bool {
        if let Some(members) = self.tiers.get_mut(&tier) {
            members.remove(id);
        }
        self.entries
            .get_mut(id)
            .map(|entry| entry.tiers.remove(&tier))
            .unwrap_or(false)
    }

    /// Physically remove an entry that no tier claims, cascading to its
    /// edges and decision record.
    ///
    /// Returns the number of edges removed, or `None` when the entry is
    /// missing or still a member of some tier.
    pub fn collect(&mut self, id: &EntryId) -> Option<usize> {
        match self.entries.get(id) {
            Some(entry) if entry.tiers.is_empty() => {}
            _ => return None,
        }
        self.entries.remove(id);
        self.decisions.remove(id);
        Some(self.graph.remove_entry(id))
    }

    // ==================== Graph Operations ====================

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// Link relations observed by `entry_id` into the graph.
    pub fn link(
        &mut self,
        entry_id: EntryId,
        relations: impl IntoIterator<Item = ExtractedRelation>,
        now: DateTime<Utc>,
    ) -> LinkReport {
        let entries = &self.entries;
        let report = self
            .graph
            .link_entities(entry_id, relations, |id| entries.contains_key(id), now);
        self.dropped_relations += report.dropped_count() as u64;
        report
    }

    /// Count relations an extractor could not parse.
    pub fn record_dropped(&mut self, count: usize) {
        self.dropped_relations += count as u64;
    }

    pub fn dropped_relations(&self) -> u64 {
        self.dropped_relations
    }

    // ==================== Decision Operations ====================

    pub fn insert_decision(&mut self, record: DecisionRecord) -> Result<()> {
        if !self.entries.contains_key(&record.entry_id) {
            return Err(Error::NotFound(record.entry_id.to_string()));
        }
        self.decisions.insert(record.entry_id, record);
        Ok(())
    }

    pub fn decision(&self, id: &EntryId) -> Option<&DecisionRecord> {
        self.decisions.get(id)
    }

    pub fn decisions(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.decisions.values()
    }

    // ==================== Session ====================

    pub fn session_started_at(&self) -> DateTime<Utc> {
        self.session_started_at
    }

    /// Start a new session; earlier Immediate entries become stale.
    pub fn begin_session(&mut self, now: DateTime<Utc>) {
        self.session_started_at = now;
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> StoreStats {
        let mut entries_by_kind = BTreeMap::new();
        for entry in self.entries.values() {
            *entries_by_kind.entry(entry.kind).or_insert(0) += 1;
        }
        StoreStats {
            total_entries: self.entries.len(),
            entries_by_tier: self.tiers.iter().map(|(t, ids)| (*t, ids.len())).collect(),
            entries_by_kind,
            total_edges: self.graph.len(),
            decisions: self.decisions.len(),
            dropped_relations: self.dropped_relations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, RelationKind};
    use serde_json::json;

    fn entry(kind: EventKind) -> ContextEntry {
        new_entry(kind, Payload::empty(), EntryMetadata::new(), Utc::now())
    }

    #[test]
    fn test_initial_tier_placement() {
        let milestone = entry(EventKind::Milestone);
        assert!(milestone.in_tier(Tier::Immediate));
        assert!(milestone.in_tier(Tier::LongTerm));
        assert!(!milestone.in_tier(Tier::ShortTerm));

        let error = entry(EventKind::Error);
        assert!(error.in_tier(Tier::Immediate));
        assert!(error.in_tier(Tier::ShortTerm));
        assert!(!error.in_tier(Tier::LongTerm));

        let generic = entry(EventKind::Generic);
        assert_eq!(generic.tiers.len(), 1);
        assert_eq!(generic.significance, 0.1);
    }

    #[test]
    fn test_payload_bonus_can_cross_threshold() {
        let big = json!({ "diff": "x".repeat(2_500) });
        let entry = new_entry(EventKind::CodeChange, Payload::new(big), EntryMetadata::new(), Utc::now());
        assert!(entry.significance >= 0.5);
        assert!(entry.in_tier(Tier::ShortTerm));
    }

    #[test]
    fn test_insert_and_tier_index() {
        let mut store = ContextStore::default();
        let id = store.insert_entry(entry(EventKind::Milestone)).unwrap();

        assert_eq!(store.tier_ids(Tier::LongTerm), vec![id]);
        assert_eq!(store.entries_in(&Tier::QUERYABLE).len(), 1);
        assert!(store.tier_ids(Tier::Institutional).is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut store = ContextStore::default();
        let e = entry(EventKind::Generic);
        store.insert_entry(e.clone()).unwrap();
        assert!(store.insert_entry(e).is_err());
    }

    #[test]
    fn test_collect_requires_no_membership() {
        let mut store = ContextStore::default();
        let id = store.insert_entry(entry(EventKind::Error)).unwrap();
        store.link(
            id,
            vec![ExtractedRelation::between_entities("a", "b", RelationKind::Topical, 0.4)],
            Utc::now(),
        );

        assert!(store.remove_membership(&id, Tier::Immediate));
        assert_eq!(store.collect(&id), None);
        assert!(store.contains(&id));

        store.remove_membership(&id, Tier::ShortTerm);
        assert_eq!(store.collect(&id), Some(1));
        assert!(!store.contains(&id));
        assert!(store.graph().is_empty());
    }

    #[test]
    fn test_link_counts_dropped() {
        let mut store = ContextStore::default();
        let id = store.insert_entry(entry(EventKind::Generic)).unwrap();
        let report = store.link(
            id,
            vec![
                ExtractedRelation::new(
                    GraphNode::Entry(EntryId::new()),
                    GraphNode::Entry(id),
                    RelationKind::Reference,
                    0.5,
                ),
                ExtractedRelation::between_entities("x", "x", RelationKind::Topical, 0.5),
            ],
            Utc::now(),
        );
        assert_eq!(report.accepted, 0);
        assert_eq!(store.dropped_relations(), 2);
    }

    #[test]
    fn test_promote_unknown_entry() {
        let mut store = ContextStore::default();
        assert!(matches!(
            store.promote(&EntryId::new(), Tier::Institutional),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_from_parts_drops_dangling_references() {
        let kept = entry(EventKind::Milestone);
        let gone = EntryId::new();
        let now = Utc::now();

        let mut evidence = BTreeSet::new();
        evidence.insert(gone);
        let dangling = RelationshipEdge {
            source: GraphNode::entity("a"),
            target: GraphNode::entity("b"),
            kind: RelationKind::Topical,
            weight: 0.5,
            evidence,
            first_seen: now,
            last_seen: now,
        };

        let mut tiers = BTreeMap::new();
        tiers.insert(Tier::Institutional, vec![kept.id]);
        let store = ContextStore::from_parts(vec![kept.clone()], &tiers, vec![dangling], vec![], now, 3);

        assert!(store.get(&kept.id).unwrap().in_tier(Tier::Institutional));
        assert_eq!(store.tier_ids(Tier::Institutional), vec![kept.id]);
        assert!(store.graph().is_empty());
        assert_eq!(store.dropped_relations(), 3);
    }
}

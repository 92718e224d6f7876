//! Weighted relationship graph over entries and entities.
//!
//! The graph is an adjacency structure keyed by node identity. Edges are
//! undirected and keyed by `(source, target, kind)` with normalized
//! endpoints. Repeated observations of the same edge keep the strongest
//! weight, so a weak observation never overwrites a stronger one.
//!
//! Every edge records the entries that observed it. When an entry is
//! removed, edges that use it as an endpoint go away, and edges left without
//! any observing entry go away too.

pub mod extract;
mod types;

pub use extract::{EntityExtractor, Extraction, PayloadEntityExtractor};
pub use types::{
    DropReason, EdgeKey, ExtractedRelation, GraphNode, LinkReport, RelationKind, RelationshipEdge,
};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::memory::EntryId;

/// Relationship graph with edge, adjacency and evidence indexes.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: HashMap<EdgeKey, RelationshipEdge>,
    adjacency: HashMap<GraphNode, HashSet<EdgeKey>>,
    evidence: HashMap<EntryId, HashSet<EdgeKey>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a persisted edge list.
    pub fn from_edges(edges: impl IntoIterator<Item = RelationshipEdge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.insert_edge(edge);
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges in key order.
    pub fn edges(&self) -> Vec<&RelationshipEdge> {
        let mut keys: Vec<&EdgeKey> = self.edges.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| self.edges.get(k)).collect()
    }

    /// Look up a single edge.
    pub fn edge(&self, a: &GraphNode, b: &GraphNode, kind: RelationKind) -> Option<&RelationshipEdge> {
        self.edges.get(&EdgeKey::new(a.clone(), b.clone(), kind))
    }

    /// Upsert the relations observed by `entry_id`.
    ///
    /// Malformed relations are dropped and reported; the rest are applied.
    /// `entry_exists` decides whether an `Entry` endpoint is live.
    pub fn link_entities<F>(
        &mut self,
        entry_id: EntryId,
        relations: impl IntoIterator<Item = ExtractedRelation>,
        entry_exists: F,
        now: DateTime<Utc>,
    ) -> LinkReport
    where
        F: Fn(&EntryId) -> bool,
    {
        let mut report = LinkReport::default();

        for relation in relations {
            if let Some(reason) = check_relation(&relation, &entry_exists) {
                report.dropped.push(reason);
                continue;
            }

            let key = EdgeKey::new(relation.source, relation.target, relation.kind);
            match self.edges.get_mut(&key) {
                Some(edge) => {
                    edge.weight = edge.weight.max(relation.strength);
                    edge.last_seen = now;
                    edge.evidence.insert(entry_id);
                }
                None => {
                    let mut evidence = BTreeSet::new();
                    evidence.insert(entry_id);
                    self.insert_edge(RelationshipEdge {
                        source: key.source.clone(),
                        target: key.target.clone(),
                        kind: key.kind,
                        weight: relation.strength,
                        evidence,
                        first_seen: now,
                        last_seen: now,
                    });
                }
            }
            self.evidence.entry(entry_id).or_default().insert(key);
            report.accepted += 1;
        }

        report
    }

    /// Edges that use the entry as an endpoint or were observed by it.
    pub fn edges_touching(&self, entry_id: &EntryId) -> Vec<&RelationshipEdge> {
        let mut keys: BTreeSet<&EdgeKey> = BTreeSet::new();
        if let Some(adj) = self.adjacency.get(&GraphNode::Entry(*entry_id)) {
            keys.extend(adj.iter());
        }
        if let Some(observed) = self.evidence.get(entry_id) {
            keys.extend(observed.iter());
        }
        keys.into_iter().filter_map(|k| self.edges.get(k)).collect()
    }

    /// Number of distinct neighbours of a node.
    pub fn degree(&self, node: &GraphNode) -> usize {
        self.adjacency
            .get(node)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.other(node))
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0)
    }

    /// Distinct nodes, other than the entry itself, reachable through
    /// [`edges_touching`](Self::edges_touching).
    pub fn entry_degree(&self, entry_id: &EntryId) -> usize {
        let me = GraphNode::Entry(*entry_id);
        let mut nodes: HashSet<&GraphNode> = HashSet::new();
        for edge in self.edges_touching(entry_id) {
            nodes.insert(&edge.source);
            nodes.insert(&edge.target);
        }
        nodes.remove(&me);
        nodes.len()
    }

    /// Entity nodes ordered by degree, highest first.
    pub fn top_entities(&self, limit: usize) -> Vec<(String, usize)> {
        let mut entities: Vec<(String, usize)> = self
            .adjacency
            .keys()
            .filter_map(|node| match node {
                GraphNode::Entity(name) => Some((name.clone(), self.degree(node))),
                GraphNode::Entry(_) => None,
            })
            .collect();
        entities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entities.truncate(limit);
        entities
    }

    /// Edge counts per relation kind.
    pub fn kind_counts(&self) -> BTreeMap<RelationKind, usize> {
        let mut counts = BTreeMap::new();
        for key in self.edges.keys() {
            *counts.entry(key.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Remove every trace of an entry. Returns the number of edges removed.
    pub fn remove_entry(&mut self, entry_id: &EntryId) -> usize {
        let mut removed = 0;

        if let Some(keys) = self.adjacency.remove(&GraphNode::Entry(*entry_id)) {
            for key in keys {
                if self.remove_edge(&key) {
                    removed += 1;
                }
            }
        }

        if let Some(keys) = self.evidence.remove(entry_id) {
            for key in keys {
                let orphaned = match self.edges.get_mut(&key) {
                    Some(edge) => {
                        edge.evidence.remove(entry_id);
                        edge.evidence.is_empty()
                    }
                    None => false,
                };
                if orphaned && self.remove_edge(&key) {
                    removed += 1;
                }
            }
        }

        removed
    }

    /// Whether any edge still refers to the entry.
    pub fn references(&self, entry_id: &EntryId) -> bool {
        let node = GraphNode::Entry(*entry_id);
        self.edges
            .values()
            .any(|e| e.evidence.contains(entry_id) || e.touches(&node))
    }

    fn insert_edge(&mut self, edge: RelationshipEdge) {
        let key = edge.key();
        self.adjacency
            .entry(key.source.clone())
            .or_default()
            .insert(key.clone());
        self.adjacency
            .entry(key.target.clone())
            .or_default()
            .insert(key.clone());
        for id in &edge.evidence {
            self.evidence.entry(*id).or_default().insert(key.clone());
        }
        self.edges.insert(key, edge);
    }

    fn remove_edge(&mut self, key: &EdgeKey) -> bool {
        let Some(edge) = self.edges.remove(key) else {
            return false;
        };
        for node in [&key.source, &key.target] {
            if let Some(keys) = self.adjacency.get_mut(node) {
                keys.remove(key);
                if keys.is_empty() {
                    self.adjacency.remove(node);
                }
            }
        }
        for id in &edge.evidence {
            if let Some(keys) = self.evidence.get_mut(id) {
                keys.remove(key);
                if keys.is_empty() {
                    self.evidence.remove(id);
                }
            }
        }
        true
    }
}

fn check_relation<F>(relation: &ExtractedRelation, entry_exists: &F) -> Option<DropReason>
where
    F: Fn(&EntryId) -> bool,
{
    if !relation.strength.is_finite() || !(0.0..=1.0).contains(&relation.strength) {
        return Some(DropReason::StrengthOutOfRange);
    }
    for node in [&relation.source, &relation.target] {
        match node {
            GraphNode::Entity(name) if name.trim().is_empty() => {
                return Some(DropReason::EmptyEntity);
            }
            GraphNode::Entry(id) if !entry_exists(id) => return Some(DropReason::UnknownEntry),
            _ => {}
        }
    }
    if relation.source == relation.target {
        return Some(DropReason::SelfPair);
    }
    None
}

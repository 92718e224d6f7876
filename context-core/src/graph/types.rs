//! Type definitions for the relationship graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::memory::EntryId;

/// A node in the relationship graph.
///
/// Entries are referenced by id only; the graph never holds entry data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    /// A stored context entry
    Entry(EntryId),
    /// A named entity mentioned by entries (service, person, component, ...)
    Entity(String),
}

impl GraphNode {
    pub fn entity(name: impl Into<String>) -> Self {
        Self::Entity(name.into())
    }

    pub fn entry_id(&self) -> Option<EntryId> {
        match self {
            Self::Entry(id) => Some(*id),
            Self::Entity(_) => None,
        }
    }
}

impl From<EntryId> for GraphNode {
    fn from(id: EntryId) -> Self {
        Self::Entry(id)
    }
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry(id) => write!(f, "entry:{}", id),
            Self::Entity(name) => write!(f, "{}", name),
        }
    }
}

/// Kind of relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Nodes are about the same subject
    Topical,
    /// One node caused or explains the other
    Causal,
    /// Nodes follow each other in time
    Sequential,
    /// A decision references prior context
    Reference,
}

impl RelationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "topical" => Some(Self::Topical),
            "causal" => Some(Self::Causal),
            "sequential" => Some(Self::Sequential),
            "reference" => Some(Self::Reference),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topical => write!(f, "topical"),
            Self::Causal => write!(f, "causal"),
            Self::Sequential => write!(f, "sequential"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

/// Identity of an undirected edge: endpoints normalized so `source < target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: GraphNode,
    pub target: GraphNode,
    pub kind: RelationKind,
}

impl EdgeKey {
    pub fn new(a: GraphNode, b: GraphNode, kind: RelationKind) -> Self {
        if a <= b {
            Self {
                source: a,
                target: b,
                kind,
            }
        } else {
            Self {
                source: b,
                target: a,
                kind,
            }
        }
    }

    /// The endpoint opposite `node`, if `node` is an endpoint.
    pub fn other(&self, node: &GraphNode) -> Option<&GraphNode> {
        if &self.source == node {
            Some(&self.target)
        } else if &self.target == node {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// A weighted, typed, undirected edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source: GraphNode,
    pub target: GraphNode,
    pub kind: RelationKind,
    /// Strongest observed strength, in [0, 1]
    pub weight: f64,
    /// Entries whose capture observed this relationship
    pub evidence: BTreeSet<EntryId>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RelationshipEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone(), self.kind)
    }

    pub fn touches(&self, node: &GraphNode) -> bool {
        &self.source == node || &self.target == node
    }
}

/// One relationship observation produced by an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelation {
    pub source: GraphNode,
    pub target: GraphNode,
    pub kind: RelationKind,
    pub strength: f64,
}

impl ExtractedRelation {
    pub fn new(source: GraphNode, target: GraphNode, kind: RelationKind, strength: f64) -> Self {
        Self {
            source,
            target,
            kind,
            strength,
        }
    }

    /// Relationship between two named entities.
    pub fn between_entities(
        a: impl Into<String>,
        b: impl Into<String>,
        kind: RelationKind,
        strength: f64,
    ) -> Self {
        Self::new(GraphNode::entity(a), GraphNode::entity(b), kind, strength)
    }
}

/// Why an extracted relation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    SelfPair,
    StrengthOutOfRange,
    EmptyEntity,
    UnknownEntry,
    Malformed,
}

/// Outcome of linking one entry's relations into the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub accepted: usize,
    pub dropped: Vec<DropReason>,
}

impl LinkReport {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_key_normalized() {
        let a = GraphNode::entity("api");
        let b = GraphNode::entity("db");
        assert_eq!(
            EdgeKey::new(a.clone(), b.clone(), RelationKind::Topical),
            EdgeKey::new(b.clone(), a.clone(), RelationKind::Topical)
        );
        assert_ne!(
            EdgeKey::new(a.clone(), b.clone(), RelationKind::Topical),
            EdgeKey::new(a, b, RelationKind::Causal)
        );
    }

    #[test]
    fn test_edge_key_other() {
        let key = EdgeKey::new(GraphNode::entity("a"), GraphNode::entity("b"), RelationKind::Causal);
        assert_eq!(key.other(&GraphNode::entity("a")), Some(&GraphNode::entity("b")));
        assert_eq!(key.other(&GraphNode::entity("c")), None);
    }
}

//! Relationship extraction from entry payloads.
//!
//! Extraction is pluggable: the graph only consumes [`ExtractedRelation`]s.
//! The default [`PayloadEntityExtractor`] reads explicit relationships and
//! co-mentioned entities from the payload document.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::types::{ExtractedRelation, GraphNode, RelationKind};
use crate::memory::ContextEntry;

/// Default strength for entities mentioned together in one entry.
pub const DEFAULT_CO_MENTION_STRENGTH: f64 = 0.5;

/// Output of an extractor run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub relations: Vec<ExtractedRelation>,
    /// Items the extractor could not interpret at all
    pub malformed: usize,
}

/// Produces relationship observations for a newly captured entry.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, entry: &ContextEntry) -> Extraction;
}

/// Extractor that reads structured hints out of the payload.
///
/// - `relationships`: array of `{source, target, kind, strength}` objects
/// - `entities`: array of entity names, paired as co-mentions
/// - `#tag` and `@mention` tokens in any string value, paired as co-mentions
#[derive(Debug, Clone)]
pub struct PayloadEntityExtractor {
    co_mention_strength: f64,
}

impl Default for PayloadEntityExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_CO_MENTION_STRENGTH)
    }
}

impl PayloadEntityExtractor {
    pub fn new(co_mention_strength: f64) -> Self {
        Self {
            co_mention_strength,
        }
    }

    fn mention_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            Regex::new(r"(?:^|[^\w])[#@]([A-Za-z0-9][A-Za-z0-9_\-./]*)").expect("valid mention regex")
        })
    }

    fn explicit_relations(&self, payload: &Value, out: &mut Extraction) {
        let Some(items) = payload.get("relationships").and_then(Value::as_array) else {
            return;
        };
        for item in items {
            match parse_relationship(item) {
                Some(relation) => out.relations.push(relation),
                None => out.malformed += 1,
            }
        }
    }

    fn mentioned_entities(&self, payload: &Value) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();
        if let Some(items) = payload.get("entities").and_then(Value::as_array) {
            for item in items {
                if let Some(name) = item.as_str() {
                    let name = name.trim();
                    if !name.is_empty() {
                        entities.insert(name.to_string());
                    }
                }
            }
        }
        collect_mentions(payload, Self::mention_pattern(), &mut entities);
        entities
    }
}

impl EntityExtractor for PayloadEntityExtractor {
    fn extract(&self, entry: &ContextEntry) -> Extraction {
        let mut out = Extraction::default();
        let payload = &entry.payload.0;

        self.explicit_relations(payload, &mut out);

        let entities: Vec<String> = self.mentioned_entities(payload).into_iter().collect();
        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                out.relations.push(ExtractedRelation::between_entities(
                    a.clone(),
                    b.clone(),
                    RelationKind::Topical,
                    self.co_mention_strength,
                ));
            }
        }

        out
    }
}

fn parse_relationship(item: &Value) -> Option<ExtractedRelation> {
    let source = item.get("source")?.as_str()?;
    let target = item.get("target")?.as_str()?;
    let kind = match item.get("kind") {
        Some(v) => RelationKind::parse(v.as_str()?)?,
        None => RelationKind::Topical,
    };
    let strength = item.get("strength")?.as_f64()?;
    Some(ExtractedRelation::new(
        GraphNode::entity(source.trim()),
        GraphNode::entity(target.trim()),
        kind,
        strength,
    ))
}

fn collect_mentions(value: &Value, pattern: &Regex, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for cap in pattern.captures_iter(s) {
                if let Some(m) = cap.get(1) {
                    out.insert(m.as_str().trim_end_matches(['.', '/']).to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_mentions(v, pattern, out)),
        Value::Object(map) => map.values().for_each(|v| collect_mentions(v, pattern, out)),
        _ => {}
    }
}

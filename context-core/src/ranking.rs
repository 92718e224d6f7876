//! Relevance ranking of entries against a text query.
//!
//! ```text
//! score = w_r * exp(-age / decay) + w_s * significance
//!       + w_c * min(degree / cap, 1) + w_t * content_relevance
//! ```
//!
//! Results are sorted by score, newest first on ties.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::config::RankingWeights;
use crate::memory::{ContextEntry, ContextStore, Tier};

/// Pluggable lexical relevance between a query and an entry.
///
/// Implementations must return a value in `[0, 1]`.
pub trait ContentRelevance: Send + Sync {
    fn relevance(&self, projection: &str, terms: &[String]) -> f64;
}

/// Fraction of distinct query terms found in the entry's text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlap;

impl ContentRelevance for LexicalOverlap {
    fn relevance(&self, projection: &str, terms: &[String]) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let hits = terms.iter().filter(|t| projection.contains(t.as_str())).count();
        hits as f64 / terms.len() as f64
    }
}

/// An entry with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub entry: ContextEntry,
    pub score: f64,
}

/// Lower-cased, de-duplicated whitespace-separated terms.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Combine the score components.
///
/// `content` is `None` for empty queries, which drops that term entirely.
pub fn relevance_score(
    weights: &RankingWeights,
    age: Duration,
    significance: f64,
    degree: usize,
    content: Option<f64>,
) -> f64 {
    let age_secs = age.num_milliseconds().max(0) as f64 / 1000.0;
    let decay_secs = weights.decay_days * 86_400.0;
    let recency = (-age_secs / decay_secs).exp();
    let connectivity = (degree as f64 / weights.degree_cap).min(1.0);

    let mut score = weights.recency * recency
        + weights.significance * significance
        + weights.connectivity * connectivity;
    if let Some(content) = content {
        score += weights.content * content.clamp(0.0, 1.0);
    }
    score
}

/// Rank entries from `tiers` against `text`.
///
/// An entry is a candidate when any query term is a substring of its text
/// projection. An empty query ranks every entry in `tiers`.
pub fn rank(
    store: &ContextStore,
    tiers: &[Tier],
    text: &str,
    max_results: usize,
    weights: &RankingWeights,
    relevance: &dyn ContentRelevance,
    now: DateTime<Utc>,
) -> Vec<RankedEntry> {
    if max_results == 0 {
        return Vec::new();
    }
    let terms = query_terms(text);

    let mut ranked: Vec<RankedEntry> = store
        .entries_in(tiers)
        .into_iter()
        .filter_map(|entry| {
            let content = if terms.is_empty() {
                None
            } else {
                let projection = entry.text_projection();
                if !terms.iter().any(|t| projection.contains(t.as_str())) {
                    return None;
                }
                Some(relevance.relevance(&projection, &terms))
            };
            let degree = store.graph().entry_degree(&entry.id);
            let score = relevance_score(
                weights,
                now - entry.timestamp,
                entry.significance,
                degree,
                content,
            );
            Some(RankedEntry {
                entry: entry.clone(),
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    ranked.truncate(max_results);
    ranked
}

//! Property-based tests for scoring, ranking and the relationship graph.
//!
//! - Significance always lands in `[0.1, 1]` and never drops as the
//!   payload grows
//! - With everything else fixed, an older entry scores strictly lower
//! - Repeated edge observations keep the maximum weight regardless of order
//! - Removing an entry leaves no edge referring to it

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use crate::config::RankingWeights;
    use crate::graph::{ExtractedRelation, GraphNode, RelationKind, RelationshipGraph};
    use crate::memory::scoring::significance;
    use crate::memory::types::{EntryId, EventKind};
    use crate::ranking::relevance_score;

    fn event_kind() -> impl Strategy<Value = EventKind> {
        prop::sample::select(EventKind::ALL.to_vec())
    }

    fn strength() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(0.0),
            Just(1.0),
            0.0f64..=1.0f64,
        ]
    }

    fn entity() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["api", "db", "cache", "auth", "queue"]).prop_map(String::from)
    }

    // =========================================================================
    // Significance
    // =========================================================================

    proptest! {
        #[test]
        fn significance_is_bounded(kind in event_kind(), size in 0usize..5_000_000) {
            let s = significance(kind, size);
            prop_assert!((0.1..=1.0).contains(&s), "significance({:?}, {}) = {}", kind, size, s);
        }

        #[test]
        fn significance_is_monotone_in_payload(
            kind in event_kind(),
            small in 0usize..100_000,
            extra in 0usize..100_000
        ) {
            prop_assert!(significance(kind, small) <= significance(kind, small + extra));
        }
    }

    // =========================================================================
    // Ranking
    // =========================================================================

    proptest! {
        /// Within a few decay periods the exponential has not underflowed,
        /// so recency strictly separates the two ages.
        #[test]
        fn older_entries_score_strictly_lower(
            younger_mins in 0i64..20_000,
            gap_mins in 1i64..20_000,
            sig in 0.0f64..=1.0f64,
            degree in 0usize..20,
            content in 0.0f64..=1.0f64
        ) {
            let weights = RankingWeights::default();
            let young = relevance_score(
                &weights,
                Duration::minutes(younger_mins),
                sig,
                degree,
                Some(content),
            );
            let old = relevance_score(
                &weights,
                Duration::minutes(younger_mins + gap_mins),
                sig,
                degree,
                Some(content),
            );
            prop_assert!(old < young, "age +{}m: {} !< {}", gap_mins, old, young);
        }

        #[test]
        fn score_is_bounded_by_weight_sum(
            age_hours in 0i64..10_000,
            sig in 0.0f64..=1.0f64,
            degree in 0usize..1_000,
            content in 0.0f64..=1.0f64
        ) {
            let weights = RankingWeights::default();
            let score = relevance_score(
                &weights,
                Duration::hours(age_hours),
                sig,
                degree,
                Some(content),
            );
            let max = weights.recency + weights.significance + weights.connectivity + weights.content;
            prop_assert!(score >= 0.0 && score <= max + 1e-12);
        }
    }

    // =========================================================================
    // Graph
    // =========================================================================

    proptest! {
        #[test]
        fn edge_weight_is_max_of_observations(
            strengths in prop::collection::vec(strength(), 1..8)
        ) {
            let mut graph = RelationshipGraph::new();
            let now = Utc::now();
            for s in &strengths {
                let entry = EntryId::new();
                graph.link_entities(
                    entry,
                    vec![ExtractedRelation::between_entities("api", "db", RelationKind::Causal, *s)],
                    |_| true,
                    now,
                );
            }

            let expected = strengths.iter().copied().fold(0.0f64, f64::max);
            let edge = graph
                .edge(&GraphNode::entity("db"), &GraphNode::entity("api"), RelationKind::Causal)
                .unwrap();
            prop_assert_eq!(edge.weight, expected);
            prop_assert_eq!(edge.evidence.len(), strengths.len());
        }

        #[test]
        fn removed_entry_leaves_no_references(
            pairs in prop::collection::vec((entity(), entity(), strength()), 1..12),
            victim in 0usize..3
        ) {
            let mut graph = RelationshipGraph::new();
            let entries: Vec<EntryId> = (0..3).map(|_| EntryId::new()).collect();
            let now = Utc::now();
            for (i, (a, b, s)) in pairs.iter().enumerate() {
                graph.link_entities(
                    entries[i % entries.len()],
                    vec![ExtractedRelation::between_entities(a.as_str(), b.as_str(), RelationKind::Topical, *s)],
                    |_| true,
                    now,
                );
            }

            graph.remove_entry(&entries[victim]);
            prop_assert!(!graph.references(&entries[victim]));
            for edge in graph.edges() {
                prop_assert!(!edge.evidence.is_empty());
            }
        }
    }
}

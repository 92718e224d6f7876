//! Significance scoring for captured events.

use super::types::EventKind;

/// Lowest significance any entry can receive.
pub const SIGNIFICANCE_FLOOR: f64 = 0.1;

/// Cap on the payload-size bonus.
pub const MAX_PAYLOAD_BONUS: f64 = 0.3;

/// Payload bytes that earn one full point of bonus before capping.
const PAYLOAD_BONUS_SCALE: f64 = 10_000.0;

/// Significance at or above which an entry enters the LongTerm tier.
pub const LONG_TERM_THRESHOLD: f64 = 0.8;

/// Significance at or above which an entry enters the ShortTerm tier.
pub const SHORT_TERM_THRESHOLD: f64 = 0.5;

/// Score an event: base weight for its kind plus a capped payload bonus.
///
/// The result is always in `[SIGNIFICANCE_FLOOR, 1.0]`.
pub fn significance(kind: EventKind, payload_size: usize) -> f64 {
    let bonus = (payload_size as f64 / PAYLOAD_BONUS_SCALE).min(MAX_PAYLOAD_BONUS);
    (kind.base_weight() + bonus).clamp(SIGNIFICANCE_FLOOR, 1.0)
}

//! Tiered context memory.
//!
//! Entries live in one or more retention tiers:
//!
//! - **Immediate**: everything captured in the current session
//! - **ShortTerm**: moderately significant entries from the last days
//! - **LongTerm**: highly significant entries, bounded by capacity
//! - **Institutional**: cross-project knowledge, never auto-expired
//!
//! Membership is additive. A milestone sits in both Immediate and LongTerm
//! until the session ends, after which only LongTerm claims it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use context_core::memory::{new_entry, ContextStore, EventKind, Payload, EntryMetadata, Tier};
//!
//! let mut store = ContextStore::default();
//! let entry = new_entry(EventKind::Milestone, Payload::empty(), EntryMetadata::new(), Utc::now());
//! let id = store.insert_entry(entry)?;
//! assert!(store.get(&id).unwrap().in_tier(Tier::LongTerm));
//! ```

#[cfg(test)]
mod proptest;
pub mod retention;
pub mod scoring;
mod store;
mod types;

pub use retention::{retention_state, sweep, RetentionState, SweepReport};
pub use scoring::significance;
pub use store::{new_entry, ContextStore, StoreStats};
pub use types::{ContextEntry, EntryId, EntryMetadata, EventKind, Payload, Tier};

//! # context-core
//!
//! Tiered context memory and relevance ranking for project context
//! managers.
//!
//! ## Core Components
//!
//! - **Memory**: significance scoring, tiered entry store and retention sweeps
//! - **Graph**: weighted relationships between entries and entities
//! - **Ranking**: recency, significance, connectivity and content scoring
//! - **Decisions**: structured decision records with follow-up tracking
//! - **Persistence**: checksummed snapshots to file, SQLite and HTTP backends
//! - **Scheduler**: periodic sweeps and snapshots with graceful shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use context_core::{BackgroundTasks, ContextEngine, DecisionFields, EngineConfig, Impact};
//!
//! let engine = ContextEngine::open(EngineConfig::from_env()).await?;
//! let tasks = BackgroundTasks::start(engine.clone());
//!
//! engine.record_decision(
//!     DecisionFields::new("Move sessions to redis", Impact::High)
//!         .with_follow_up(chrono::Utc::now() + chrono::Duration::days(14)),
//! )?;
//!
//! for decision in engine.list_overdue()? {
//!     println!("overdue: {}", decision.title);
//! }
//!
//! tasks.shutdown().await?;
//! ```

pub mod config;
pub mod decisions;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod persistence;
pub mod ranking;
pub mod scheduler;
pub mod summary;

// Re-exports for convenience
pub use config::{BackendConfig, EngineConfig, RankingWeights, TierAge, TierPolicies, TierPolicy};
pub use decisions::{DecisionFields, DecisionFilter, DecisionRecord, Impact};
pub use engine::ContextEngine;
pub use error::{Error, Result};
pub use graph::{
    EntityExtractor, ExtractedRelation, GraphNode, LinkReport, PayloadEntityExtractor,
    RelationKind, RelationshipEdge, RelationshipGraph,
};
pub use memory::{
    ContextEntry, ContextStore, EntryId, EntryMetadata, EventKind, Payload, StoreStats,
    SweepReport, Tier,
};
pub use persistence::{
    FileBackend, HttpBackend, MemoryBackend, PersistReport, PersistenceManager, RestoreOutcome,
    Snapshot, SnapshotBackend, SqliteBackend, SNAPSHOT_FORMAT_VERSION,
};
pub use ranking::{ContentRelevance, LexicalOverlap, RankedEntry};
pub use scheduler::BackgroundTasks;
pub use summary::{Pattern, SummaryReport, Timeframe};

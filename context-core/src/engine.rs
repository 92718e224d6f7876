//! The context engine: one shared store behind a read/write lock.
//!
//! Writers (`capture`, `record_decision`, `promote`, `sweep`, `restore`)
//! hold the write lock for their whole multi-step update, so readers never
//! see an entry without its edges or a decision entry without its record.
//! Snapshot I/O happens after the lock is released.
//!
//! ## Example
//!
//! ```rust,ignore
//! use context_core::{ContextEngine, EngineConfig, EventKind, Payload, EntryMetadata};
//! use serde_json::json;
//!
//! let engine = ContextEngine::new(EngineConfig::default())?;
//! engine.capture(
//!     EventKind::Error,
//!     Payload::new(json!({"msg": "token refresh failed", "entities": ["auth", "gateway"]})),
//!     EntryMetadata::new().with_session("s-42"),
//! )?;
//!
//! for hit in engine.query("token", 5)? {
//!     println!("{:.3} {}", hit.score, hit.entry.id);
//! }
//! ```

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::decisions::{DecisionFields, DecisionFilter, DecisionRecord};
use crate::error::{Error, Result};
use crate::graph::{EntityExtractor, ExtractedRelation, GraphNode, PayloadEntityExtractor, RelationKind};
use crate::memory::{
    new_entry, sweep, ContextEntry, ContextStore, EntryId, EntryMetadata, EventKind, Payload,
    StoreStats, SweepReport, Tier,
};
use crate::persistence::{PersistReport, PersistenceManager, Snapshot};
use crate::ranking::{rank, ContentRelevance, LexicalOverlap, RankedEntry};
use crate::summary::{self, SummaryReport, Timeframe};

/// Number of related entries a new decision is linked to.
const DECISION_LINKS: usize = 5;

/// Shared handle to the context engine. Clones share state.
#[derive(Clone)]
pub struct ContextEngine {
    store: Arc<RwLock<ContextStore>>,
    config: Arc<EngineConfig>,
    extractor: Arc<dyn EntityExtractor>,
    relevance: Arc<dyn ContentRelevance>,
    persistence: PersistenceManager,
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("config", &self.config)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

impl ContextEngine {
    /// Create an engine with an empty store and the configured backends.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let persistence = PersistenceManager::from_config(&config.backends)?;
        let extractor = PayloadEntityExtractor::new(config.co_mention_strength);
        Ok(Self {
            store: Arc::new(RwLock::new(ContextStore::new(Utc::now()))),
            config: Arc::new(config),
            extractor: Arc::new(extractor),
            relevance: Arc::new(LexicalOverlap),
            persistence,
        })
    }

    /// Create an engine and load the newest usable snapshot.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let engine = Self::new(config)?;
        engine.restore().await?;
        Ok(engine)
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_relevance(mut self, relevance: Arc<dyn ContentRelevance>) -> Self {
        self.relevance = relevance;
        self
    }

    /// Replace the configured backends.
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ContextStore>> {
        self.store
            .read()
            .map_err(|_| Error::Internal("context store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ContextStore>> {
        self.store
            .write()
            .map_err(|_| Error::Internal("context store lock poisoned".to_string()))
    }

    fn check_payload(&self, payload: &Payload) -> Result<()> {
        let size = payload.size_bytes();
        if size > self.config.max_payload_bytes {
            return Err(Error::invalid_event(format!(
                "payload is {} bytes, limit is {}",
                size, self.config.max_payload_bytes
            )));
        }
        Ok(())
    }

    // ==================== Capture ====================

    /// Capture an event. Returns the new entry's id.
    pub fn capture(&self, kind: EventKind, payload: Payload, metadata: EntryMetadata) -> Result<EntryId> {
        self.check_payload(&payload)?;
        let mut entry = new_entry(kind, payload, metadata, Utc::now());
        let relations = self.extract(&entry);

        let mut store = self.write()?;
        entry.timestamp = stamp(&store);
        let id = store.insert_entry(entry)?;
        self.link(&mut store, id, relations);
        Ok(id)
    }

    /// Capture an event whose kind is given by name.
    pub fn capture_tagged(
        &self,
        kind: &str,
        payload: serde_json::Value,
        metadata: EntryMetadata,
    ) -> Result<EntryId> {
        let kind: EventKind = kind.parse()?;
        self.capture(kind, Payload::new(payload), metadata)
    }

    fn extract(&self, entry: &ContextEntry) -> (Vec<ExtractedRelation>, usize) {
        let extraction = self.extractor.extract(entry);
        (extraction.relations, extraction.malformed)
    }

    fn link(&self, store: &mut ContextStore, id: EntryId, (relations, malformed): (Vec<ExtractedRelation>, usize)) {
        let now = Utc::now();
        store.record_dropped(malformed);
        let report = store.link(id, relations, now);
        let dropped = report.dropped_count() + malformed;
        if dropped > 0 {
            warn!(entry = %id, dropped, "Dropped malformed relations");
        }
        debug!(entry = %id, edges = report.accepted, "Captured entry");
    }

    // ==================== Query ====================

    /// Rank Immediate, ShortTerm and LongTerm entries against `text`.
    pub fn query(&self, text: &str, max_results: usize) -> Result<Vec<RankedEntry>> {
        self.query_tiers(&Tier::QUERYABLE, text, max_results)
    }

    /// Cross-project lookup in the Institutional tier.
    pub fn query_institutional(&self, text: &str, max_results: usize) -> Result<Vec<RankedEntry>> {
        self.query_tiers(&[Tier::Institutional], text, max_results)
    }

    fn query_tiers(&self, tiers: &[Tier], text: &str, max_results: usize) -> Result<Vec<RankedEntry>> {
        let store = self.read()?;
        Ok(rank(
            &store,
            tiers,
            text,
            max_results,
            &self.config.ranking,
            self.relevance.as_ref(),
            Utc::now(),
        ))
    }

    // ==================== Decisions ====================

    /// Record a decision and link it to the entries most relevant to its
    /// title.
    pub fn record_decision(&self, fields: DecisionFields) -> Result<EntryId> {
        fields.validate()?;
        let payload = Payload::new(serde_json::to_value(&fields)?);
        self.check_payload(&payload)?;

        let mut entry = new_entry(EventKind::Decision, payload, fields.metadata.clone(), Utc::now());
        let extracted = self.extract(&entry);

        let mut store = self.write()?;
        let now = stamp(&store);
        entry.timestamp = now;
        let related = rank(
            &store,
            &Tier::QUERYABLE,
            &fields.title,
            DECISION_LINKS,
            &self.config.ranking,
            self.relevance.as_ref(),
            now,
        );

        let id = store.insert_entry(entry)?;
        self.link(&mut store, id, extracted);

        let references: Vec<ExtractedRelation> = related
            .iter()
            .map(|hit| {
                ExtractedRelation::new(
                    GraphNode::Entry(id),
                    GraphNode::Entry(hit.entry.id),
                    RelationKind::Reference,
                    hit.score.clamp(0.0, 1.0),
                )
            })
            .collect();
        store.link(id, references, now);

        let linked: BTreeSet<EntryId> = related.iter().map(|hit| hit.entry.id).collect();
        info!(decision = %id, title = %fields.title, linked = linked.len(), "Recorded decision");
        store.insert_decision(DecisionRecord::from_fields(id, now, fields, linked))?;
        Ok(id)
    }

    /// Decisions matching every predicate of `filter`, newest first.
    pub fn decision_history(&self, filter: &DecisionFilter) -> Result<Vec<DecisionRecord>> {
        let store = self.read()?;
        let mut records: Vec<DecisionRecord> = store
            .decisions()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        Ok(records)
    }

    /// Decisions whose follow-up review date has passed.
    pub fn list_overdue(&self) -> Result<Vec<DecisionRecord>> {
        self.list_overdue_at(Utc::now())
    }

    /// Decisions overdue at `now`, earliest review date first.
    pub fn list_overdue_at(&self, now: DateTime<Utc>) -> Result<Vec<DecisionRecord>> {
        let store = self.read()?;
        let mut records: Vec<DecisionRecord> = store
            .decisions()
            .filter(|record| record.is_overdue(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.review_date
                .cmp(&b.review_date)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        Ok(records)
    }

    // ==================== Maintenance ====================

    pub fn generate_summary(&self, timeframe: Timeframe) -> Result<SummaryReport> {
        let store = self.read()?;
        Ok(summary::generate(&store, timeframe, Utc::now()))
    }

    /// Run one retention sweep now.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut store = self.write()?;
        Ok(sweep(
            &mut store,
            &self.config.tiers,
            self.config.promotion_min_degree,
            now,
        ))
    }

    /// Add tier membership, e.g. to publish an entry as Institutional
    /// knowledge.
    pub fn promote(&self, id: &EntryId, tier: Tier) -> Result<bool> {
        self.write()?.promote(id, tier)
    }

    /// Start a new session. Earlier Immediate entries become stale.
    pub fn begin_session(&self) -> Result<()> {
        self.write()?.begin_session(Utc::now());
        Ok(())
    }

    pub fn get(&self, id: &EntryId) -> Result<Option<ContextEntry>> {
        Ok(self.read()?.get(id).cloned())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.read()?.stats())
    }

    // ==================== Persistence ====================

    /// Consistent copy of the whole state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let store = self.read()?;
        Ok(Snapshot::capture(&store, Utc::now()))
    }

    /// Write a snapshot to every backend. Backend failures are reported,
    /// not returned as errors.
    #[instrument(skip_all)]
    pub async fn persist_all(&self) -> Result<PersistReport> {
        let snapshot = self.snapshot()?;
        Ok(self.persistence.persist_all(&snapshot).await)
    }

    /// Replace the state with the first usable snapshot.
    ///
    /// Returns the backend restored from. When no backend has a usable
    /// snapshot the current state is kept and `None` is returned. A
    /// restored store starts a new session, so Immediate entries from the
    /// previous process are stale.
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<Option<String>> {
        let outcome = self.persistence.restore().await;
        let Some(snapshot) = outcome.snapshot else {
            debug!(errors = outcome.errors.len(), "No usable snapshot; keeping current state");
            return Ok(None);
        };
        let mut restored = snapshot.into_store();
        restored.begin_session(Utc::now());
        *self.write()? = restored;
        Ok(outcome.source)
    }
}

/// Capture time for an entry inserted under the write lock. Never earlier
/// than the current session start.
fn stamp(store: &ContextStore) -> DateTime<Utc> {
    Utc::now().max(store.session_started_at())
}

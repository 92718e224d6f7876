//! Snapshot persistence.
//!
//! A [`Snapshot`] is a point-in-time copy of the whole store: tier
//! membership lists, the entry map, the edge list and the decision records.
//! It is taken under the store's read lock and encoded and written after the
//! lock is released.
//!
//! Snapshots are written to every configured [`SnapshotBackend`]
//! independently; one failing backend does not stop the others. Restore
//! reads backends in priority order and uses the first snapshot that
//! decodes.
//!
//! ## Wire format
//!
//! ```text
//! { "format_version": 1, "created_at": "...", "checksum": "<sha256 hex>", "body": "<snapshot JSON>" }
//! ```

mod file;
mod http;
mod sqlite;

pub use file::FileBackend;
pub use http::HttpBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BackendConfig;
use crate::decisions::DecisionRecord;
use crate::error::{Error, Result};
use crate::graph::RelationshipEdge;
use crate::memory::{ContextEntry, ContextStore, EntryId, Tier};

/// Newest snapshot format this build can read and the one it writes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Durable storage for encoded snapshots.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Identifier used in logs and reports.
    fn name(&self) -> String;

    /// Replace the stored snapshot.
    async fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Read the most recent stored snapshot.
    async fn read(&self) -> Result<Vec<u8>>;
}

/// Point-in-time copy of the engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub session_started_at: DateTime<Utc>,
    pub tiers: BTreeMap<Tier, Vec<EntryId>>,
    pub entries: BTreeMap<EntryId, ContextEntry>,
    pub edges: Vec<RelationshipEdge>,
    pub decisions: Vec<DecisionRecord>,
    #[serde(default)]
    pub dropped_relations: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    created_at: DateTime<Utc>,
    checksum: String,
    body: String,
}

fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Snapshot {
    /// Copy the store's state.
    pub fn capture(store: &ContextStore, now: DateTime<Utc>) -> Self {
        let tiers = Tier::ALL
            .iter()
            .map(|tier| (*tier, store.tier_ids(*tier)))
            .collect();
        let entries = store.entries().map(|e| (e.id, e.clone())).collect();
        let edges = store.graph().edges().into_iter().cloned().collect();
        let mut decisions: Vec<DecisionRecord> = store.decisions().cloned().collect();
        decisions.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });

        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: now,
            session_started_at: store.session_started_at(),
            tiers,
            entries,
            edges,
            decisions,
            dropped_relations: store.dropped_relations(),
        }
    }

    /// Rebuild a store from this snapshot.
    pub fn into_store(self) -> ContextStore {
        ContextStore::from_parts(
            self.entries.into_values(),
            &self.tiers,
            self.edges,
            self.decisions,
            self.session_started_at,
            self.dropped_relations,
        )
    }

    /// Encode into the checksummed envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_string(self)?;
        let envelope = SnapshotEnvelope {
            format_version: self.format_version,
            created_at: self.created_at,
            checksum: checksum(&body),
            body,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decode and verify an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)?;
        if envelope.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::UnsupportedFormat {
                found: envelope.format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }
        if checksum(&envelope.body) != envelope.checksum {
            return Err(Error::ChecksumMismatch);
        }
        Ok(serde_json::from_str(&envelope.body)?)
    }
}

/// Result of writing a snapshot to every backend.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl PersistReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a restore attempt.
#[derive(Debug)]
pub struct RestoreOutcome {
    pub snapshot: Option<Snapshot>,
    /// Backend the snapshot came from
    pub source: Option<String>,
    /// Failures from backends tried before the winner, in order
    pub errors: Vec<(String, Error)>,
}

/// Writes snapshots to, and restores them from, a list of backends.
#[derive(Clone, Default)]
pub struct PersistenceManager {
    backends: Vec<Arc<dyn SnapshotBackend>>,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PersistenceManager {
    /// Backends are tried in the given order on restore.
    pub fn new(backends: Vec<Arc<dyn SnapshotBackend>>) -> Self {
        Self { backends }
    }

    /// Build backends from configuration.
    pub fn from_config(configs: &[BackendConfig]) -> Result<Self> {
        let mut backends: Vec<Arc<dyn SnapshotBackend>> = Vec::with_capacity(configs.len());
        for config in configs {
            let backend: Arc<dyn SnapshotBackend> = match config {
                BackendConfig::File { path } => Arc::new(FileBackend::new(path)),
                BackendConfig::Sqlite { path, retain } => {
                    Arc::new(SqliteBackend::open(path)?.with_retain(*retain))
                }
                BackendConfig::Http {
                    url,
                    bearer_token,
                    timeout_ms,
                } => Arc::new(HttpBackend::new(url, bearer_token.clone(), *timeout_ms)?),
            };
            backends.push(backend);
        }
        Ok(Self::new(backends))
    }

    pub fn with_backend(mut self, backend: Arc<dyn SnapshotBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Write the snapshot to every backend. Never fails as a whole.
    #[instrument(skip_all, fields(backends = self.backends.len()))]
    pub async fn persist_all(&self, snapshot: &Snapshot) -> PersistReport {
        let mut report = PersistReport::default();
        if self.backends.is_empty() {
            return report;
        }

        let bytes = match snapshot.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                let message = e.to_string();
                report.failed = self
                    .backends
                    .iter()
                    .map(|b| (b.name(), Error::backend_write(b.name(), &message)))
                    .collect();
                return report;
            }
        };

        let writes = self.backends.iter().map(|backend| {
            let bytes = &bytes;
            async move { (backend.name(), backend.write(bytes).await) }
        });

        for (name, result) in join_all(writes).await {
            match result {
                Ok(()) => report.succeeded.push(name),
                Err(e) => {
                    warn!(backend = %name, "Snapshot write failed: {}", e);
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            bytes = bytes.len(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Snapshot persisted"
        );
        report
    }

    /// Load from the first backend that yields a decodable snapshot.
    #[instrument(skip_all, fields(backends = self.backends.len()))]
    pub async fn restore(&self) -> RestoreOutcome {
        let mut errors = Vec::new();

        for backend in &self.backends {
            let name = backend.name();
            let decoded = match backend.read().await {
                Ok(bytes) => Snapshot::decode(&bytes).map_err(|e| Error::backend_read(&name, e)),
                Err(e) => Err(e),
            };
            match decoded {
                Ok(snapshot) => {
                    info!(backend = %name, entries = snapshot.entries.len(), "Snapshot restored");
                    return RestoreOutcome {
                        snapshot: Some(snapshot),
                        source: Some(name),
                        errors,
                    };
                }
                Err(e) => {
                    warn!(backend = %name, "Snapshot restore failed: {}", e);
                    errors.push((name, e));
                }
            }
        }

        if !self.backends.is_empty() {
            error!("No snapshot backend could be restored");
        } else {
            debug!("No snapshot backends configured");
        }
        RestoreOutcome {
            snapshot: None,
            source: None,
            errors,
        }
    }
}

/// In-process backend, useful for tests and as a hot standby.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    name: String,
    data: RwLock<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Make subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Overwrite the stored bytes directly.
    pub async fn put_raw(&self, bytes: Vec<u8>) {
        *self.data.write().await = Some(bytes);
    }

    pub async fn has_data(&self) -> bool {
        self.data.read().await.is_some()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    fn name(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::backend_write(self.name(), "write disabled"));
        }
        *self.data.write().await = Some(bytes.to_vec());
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::backend_read(self.name(), "read disabled"));
        }
        self.data
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::backend_read(self.name(), "no snapshot stored"))
    }
}

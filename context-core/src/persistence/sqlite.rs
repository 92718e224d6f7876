//! SQLite snapshot backend.
//!
//! Snapshots are appended to a `snapshots` table; only the most recent
//! `retain` rows are kept.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::SnapshotBackend;
use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            byte_len INTEGER NOT NULL,
            data BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Keeps the last few snapshots in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    retain: usize,
}

impl SqliteBackend {
    /// Open or create a database file. `~` is expanded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let raw = path.as_ref().to_string_lossy();
        let path = PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let conn = Connection::open(&path)?;
        Self::with_connection(conn, Some(path))
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            retain: 5,
        })
    }

    /// Number of snapshots to keep (at least one).
    pub fn with_retain(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }

    /// Number of stored snapshots.
    pub fn snapshot_count(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Storage(format!("sqlite lock poisoned: {}", e)))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| Error::Storage(format!("sqlite lock poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("sqlite task failed: {}", e)))?
    }
}

#[async_trait]
impl SnapshotBackend for SqliteBackend {
    fn name(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let data = bytes.to_vec();
        let retain = self.retain as i64;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO snapshots (byte_len, data) VALUES (?1, ?2)",
                params![data.len() as i64, data],
            )?;
            let pruned = conn.execute(
                "DELETE FROM snapshots WHERE id NOT IN
                    (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
                [retain],
            )?;
            if pruned > 0 {
                debug!(pruned, "Pruned old snapshots");
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::backend_write(self.name(), e))
    }

    async fn read(&self) -> Result<Vec<u8>> {
        let name = self.name();
        self.blocking(move |conn| {
            let latest: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM snapshots ORDER BY id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            latest.ok_or_else(|| Error::backend_read(name, "no snapshot stored"))
        })
        .await
        .map_err(|e| match e {
            Error::BackendRead { .. } => e,
            other => Error::backend_read(self.name(), other),
        })
    }
}

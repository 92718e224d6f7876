//! Local file snapshot backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SnapshotBackend;
use crate::error::{Error, Result};

/// Stores the latest snapshot in a single file.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a reader never sees a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// `~` at the start of the path is expanded to the home directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy();
        let expanded = shellexpand::tilde(raw.as_ref()).into_owned();
        Self {
            path: PathBuf::from(expanded),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend_write(self.name(), e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| Error::backend_write(self.name(), e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| Error::backend_write(self.name(), e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Wrote snapshot file");
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::backend_read(self.name(), e))
    }
}

//! Error types for context-core.

use thiserror::Error;

/// Result type alias using context-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the context engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Event rejected at capture (unknown kind or oversized payload)
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Decision record failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A snapshot backend failed to write
    #[error("Backend write error: {backend} - {message}")]
    BackendWrite { backend: String, message: String },

    /// A snapshot backend failed to read
    #[error("Backend read error: {backend} - {message}")]
    BackendRead { backend: String, message: String },

    /// Snapshot written by a newer format
    #[error("Unsupported snapshot format version {found} (supported up to {supported})")]
    UnsupportedFormat { found: u32, supported: u32 },

    /// Snapshot body does not match its checksum
    #[error("Snapshot checksum mismatch")]
    ChecksumMismatch,

    /// Referenced entry does not exist
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid event error.
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a backend write error.
    pub fn backend_write(backend: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::BackendWrite {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Create a backend read error.
    pub fn backend_read(backend: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::BackendRead {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error came from a persistence backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::BackendWrite { .. } | Self::BackendRead { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

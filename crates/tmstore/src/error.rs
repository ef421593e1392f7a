//! Error types for tmstore.
//!
//! This module defines all error types used throughout the tmstore crate.
//! Network failures on the remote path are mostly recovered by falling back
//! to the local store; the variants here are what remains visible to callers.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tmstore operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Local Store Errors ===
    /// Failed to open or create the local database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Remote Document Errors ===
    /// The remote endpoint could not be reached or answered with a failure.
    #[error("remote request to {url} failed: {message}")]
    Remote {
        /// The URL that was requested.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The remote endpoint answered with an unexpected status code.
    #[error("remote returned HTTP {status} for {url}")]
    RemoteStatus {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The remote document body could not be parsed.
    #[error("malformed remote document: {message}")]
    MalformedDocument {
        /// Description of the parse failure.
        message: String,
    },

    /// A conditional replace kept losing against concurrent writers.
    #[error("write to '{key}' conflicted {attempts} times with concurrent writers")]
    Conflict {
        /// The key being written.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Keys must be non-empty.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// The requested backup does not exist in the document.
    #[error("backup not found: {key}")]
    BackupNotFound {
        /// The backup key that was looked up.
        key: String,
    },

    // === Proxy Errors ===
    /// The proxy failed to bind or serve.
    #[error("proxy error: {0}")]
    Proxy(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tmstore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new remote transport error.
    #[must_use]
    pub fn remote(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a new malformed document error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            message: message.into(),
        }
    }

    /// Create a new invalid key error.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create a new proxy error.
    #[must_use]
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the remote side is unreachable or unhealthy.
    ///
    /// These are the failures the client masks by falling back to the local
    /// store.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::RemoteStatus { .. })
    }

    /// Check if this error is a lost compare-and-swap race.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

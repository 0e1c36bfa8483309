//! Common error types for Inkpad.

use std::fmt;

use thiserror::Error;

/// Top-level error type for Inkpad core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend reported an out-of-space condition. The write did not happen.
    #[error("Storage quota exceeded on '{backend}' while writing '{key}'")]
    StorageQuota { backend: String, key: String },

    /// Backend is not accessible in the current context.
    #[error("Storage backend '{backend}' unavailable: {reason}")]
    StorageUnavailable { backend: String, reason: String },

    /// A record failed validation.
    #[error("Validation failed for field '{field}': {message}")]
    Validation { field: String, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local and remote snapshots diverged and need an explicit resolution.
    #[error("Sync conflict pending for record {id}")]
    SyncConflict { id: String },

    /// Transport failure reported by a remote source.
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    /// A migration's `up` or `down` failed.
    #[error("Migration {version} ({name}) failed: {source}")]
    Migration {
        version: u32,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Generic storage failure that is neither quota nor availability.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Discriminant of [`Error`], for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StorageQuota,
    StorageUnavailable,
    Validation,
    NotFound,
    SyncConflict,
    Network,
    Migration,
    Storage,
    Io,
    Serialization,
    InvalidInput,
    AlreadyExists,
}

impl Error {
    /// Shorthand for a validation failure on `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a network failure.
    pub fn network(message: impl Into<String>, retryable: bool) -> Self {
        Self::Network {
            message: message.into(),
            retryable,
        }
    }

    /// The kind discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StorageQuota { .. } => ErrorKind::StorageQuota,
            Error::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SyncConflict { .. } => ErrorKind::SyncConflict,
            Error::Network { .. } => ErrorKind::Network,
            Error::Migration { .. } => ErrorKind::Migration,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { retryable, .. } => *retryable,
            Error::StorageUnavailable { .. } | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Errors that must never be retried, whatever a caller's predicate says.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::StorageQuota
                | ErrorKind::SyncConflict
                | ErrorKind::Migration
                | ErrorKind::AlreadyExists
                | ErrorKind::InvalidInput
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::StorageQuota => "storage_quota",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SyncConflict => "sync_conflict",
            ErrorKind::Network => "network",
            ErrorKind::Migration => "migration",
            ErrorKind::Storage => "storage",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::AlreadyExists => "already_exists",
        };
        f.write_str(name)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

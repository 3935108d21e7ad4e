//! Error types for the autosave engine.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::document::DocumentId;

/// Top-level engine error
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum SyncError {
    #[error("access to document {document_id} was refused")]
    #[diagnostic(
        code(sync::forbidden),
        help("the credential does not allow reading this document")
    )]
    Forbidden { document_id: DocumentId },

    /// Neither a local draft nor the remote copy could be loaded.
    #[error("document {document_id} is not available offline")]
    #[diagnostic(
        code(sync::unavailable),
        help("open it again once the remote store is reachable")
    )]
    Unavailable {
        document_id: DocumentId,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

/// Local draft store errors
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum StorageError {
    #[error("failed to open draft store at {}", path.display())]
    #[diagnostic(code(storage::open))]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to create directory {}", path.display())]
    #[diagnostic(code(storage::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set pragma {pragma}")]
    #[diagnostic(code(storage::pragma))]
    Pragma {
        pragma: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("migration failed: {message}")]
    #[diagnostic(code(storage::migration))]
    Migration { message: String },

    #[error("query failed: {message}")]
    #[diagnostic(code(storage::query))]
    Query { message: String },

    #[error("failed to encode or decode a stored record")]
    #[diagnostic(code(storage::serialization))]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    #[error("draft store is full")]
    #[diagnostic(
        code(storage::quota),
        help("discard old drafts with `scriptorium discard <id>`")
    )]
    QuotaExceeded,

    #[error("draft store lock poisoned")]
    #[diagnostic(code(storage::lock))]
    LockPoisoned,
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => StorageError::QuotaExceeded,
            _ => StorageError::Query {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(source: serde_json::Error) -> Self {
        StorageError::Serialization { source }
    }
}

/// Failures reported by the remote document store or attachment storage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum RemoteError {
    /// The write was refused by policy. Never retried.
    #[error("write rejected by policy")]
    #[diagnostic(code(remote::forbidden))]
    Forbidden,

    /// Anything else, including no network at all. Retried by queuing.
    #[error("remote store unreachable: {message}")]
    #[diagnostic(code(remote::unreachable))]
    Unreachable { message: String },
}

impl RemoteError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        RemoteError::Unreachable {
            message: message.into(),
        }
    }

    /// Map an HTTP status to an error. 403 is a policy rejection, everything
    /// else is retryable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            403 => RemoteError::Forbidden,
            _ => RemoteError::Unreachable {
                message: format!("{status}: {}", message.into()),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unreachable { .. })
    }
}

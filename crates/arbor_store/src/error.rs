//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the remote store or the blob store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Security rules rejected the operation.
    #[error("permission denied at `{path}`")]
    PermissionDenied {
        /// The rejected path.
        path: String,
    },

    /// A path is malformed.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Network or transport failure.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The store is offline.
    #[error("store is disconnected")]
    Disconnected,

    /// No blob exists at the path.
    #[error("blob not found at `{path}`")]
    BlobNotFound {
        /// The blob path.
        path: String,
    },

    /// A download exceeded its size cap.
    #[error("object of {size} bytes exceeds the {max} byte limit")]
    ObjectTooLarge {
        /// Actual size.
        size: u64,
        /// Allowed maximum.
        max: u64,
    },

    /// Local I/O failure, e.g. reading an upload source file.
    #[error("I/O error: {0}")]
    Io(String),

    /// A transaction's update function declined to commit.
    #[error("transaction aborted at `{path}`")]
    TransactionAborted {
        /// The transaction's path.
        path: String,
    },
}

impl StoreError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network { retryable, .. } => *retryable,
            StoreError::Disconnected => true,
            _ => false,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::network_retryable("connection reset").is_retryable());
        assert!(!StoreError::network_fatal("bad certificate").is_retryable());
        assert!(StoreError::Disconnected.is_retryable());
        assert!(!StoreError::PermissionDenied { path: "a".into() }.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::ObjectTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "object of 20 bytes exceeds the 10 byte limit");

        let err = StoreError::invalid_path("a/b#", "illegal character `#`");
        assert!(err.to_string().contains("a/b#"));
    }
}

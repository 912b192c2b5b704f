//! Error types for Arbor core.

use arbor_store::StoreError;
use arbor_value::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Domain failures raised by entities, relations, files and data sources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// An id or path is malformed or absent.
    #[error("invalid id `{id}`: {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A file was saved without inline data or a source file.
    #[error("file `{name}` has no payload to upload")]
    InvalidFile {
        /// File name.
        name: String,
    },

    /// A joint wait exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited on.
        operation: &'static str,
        /// The deadline.
        after: Duration,
    },

    /// A read-modify-write was attempted while offline.
    #[error("transaction on `{path}` requires a connection")]
    OfflineTransaction {
        /// Target path.
        path: String,
    },

    /// A completion could not be matched to the request that started it.
    #[error("completion lost: {message}")]
    LostCompletion {
        /// What was lost.
        message: String,
    },

    /// `save` was called on an entity that is already persisted.
    #[error("entity `{id}` is already saved")]
    AlreadyObserved {
        /// Entity id.
        id: String,
    },

    /// The operation was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,

    /// `remove_all` was called on a relation whose owner is persisted.
    #[error("relation `{key}` is saved; members must be removed one at a time")]
    RelationSaved {
        /// Relation key.
        key: String,
    },

    /// An index was past the end of a collection.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Collection length.
        len: usize,
    },

    /// The operation needs a persisted entity.
    #[error("entity `{id}` is not saved")]
    NotObserved {
        /// Entity id.
        id: String,
    },

    /// The schema does not declare the field, or declares it differently.
    #[error("model `{model}` has no {expected} field `{field}`")]
    UnknownField {
        /// Model name.
        model: &'static str,
        /// Field name.
        field: String,
        /// What kind of field was expected.
        expected: &'static str,
    },
}

/// Errors that can occur in Arbor core operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Domain error.
    #[error(transparent)]
    Object(#[from] ObjectError),

    /// Error reported by the remote or blob store, passed through verbatim.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CoreError {
    /// Creates an invalid id error.
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        ObjectError::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
        .into()
    }

    /// Creates an invalid file error.
    pub fn invalid_file(name: impl Into<String>) -> Self {
        ObjectError::InvalidFile { name: name.into() }.into()
    }

    /// Creates a timeout error.
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        ObjectError::Timeout { operation, after }.into()
    }

    /// Creates an offline transaction error.
    pub fn offline_transaction(path: impl Into<String>) -> Self {
        ObjectError::OfflineTransaction { path: path.into() }.into()
    }

    /// Creates a lost completion error.
    pub fn lost_completion(message: impl Into<String>) -> Self {
        ObjectError::LostCompletion {
            message: message.into(),
        }
        .into()
    }

    /// Creates an already observed error.
    pub fn already_observed(id: impl Into<String>) -> Self {
        ObjectError::AlreadyObserved { id: id.into() }.into()
    }

    /// Creates a not observed error.
    pub fn not_observed(id: impl Into<String>) -> Self {
        ObjectError::NotObserved { id: id.into() }.into()
    }

    /// Creates an index out of bounds error.
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        ObjectError::IndexOutOfBounds { index, len }.into()
    }

    /// Creates an unknown field error.
    pub fn unknown_field(model: &'static str, field: impl Into<String>, expected: &'static str) -> Self {
        ObjectError::UnknownField {
            model,
            field: field.into(),
            expected,
        }
        .into()
    }

    /// Returns the domain error, if this is one.
    pub fn as_object(&self) -> Option<&ObjectError> {
        match self {
            CoreError::Object(err) => Some(err),
            _ => None,
        }
    }

    /// Returns true for deadline failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Object(ObjectError::Timeout { .. }))
    }
}

//! Error types for the value crate.

use crate::kind::ValueKind;
use std::fmt;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting between typed and native values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// A typed value does not match the kind declared for its field.
    #[error("type mismatch for field `{field}`: expected {expected}, got {found}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Kind declared in the schema.
        expected: ValueKind,
        /// Kind actually supplied.
        found: ValueKind,
    },

    /// A string could not be parsed as a URL.
    #[error("invalid URL `{input}`: {message}")]
    InvalidUrl {
        /// The rejected input.
        input: String,
        /// Parser message.
        message: String,
    },

    /// A timestamp is outside the representable date range.
    #[error("invalid date for field `{field}`: {seconds} seconds since epoch")]
    InvalidDate {
        /// Field name.
        field: String,
        /// The rejected epoch seconds.
        seconds: f64,
    },

    /// JSON text could not be parsed or produced.
    #[error("JSON error: {message}")]
    Json {
        /// Description of the JSON failure.
        message: String,
    },
}

impl CodecError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(field: impl Into<String>, expected: ValueKind, found: ValueKind) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(input: impl Into<String>, err: &url::ParseError) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            message: err.to_string(),
        }
    }

    /// Creates a JSON error.
    pub fn json(message: impl Into<String>) -> Self {
        Self::Json {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::json(err.to_string())
    }
}

/// A snapshot value whose shape did not match the declared field kind.
///
/// Decoding never fails outright: the field is left untouched and one of
/// these is reported instead, so callers can detect the data loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    /// Field name.
    pub field: String,
    /// Kind declared in the schema.
    pub expected: ValueKind,
    /// Shape found in the snapshot (see [`crate::Value::shape`]).
    pub found: &'static str,
    /// Extra detail, if any.
    pub detail: Option<String>,
}

impl DecodeWarning {
    /// Creates a warning for a shape mismatch.
    pub fn mismatch(field: impl Into<String>, expected: ValueKind, found: &'static str) -> Self {
        Self {
            field: field.into(),
            expected,
            found,
            detail: None,
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field `{}` expected {}, found {}",
            self.field, self.expected, self.found
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

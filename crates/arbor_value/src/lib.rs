//! # Arbor Value
//!
//! Snapshot values and the typed field codec for Arbor.
//!
//! The hierarchical store speaks a JSON-like [`Value`]. Entities speak typed
//! [`FieldValue`]s, each classified into one [`ValueKind`] by the entity's
//! schema. This crate converts between the two:
//!
//! - [`encode_field`] maps a typed value to its stored form
//! - [`decode_field`] maps a stored value back, given the declared kind
//!
//! Decoding never aborts a record. A stored shape that does not fit the
//! declared kind produces a [`DecodeWarning`] and leaves the field untouched.
//!
//! ## Usage
//!
//! ```
//! use arbor_value::{decode_field, encode_field, FieldValue, ValueKind};
//!
//! let stored = encode_field("age", &FieldValue::Int(42)).unwrap();
//! let decoded = decode_field("age", ValueKind::Int, &stored).unwrap();
//! assert_eq!(decoded, Some(FieldValue::Int(42)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod kind;
mod value;

pub use codec::{
    date_from_epoch_seconds, date_to_epoch_seconds, decode_field, encode_field, key_set, parse_url,
};
pub use error::{CodecError, CodecResult, DecodeWarning};
pub use kind::{FieldValue, FileDescriptor, ValueKind};
pub use value::{Value, SERVER_VALUE_KEY};

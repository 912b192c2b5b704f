//! Typed field encoding and decoding.
//!
//! [`encode_field`] turns a [`FieldValue`] into the store's native
//! [`Value`], and [`decode_field`] goes the other way given the kind the
//! schema declared for the field. Dispatch is a single match over the
//! closed [`ValueKind`] set.
//!
//! ## Representation
//!
//! | Kind | Native form |
//! |------|-------------|
//! | bool, string | same |
//! | int | integer |
//! | float, double | float (integers accepted on decode) |
//! | url | string |
//! | date | float epoch seconds, microsecond precision |
//! | array | array (a `"0".."n"` keyed map is accepted on decode) |
//! | key-set, relation | map of id to `true` |
//! | nested-string, nested-int, object | map |
//! | file | descriptor map (`name`, `mimeType`, `url`) |
//!
//! Empty containers encode to nothing: the store does not keep them, so
//! writing one would read back as absent anyway.

use crate::error::{CodecError, CodecResult, DecodeWarning};
use crate::kind::{FieldValue, FileDescriptor, ValueKind};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;
use url::Url;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Encodes a typed field value into its native representation.
///
/// Returns `None` when the value has no stored form (an empty container).
pub fn encode_field(field: &str, value: &FieldValue) -> Option<Value> {
    let native = match value {
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(n) => Value::Integer(*n),
        FieldValue::Float(f) => Value::Float(f64::from(*f)),
        FieldValue::Double(f) => Value::Float(*f),
        FieldValue::String(s) => Value::Text(s.clone()),
        FieldValue::Url(url) => Value::Text(url.as_str().to_string()),
        FieldValue::Date(date) => Value::Float(date_to_epoch_seconds(date)),
        FieldValue::Array(items) => Value::Array(items.clone()),
        FieldValue::KeySet(ids) => id_map(ids.iter()),
        FieldValue::NestedString(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::Text(v.clone())))
                .collect(),
        ),
        FieldValue::NestedInt(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::Integer(*v)))
                .collect(),
        ),
        FieldValue::Object(map) => Value::Map(map.clone()),
        FieldValue::File(descriptor) => descriptor.to_value(),
        FieldValue::Relation(ids) => id_map(ids.iter()),
    };

    if native.is_empty() {
        trace!(field, kind = %value.kind(), "empty container has no stored form");
        return None;
    }
    Some(native)
}

/// Decodes a native value for a field of the declared kind.
///
/// `Ok(None)` means the field is absent. A value whose shape does not fit
/// the kind yields a [`DecodeWarning`]; the caller leaves the field as is.
pub fn decode_field(
    field: &str,
    kind: ValueKind,
    value: &Value,
) -> Result<Option<FieldValue>, DecodeWarning> {
    if value.is_null() {
        return Ok(None);
    }
    let mismatch = || DecodeWarning::mismatch(field, kind, value.shape());

    let decoded = match (kind, value) {
        (ValueKind::Bool, Value::Bool(b)) => FieldValue::Bool(*b),

        (ValueKind::Int, Value::Integer(n)) => FieldValue::Int(*n),
        (ValueKind::Int, Value::Float(f)) => FieldValue::Int(integral(*f).ok_or_else(|| {
            mismatch().with_detail(format!("{f} is not an integer"))
        })?),

        #[allow(clippy::cast_possible_truncation)]
        (ValueKind::Float, Value::Integer(_) | Value::Float(_)) => {
            FieldValue::Float(value.as_f64().unwrap_or_default() as f32)
        }
        (ValueKind::Double, Value::Integer(_) | Value::Float(_)) => {
            FieldValue::Double(value.as_f64().unwrap_or_default())
        }

        (ValueKind::String, Value::Text(s)) => FieldValue::String(s.clone()),

        (ValueKind::Url, Value::Text(s)) => FieldValue::Url(
            parse_url(s).map_err(|err| mismatch().with_detail(err.to_string()))?,
        ),

        (ValueKind::Date, Value::Integer(_) | Value::Float(_)) => {
            let seconds = value.as_f64().unwrap_or_default();
            FieldValue::Date(
                date_from_epoch_seconds(field, seconds)
                    .map_err(|err| mismatch().with_detail(err.to_string()))?,
            )
        }

        (ValueKind::Array, Value::Array(items)) => {
            FieldValue::Array(homogeneous(items.clone()).ok_or_else(|| {
                mismatch().with_detail("array elements have mixed shapes")
            })?)
        }
        (ValueKind::Array, Value::Map(map)) => {
            let items = indexed_map(map).ok_or_else(|| {
                mismatch().with_detail("map keys are not a dense index")
            })?;
            FieldValue::Array(homogeneous(items).ok_or_else(|| {
                mismatch().with_detail("array elements have mixed shapes")
            })?)
        }

        (ValueKind::KeySet, Value::Map(map)) => FieldValue::KeySet(true_keys(map).collect()),
        (ValueKind::Relation, Value::Map(map)) => {
            FieldValue::Relation(true_keys(map).collect())
        }

        (ValueKind::NestedString, Value::Map(map)) => FieldValue::NestedString(
            map.iter()
                .map(|(k, v)| v.as_text().map(|s| (k.clone(), s.to_string())))
                .collect::<Option<BTreeMap<_, _>>>()
                .ok_or_else(|| mismatch().with_detail("non-string map entry"))?,
        ),
        (ValueKind::NestedInt, Value::Map(map)) => FieldValue::NestedInt(
            map.iter()
                .map(|(k, v)| match v {
                    Value::Integer(n) => Some((k.clone(), *n)),
                    Value::Float(f) => integral(*f).map(|n| (k.clone(), n)),
                    _ => None,
                })
                .collect::<Option<BTreeMap<_, _>>>()
                .ok_or_else(|| mismatch().with_detail("non-integer map entry"))?,
        ),

        (ValueKind::Object, Value::Map(map)) => FieldValue::Object(map.clone()),

        (ValueKind::File, _) => FieldValue::File(
            FileDescriptor::from_value(value)
                .ok_or_else(|| mismatch().with_detail("missing file name"))?,
        ),

        _ => return Err(mismatch()),
    };

    Ok(Some(decoded))
}

/// Parses a URL string.
pub fn parse_url(input: &str) -> CodecResult<Url> {
    Url::parse(input).map_err(|err| CodecError::invalid_url(input, &err))
}

/// Converts a date to floating epoch seconds.
#[allow(clippy::cast_precision_loss)]
pub fn date_to_epoch_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp_micros() as f64 / MICROS_PER_SECOND
}

/// Converts floating epoch seconds to a date, rounded to the microsecond.
#[allow(clippy::cast_possible_truncation)]
pub fn date_from_epoch_seconds(field: &str, seconds: f64) -> CodecResult<DateTime<Utc>> {
    let micros = (seconds * MICROS_PER_SECOND).round();
    // Beyond the i64 microsecond range.
    if !micros.is_finite() || micros.abs() >= 9.0e18 {
        return Err(CodecError::InvalidDate {
            field: field.to_string(),
            seconds,
        });
    }
    DateTime::<Utc>::from_timestamp_micros(micros as i64).ok_or_else(|| CodecError::InvalidDate {
        field: field.to_string(),
        seconds,
    })
}

fn id_map<'a>(ids: impl Iterator<Item = &'a String>) -> Value {
    Value::Map(ids.map(|id| (id.clone(), Value::Bool(true))).collect())
}

fn true_keys(map: &BTreeMap<String, Value>) -> impl Iterator<Item = String> + '_ {
    map.iter()
        .filter(|(_, v)| v.as_bool() == Some(true))
        .map(|(k, _)| k.clone())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn homogeneous(items: Vec<Value>) -> Option<Vec<Value>> {
    let numeric = |v: &Value| matches!(v, Value::Integer(_) | Value::Float(_));
    let Some(first) = items.first() else {
        return Some(items);
    };
    let uniform = items
        .iter()
        .all(|v| v.shape() == first.shape() || (numeric(v) && numeric(first)));
    uniform.then_some(items)
}

/// A map keyed `"0"`, `"1"`, ... is how the store may return an array
/// written elsewhere.
fn indexed_map(map: &BTreeMap<String, Value>) -> Option<Vec<Value>> {
    let mut slots: Vec<Option<Value>> = vec![None; map.len()];
    for (key, value) in map {
        let index: usize = key.parse().ok()?;
        *slots.get_mut(index)? = Some(value.clone());
    }
    slots.into_iter().collect()
}

/// The set of ids a key-set or relation native value holds.
pub fn key_set(value: &Value) -> BTreeSet<String> {
    value
        .as_map()
        .map(|map| true_keys(map).collect())
        .unwrap_or_default()
}

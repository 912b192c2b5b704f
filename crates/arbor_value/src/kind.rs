//! Field kinds and typed field values.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

/// The closed set of field shapes the codec understands.
///
/// A field's kind is fixed when its schema is built and never varies from
/// one instance to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// `bool`.
    Bool,
    /// Any integer width, normalized to `i64`.
    Int,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// UTF-8 string.
    String,
    /// URL, stored as its string form.
    Url,
    /// Date, stored as floating epoch seconds.
    Date,
    /// Homogeneous list.
    Array,
    /// Set of foreign keys, stored as `{id: true}`.
    KeySet,
    /// String to string map.
    NestedString,
    /// String to integer map.
    NestedInt,
    /// Generic nested map.
    Object,
    /// Blob attachment descriptor.
    File,
    /// Relation to a foreign collection, stored as `{id: true}`.
    Relation,
}

impl ValueKind {
    /// Returns the kind's display name.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Url => "url",
            ValueKind::Date => "date",
            ValueKind::Array => "array",
            ValueKind::KeySet => "key-set",
            ValueKind::NestedString => "nested-string",
            ValueKind::NestedInt => "nested-int",
            ValueKind::Object => "object",
            ValueKind::File => "file",
            ValueKind::Relation => "relation",
        }
    }

    /// Returns true for kinds backed by an attachment or relation object
    /// rather than a plain model field.
    pub const fn is_managed(self) -> bool {
        matches!(self, ValueKind::File | ValueKind::Relation)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What actually gets written into a record for a blob attachment.
///
/// The serde form matches [`FileDescriptor::to_value`], so descriptors can
/// be exchanged as JSON with other clients of the same store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// File name within the owner's blob folder.
    pub name: String,
    /// MIME type, when known.
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Download locator, populated after upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileDescriptor {
    /// Creates a name-only descriptor.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            url: None,
        }
    }

    /// Native representation.
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Text(self.name.clone()));
        if let Some(content_type) = &self.content_type {
            map.insert("mimeType".to_string(), Value::Text(content_type.clone()));
        }
        if let Some(url) = &self.url {
            map.insert("url".to_string(), Value::Text(url.clone()));
        }
        Value::Map(map)
    }

    /// Parses a descriptor map, or a bare name string written by older
    /// records.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(name) => Some(Self::named(name.clone())),
            Value::Map(map) => {
                let name = map.get("name")?.as_text()?.to_string();
                Some(Self {
                    name,
                    content_type: map.get("mimeType").and_then(Value::as_text).map(String::from),
                    url: map.get("url").and_then(Value::as_text).map(String::from),
                })
            }
            _ => None,
        }
    }
}

/// A typed field value, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// String.
    String(String),
    /// URL.
    Url(Url),
    /// Date.
    Date(DateTime<Utc>),
    /// Homogeneous list of native values.
    Array(Vec<Value>),
    /// Set of foreign keys.
    KeySet(BTreeSet<String>),
    /// String to string map.
    NestedString(BTreeMap<String, String>),
    /// String to integer map.
    NestedInt(BTreeMap<String, i64>),
    /// Generic nested map.
    Object(BTreeMap<String, Value>),
    /// Attachment descriptor.
    File(FileDescriptor),
    /// Ordered relation member ids.
    Relation(Vec<String>),
}

impl FieldValue {
    /// Returns this value's kind.
    pub const fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::Float(_) => ValueKind::Float,
            FieldValue::Double(_) => ValueKind::Double,
            FieldValue::String(_) => ValueKind::String,
            FieldValue::Url(_) => ValueKind::Url,
            FieldValue::Date(_) => ValueKind::Date,
            FieldValue::Array(_) => ValueKind::Array,
            FieldValue::KeySet(_) => ValueKind::KeySet,
            FieldValue::NestedString(_) => ValueKind::NestedString,
            FieldValue::NestedInt(_) => ValueKind::NestedInt,
            FieldValue::Object(_) => ValueKind::Object,
            FieldValue::File(_) => ValueKind::File,
            FieldValue::Relation(_) => ValueKind::Relation,
        }
    }

    /// Unwraps a boolean.
    pub fn into_bool(self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Unwraps an integer.
    pub fn into_int(self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Unwraps a single precision float.
    pub fn into_float(self) -> Option<f32> {
        match self {
            FieldValue::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Unwraps a double.
    pub fn into_double(self) -> Option<f64> {
        match self {
            FieldValue::Double(f) => Some(f),
            _ => None,
        }
    }

    /// Unwraps a string.
    pub fn into_string(self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unwraps a URL.
    pub fn into_url(self) -> Option<Url> {
        match self {
            FieldValue::Url(u) => Some(u),
            _ => None,
        }
    }

    /// Unwraps a date.
    pub fn into_date(self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Unwraps an array.
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            FieldValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Unwraps a key set.
    pub fn into_key_set(self) -> Option<BTreeSet<String>> {
        match self {
            FieldValue::KeySet(s) => Some(s),
            _ => None,
        }
    }

    /// Unwraps a string map.
    pub fn into_nested_string(self) -> Option<BTreeMap<String, String>> {
        match self {
            FieldValue::NestedString(m) => Some(m),
            _ => None,
        }
    }

    /// Unwraps an integer map.
    pub fn into_nested_int(self) -> Option<BTreeMap<String, i64>> {
        match self {
            FieldValue::NestedInt(m) => Some(m),
            _ => None,
        }
    }

    /// Unwraps a generic map.
    pub fn into_object(self) -> Option<BTreeMap<String, Value>> {
        match self {
            FieldValue::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Unwraps a file descriptor.
    pub fn into_file(self) -> Option<FileDescriptor> {
        match self {
            FieldValue::File(f) => Some(f),
            _ => None,
        }
    }

    /// Unwraps relation member ids.
    pub fn into_relation(self) -> Option<Vec<String>> {
        match self {
            FieldValue::Relation(ids) => Some(ids),
            _ => None,
        }
    }
}

macro_rules! int_field_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(n: $ty) -> Self {
                    FieldValue::Int(i64::from(n))
                }
            }
        )*
    };
}

// u64 and usize are deliberately absent: they do not fit the logical
// integer kind without loss.
int_field_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<f32> for FieldValue {
    fn from(f: f32) -> Self {
        FieldValue::Float(f)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Double(f)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<Url> for FieldValue {
    fn from(u: Url) -> Self {
        FieldValue::Url(u)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(d: DateTime<Utc>) -> Self {
        FieldValue::Date(d)
    }
}

impl From<BTreeSet<String>> for FieldValue {
    fn from(s: BTreeSet<String>) -> Self {
        FieldValue::KeySet(s)
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(m: BTreeMap<String, String>) -> Self {
        FieldValue::NestedString(m)
    }
}

impl From<BTreeMap<String, i64>> for FieldValue {
    fn from(m: BTreeMap<String, i64>) -> Self {
        FieldValue::NestedInt(m)
    }
}

impl From<BTreeMap<String, Value>> for FieldValue {
    fn from(m: BTreeMap<String, Value>) -> Self {
        FieldValue::Object(m)
    }
}

impl From<FileDescriptor> for FieldValue {
    fn from(f: FileDescriptor) -> Self {
        FieldValue::File(f)
    }
}

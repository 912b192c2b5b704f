//! Model trait and the static field registry.

use arbor_value::{FieldValue, Value, ValueKind};

/// Describes one declared field of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, also the child key it is stored under.
    pub name: &'static str,
    /// The kind the field decodes as. Fixed for every instance.
    pub kind: ValueKind,
    /// Model name of the related collection, for relation fields.
    pub target: Option<&'static str>,
    /// Ignored fields are neither persisted nor change-tracked.
    pub ignored: bool,
}

impl FieldSpec {
    /// Returns true for plain model fields, as opposed to file attachments
    /// and relations, which the entity manages itself.
    pub fn is_plain(&self) -> bool {
        !self.kind.is_managed()
    }
}

/// The statically declared field registry of a model.
///
/// Built once per model type, typically inside a `OnceLock`:
///
/// ```
/// use arbor_core::Schema;
/// use arbor_value::ValueKind;
///
/// let schema = Schema::new()
///     .field("name", ValueKind::String)
///     .field("age", ValueKind::Int)
///     .file("avatar")
///     .relation("groups", "group")
///     .ignore("draft", ValueKind::String);
///
/// assert_eq!(schema.fields().count(), 4);
/// assert!(schema.is_ignored("draft"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a plain field.
    #[must_use]
    pub fn field(self, name: &'static str, kind: ValueKind) -> Self {
        self.push(FieldSpec {
            name,
            kind,
            target: None,
            ignored: false,
        })
    }

    /// Declares a file attachment field.
    #[must_use]
    pub fn file(self, name: &'static str) -> Self {
        self.field(name, ValueKind::File)
    }

    /// Declares a relation to the collection of the model named `target`.
    #[must_use]
    pub fn relation(self, name: &'static str, target: &'static str) -> Self {
        self.push(FieldSpec {
            name,
            kind: ValueKind::Relation,
            target: Some(target),
            ignored: false,
        })
    }

    /// Declares a field that stays local: it is never encoded, decoded or
    /// patched.
    #[must_use]
    pub fn ignore(self, name: &'static str, kind: ValueKind) -> Self {
        self.push(FieldSpec {
            name,
            kind,
            target: None,
            ignored: true,
        })
    }

    fn push(mut self, spec: FieldSpec) -> Self {
        debug_assert!(
            self.get(spec.name).is_none(),
            "field `{}` declared twice",
            spec.name
        );
        self.fields.push(spec);
        self
    }

    /// Persisted fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.ignored)
    }

    /// Every declared field, ignored ones included.
    pub fn all(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if `name` is declared as ignored.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.get(name).is_some_and(|f| f.ignored)
    }

    /// Persisted file attachment fields.
    pub fn files(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields().filter(|f| f.kind == ValueKind::File)
    }

    /// Persisted relation fields.
    pub fn relations(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields().filter(|f| f.kind == ValueKind::Relation)
    }
}

/// A typed record type that can live in a collection.
///
/// Implementors expose their plain fields by name through [`Model::get`]
/// and [`Model::set`]; file attachments and relations declared in the
/// schema are held by the owning [`crate::Entity`] instead.
///
/// # Example
///
/// ```
/// use arbor_core::{Model, Schema};
/// use arbor_value::{FieldValue, ValueKind};
/// use std::sync::OnceLock;
///
/// #[derive(Debug, Clone, Default)]
/// struct Note {
///     title: String,
/// }
///
/// impl Model for Note {
///     const NAME: &'static str = "note";
///
///     fn schema() -> &'static Schema {
///         static SCHEMA: OnceLock<Schema> = OnceLock::new();
///         SCHEMA.get_or_init(|| Schema::new().field("title", ValueKind::String))
///     }
///
///     fn get(&self, field: &str) -> Option<FieldValue> {
///         match field {
///             "title" => Some(self.title.clone().into()),
///             _ => None,
///         }
///     }
///
///     fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
///         match field {
///             "title" => {
///                 self.title = value.and_then(FieldValue::into_string).unwrap_or_default();
///                 true
///             }
///             _ => false,
///         }
///     }
/// }
/// ```
pub trait Model: Default + Clone + Send + Sync + 'static {
    /// Collection name. Records live at `<version>/<NAME>/<id>`.
    const NAME: &'static str;

    /// Version tag overriding the context's for this model.
    const VERSION: Option<&'static str> = None;

    /// The model's field registry.
    fn schema() -> &'static Schema;

    /// Returns the current value of a plain field.
    fn get(&self, field: &str) -> Option<FieldValue>;

    /// Assigns a plain field. `None` resets it to its default.
    ///
    /// The value always has the kind the schema declares. Returns false if
    /// the model has no such field.
    fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool;

    /// Custom encoding for a field.
    ///
    /// Returning `Some` bypasses the generic codec; `Some(None)` means the
    /// field has no stored form.
    fn encode_field(&self, field: &str) -> Option<Option<Value>> {
        let _ = field;
        None
    }

    /// Custom decoding for a field. Return true if the value was consumed.
    fn decode_field(&mut self, field: &str, value: &Value) -> bool {
        let _ = (field, value);
        false
    }
}

//! Relations: ordered sets of foreign ids.

use crate::context::Context;
use crate::entity::{Entity, Model};
use crate::error::{CoreError, CoreResult, ObjectError};
use crate::package::Package;
use arbor_store::path;
use arbor_value::Value;
use std::collections::BTreeMap;
use std::ops::Index;

/// Outcome of a membership change.
#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    /// Nothing changed: the id was already present, or already absent.
    Unchanged,
    /// Only the local sequence changed; the owner is not persisted yet.
    Local,
    /// The owner is persisted; this patch must be submitted.
    Patch(Package),
}

impl Membership {
    /// Returns true unless nothing changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Membership::Unchanged)
    }

    /// The patch to submit, if any.
    pub fn into_patch(self) -> Option<Package> {
        match self {
            Membership::Patch(package) => Some(package),
            _ => None,
        }
    }
}

/// An ordered, de-duplicated set of foreign ids held by one field of an
/// owning entity.
///
/// Before the owner is persisted, insertions and removals only change the
/// local sequence. Afterwards each one yields a patch under
/// `<owner>/<key>/<id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    key: String,
    target: &'static str,
    owner: Option<String>,
    ids: Vec<String>,
    /// Entities inserted by value: id to (canonical path, value).
    captured: BTreeMap<String, (String, Value)>,
}

impl Relation {
    /// Creates an empty relation stored under `key`, holding ids of the
    /// model named `target`.
    pub fn new(key: impl Into<String>, target: &'static str) -> Self {
        Self {
            key: key.into(),
            target,
            owner: None,
            ids: Vec::new(),
            captured: BTreeMap::new(),
        }
    }

    /// The child key under the owner.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Model name of the related collection.
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Store path of the owner, once persisted.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns true once the owner is persisted.
    pub fn is_saved(&self) -> bool {
        self.owner.is_some()
    }

    pub(crate) fn mark_saved(&mut self, owner: impl Into<String>) {
        self.owner = Some(owner.into());
    }

    /// Path of the relation node under the owner.
    pub fn path(&self) -> Option<String> {
        self.owner.as_deref().map(|owner| path::join(owner, &self.key))
    }

    /// Path of one member's link, once the owner is persisted.
    pub fn member_path(&self, id: &str) -> Option<String> {
        self.path().map(|at| path::join(&at, id))
    }

    /// Adds a member. Adding an existing member does nothing.
    ///
    /// # Errors
    ///
    /// Fails if `id` cannot be used as a key.
    pub fn insert(&mut self, id: impl Into<String>) -> CoreResult<Membership> {
        let id = id.into();
        path::validate_key(&id).map_err(|err| CoreError::invalid_id(&id, err.to_string()))?;
        if self.contains(&id) {
            return Ok(Membership::Unchanged);
        }
        let patch = self.link(&id, Value::Bool(true));
        self.ids.push(id);
        Ok(patch)
    }

    /// Adds an entity as a member, keeping a copy of its value so the
    /// owner's first save writes it alongside the link.
    ///
    /// # Errors
    ///
    /// Fails if the entity belongs to a different collection than the
    /// relation targets.
    pub fn insert_entity<T: Model>(&mut self, ctx: &Context, entity: &Entity<T>) -> CoreResult<Membership> {
        if T::NAME != self.target {
            return Err(CoreError::invalid_id(
                entity.id(),
                format!("entity is a `{}`, relation `{}` holds `{}`", T::NAME, self.key, self.target),
            ));
        }
        let membership = self.insert(entity.id())?;
        self.captured.insert(
            entity.id().to_string(),
            (entity.resolve_path(ctx), entity.value()),
        );
        Ok(membership)
    }

    /// Removes a member. Removing an absent member does nothing.
    pub fn remove(&mut self, id: &str) -> Membership {
        let Some(index) = self.ids.iter().position(|member| member == id) else {
            return Membership::Unchanged;
        };
        self.ids.remove(index);
        self.captured.remove(id);
        self.link(id, Value::Null)
    }

    /// Clears every member.
    ///
    /// # Errors
    ///
    /// Only permitted before the owner is persisted.
    pub fn remove_all(&mut self) -> CoreResult<()> {
        if self.is_saved() {
            return Err(ObjectError::RelationSaved {
                key: self.key.clone(),
            }
            .into());
        }
        self.ids.clear();
        self.captured.clear();
        Ok(())
    }

    /// Replaces the members with the ids decoded from the store.
    pub(crate) fn replace(&mut self, ids: Vec<String>) {
        self.captured.retain(|id, _| ids.contains(id));
        self.ids = ids;
    }

    fn link(&self, id: &str, value: Value) -> Membership {
        match self.member_path(id) {
            Some(at) => {
                let mut package = Package::new();
                package.add_path(at, value);
                Membership::Patch(package)
            }
            None => Membership::Local,
        }
    }

    /// Returns true if `id` is a member.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|member| member == id)
    }

    /// Asks the store whether `id` is a member. Before the owner is
    /// persisted this answers from the local sequence.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn contains_remote(&self, ctx: &Context, id: &str) -> CoreResult<bool> {
        match self.member_path(id) {
            Some(at) => Ok(ctx.store().get(&at).await?.value().as_bool() == Some(true)),
            None => Ok(self.contains(id)),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Member at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    /// Members at each of `indexes`, skipping those out of range.
    pub fn objects(&self, indexes: impl IntoIterator<Item = usize>) -> Vec<&str> {
        indexes.into_iter().filter_map(|i| self.get(i)).collect()
    }

    /// Members in order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Iterates over the members in order.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.ids.iter()
    }

    /// Copies of inserted entities, by id.
    pub(crate) fn captured(&self) -> impl Iterator<Item = (&String, &(String, Value))> {
        self.captured.iter()
    }

    /// The stored form: a map of id to `true`, or nothing when empty.
    pub fn to_value(&self) -> Option<Value> {
        if self.ids.is_empty() {
            return None;
        }
        Some(Value::Map(
            self.ids
                .iter()
                .map(|id| (id.clone(), Value::Bool(true)))
                .collect(),
        ))
    }
}

impl Index<usize> for Relation {
    type Output = String;

    fn index(&self, index: usize) -> &String {
        &self.ids[index]
    }
}

impl<'a> IntoIterator for &'a Relation {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

//! Atomic multi-path write batches.

use crate::context::Context;
use crate::entity::{Entity, Model};
use crate::error::CoreResult;
use crate::relation::Relation;
use arbor_store::path;
use arbor_value::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// A set of absolute path writes committed all together or not at all.
///
/// A null value deletes its path. Adding the same path twice keeps the
/// last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Package {
    writes: BTreeMap<String, Value>,
}

impl Package {
    /// Creates an empty package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one write.
    pub fn add_path(&mut self, at: impl AsRef<str>, value: Value) -> &mut Self {
        self.writes.insert(path::normalize(at.as_ref()), value);
        self
    }

    /// Writes the entity's full value at its canonical path.
    pub fn add_entity<M: Model>(&mut self, ctx: &Context, entity: &Entity<M>) -> &mut Self {
        self.add_path(entity.resolve_path(ctx), entity.value())
    }

    /// Writes a link for every member of `relation` under `owner`, plus
    /// the copy of every member entity that was inserted by value.
    ///
    /// The copies are denormalized: the entity's own record stays the
    /// owning copy.
    pub fn add_relation(&mut self, owner: &str, relation: &Relation) -> &mut Self {
        let base = path::join(owner, relation.key());
        for id in relation {
            self.add_path(path::join(&base, id), Value::Bool(true));
        }
        for (_, (at, value)) in relation.captured() {
            self.add_path(at, value.clone());
        }
        self
    }

    /// Unions another package into this one. Its writes win.
    pub fn merge(&mut self, other: Package) -> &mut Self {
        self.writes.extend(other.writes);
        self
    }

    /// The writes, ordered by path.
    pub fn writes(&self) -> &BTreeMap<String, Value> {
        &self.writes
    }

    /// The value written at `at`.
    pub fn get(&self, at: &str) -> Option<&Value> {
        self.writes.get(at)
    }

    /// Number of writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits every write in one atomic update.
    ///
    /// # Errors
    ///
    /// Returns the store's error; nothing was written.
    pub async fn submit(self, ctx: &Context) -> CoreResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        debug!(paths = self.writes.len(), "submitting package");
        let paths: Vec<String> = self.writes.keys().cloned().collect();
        ctx.store().update(self.writes).await?;
        ctx.invalidate(paths.iter().map(String::as_str));
        Ok(())
    }

    /// Deletes every path in the package in one atomic update.
    ///
    /// # Errors
    ///
    /// Returns the store's error; nothing was deleted.
    pub async fn delete(mut self, ctx: &Context) -> CoreResult<()> {
        for value in self.writes.values_mut() {
            *value = Value::Null;
        }
        self.submit(ctx).await
    }
}

impl FromIterator<(String, Value)> for Package {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut package = Package::new();
        for (at, value) in iter {
            package.add_path(at, value);
        }
        package
    }
}

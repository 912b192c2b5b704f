//! The index-aligned key window and entity pool.

use super::options::{compare, SortDescriptor};
use crate::entity::{Entity, Model};

/// Loaded keys and their decoded entities, kept in display order.
///
/// `pool[i]` is always the entity for `keys[i]`.
pub(crate) struct Window<M: Model> {
    keys: Vec<String>,
    pool: Vec<Entity<M>>,
}

impl<M: Model> Window<M> {
    pub(crate) fn new() -> Self {
        Self {
            keys: Vec::new(),
            pool: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.keys.len(), self.pool.len());
        self.keys.len()
    }

    pub(crate) fn keys(&self) -> &[String] {
        &self.keys
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Entity<M>> {
        self.pool.get(index)
    }

    pub(crate) fn key(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub(crate) fn position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Inserts after every entity that sorts equal or before it. Returns
    /// `None` if the key is already loaded.
    pub(crate) fn insert(&mut self, entity: Entity<M>, sort: &[SortDescriptor]) -> Option<usize> {
        if self.contains(entity.id()) {
            return None;
        }
        let index = self
            .pool
            .partition_point(|existing| compare(sort, existing, &entity).is_le());
        self.keys.insert(index, entity.id().to_string());
        self.pool.insert(index, entity);
        Some(index)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<(usize, Entity<M>)> {
        let index = self.position(key)?;
        self.keys.remove(index);
        Some((index, self.pool.remove(index)))
    }

    /// Swaps in a fresh copy of a loaded entity and re-sorts it. Returns
    /// its new index.
    pub(crate) fn replace(&mut self, entity: Entity<M>, sort: &[SortDescriptor]) -> Option<usize> {
        self.remove(entity.id())?;
        self.insert(entity, sort)
    }

    pub(crate) fn entities(&self) -> &[Entity<M>] {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Schema;
    use arbor_value::{FieldValue, ValueKind};
    use proptest::prelude::*;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Default)]
    struct Item {
        rank: i64,
    }

    impl Model for Item {
        const NAME: &'static str = "item";

        fn schema() -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| Schema::new().field("rank", ValueKind::Int))
        }

        fn get(&self, field: &str) -> Option<FieldValue> {
            (field == "rank").then(|| self.rank.into())
        }

        fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
            if field != "rank" {
                return false;
            }
            self.rank = value.and_then(FieldValue::into_int).unwrap_or_default();
            true
        }
    }

    fn item(id: &str, rank: i64) -> Entity<Item> {
        Entity::with_id(id, Item { rank }).unwrap()
    }

    fn aligned(window: &Window<Item>) -> bool {
        window.keys().len() == window.entities().len()
            && window
                .keys()
                .iter()
                .zip(window.entities())
                .all(|(key, entity)| key == entity.id())
    }

    #[test]
    fn newest_key_first() {
        let sort = [SortDescriptor::key(false)];
        let mut window = Window::new();
        assert_eq!(window.insert(item("b", 0), &sort), Some(0));
        assert_eq!(window.insert(item("c", 0), &sort), Some(0));
        assert_eq!(window.insert(item("a", 0), &sort), Some(2));
        assert_eq!(window.insert(item("a", 0), &sort), None);
        assert_eq!(window.keys(), ["c", "b", "a"]);
        assert!(aligned(&window));
    }

    #[test]
    fn ties_keep_arrival_order() {
        let sort = [SortDescriptor::field("rank", true)];
        let mut window = Window::new();
        window.insert(item("x", 1), &sort);
        window.insert(item("y", 0), &sort);
        window.insert(item("z", 1), &sort);
        assert_eq!(window.keys(), ["y", "x", "z"]);
    }

    #[test]
    fn later_criteria_break_ties() {
        let sort = [SortDescriptor::field("rank", false), SortDescriptor::key(true)];
        let mut window = Window::new();
        for (id, rank) in [("d", 1), ("a", 1), ("c", 2), ("b", 0)] {
            window.insert(item(id, rank), &sort);
        }
        assert_eq!(window.keys(), ["c", "a", "d", "b"]);
    }

    #[test]
    fn replace_and_remove() {
        let sort = [SortDescriptor::field("rank", true)];
        let mut window = Window::new();
        window.insert(item("a", 1), &sort);
        window.insert(item("b", 2), &sort);
        window.insert(item("c", 3), &sort);

        assert_eq!(window.replace(item("a", 9), &sort), Some(2));
        assert_eq!(window.keys(), ["b", "c", "a"]);
        assert_eq!(window.replace(item("zz", 0), &sort), None);

        let (index, removed) = window.remove("c").unwrap();
        assert_eq!((index, removed.id()), (1, "c"));
        assert_eq!(window.len(), 2);
        assert_eq!(window.key(1), Some("a"));
        assert_eq!(window.get(0).map(Entity::id), Some("b"));
        assert!(aligned(&window));
    }

    proptest! {
        #[test]
        fn inserts_stay_sorted(ranks in prop::collection::vec(0i64..5, 0..40)) {
            let sort = [SortDescriptor::field("rank", false), SortDescriptor::key(true)];
            let mut window = Window::new();
            for (n, rank) in ranks.iter().enumerate() {
                let index = window.insert(item(&format!("k{n:02}"), *rank), &sort).unwrap();
                let key = format!("k{n:02}");
                prop_assert_eq!(window.key(index), Some(key.as_str()));
            }
            prop_assert_eq!(window.len(), ranks.len());
            prop_assert!(aligned(&window));
            for pair in window.entities().windows(2) {
                prop_assert!(compare(&sort, &pair[0], &pair[1]).is_lt());
            }
        }
    }
}

//! Property-based test generators using proptest.
//!
//! Provides strategies for store keys, fixture models, relation edits and
//! live collection events.

use crate::fixtures::User;
use proptest::prelude::*;
use std::collections::BTreeSet;
use url::Url;

/// Strategy for generating valid store keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,12}").expect("Invalid regex")
}

/// Strategy for generating small key sets.
pub fn key_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(key_strategy(), 0..6)
}

/// Strategy for generating http(s) URLs.
pub fn url_strategy() -> impl Strategy<Value = Url> {
    (
        prop::bool::ANY,
        prop::string::string_regex("[a-z]{1,10}").expect("Invalid regex"),
        prop::string::string_regex("[a-z0-9]{0,8}").expect("Invalid regex"),
    )
        .prop_map(|(secure, host, page)| {
            let scheme = if secure { "https" } else { "http" };
            Url::parse(&format!("{scheme}://{host}.example/{page}")).expect("Generated URL is valid")
        })
}

/// Strategy for generating users with every plain field populated at
/// random.
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        ".{0,24}",
        any::<i64>(),
        -1.0e9f64..1.0e9,
        prop::option::of(url_strategy()),
        key_set_strategy(),
    )
        .prop_map(|(name, age, score, homepage, tags)| User {
            name,
            age,
            score,
            homepage,
            tags,
        })
}

/// One edit of a relation's membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationEdit {
    /// Add a member.
    Insert(String),
    /// Drop a member.
    Remove(String),
}

/// Strategy for relation edits over a small id space, so repeats and
/// removals of absent ids are common.
pub fn relation_edits_strategy() -> impl Strategy<Value = Vec<RelationEdit>> {
    let id = prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(String::from);
    let edit = prop_oneof![
        id.clone().prop_map(RelationEdit::Insert),
        id.prop_map(RelationEdit::Remove),
    ];
    prop::collection::vec(edit, 0..40)
}

/// One change to a seeded collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    /// Write a user at the key, creating or replacing it.
    Put {
        /// Record key.
        key: String,
        /// New age.
        age: i64,
    },
    /// Delete the record at the key.
    Delete {
        /// Record key.
        key: String,
    },
}

/// Strategy for collection events over keys `k001..=k012`.
pub fn collection_events_strategy() -> impl Strategy<Value = Vec<CollectionEvent>> {
    let key = (1usize..=12).prop_map(crate::fixtures::seeded_key);
    let event = prop_oneof![
        3 => (key.clone(), -50i64..50).prop_map(|(key, age)| CollectionEvent::Put { key, age }),
        1 => key.prop_map(|key| CollectionEvent::Delete { key }),
    ];
    prop::collection::vec(event, 1..30)
}

//! Snapshots and subscription events.

use crate::error::StoreError;
use arbor_value::Value;
use std::fmt;
use tokio::sync::mpsc;

/// The data at a path at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    key: String,
    value: Value,
}

impl Snapshot {
    /// Creates a snapshot for the node named `key`.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// The last path segment of the node.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The node's value; null if nothing is stored.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the snapshot, returning its value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns true if any data is stored at the node.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Child snapshot by key. Missing children yield a null snapshot.
    pub fn child(&self, key: &str) -> Snapshot {
        Snapshot::new(key, self.value.get(key).cloned().unwrap_or_default())
    }

    /// Child snapshots in key order.
    pub fn children(&self) -> impl Iterator<Item = Snapshot> + '_ {
        self.value
            .as_map()
            .into_iter()
            .flatten()
            .map(|(k, v)| Snapshot::new(k.clone(), v.clone()))
    }
}

/// Kinds of event a subscription can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The whole value at the path. Fires once on subscribe.
    Value,
    /// A child entered the query's range. Fires for existing children on
    /// subscribe.
    ChildAdded,
    /// A child within range changed.
    ChildChanged,
    /// A child left the query's range.
    ChildRemoved,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Value => "value",
            EventKind::ChildAdded => "child_added",
            EventKind::ChildChanged => "child_changed",
            EventKind::ChildRemoved => "child_removed",
        };
        f.write_str(name)
    }
}

/// One delivery on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Data event. For `ChildRemoved` the snapshot holds the old value.
    Data {
        /// Event kind.
        kind: EventKind,
        /// Snapshot of the node (whole value) or of the child.
        snapshot: Snapshot,
    },
    /// The store revoked the subscription. No further events follow.
    Cancelled(StoreError),
}

/// Identifies a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription: its handle and the receiving end of its events.
#[derive(Debug)]
pub struct Subscription {
    /// Handle used to unsubscribe.
    pub id: SubscriptionId,
    /// Event stream. Closed when the subscription is released.
    pub events: mpsc::UnboundedReceiver<StoreEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_children_in_key_order() {
        let snapshot = Snapshot::new(
            "user",
            Value::map([("b", Value::Integer(2)), ("a", Value::Integer(1))]),
        );
        let keys: Vec<String> = snapshot.children().map(|c| c.key().to_string()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(snapshot.child("a").exists());
        assert!(!snapshot.child("z").exists());
    }

    #[test]
    fn scalar_has_no_children() {
        let snapshot = Snapshot::new("flag", Value::Bool(true));
        assert_eq!(snapshot.children().count(), 0);
        assert_eq!(EventKind::ChildAdded.to_string(), "child_added");
    }
}

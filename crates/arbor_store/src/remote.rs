//! The remote hierarchical store boundary.

use crate::error::StoreResult;
use crate::event::{EventKind, Snapshot, Subscription, SubscriptionId};
use crate::id;
use crate::query::Query;
use arbor_value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Update function run by [`RemoteStore::transaction`].
///
/// Receives the current value (null if absent) and returns the value to
/// commit, or `None` to abort. It may run more than once.
pub type TransactionFn = Box<dyn FnMut(&Value) -> Option<Value> + Send>;

/// A remote, tree-structured key-value store with live subscriptions.
///
/// This abstracts the network layer, allowing for different
/// implementations (a hosted realtime database, [`crate::InMemoryStore`]
/// for testing, fault-injecting wrappers, etc.).
///
/// # Invariants
///
/// - `update` commits every path or none of them
/// - a null value deletes the path; empty containers are never stored
/// - a [`Value::server_timestamp`] placeholder is replaced by the store's
///   clock, in epoch milliseconds, with one reading per update
/// - queries and child events order children by key
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Applies a multi-path update atomically.
    ///
    /// Writes apply in ascending path order, so a child path listed with
    /// its ancestor overrides the matching part of the ancestor's value.
    async fn update(&self, writes: BTreeMap<String, Value>) -> StoreResult<()>;

    /// Reads the value at a path.
    async fn get(&self, path: &str) -> StoreResult<Snapshot>;

    /// Runs a key-ordered range query over the children of a path.
    async fn query(&self, path: &str, query: &Query) -> StoreResult<Vec<Snapshot>>;

    /// Opens a subscription at a path.
    ///
    /// `Value` subscriptions deliver the current value immediately;
    /// `ChildAdded` subscriptions deliver every existing child in range.
    async fn subscribe(&self, path: &str, query: Query, kind: EventKind) -> StoreResult<Subscription>;

    /// Releases a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Atomically reads, modifies and writes the value at a path.
    ///
    /// Returns the committed value.
    async fn transaction(&self, path: &str, update: TransactionFn) -> StoreResult<Value>;

    /// Generates a new ordered key for a record.
    fn push_id(&self) -> String {
        id::push_id()
    }
}

//! In-memory remote store for testing.

use crate::error::{StoreError, StoreResult};
use crate::event::{EventKind, Snapshot, StoreEvent, Subscription, SubscriptionId};
use crate::path;
use crate::query::Query;
use crate::remote::{RemoteStore, TransactionFn};
use arbor_value::Value;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`RemoteStore::update`].
    Update,
    /// [`RemoteStore::get`].
    Get,
    /// [`RemoteStore::query`].
    Query,
    /// [`RemoteStore::subscribe`].
    Subscribe,
    /// [`RemoteStore::transaction`].
    Transaction,
}

#[derive(Debug)]
struct Listener {
    path: String,
    query: Query,
    kind: EventKind,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Debug)]
struct State {
    root: Value,
    connected: bool,
    clock: i64,
    listeners: BTreeMap<SubscriptionId, Listener>,
}

impl State {
    /// Reads the store clock. Readings strictly increase.
    fn tick(&mut self) -> i64 {
        self.clock = Utc::now().timestamp_millis().max(self.clock + 1);
        self.clock
    }

    fn view(&self, at: &str) -> Value {
        if path::is_info(at) {
            let info = Value::map([("connected", Value::Bool(self.connected))]);
            let rest = path::segments(at).skip(1).collect::<Vec<_>>().join("/");
            return info.get_path(&rest).cloned().unwrap_or_default();
        }
        self.root.get_path(at).cloned().unwrap_or_default()
    }

    fn capture(&self) -> Vec<(SubscriptionId, Value)> {
        self.listeners
            .iter()
            .map(|(id, listener)| (*id, self.view(&listener.path)))
            .collect()
    }

    fn notify(&mut self, before: Vec<(SubscriptionId, Value)>) {
        let mut closed = Vec::new();
        for (id, old) in before {
            let Some(listener) = self.listeners.get(&id) else {
                continue;
            };
            let new = self.view(&listener.path);
            if old == new {
                continue;
            }
            for event in diff(listener, &old, &new) {
                if listener.tx.send(event).is_err() {
                    closed.push(id);
                    break;
                }
            }
        }
        for id in closed {
            trace!(%id, "dropping listener with closed receiver");
            self.listeners.remove(&id);
        }
    }

    fn put(&mut self, at: &str, value: Value) {
        let parts: Vec<&str> = path::segments(at).collect();
        let value = prune(value);
        if parts.is_empty() {
            self.root = if value.is_null() { Value::empty_map() } else { value };
        } else if value.is_null() {
            remove_at(&mut self.root, &parts);
        } else {
            insert_at(&mut self.root, &parts, value);
        }
    }
}

/// An in-memory [`RemoteStore`].
///
/// Behaves like a hosted realtime database: child events, key-ordered
/// range queries, server timestamps, all-or-nothing multi-path updates and
/// a connectivity flag at `.info/connected`. Test hooks can deny paths,
/// inject failures and count calls.
///
/// # Example
///
/// ```rust
/// # tokio_test_block(async {
/// use arbor_store::{InMemoryStore, RemoteStore};
/// use arbor_value::Value;
/// use std::collections::BTreeMap;
///
/// let store = InMemoryStore::new();
/// let writes = BTreeMap::from([("v1/user/a/name".to_string(), Value::from("x"))]);
/// store.update(writes).await.unwrap();
/// assert_eq!(store.value_at("v1/user/a/name"), Value::from("x"));
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<State>,
    next_subscription: AtomicU64,
    faults: Mutex<Vec<(StoreOp, StoreError)>>,
    denied: RwLock<Vec<String>>,
    updates: AtomicUsize,
    gets: AtomicUsize,
    queries: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(State {
                root: Value::empty_map(),
                connected: true,
                clock: 0,
                listeners: BTreeMap::new(),
            }),
            next_subscription: AtomicU64::new(1),
            faults: Mutex::new(Vec::new()),
            denied: RwLock::new(Vec::new()),
            updates: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }
}

impl InMemoryStore {
    /// Creates an empty, connected store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the value at a path without counting a call.
    pub fn value_at(&self, at: &str) -> Value {
        self.state.read().view(&path::normalize(at))
    }

    /// Writes a value directly, bypassing rules, faults and counters.
    ///
    /// Listeners are notified as for a normal update.
    pub fn seed(&self, at: &str, value: Value) {
        let mut state = self.state.write();
        let now = state.tick();
        let before = state.capture();
        state.put(&path::normalize(at), resolve_timestamps(value, now));
        state.notify(before);
    }

    /// Sets the connectivity flag served at `.info/connected`.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.write();
        if state.connected == connected {
            return;
        }
        debug!(connected, "connectivity changed");
        let before = state.capture();
        state.connected = connected;
        state.notify(before);
    }

    /// Returns the connectivity flag.
    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    /// Rejects every read and write at or beneath `prefix`.
    pub fn deny(&self, prefix: &str) {
        self.denied.write().push(path::normalize(prefix));
    }

    /// Removes all denial rules.
    pub fn allow_all(&self) {
        self.denied.write().clear();
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.faults.lock().push((op, error));
    }

    /// Revokes every subscription at or beneath `prefix`, delivering
    /// `error` to each.
    pub fn revoke(&self, prefix: &str, error: StoreError) {
        let prefix = path::normalize(prefix);
        let mut state = self.state.write();
        let revoked: Vec<SubscriptionId> = state
            .listeners
            .iter()
            .filter(|(_, l)| path::is_ancestor(&prefix, &l.path))
            .map(|(id, _)| *id)
            .collect();
        for id in revoked {
            if let Some(listener) = state.listeners.remove(&id) {
                let _ = listener.tx.send(StoreEvent::Cancelled(error.clone()));
            }
        }
    }

    /// Number of `update` calls made.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Number of `get` calls made.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `query` calls made.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.state.read().listeners.len()
    }

    fn take_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        match faults.iter().position(|(o, _)| *o == op) {
            Some(index) => Err(faults.remove(index).1),
            None => Ok(()),
        }
    }

    fn check_permission(&self, at: &str) -> StoreResult<()> {
        let denied = self.denied.read();
        if denied
            .iter()
            .any(|prefix| path::is_ancestor(prefix, at) || path::is_ancestor(at, prefix))
        {
            return Err(StoreError::PermissionDenied {
                path: at.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn update(&self, writes: BTreeMap<String, Value>) -> StoreResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.take_fault(StoreOp::Update)?;

        let writes: BTreeMap<String, Value> = writes
            .into_iter()
            .map(|(p, v)| (path::normalize(&p), v))
            .collect();
        for at in writes.keys() {
            path::validate_write(at)?;
            self.check_permission(at)?;
        }

        trace!(paths = writes.len(), "applying multi-path update");
        let mut state = self.state.write();
        let now = state.tick();
        let before = state.capture();
        for (at, value) in writes {
            state.put(&at, resolve_timestamps(value, now));
        }
        state.notify(before);
        Ok(())
    }

    async fn get(&self, at: &str) -> StoreResult<Snapshot> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.take_fault(StoreOp::Get)?;
        let at = path::normalize(at);
        path::validate(&at)?;
        self.check_permission(&at)?;
        let value = self.state.read().view(&at);
        Ok(Snapshot::new(path::key(&at), value))
    }

    async fn query(&self, at: &str, query: &Query) -> StoreResult<Vec<Snapshot>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.take_fault(StoreOp::Query)?;
        let at = path::normalize(at);
        path::validate(&at)?;
        self.check_permission(&at)?;
        let value = self.state.read().view(&at);
        Ok(children(query, &value)
            .into_iter()
            .map(|(k, v)| Snapshot::new(k.clone(), v.clone()))
            .collect())
    }

    async fn subscribe(&self, at: &str, query: Query, kind: EventKind) -> StoreResult<Subscription> {
        self.take_fault(StoreOp::Subscribe)?;
        let at = path::normalize(at);
        path::validate(&at)?;

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, events) = mpsc::unbounded_channel();

        if let Err(err) = self.check_permission(&at) {
            let _ = tx.send(StoreEvent::Cancelled(err));
            return Ok(Subscription { id, events });
        }

        let mut state = self.state.write();
        let listener = Listener {
            path: at,
            query,
            kind,
            tx,
        };
        let current = state.view(&listener.path);
        for event in initial(&listener, &current) {
            let _ = listener.tx.send(event);
        }
        trace!(%id, path = %listener.path, %kind, "subscribed");
        state.listeners.insert(id, listener);
        Ok(Subscription { id, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.state.write().listeners.remove(&id).is_some() {
            trace!(%id, "unsubscribed");
        }
    }

    async fn transaction(&self, at: &str, mut update: TransactionFn) -> StoreResult<Value> {
        self.take_fault(StoreOp::Transaction)?;
        let at = path::normalize(at);
        path::validate_write(&at)?;
        self.check_permission(&at)?;

        let mut state = self.state.write();
        if !state.connected {
            return Err(StoreError::Disconnected);
        }
        let current = state.view(&at);
        let Some(next) = update(&current) else {
            return Err(StoreError::TransactionAborted { path: at });
        };
        let now = state.tick();
        let before = state.capture();
        state.put(&at, resolve_timestamps(next, now));
        state.notify(before);
        Ok(state.view(&at))
    }
}

fn children<'a>(query: &Query, value: &'a Value) -> Vec<(&'a String, &'a Value)> {
    match value.as_map() {
        Some(map) => query.apply(map.iter()),
        None => Vec::new(),
    }
}

fn filtered(query: &Query, value: &Value) -> Value {
    if query.is_unbounded() || value.as_map().is_none() {
        return value.clone();
    }
    let map: BTreeMap<String, Value> = children(query, value)
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if map.is_empty() {
        Value::Null
    } else {
        Value::Map(map)
    }
}

fn initial(listener: &Listener, current: &Value) -> Vec<StoreEvent> {
    match listener.kind {
        EventKind::Value => vec![StoreEvent::Data {
            kind: EventKind::Value,
            snapshot: Snapshot::new(path::key(&listener.path), filtered(&listener.query, current)),
        }],
        EventKind::ChildAdded => children(&listener.query, current)
            .into_iter()
            .map(|(k, v)| StoreEvent::Data {
                kind: EventKind::ChildAdded,
                snapshot: Snapshot::new(k.clone(), v.clone()),
            })
            .collect(),
        EventKind::ChildChanged | EventKind::ChildRemoved => Vec::new(),
    }
}

fn diff(listener: &Listener, old: &Value, new: &Value) -> Vec<StoreEvent> {
    let data = |kind, key: &str, value: &Value| StoreEvent::Data {
        kind,
        snapshot: Snapshot::new(key, value.clone()),
    };

    if listener.kind == EventKind::Value {
        let (old, new) = (filtered(&listener.query, old), filtered(&listener.query, new));
        if old == new {
            return Vec::new();
        }
        return vec![data(EventKind::Value, path::key(&listener.path), &new)];
    }

    let before: BTreeMap<&String, &Value> = children(&listener.query, old).into_iter().collect();
    let after: BTreeMap<&String, &Value> = children(&listener.query, new).into_iter().collect();

    match listener.kind {
        EventKind::ChildAdded => after
            .iter()
            .filter(|(k, _)| !before.contains_key(*k))
            .map(|(k, v)| data(EventKind::ChildAdded, k, v))
            .collect(),
        EventKind::ChildChanged => after
            .iter()
            .filter(|(k, v)| before.get(*k).is_some_and(|old| old != *v))
            .map(|(k, v)| data(EventKind::ChildChanged, k, v))
            .collect(),
        EventKind::ChildRemoved => before
            .iter()
            .filter(|(k, _)| !after.contains_key(*k))
            .map(|(k, v)| data(EventKind::ChildRemoved, k, v))
            .collect(),
        EventKind::Value => Vec::new(),
    }
}

/// Drops nulls and empty containers, which the store never holds.
fn prune(value: Value) -> Value {
    match value {
        Value::Map(map) => {
            let map: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Map(map)
            }
        }
        Value::Array(items) if items.is_empty() => Value::Null,
        other => other,
    }
}

fn resolve_timestamps(value: Value, now: i64) -> Value {
    if value.is_server_timestamp() {
        return Value::Integer(now);
    }
    match value {
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, resolve_timestamps(v, now)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_timestamps(v, now))
                .collect(),
        ),
        other => other,
    }
}

fn insert_at(node: &mut Value, parts: &[&str], value: Value) {
    let Some((first, rest)) = parts.split_first() else {
        *node = value;
        return;
    };
    if node.as_map().is_none() {
        *node = Value::empty_map();
    }
    if let Value::Map(map) = node {
        let child = map.entry((*first).to_string()).or_default();
        insert_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, parts: &[&str]) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    let Value::Map(map) = node else {
        return;
    };
    if rest.is_empty() {
        map.remove(*first);
        return;
    }
    if let Some(child) = map.get_mut(*first) {
        remove_at(child, rest);
        if child.is_empty() {
            map.remove(*first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writes(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(p, v)| (p.to_string(), v.clone()))
            .collect()
    }

    fn next(sub: &mut Subscription) -> Option<StoreEvent> {
        sub.events.try_recv().ok()
    }

    fn data(kind: EventKind, key: &str, value: Value) -> StoreEvent {
        StoreEvent::Data {
            kind,
            snapshot: Snapshot::new(key, value),
        }
    }

    #[tokio::test]
    async fn update_and_get() {
        let store = InMemoryStore::new();
        store
            .update(writes(&[
                ("v1/user/a", Value::map([("name", Value::from("x"))])),
                ("v1/user/b/name", Value::from("y")),
            ]))
            .await
            .unwrap();

        let snapshot = store.get("v1/user/a").await.unwrap();
        assert_eq!(snapshot.key(), "a");
        assert_eq!(snapshot.value().get("name"), Some(&Value::from("x")));
        assert_eq!(store.value_at("v1/user/b/name"), Value::from("y"));
        assert_eq!(store.update_count(), 1);
        assert_eq!(store.get_count(), 1);
    }

    #[tokio::test]
    async fn child_path_overrides_ancestor_write() {
        let store = InMemoryStore::new();
        store
            .update(writes(&[
                ("g/1", Value::map([("name", Value::from("g")), ("users", Value::map([("u", Value::Bool(false))]))])),
                ("g/1/users/u", Value::Bool(true)),
            ]))
            .await
            .unwrap();
        assert_eq!(store.value_at("g/1/users/u"), Value::Bool(true));
        assert_eq!(store.value_at("g/1/name"), Value::from("g"));
    }

    #[tokio::test]
    async fn null_deletes_and_prunes_parents() {
        let store = InMemoryStore::new();
        store.seed("a/b/c", Value::Integer(1));
        store.update(writes(&[("a/b/c", Value::Null)])).await.unwrap();
        assert_eq!(store.value_at("a"), Value::Null);
        assert!(!store.get("a/b").await.unwrap().exists());
    }

    #[tokio::test]
    async fn empty_containers_are_not_stored() {
        let store = InMemoryStore::new();
        store
            .update(writes(&[("a", Value::map([("tags", Value::empty_map()), ("n", Value::Integer(1))]))]))
            .await
            .unwrap();
        assert_eq!(store.value_at("a"), Value::map([("n", Value::Integer(1))]));
    }

    #[tokio::test]
    async fn update_is_all_or_nothing() {
        let store = InMemoryStore::new();
        store.deny("secret");
        let err = store
            .update(writes(&[
                ("public/a", Value::Integer(1)),
                ("secret/b", Value::Integer(2)),
            ]))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::PermissionDenied { path: "secret/b".into() });
        assert_eq!(store.value_at("public/a"), Value::Null);

        let err = store
            .update(writes(&[("ok", Value::Integer(1)), ("bad#key", Value::Integer(2))]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
        assert_eq!(store.value_at("ok"), Value::Null);
    }

    #[tokio::test]
    async fn server_timestamps_share_one_reading() {
        let store = InMemoryStore::new();
        store
            .update(writes(&[
                ("e/_createdAt", Value::server_timestamp()),
                ("e/_updatedAt", Value::server_timestamp()),
            ]))
            .await
            .unwrap();
        let created = store.value_at("e/_createdAt").as_integer().unwrap();
        assert_eq!(store.value_at("e/_updatedAt").as_integer(), Some(created));

        store
            .update(writes(&[("e/_updatedAt", Value::server_timestamp())]))
            .await
            .unwrap();
        assert!(store.value_at("e/_updatedAt").as_integer().unwrap() > created);
    }

    #[tokio::test]
    async fn key_ordered_query() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.seed(&format!("items/k{i}"), Value::Integer(i));
        }
        let query = Query::new().ending_at("k3").limit_to_last(2);
        let keys: Vec<String> = store
            .query("items", &query)
            .await
            .unwrap()
            .iter()
            .map(|s| s.key().to_string())
            .collect();
        assert_eq!(keys, ["k2", "k3"]);
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn child_events() {
        let store = InMemoryStore::new();
        store.seed("items/a", Value::Integer(1));

        let mut added = store.subscribe("items", Query::new(), EventKind::ChildAdded).await.unwrap();
        let mut changed = store.subscribe("items", Query::new(), EventKind::ChildChanged).await.unwrap();
        let mut removed = store.subscribe("items", Query::new(), EventKind::ChildRemoved).await.unwrap();

        assert_eq!(next(&mut added), Some(data(EventKind::ChildAdded, "a", Value::Integer(1))));
        assert_eq!(next(&mut added), None);

        store.seed("items/b", Value::Integer(2));
        store.seed("items/a", Value::Integer(3));
        store.seed("items/b", Value::Null);

        assert_eq!(next(&mut added), Some(data(EventKind::ChildAdded, "b", Value::Integer(2))));
        assert_eq!(next(&mut changed), Some(data(EventKind::ChildChanged, "a", Value::Integer(3))));
        assert_eq!(next(&mut removed), Some(data(EventKind::ChildRemoved, "b", Value::Integer(2))));
        assert_eq!(next(&mut changed), None);
    }

    #[tokio::test]
    async fn child_added_respects_start_bound() {
        let store = InMemoryStore::new();
        store.seed("items/k1", Value::Integer(1));
        store.seed("items/k5", Value::Integer(5));
        let mut sub = store
            .subscribe("items", Query::new().starting_at("k5"), EventKind::ChildAdded)
            .await
            .unwrap();
        assert_eq!(next(&mut sub), Some(data(EventKind::ChildAdded, "k5", Value::Integer(5))));

        store.seed("items/k0", Value::Integer(0));
        assert_eq!(next(&mut sub), None);
        store.seed("items/k9", Value::Integer(9));
        assert_eq!(next(&mut sub), Some(data(EventKind::ChildAdded, "k9", Value::Integer(9))));
    }

    #[tokio::test]
    async fn value_subscription_and_unsubscribe() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("e/1", Query::new(), EventKind::Value).await.unwrap();
        assert_eq!(next(&mut sub), Some(data(EventKind::Value, "1", Value::Null)));

        store.seed("e/1/name", Value::from("x"));
        assert_eq!(
            next(&mut sub),
            Some(data(EventKind::Value, "1", Value::map([("name", Value::from("x"))])))
        );

        store.seed("e/2/name", Value::from("unrelated"));
        assert_eq!(next(&mut sub), None);

        assert_eq!(store.listener_count(), 1);
        store.unsubscribe(sub.id);
        store.unsubscribe(sub.id);
        assert_eq!(store.listener_count(), 0);
        assert!(sub.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn connectivity_flag() {
        let store = InMemoryStore::new();
        let mut sub = store
            .subscribe(".info/connected", Query::new(), EventKind::Value)
            .await
            .unwrap();
        assert_eq!(next(&mut sub), Some(data(EventKind::Value, "connected", Value::Bool(true))));

        store.set_connected(false);
        assert_eq!(next(&mut sub), Some(data(EventKind::Value, "connected", Value::Bool(false))));
        assert!(store
            .update(writes(&[(".info/connected", Value::Bool(true))]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn transactions() {
        let store = InMemoryStore::new();
        store.seed("counter", Value::Integer(1));

        let value = store
            .transaction(
                "counter",
                Box::new(|current: &Value| Some(Value::Integer(current.as_integer().unwrap_or(0) + 1))),
            )
            .await
            .unwrap();
        assert_eq!(value, Value::Integer(2));

        let err = store.transaction("counter", Box::new(|_: &Value| None)).await.unwrap_err();
        assert!(matches!(err, StoreError::TransactionAborted { .. }));

        store.set_connected(false);
        let err = store
            .transaction("counter", Box::new(|_: &Value| Some(Value::Integer(0))))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Disconnected);
        assert_eq!(store.value_at("counter"), Value::Integer(2));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::Query, StoreError::network_retryable("flaky"));
        assert!(store.query("a", &Query::new()).await.is_err());
        assert!(store.query("a", &Query::new()).await.is_ok());
    }

    #[tokio::test]
    async fn denied_subscription_is_cancelled() {
        let store = InMemoryStore::new();
        store.deny("private");
        let mut sub = store
            .subscribe("private/x", Query::new(), EventKind::Value)
            .await
            .unwrap();
        assert!(matches!(
            sub.events.recv().await,
            Some(StoreEvent::Cancelled(StoreError::PermissionDenied { .. }))
        ));
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn revoke_cancels_listeners() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe("items", Query::new(), EventKind::ChildAdded).await.unwrap();
        store.revoke("items", StoreError::network_fatal("gone"));
        assert!(matches!(next(&mut sub), Some(StoreEvent::Cancelled(_))));
        assert_eq!(store.listener_count(), 0);
    }
}

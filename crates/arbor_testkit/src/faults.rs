//! Fault-injecting store wrappers.
//!
//! [`SlowStore`] delays chosen record store calls and [`ScriptedBlobStore`]
//! delays or stalls chosen uploads, counting the ones that were cancelled
//! while in flight. Both delegate the actual work to the in-memory stores,
//! so results can be checked against them afterwards.

use arbor_store::{
    BlobMetadata, BlobPayload, BlobStore, EventKind, InMemoryBlobStore, InMemoryStore, Query,
    RemoteStore, Snapshot, StoreOp, StoreResult, Subscription, SubscriptionId, TransactionFn,
};
use arbor_value::Value;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How long an operation takes before it reaches the wrapped store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    /// No delay.
    Immediate,
    /// Sleep first.
    Delay(Duration),
    /// Never complete.
    Hang,
}

impl Latency {
    async fn wait(self) {
        match self {
            Latency::Immediate => {}
            Latency::Delay(duration) => tokio::time::sleep(duration).await,
            Latency::Hang => futures::future::pending::<()>().await,
        }
    }
}

/// A record store that slows down chosen calls.
///
/// Rules match an operation and a path fragment; the first matching rule
/// applies.
pub struct SlowStore {
    inner: Arc<InMemoryStore>,
    rules: RwLock<Vec<(StoreOp, String, Latency)>>,
}

impl SlowStore {
    /// Wraps `inner` with no rules.
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    /// Delays `op` on every path containing `fragment`.
    pub fn slow(&self, op: StoreOp, fragment: &str, latency: Latency) {
        self.rules.write().push((op, fragment.to_string(), latency));
    }

    /// Drops every rule.
    pub fn clear(&self) {
        self.rules.write().clear();
    }

    fn latency(&self, op: StoreOp, path: &str) -> Latency {
        self.rules
            .read()
            .iter()
            .find(|(o, fragment, _)| *o == op && path.contains(fragment.as_str()))
            .map_or(Latency::Immediate, |(_, _, latency)| *latency)
    }
}

#[async_trait]
impl RemoteStore for SlowStore {
    async fn update(&self, writes: BTreeMap<String, Value>) -> StoreResult<()> {
        let latency = writes
            .keys()
            .map(|at| self.latency(StoreOp::Update, at))
            .find(|latency| *latency != Latency::Immediate)
            .unwrap_or(Latency::Immediate);
        latency.wait().await;
        self.inner.update(writes).await
    }

    async fn get(&self, path: &str) -> StoreResult<Snapshot> {
        self.latency(StoreOp::Get, path).wait().await;
        self.inner.get(path).await
    }

    async fn query(&self, path: &str, query: &Query) -> StoreResult<Vec<Snapshot>> {
        self.latency(StoreOp::Query, path).wait().await;
        self.inner.query(path, query).await
    }

    async fn subscribe(&self, path: &str, query: Query, kind: EventKind) -> StoreResult<Subscription> {
        self.latency(StoreOp::Subscribe, path).wait().await;
        self.inner.subscribe(path, query, kind).await
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id);
    }

    async fn transaction(&self, path: &str, update: TransactionFn) -> StoreResult<Value> {
        self.latency(StoreOp::Transaction, path).wait().await;
        self.inner.transaction(path, update).await
    }

    fn push_id(&self) -> String {
        self.inner.push_id()
    }
}

/// Marks an upload in flight; counts a cancellation if dropped early.
struct InFlight<'a> {
    cancelled: &'a AtomicUsize,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A blob store whose uploads take as long as they are told to.
#[derive(Default)]
pub struct ScriptedBlobStore {
    inner: InMemoryBlobStore,
    rules: RwLock<Vec<(String, Latency)>>,
    started: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedBlobStore {
    /// Creates an empty store where every upload is immediate.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored objects.
    pub fn inner(&self) -> &InMemoryBlobStore {
        &self.inner
    }

    /// Sets the latency of uploads to paths containing `fragment`.
    pub fn script(&self, fragment: &str, latency: Latency) {
        self.rules.write().push((fragment.to_string(), latency));
    }

    /// Uploads begun.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Uploads that reached the store.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Uploads dropped before they reached the store.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn latency(&self, path: &str) -> Latency {
        self.rules
            .read()
            .iter()
            .find(|(fragment, _)| path.contains(fragment.as_str()))
            .map_or(Latency::Immediate, |(_, latency)| *latency)
    }
}

#[async_trait]
impl BlobStore for ScriptedBlobStore {
    async fn put(
        &self,
        path: &str,
        payload: BlobPayload,
        content_type: Option<&str>,
    ) -> StoreResult<BlobMetadata> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = InFlight {
            cancelled: &self.cancelled,
            armed: true,
        };
        let latency = self.latency(path);
        trace!(path, ?latency, "scripted upload");
        latency.wait().await;
        let result = self.inner.put(path, payload, content_type).await;
        in_flight.armed = false;
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, path: &str, max_size: u64) -> StoreResult<Bytes> {
        self.inner.get(path, max_size).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.inner.delete(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_query_waits() {
        let store = SlowStore::new(Arc::new(InMemoryStore::new()));
        store.slow(StoreOp::Query, "items", Latency::Delay(Duration::from_secs(3)));

        let start = tokio::time::Instant::now();
        store.query("items", &Query::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        store.query("other", &Query::new()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(store.inner().query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_upload_counts_as_cancelled() {
        let blobs = Arc::new(ScriptedBlobStore::new());
        blobs.script("stuck", Latency::Hang);

        let payload = BlobPayload::Bytes(Bytes::from_static(b"x"));
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            blobs.put("a/stuck/f", payload.clone(), None),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(blobs.cancelled(), 1);

        blobs.put("a/fine/f", payload, None).await.unwrap();
        assert_eq!(blobs.started(), 2);
        assert_eq!(blobs.completed(), 1);
        assert_eq!(blobs.cancelled(), 1);
        assert!(blobs.inner().contains("a/fine/f"));
    }
}

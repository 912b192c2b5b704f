//! The shared handle every operation runs against.
//!
//! A [`Context`] is built once per store connection and passed to every
//! entity, package and data source call. It owns the store handles, the
//! configuration, the connectivity signal and the snapshot cache. Nothing
//! about it is global.
//!
//! The cache holds at most [`ArborConfig::cache_capacity`] snapshots and
//! evicts the least recently read one. Only packages submitted through the
//! same context invalidate entries, so a cached read can lag behind edits
//! made by other clients until the entry is evicted.

use crate::config::ArborConfig;
use crate::disposer::Disposer;
use crate::entity::Model;
use crate::error::{CoreError, CoreResult};
use arbor_store::{path, BlobStore, EventKind, Query, RemoteStore, StoreEvent};
use arbor_value::Value;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

struct Inner {
    store: Arc<dyn RemoteStore>,
    blobs: Arc<dyn BlobStore>,
    config: ArborConfig,
    connected: watch::Receiver<bool>,
    connectivity: Disposer,
    cache: Mutex<LruCache<String, Value>>,
}

/// A cheap-to-clone handle on one store connection.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Connects to the stores and starts tracking connectivity.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the connectivity subscription is refused.
    pub async fn connect(
        store: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStore>,
        config: ArborConfig,
    ) -> CoreResult<Self> {
        let mut subscription = store
            .subscribe(&config.connectivity_path, Query::new(), EventKind::Value)
            .await?;

        let initial = match subscription.events.recv().await {
            Some(StoreEvent::Data { snapshot, .. }) => snapshot.value().as_bool() == Some(true),
            Some(StoreEvent::Cancelled(err)) => return Err(err.into()),
            None => {
                return Err(CoreError::lost_completion(
                    "connectivity subscription closed before its first value",
                ))
            }
        };
        debug!(connected = initial, "context connected");

        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        let (tx, connected) = watch::channel(initial);
        tokio::spawn(track_connectivity(subscription.events, tx));

        Ok(Self {
            inner: Arc::new(Inner {
                connectivity: Disposer::new(store.clone(), subscription.id),
                store,
                blobs,
                config,
                connected,
                cache: Mutex::new(LruCache::new(capacity)),
            }),
        })
    }

    /// The remote store.
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.store
    }

    /// The blob store.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    /// The configuration.
    pub fn config(&self) -> &ArborConfig {
        &self.inner.config
    }

    /// Root path of a model's collection: `<version>/<name>`.
    pub fn collection_path<M: Model>(&self) -> String {
        match M::VERSION {
            Some(version) => path::join(version, M::NAME),
            None => path::join(&self.inner.config.version, M::NAME),
        }
    }

    /// Returns the last known connectivity state.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// A receiver that observes connectivity changes.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connected.clone()
    }

    /// Waits until the store reports itself online.
    ///
    /// # Errors
    ///
    /// Returns an error if connectivity tracking has stopped.
    pub async fn wait_connected(&self) -> CoreResult<()> {
        let mut rx = self.inner.connected.clone();
        rx.wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|_| CoreError::lost_completion("connectivity tracking stopped"))
    }

    /// Returns a cached snapshot value and marks it recently used.
    ///
    /// The value may be stale with respect to writes from other clients.
    pub fn cached(&self, at: &str) -> Option<Value> {
        if !self.inner.config.cache_snapshots {
            return None;
        }
        self.inner.cache.lock().get(at).cloned()
    }

    /// Caches a snapshot value, evicting the least recently read one when
    /// full.
    pub fn cache(&self, at: &str, value: Value) {
        if self.inner.config.cache_snapshots {
            if let Some((evicted, _)) = self.inner.cache.lock().push(at.to_string(), value) {
                if evicted != at {
                    trace!(path = %evicted, "snapshot evicted");
                }
            }
        }
    }

    /// Number of cached snapshots.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    /// Drops cached values overlapping any of the written paths.
    pub fn invalidate<'a>(&self, written: impl IntoIterator<Item = &'a str>) {
        let written: Vec<&str> = written.into_iter().collect();
        let mut cache = self.inner.cache.lock();
        let stale: Vec<String> = cache
            .iter()
            .map(|(cached, _)| cached)
            .filter(|cached| {
                written
                    .iter()
                    .any(|w| path::is_ancestor(w, cached) || path::is_ancestor(cached, w))
            })
            .cloned()
            .collect();
        for cached in &stale {
            cache.pop(cached.as_str());
        }
    }

    /// Stops connectivity tracking. Calling this more than once is harmless.
    pub fn close(&self) {
        self.inner.connectivity.dispose();
    }

    /// Returns true once [`Context::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.connectivity.is_disposed()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn track_connectivity(mut events: mpsc::UnboundedReceiver<StoreEvent>, tx: watch::Sender<bool>) {
    while let Some(event) = events.recv().await {
        match event {
            StoreEvent::Data { snapshot, .. } => {
                let online = snapshot.value().as_bool() == Some(true);
                debug!(online, "connectivity changed");
                tx.send_replace(online);
            }
            StoreEvent::Cancelled(err) => {
                warn!(error = %err, "connectivity subscription cancelled");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{InMemoryBlobStore, InMemoryStore};

    async fn context(store: &Arc<InMemoryStore>) -> Context {
        Context::connect(store.clone(), Arc::new(InMemoryBlobStore::new()), ArborConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn tracks_connectivity() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = context(&store).await;
        assert!(ctx.is_connected());

        let mut rx = ctx.connectivity();
        store.set_connected(false);
        rx.changed().await.unwrap();
        assert!(!ctx.is_connected());

        store.set_connected(true);
        ctx.wait_connected().await.unwrap();
        assert!(ctx.is_connected());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = context(&store).await;
        assert_eq!(store.listener_count(), 1);
        ctx.close();
        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn cache_invalidation() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = context(&store).await;
        ctx.cache("v1/user/a", Value::from("a"));
        ctx.cache("v1/user/b", Value::from("b"));

        ctx.invalidate(["v1/user/a/name"]);
        assert_eq!(ctx.cached("v1/user/a"), None);
        assert_eq!(ctx.cached("v1/user/b"), Some(Value::from("b")));

        ctx.invalidate(["v1"]);
        assert_eq!(ctx.cached("v1/user/b"), None);
    }

    #[tokio::test]
    async fn cache_evicts_least_recently_read() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = Context::connect(
            store.clone(),
            Arc::new(InMemoryBlobStore::new()),
            ArborConfig::default().cache_capacity(2),
        )
        .await
        .unwrap();
        ctx.cache("v1/user/a", Value::from("a"));
        ctx.cache("v1/user/b", Value::from("b"));
        assert_eq!(ctx.cached("v1/user/a"), Some(Value::from("a")));

        ctx.cache("v1/user/c", Value::from("c"));
        assert_eq!(ctx.cache_len(), 2);
        assert_eq!(ctx.cached("v1/user/b"), None);
        assert_eq!(ctx.cached("v1/user/a"), Some(Value::from("a")));
        assert_eq!(ctx.cached("v1/user/c"), Some(Value::from("c")));
    }

    #[tokio::test]
    async fn refused_connectivity_fails_connect() {
        let store = Arc::new(InMemoryStore::new());
        store.deny(".info");
        let result = Context::connect(
            store.clone(),
            Arc::new(InMemoryBlobStore::new()),
            ArborConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(CoreError::Store(_))));
    }
}

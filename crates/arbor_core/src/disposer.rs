//! Subscription release handles.

use arbor_store::{RemoteStore, SubscriptionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Releases exactly one store subscription.
///
/// Disposal is idempotent, and dropping the handle disposes it.
pub struct Disposer {
    target: Option<(Arc<dyn RemoteStore>, SubscriptionId)>,
    disposed: AtomicBool,
}

impl Disposer {
    /// Creates a handle for a live subscription.
    pub fn new(store: Arc<dyn RemoteStore>, id: SubscriptionId) -> Self {
        Self {
            target: Some((store, id)),
            disposed: AtomicBool::new(false),
        }
    }

    /// A handle with nothing to release.
    pub fn none() -> Self {
        Self {
            target: None,
            disposed: AtomicBool::new(true),
        }
    }

    /// The subscription this handle releases.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.target.as_ref().map(|(_, id)| *id)
    }

    /// Returns true once the subscription has been released.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Releases the subscription. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((store, id)) = &self.target {
            store.unsubscribe(*id);
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("id", &self.id())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Holds many disposers and releases them together.
#[derive(Debug, Default)]
pub struct DisposeBag {
    disposers: Mutex<Vec<Disposer>>,
}

impl DisposeBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a disposer to the bag.
    pub fn insert(&self, disposer: Disposer) {
        self.disposers.lock().push(disposer);
    }

    /// Number of disposers held.
    pub fn len(&self) -> usize {
        self.disposers.lock().len()
    }

    /// Returns true if the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.disposers.lock().is_empty()
    }

    /// Disposes and removes every held disposer.
    pub fn dispose_all(&self) {
        let disposers = std::mem::take(&mut *self.disposers.lock());
        for disposer in &disposers {
            disposer.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{EventKind, InMemoryStore, Query};

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let sub = store.subscribe("a", Query::new(), EventKind::Value).await.unwrap();
        let disposer = Disposer::new(store.clone(), sub.id);
        assert_eq!(store.listener_count(), 1);

        disposer.dispose();
        disposer.dispose();
        assert!(disposer.is_disposed());
        assert_eq!(store.listener_count(), 0);
        drop(disposer);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn drop_disposes() {
        let store = Arc::new(InMemoryStore::new());
        let sub = store.subscribe("a", Query::new(), EventKind::Value).await.unwrap();
        {
            let _disposer = Disposer::new(store.clone(), sub.id);
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn none_is_inert() {
        let disposer = Disposer::none();
        assert!(disposer.is_disposed());
        assert_eq!(disposer.id(), None);
        disposer.dispose();
    }

    #[tokio::test]
    async fn bag_disposes_everything() {
        let store = Arc::new(InMemoryStore::new());
        let bag = DisposeBag::new();
        for path in ["a", "b", "c"] {
            let sub = store.subscribe(path, Query::new(), EventKind::Value).await.unwrap();
            bag.insert(Disposer::new(store.clone(), sub.id));
        }
        assert_eq!(bag.len(), 3);
        bag.dispose_all();
        bag.dispose_all();
        assert!(bag.is_empty());
        assert_eq!(store.listener_count(), 0);
    }
}

//! Live, paginated views over a collection.
//!
//! A [`DataSource`] reads the keys under a *reference* path, newest page
//! first, and resolves each key to an entity in the model's collection.
//! The reference can be the collection itself, or an index of links such
//! as a relation node (`v1/group/<id>/members`).
//!
//! After the first page it follows the reference's child events and sends
//! index diffs on its channel. [`DataSource::prev`] loads the next older
//! page.
//!
//! ```text
//! open ──query(limit_to_last)──▶ Initial
//!      ──child_added/changed/removed──▶ Update(Change)
//! prev ──query(ending_at(oldest), limit + 1)──▶ Update(insertions)
//! ```

mod change;
mod options;
mod window;

pub use change::{Change, CollectionChange};
pub use options::{compare, DataSourceOptions, Filter, SortDescriptor, SortKey};

use crate::context::Context;
use crate::disposer::{DisposeBag, Disposer};
use crate::entity::{forward, Entity, Model};
use crate::error::{CoreError, CoreResult};
use crate::package::Package;
use arbor_store::{path, EventKind, Query, Snapshot, StoreEvent};
use arbor_value::Value;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use window::Window;

#[derive(Debug, Default)]
struct Paging {
    /// Oldest reference key fetched so far; the cursor of the next page.
    oldest: Option<String>,
    /// Cursor of the page being fetched.
    in_flight: Option<String>,
    /// Cursor of the last page fetched in full.
    completed: Option<String>,
    exhausted: bool,
}

impl Paging {
    /// Whether `key` falls in the range of reference keys fetched so far.
    fn covers(&self, key: &str) -> bool {
        self.exhausted || self.oldest.as_deref().map_or(true, |oldest| key >= oldest)
    }
}

struct State<M: Model> {
    window: Window<M>,
    paging: Paging,
}

struct Source<M: Model> {
    ctx: Context,
    reference: String,
    collection: String,
    options: DataSourceOptions<M>,
    limit: usize,
    timeout: Duration,
    state: Mutex<State<M>>,
    tx: mpsc::UnboundedSender<CollectionChange>,
}

impl<M: Model> Source<M> {
    fn emit(&self, change: CollectionChange) {
        // The consumer may have dropped its receiver.
        let _ = self.tx.send(change);
    }

    fn is_direct(&self) -> bool {
        self.reference == self.collection
    }

    async fn fetch(&self, key: &str) -> CoreResult<Option<Entity<M>>> {
        let snapshot = self
            .ctx
            .store()
            .get(&path::join(&self.collection, key))
            .await?;
        Ok(snapshot
            .exists()
            .then(|| Entity::from_value(&self.ctx, key, snapshot.value())))
    }

    async fn resolve_one(&self, snapshot: &Snapshot) -> CoreResult<Option<Entity<M>>> {
        if self.is_direct() {
            return Ok(snapshot
                .exists()
                .then(|| Entity::from_snapshot(&self.ctx, snapshot)));
        }
        self.fetch(snapshot.key()).await
    }

    /// Resolves a page of reference snapshots under the fetch deadline.
    ///
    /// Entities resolved before a failure or the deadline are returned
    /// along with the error.
    async fn resolve(&self, snapshots: &[Snapshot]) -> (Vec<Entity<M>>, Option<CoreError>) {
        if self.is_direct() {
            let entities = snapshots
                .iter()
                .filter(|s| s.exists())
                .map(|s| Entity::from_snapshot(&self.ctx, s))
                .filter(|e| self.options.admits(e))
                .collect();
            return (entities, None);
        }
        let mut resolved = Vec::with_capacity(snapshots.len());
        let mut failure = None;
        let outcome = {
            let mut pending: FuturesUnordered<_> =
                snapshots.iter().map(|s| self.fetch(s.key())).collect();
            tokio::time::timeout(self.timeout, async {
                while let Some(result) = pending.next().await {
                    match result {
                        Ok(Some(entity)) if self.options.admits(&entity) => resolved.push(entity),
                        Ok(_) => {}
                        Err(err) => {
                            failure.get_or_insert(err);
                        }
                    }
                }
            })
            .await
        };
        if outcome.is_err() {
            failure = Some(CoreError::timeout("page", self.timeout));
        }
        (resolved, failure)
    }

    async fn on_added(&self, snapshot: Snapshot) {
        if self.state.lock().window.contains(snapshot.key()) {
            return;
        }
        let entity = match self.resolve_one(&snapshot).await {
            Ok(Some(entity)) if self.options.admits(&entity) => entity,
            Ok(_) => return,
            Err(err) => return self.emit(CollectionChange::Error(err)),
        };
        let index = self.state.lock().window.insert(entity, &self.options.sort);
        if let Some(index) = index {
            trace!(key = snapshot.key(), index, "child added");
            self.emit(CollectionChange::Update(Change::insertions(vec![index])));
        }
    }

    /// Applies a change to a loaded key, or admits a key in the fetched
    /// range that now passes the filter.
    async fn on_changed(&self, snapshot: Snapshot) {
        {
            let state = self.state.lock();
            if !state.window.contains(snapshot.key()) && !state.paging.covers(snapshot.key()) {
                return;
            }
        }
        let entity = match self.resolve_one(&snapshot).await {
            Ok(entity) => entity.filter(|e| self.options.admits(e)),
            Err(err) => return self.emit(CollectionChange::Error(err)),
        };
        let change = {
            let mut state = self.state.lock();
            match entity {
                Some(entity) if state.window.contains(entity.id()) => state
                    .window
                    .replace(entity, &self.options.sort)
                    .map(|index| Change::modifications(vec![index])),
                Some(entity) => state
                    .window
                    .insert(entity, &self.options.sort)
                    .map(|index| Change::insertions(vec![index])),
                None => state
                    .window
                    .remove(snapshot.key())
                    .map(|(index, _)| Change::deletions(vec![index])),
            }
        };
        if let Some(change) = change {
            trace!(key = snapshot.key(), ?change, "child changed");
            self.emit(CollectionChange::Update(change));
        }
    }

    fn on_removed(&self, snapshot: &Snapshot) {
        let removed = self.state.lock().window.remove(snapshot.key());
        if let Some((index, _)) = removed {
            trace!(key = snapshot.key(), index, "child removed");
            self.emit(CollectionChange::Update(Change::deletions(vec![index])));
        }
    }
}

async fn pump<M: Model>(
    source: Arc<Source<M>>,
    mut added: mpsc::UnboundedReceiver<StoreEvent>,
    mut changed: mpsc::UnboundedReceiver<StoreEvent>,
    mut removed: mpsc::UnboundedReceiver<StoreEvent>,
) {
    loop {
        let (kind, event) = tokio::select! {
            biased;
            Some(event) = added.recv() => (EventKind::ChildAdded, event),
            Some(event) = changed.recv() => (EventKind::ChildChanged, event),
            Some(event) = removed.recv() => (EventKind::ChildRemoved, event),
            else => break,
        };
        let snapshot = match event {
            StoreEvent::Data { snapshot, .. } => snapshot,
            StoreEvent::Cancelled(err) => {
                warn!(path = %source.reference, %kind, error = %err, "data source subscription cancelled");
                source.emit(CollectionChange::Error(err.into()));
                continue;
            }
        };
        match kind {
            EventKind::ChildAdded => source.on_added(snapshot).await,
            EventKind::ChildChanged => source.on_changed(snapshot).await,
            EventKind::ChildRemoved => source.on_removed(&snapshot),
            EventKind::Value => {}
        }
    }
    trace!(path = %source.reference, "data source pump stopped");
}

/// A live, paginated, diff-emitting view over a collection.
///
/// All window mutations go through one lock, so the event pump and
/// [`DataSource::prev`] never interleave inside an update. Dropping the
/// data source closes it.
pub struct DataSource<M: Model> {
    source: Arc<Source<M>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    subscriptions: DisposeBag,
}

impl<M: Model> DataSource<M> {
    /// Opens a data source over the model's own collection.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the first page or a subscription is
    /// refused.
    pub async fn collection(
        ctx: &Context,
        options: DataSourceOptions<M>,
    ) -> CoreResult<(Self, mpsc::UnboundedReceiver<CollectionChange>)> {
        Self::open(ctx, ctx.collection_path::<M>(), options).await
    }

    /// Opens a data source whose keys are the children of `reference`.
    ///
    /// The first notification is [`CollectionChange::Initial`], sent once
    /// the newest page is loaded.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the first page or a subscription is
    /// refused.
    pub async fn open(
        ctx: &Context,
        reference: impl Into<String>,
        options: DataSourceOptions<M>,
    ) -> CoreResult<(Self, mpsc::UnboundedReceiver<CollectionChange>)> {
        let reference = path::normalize(&reference.into());
        path::validate(&reference)?;
        let limit = options.limit.unwrap_or(ctx.config().page_size).max(1);
        let timeout = options.timeout.unwrap_or(ctx.config().fetch_timeout);
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(Source {
            ctx: ctx.clone(),
            collection: ctx.collection_path::<M>(),
            reference,
            options,
            limit,
            timeout,
            state: Mutex::new(State {
                window: Window::new(),
                paging: Paging::default(),
            }),
            tx,
        });

        let store = ctx.store();
        let snapshots = store
            .query(&source.reference, &Query::new().limit_to_last(limit))
            .await?;
        let newest = snapshots.last().map(|s| s.key().to_string());
        let (entities, failure) = source.resolve(&snapshots).await;
        {
            let mut state = source.state.lock();
            state.paging.oldest = snapshots.first().map(|s| s.key().to_string());
            state.paging.exhausted = snapshots.len() < limit;
            for entity in entities {
                state.window.insert(entity, &source.options.sort);
            }
            debug!(
                path = %source.reference,
                fetched = snapshots.len(),
                loaded = state.window.len(),
                "data source opened"
            );
        }
        source.emit(CollectionChange::Initial);
        if let Some(err) = failure {
            warn!(path = %source.reference, error = %err, "first page partially loaded");
            source.emit(CollectionChange::Error(err));
        }

        let subscriptions = DisposeBag::new();
        let added_query = match newest {
            Some(key) => Query::new().starting_at(key),
            None => Query::new(),
        };
        let added = store
            .subscribe(&source.reference, added_query, EventKind::ChildAdded)
            .await?;
        subscriptions.insert(Disposer::new(store.clone(), added.id));
        let changed = store
            .subscribe(&source.reference, Query::new(), EventKind::ChildChanged)
            .await?;
        subscriptions.insert(Disposer::new(store.clone(), changed.id));
        let removed = store
            .subscribe(&source.reference, Query::new(), EventKind::ChildRemoved)
            .await?;
        subscriptions.insert(Disposer::new(store.clone(), removed.id));

        let pump = tokio::spawn(pump(
            source.clone(),
            added.events,
            changed.events,
            removed.events,
        ));
        Ok((
            Self {
                source,
                pump: Mutex::new(Some(pump)),
                subscriptions,
            },
            rx,
        ))
    }

    /// The path whose children are this source's keys.
    pub fn reference(&self) -> &str {
        &self.source.reference
    }

    /// Page size.
    pub fn limit(&self) -> usize {
        self.source.limit
    }

    /// Number of loaded items.
    pub fn len(&self) -> usize {
        self.source.state.lock().window.len()
    }

    /// Returns true if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loaded keys in display order.
    pub fn keys(&self) -> Vec<String> {
        self.source.state.lock().window.keys().to_vec()
    }

    /// Copy of the entity at `index`.
    pub fn object(&self, index: usize) -> Option<Entity<M>> {
        self.source.state.lock().window.get(index).cloned()
    }

    /// Copies of every loaded entity in display order.
    pub fn objects(&self) -> Vec<Entity<M>> {
        self.source.state.lock().window.entities().to_vec()
    }

    /// Returns true once no older page exists.
    pub fn is_exhausted(&self) -> bool {
        self.source.state.lock().paging.exhausted
    }

    fn key_at(&self, index: usize) -> CoreResult<String> {
        let state = self.source.state.lock();
        state
            .window
            .key(index)
            .map(String::from)
            .ok_or_else(|| CoreError::index_out_of_bounds(index, state.window.len()))
    }

    /// Reads the entity at `index` fresh from the store.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of range or the store refuses the read.
    pub async fn fetch_object(&self, index: usize) -> CoreResult<Option<Entity<M>>> {
        let key = self.key_at(index)?;
        self.source.fetch(&key).await
    }

    /// Loads the next older page.
    ///
    /// Returns the insertions it made, which are also sent on the channel.
    /// Returns `None` without touching the store when no older page exists
    /// or the same page is already being fetched or was already fetched.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or a timeout if resolving the page took
    /// too long. Entities resolved before the deadline stay loaded, and the
    /// page can be requested again.
    pub async fn prev(&self) -> CoreResult<Option<Change>> {
        let source = &self.source;
        let cursor = {
            let mut state = source.state.lock();
            let paging = &mut state.paging;
            if paging.exhausted {
                trace!(path = %source.reference, "no older page");
                return Ok(None);
            }
            let Some(cursor) = paging.oldest.clone() else {
                return Ok(None);
            };
            if paging.in_flight.as_ref() == Some(&cursor) || paging.completed.as_ref() == Some(&cursor) {
                trace!(path = %source.reference, %cursor, "page already requested");
                return Ok(None);
            }
            paging.in_flight = Some(cursor.clone());
            cursor
        };

        debug!(path = %source.reference, %cursor, "loading older page");
        let query = Query::new()
            .ending_at(cursor.clone())
            .limit_to_last(source.limit + 1);
        let snapshots = match source.ctx.store().query(&source.reference, &query).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                source.state.lock().paging.in_flight = None;
                return Err(err.into());
            }
        };
        let short = snapshots.len() <= source.limit;
        let page_oldest = snapshots.first().map(|s| s.key().to_string());
        let fresh: Vec<Snapshot> = {
            let state = source.state.lock();
            snapshots
                .into_iter()
                .filter(|s| s.key() != cursor && !state.window.contains(s.key()))
                .collect()
        };

        let (entities, failure) = source.resolve(&fresh).await;

        let change = {
            let mut state = source.state.lock();
            state.paging.in_flight = None;
            let inserted: Vec<String> = entities
                .into_iter()
                .filter_map(|entity| {
                    let key = entity.id().to_string();
                    state.window.insert(entity, &source.options.sort).map(|_| key)
                })
                .collect();
            let mut insertions: Vec<usize> = inserted
                .iter()
                .filter_map(|key| state.window.position(key))
                .collect();
            insertions.sort_unstable();

            if failure.is_none() {
                let paging = &mut state.paging;
                paging.completed = Some(cursor);
                if let Some(oldest) = page_oldest {
                    if paging.oldest.as_ref().map_or(true, |current| oldest < *current) {
                        paging.oldest = Some(oldest);
                    }
                }
                paging.exhausted = short;
            }
            Change::insertions(insertions)
        };

        if !change.is_empty() {
            source.emit(CollectionChange::Update(change.clone()));
        }
        match failure {
            Some(err) => {
                warn!(path = %source.reference, error = %err, "older page partially loaded");
                Err(err)
            }
            None => Ok((!change.is_empty()).then_some(change)),
        }
    }

    /// Deletes the item at `index`: its link under the reference and, with
    /// `cascade`, the entity's own record, in one atomic update.
    ///
    /// The deletion reaches the channel through the store's child-removed
    /// event. Returns the removed key.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of range or the store refuses the update.
    pub async fn remove_object(&self, index: usize, cascade: bool) -> CoreResult<String> {
        let key = self.key_at(index)?;
        let source = &self.source;
        let mut package = Package::new();
        package.add_path(path::join(&source.reference, &key), Value::Null);
        if cascade && !source.is_direct() {
            package.add_path(path::join(&source.collection, &key), Value::Null);
        }
        package.submit(&source.ctx).await?;
        debug!(path = %source.reference, %key, cascade, "object removed");
        Ok(key)
    }

    /// Follows the entity at `index`.
    ///
    /// The receiver gets the loaded copy at once, then every change. The
    /// store's first delivery is dropped when it only repeats the loaded
    /// copy. The subscription is the caller's to dispose.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of range or the store refuses the
    /// subscription.
    pub async fn observe_object(
        &self,
        index: usize,
    ) -> CoreResult<(Disposer, mpsc::UnboundedReceiver<Option<Entity<M>>>)> {
        let entity = self.object(index).ok_or_else(|| {
            CoreError::index_out_of_bounds(index, self.len())
        })?;
        let source = &self.source;
        let store = source.ctx.store();
        let at = path::join(&source.collection, entity.id());
        let subscription = store.subscribe(&at, Query::new(), EventKind::Value).await?;
        let disposer = Disposer::new(store.clone(), subscription.id);

        let (tx, rx) = mpsc::unbounded_channel();
        let id = entity.id().to_string();
        let seen = entity.snapshot().cloned();
        let _ = tx.send(Some(entity));
        tokio::spawn(forward(source.ctx.clone(), id, subscription.events, tx, seen));
        Ok((disposer, rx))
    }

    /// Stops following the reference. Calling this more than once is
    /// harmless.
    pub fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            debug!(path = %self.source.reference, "data source closed");
        }
        self.subscriptions.dispose_all();
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.pump.lock().is_none()
    }
}

impl<M: Model> Drop for DataSource<M> {
    fn drop(&mut self) {
        self.close();
    }
}

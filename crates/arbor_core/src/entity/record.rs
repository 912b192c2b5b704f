//! Typed records bound to store paths.

use super::model::{FieldSpec, Model};
use crate::context::Context;
use crate::disposer::{DisposeBag, Disposer};
use crate::error::{CoreError, CoreResult};
use crate::file::{delete_orphans, File, FileOwner, UploadTask};
use crate::package::Package;
use crate::relation::{Membership, Relation};
use arbor_store::{path, push_id, BlobMetadata, EventKind, Query, Snapshot, StoreEvent};
use arbor_value::{decode_field, encode_field, CodecError, DecodeWarning, FieldValue, Value, ValueKind};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Child key of the creation timestamp.
pub const CREATED_AT: &str = "_createdAt";
/// Child key of the last-update timestamp.
pub const UPDATED_AT: &str = "_updatedAt";

/// A typed record, optionally bound to `<version>/<model>/<id>`.
///
/// An entity starts out local. It becomes *observed* when it is saved or
/// decoded from a snapshot, and stays observed. From then on every field
/// change queues one patch, submitted in order by [`Entity::flush`].
pub struct Entity<M: Model> {
    id: String,
    created_at: Option<i64>,
    updated_at: Option<i64>,
    observed: bool,
    path: Option<String>,
    model: M,
    files: BTreeMap<&'static str, File>,
    relations: BTreeMap<&'static str, Relation>,
    pending: VecDeque<Package>,
    snapshot: Option<Value>,
    bag: DisposeBag,
}

impl<M: Model> Entity<M> {
    /// Creates a local entity with default fields and a fresh ordered id.
    pub fn create() -> Self {
        Self::new(M::default())
    }

    /// Creates a local entity around `model` with a fresh ordered id.
    pub fn new(model: M) -> Self {
        Self::build(push_id(), model)
    }

    /// Creates a local entity with a caller-supplied id.
    ///
    /// # Errors
    ///
    /// Fails if `id` cannot be used as a key.
    pub fn with_id(id: impl Into<String>, model: M) -> CoreResult<Self> {
        let id = id.into();
        path::validate_key(&id).map_err(|err| CoreError::invalid_id(&id, err.to_string()))?;
        Ok(Self::build(id, model))
    }

    fn build(id: String, model: M) -> Self {
        let relations = M::schema()
            .relations()
            .map(|spec| (spec.name, Relation::new(spec.name, spec.target.unwrap_or_default())))
            .collect();
        Self {
            id,
            created_at: None,
            updated_at: None,
            observed: false,
            path: None,
            model,
            files: BTreeMap::new(),
            relations,
            pending: VecDeque::new(),
            snapshot: None,
            bag: DisposeBag::new(),
        }
    }

    /// Decodes a stored record. Decode warnings are logged.
    pub fn from_snapshot(ctx: &Context, snapshot: &Snapshot) -> Self {
        Self::from_value(ctx, snapshot.key(), snapshot.value())
    }

    pub(crate) fn from_value(ctx: &Context, id: &str, value: &Value) -> Self {
        let mut entity = Self::build(id.to_string(), M::default());
        entity.bind(ctx, value);
        entity
    }

    /// The record id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store path, once bound.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Store path of one field, once bound.
    pub fn field_path(&self, field: &str) -> Option<String> {
        self.path.as_deref().map(|at| path::join(at, field))
    }

    /// The canonical path: `<version>/<model>/<id>`.
    pub fn resolve_path(&self, ctx: &Context) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| path::join(&ctx.collection_path::<M>(), &self.id))
    }

    /// Returns true once the entity is bound to the store.
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Store time of the first write, in epoch milliseconds.
    pub fn created_at_millis(&self) -> Option<i64> {
        self.created_at
    }

    /// Store time of the latest write, in epoch milliseconds.
    pub fn updated_at_millis(&self) -> Option<i64> {
        self.updated_at
    }

    /// Store time of the first write.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.and_then(DateTime::from_timestamp_millis)
    }

    /// Store time of the latest write.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.and_then(DateTime::from_timestamp_millis)
    }

    /// The typed fields.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The snapshot value this entity was last bound from.
    pub fn snapshot(&self) -> Option<&Value> {
        self.snapshot.as_ref()
    }

    /// Binds the entity to its stored value.
    ///
    /// Every declared field is decoded; a field whose stored shape does not
    /// fit its kind is left as it was and reported in the returned list.
    pub fn bind(&mut self, ctx: &Context, value: &Value) -> Vec<DecodeWarning> {
        let at = self.resolve_path(ctx);
        let mut warnings = Vec::new();

        for spec in M::schema().fields() {
            let stored = value.get(spec.name).cloned().unwrap_or_default();
            if spec.is_plain() && self.model.decode_field(spec.name, &stored) {
                continue;
            }
            match decode_field(spec.name, spec.kind, &stored) {
                Ok(decoded) => self.assign(spec, &at, decoded),
                Err(warning) => {
                    warn!(model = M::NAME, id = %self.id, %warning, "field left unset");
                    warnings.push(warning);
                }
            }
        }

        self.created_at = value.get(CREATED_AT).and_then(Value::as_integer).or(self.created_at);
        self.updated_at = value.get(UPDATED_AT).and_then(Value::as_integer).or(self.updated_at);
        for relation in self.relations.values_mut() {
            relation.mark_saved(at.clone());
        }
        self.snapshot = Some(value.clone());
        self.path = Some(at);
        self.observed = true;
        warnings
    }

    fn assign(&mut self, spec: &FieldSpec, at: &str, decoded: Option<FieldValue>) {
        match (spec.kind, decoded) {
            (ValueKind::File, Some(FieldValue::File(descriptor))) => {
                let blob_path = path::join(&path::join(at, spec.name), &descriptor.name);
                let same = self
                    .files
                    .get(spec.name)
                    .is_some_and(|file| file.name() == descriptor.name);
                if let Some(file) = self.files.get_mut(spec.name).filter(|_| same) {
                    file.sync_descriptor(descriptor, blob_path);
                } else {
                    self.files
                        .insert(spec.name, File::from_descriptor(descriptor, blob_path));
                }
            }
            (ValueKind::File, _) => {
                self.files.remove(spec.name);
            }
            (ValueKind::Relation, decoded) => {
                let ids = decoded.and_then(FieldValue::into_relation).unwrap_or_default();
                if let Some(relation) = self.relations.get_mut(spec.name) {
                    relation.replace(ids);
                }
            }
            (_, decoded) => {
                self.model.set(spec.name, decoded);
            }
        }
    }

    fn encode(&self, spec: &FieldSpec) -> Option<Value> {
        match spec.kind {
            ValueKind::File => self
                .files
                .get(spec.name)
                .filter(|file| file.is_stored())
                .map(File::to_value),
            ValueKind::Relation => self.relations.get(spec.name).and_then(Relation::to_value),
            _ => match self.model.encode_field(spec.name) {
                Some(custom) => custom,
                None => self
                    .model
                    .get(spec.name)
                    .and_then(|value| encode_field(spec.name, &value)),
            },
        }
    }

    /// The persisted fields in their stored form.
    pub fn raw_value(&self) -> Value {
        Value::Map(
            M::schema()
                .fields()
                .filter_map(|spec| self.encode(spec).map(|v| (spec.name.to_string(), v)))
                .collect(),
        )
    }

    /// [`Entity::raw_value`] plus timestamp markers: the creation time is
    /// kept if known, and the update time is refreshed by the store.
    pub fn value(&self) -> Value {
        let mut value = self.raw_value();
        if let Value::Map(map) = &mut value {
            let created = self
                .created_at
                .map_or_else(Value::server_timestamp, Value::Integer);
            map.insert(CREATED_AT.to_string(), created);
            map.insert(UPDATED_AT.to_string(), Value::server_timestamp());
        }
        value
    }

    fn plain_field(&self, field: &str) -> CoreResult<&'static FieldSpec> {
        M::schema()
            .get(field)
            .filter(|spec| spec.is_plain())
            .ok_or_else(|| CoreError::unknown_field(M::NAME, field, "plain"))
    }

    /// Returns a plain field's current value.
    pub fn field_value(&self, field: &str) -> Option<FieldValue> {
        self.model.get(field)
    }

    /// Assigns a plain field.
    ///
    /// Returns true if a patch was queued, which happens when the entity is
    /// observed, the field is persisted and the value actually changed.
    ///
    /// # Errors
    ///
    /// Fails if the schema has no such plain field or declares a different
    /// kind for it.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> CoreResult<bool> {
        let spec = self.plain_field(field)?;
        let value = value.into();
        if value.kind() != spec.kind {
            return Err(CodecError::type_mismatch(field, spec.kind, value.kind()).into());
        }
        Ok(self.assign_tracked(spec, Some(value)))
    }

    /// Resets a plain field to its default; the stored field is deleted.
    ///
    /// # Errors
    ///
    /// Fails if the schema has no such plain field.
    pub fn unset(&mut self, field: &str) -> CoreResult<bool> {
        let spec = self.plain_field(field)?;
        Ok(self.assign_tracked(spec, None))
    }

    fn assign_tracked(&mut self, spec: &'static FieldSpec, value: Option<FieldValue>) -> bool {
        let before = self.model.get(spec.name);
        self.model.set(spec.name, value);
        if self.model.get(spec.name) == before {
            return false;
        }
        self.queue_fields([spec])
    }

    /// Applies several changes at once and queues them as a single patch.
    ///
    /// Returns the number of persisted fields that changed.
    pub fn modify(&mut self, f: impl FnOnce(&mut M)) -> usize {
        let schema = M::schema();
        let before: Vec<Option<FieldValue>> =
            schema.all().iter().map(|spec| self.model.get(spec.name)).collect();
        f(&mut self.model);
        let changed: Vec<&'static FieldSpec> = schema
            .all()
            .iter()
            .zip(before)
            .filter(|(spec, old)| !spec.ignored && spec.is_plain() && self.model.get(spec.name) != *old)
            .map(|(spec, _)| spec)
            .collect();
        let count = changed.len();
        self.queue_fields(changed);
        count
    }

    fn queue_fields(&mut self, specs: impl IntoIterator<Item = &'static FieldSpec>) -> bool {
        if !self.observed {
            return false;
        }
        let Some(at) = self.path.clone() else {
            return false;
        };
        let mut package = Package::new();
        for spec in specs.into_iter().filter(|spec| !spec.ignored) {
            package.add_path(path::join(&at, spec.name), self.encode(spec).unwrap_or(Value::Null));
        }
        if package.is_empty() {
            return false;
        }
        package.add_path(path::join(&at, UPDATED_AT), Value::server_timestamp());
        self.pending.push_back(package);
        true
    }

    /// Patches waiting to be flushed, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &Package> {
        self.pending.iter()
    }

    /// Removes and returns the queued patches.
    pub fn take_pending(&mut self) -> Vec<Package> {
        self.pending.drain(..).collect()
    }

    /// Submits the queued patches in order.
    ///
    /// Returns the number submitted. A failed patch stays at the head of
    /// the queue.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn flush(&mut self, ctx: &Context) -> CoreResult<usize> {
        let mut submitted = 0;
        while let Some(package) = self.pending.pop_front() {
            if let Err(err) = package.clone().submit(ctx).await {
                self.pending.push_front(package);
                return Err(err);
            }
            submitted += 1;
        }
        if submitted > 0 {
            if let Some(at) = self.field_path(UPDATED_AT) {
                let stamp = ctx.store().get(&at).await?;
                self.updated_at = stamp.value().as_integer().or(self.updated_at);
            }
            debug!(model = M::NAME, id = %self.id, submitted, "flushed patches");
        }
        Ok(submitted)
    }

    /// The file attached to `field`.
    pub fn file(&self, field: &str) -> Option<&File> {
        self.files.get(field)
    }

    /// The file attached to `field`, mutably.
    pub fn file_mut(&mut self, field: &str) -> Option<&mut File> {
        self.files.get_mut(field)
    }

    fn file_field(field: &str) -> CoreResult<&'static FieldSpec> {
        M::schema()
            .files()
            .find(|spec| spec.name == field)
            .ok_or_else(|| CoreError::unknown_field(M::NAME, field, "file"))
    }

    /// Attaches a file to `field`, cancelling any upload still running for
    /// the file it replaces.
    ///
    /// # Errors
    ///
    /// Fails if the schema has no such file field.
    pub fn attach(&mut self, field: &str, file: File) -> CoreResult<Option<File>> {
        let spec = Self::file_field(field)?;
        let mut previous = self.files.insert(spec.name, file);
        if let Some(old) = previous.as_mut() {
            old.cancel_upload();
        }
        Ok(previous)
    }

    /// Uploads the file attached to `field`. If the entity is observed the
    /// field is patched with the file's descriptor.
    ///
    /// # Errors
    ///
    /// Fails if nothing is attached, the upload fails or times out, or the
    /// patch is refused.
    pub async fn save_file(&mut self, ctx: &Context, field: &str) -> CoreResult<()> {
        let spec = Self::file_field(field)?;
        let owner = FileOwner {
            path: self.resolve_path(ctx),
            field: spec.name.to_string(),
            observed: self.observed,
        };
        let file = self
            .files
            .get_mut(spec.name)
            .ok_or_else(|| CoreError::invalid_file(field))?;
        file.save(ctx, &owner).await?;
        Ok(())
    }

    /// The relation held by `field`.
    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.get(field)
    }

    /// The relation held by `field`, mutably. Patches returned by its
    /// methods are the caller's to submit.
    pub fn relation_mut(&mut self, field: &str) -> Option<&mut Relation> {
        self.relations.get_mut(field)
    }

    fn relation_field(&mut self, field: &str) -> CoreResult<&mut Relation> {
        self.relations
            .get_mut(field)
            .ok_or_else(|| CoreError::unknown_field(M::NAME, field, "relation"))
    }

    fn queue_membership(&mut self, membership: Membership) -> bool {
        let changed = membership.changed();
        if let Some(package) = membership.into_patch() {
            self.pending.push_back(package);
        }
        changed
    }

    /// Adds `id` to the relation in `field`, queueing a patch once saved.
    ///
    /// # Errors
    ///
    /// Fails if the schema has no such relation or `id` is not a valid key.
    pub fn relate(&mut self, field: &str, id: impl Into<String>) -> CoreResult<bool> {
        let membership = self.relation_field(field)?.insert(id)?;
        Ok(self.queue_membership(membership))
    }

    /// Adds an entity to the relation in `field`. On this entity's first
    /// save a copy of it is written at its own path.
    ///
    /// # Errors
    ///
    /// Fails if the schema has no such relation or the entity is of a
    /// different model.
    pub fn relate_entity<T: Model>(
        &mut self,
        ctx: &Context,
        field: &str,
        entity: &Entity<T>,
    ) -> CoreResult<bool> {
        let membership = self.relation_field(field)?.insert_entity(ctx, entity)?;
        Ok(self.queue_membership(membership))
    }

    /// Removes `id` from the relation in `field`, queueing a patch once
    /// saved.
    ///
    /// # Errors
    ///
    /// Fails if the schema has no such relation.
    pub fn unrelate(&mut self, field: &str, id: &str) -> CoreResult<bool> {
        let membership = self.relation_field(field)?.remove(id);
        Ok(self.queue_membership(membership))
    }

    /// Persists a local entity.
    ///
    /// Pending file uploads run first, concurrently, under one deadline.
    /// If any fails or the deadline passes, the rest are cancelled, blobs
    /// that did upload are deleted, and nothing is written. Otherwise the
    /// entity and its relations are written in one atomic update and the
    /// entity is bound to the stored result.
    ///
    /// Returns the entity's path.
    ///
    /// # Errors
    ///
    /// Fails with an already-observed error, without writing, if the entity
    /// is already persisted.
    pub async fn save(&mut self, ctx: &Context) -> CoreResult<String> {
        if self.observed {
            return Err(CoreError::already_observed(&self.id));
        }
        let at = self.resolve_path(ctx);
        let uploaded = self.upload_files(ctx, &at).await?;

        let mut package = Package::new();
        package.add_entity(ctx, self);
        for relation in self.relations.values() {
            package.add_relation(&at, relation);
        }
        if let Err(err) = package.submit(ctx).await {
            self.rollback_uploads(ctx, uploaded).await;
            return Err(err);
        }

        let stored = ctx.store().get(&at).await?;
        self.bind(ctx, stored.value());
        debug!(model = M::NAME, id = %self.id, path = %at, "entity saved");
        Ok(at)
    }

    async fn upload_files(
        &mut self,
        ctx: &Context,
        at: &str,
    ) -> CoreResult<Vec<(&'static str, BlobMetadata)>> {
        let mut tasks: Vec<(&'static str, UploadTask)> = Vec::new();
        for (field, file) in &mut self.files {
            if !file.needs_upload() {
                continue;
            }
            let blob_path = path::join(&path::join(at, field), file.name());
            let started = file.start_upload(ctx, blob_path);
            if let Err(err) = started {
                abandon_uploads(ctx, &mut tasks, Vec::new()).await;
                return Err(err);
            }
            if let Some(task) = file.take_upload() {
                tasks.push((*field, task));
            }
        }
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let deadline = ctx.config().upload_timeout;
        let mut uploaded = Vec::with_capacity(tasks.len());
        let outcome = {
            let mut joins: FuturesUnordered<_> = tasks
                .iter_mut()
                .map(|(field, task)| async move { (*field, task.join().await) })
                .collect();
            tokio::time::timeout(deadline, async {
                while let Some((field, result)) = joins.next().await {
                    uploaded.push((field, result?));
                }
                Ok::<(), CoreError>(())
            })
            .await
        };

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(CoreError::timeout("upload", deadline)),
        };
        if let Some(err) = failure {
            let finished = uploaded.into_iter().map(|(_, metadata)| metadata).collect();
            let (cancelled, orphaned) = abandon_uploads(ctx, &mut tasks, finished).await;
            warn!(
                model = M::NAME,
                id = %self.id,
                error = %err,
                cancelled,
                orphaned,
                "uploads failed, rolling back"
            );
            return Err(err);
        }

        for (field, metadata) in &uploaded {
            if let Some(file) = self.files.get_mut(field) {
                file.mark_uploaded(metadata);
            }
        }
        Ok(uploaded)
    }

    async fn rollback_uploads(&mut self, ctx: &Context, uploaded: Vec<(&'static str, BlobMetadata)>) {
        for (field, _) in &uploaded {
            if let Some(file) = self.files.get_mut(field) {
                file.clear_remote();
            }
        }
        delete_orphans(ctx, uploaded.into_iter().map(|(_, metadata)| metadata)).await;
    }

    /// Deletes the record and releases every listener the entity holds.
    /// Relations and files are left in place.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn remove(&mut self, ctx: &Context) -> CoreResult<()> {
        let mut package = Package::new();
        package.add_path(self.resolve_path(ctx), Value::Null);
        package.submit(ctx).await?;
        self.bag.dispose_all();
        self.pending.clear();
        debug!(model = M::NAME, id = %self.id, "entity removed");
        Ok(())
    }

    /// Atomically reads, modifies and writes one plain field.
    ///
    /// `f` receives the stored value and returns the new one, or `None` to
    /// abort. It may run more than once.
    ///
    /// # Errors
    ///
    /// Fails with an offline-transaction error while disconnected, and
    /// with a not-observed error for local entities.
    pub async fn transact<F>(&mut self, ctx: &Context, field: &str, mut f: F) -> CoreResult<Option<FieldValue>>
    where
        F: FnMut(Option<FieldValue>) -> Option<FieldValue> + Send + 'static,
    {
        let spec = self.plain_field(field)?;
        let Some(at) = self.field_path(spec.name) else {
            return Err(CoreError::not_observed(&self.id));
        };
        if !ctx.is_connected() {
            return Err(CoreError::offline_transaction(at));
        }

        let (name, kind) = (spec.name, spec.kind);
        let committed = ctx
            .store()
            .transaction(
                &at,
                Box::new(move |current: &Value| {
                    let typed = decode_field(name, kind, current).ok().flatten();
                    let next = f(typed)?;
                    Some(encode_field(name, &next).unwrap_or(Value::Null))
                }),
            )
            .await?;
        ctx.invalidate([at.as_str()]);

        match decode_field(name, kind, &committed) {
            Ok(decoded) => {
                self.model.set(name, decoded.clone());
                Ok(decoded)
            }
            Err(warning) => {
                warn!(model = M::NAME, id = %self.id, %warning, "committed value left unset");
                Ok(None)
            }
        }
    }

    /// Keeps receiving fresh copies of this entity while it stays alive.
    /// The subscription is released by [`Entity::remove`] or on drop.
    ///
    /// # Errors
    ///
    /// Fails for local entities, or if the store refuses the subscription.
    pub async fn listen_self(&self, ctx: &Context) -> CoreResult<mpsc::UnboundedReceiver<Option<Self>>> {
        if !self.observed {
            return Err(CoreError::not_observed(&self.id));
        }
        let (disposer, rx) = Self::listen(ctx, &self.id).await?;
        self.bag.insert(disposer);
        Ok(rx)
    }

    /// Number of live listeners held by this entity.
    pub fn listener_count(&self) -> usize {
        self.bag.len()
    }

    /// Reads one record. Served from the context's cache when possible,
    /// so edits made by other clients show up once the cached copy is
    /// evicted or invalidated. Use [`Entity::listen`] for live state.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn get(ctx: &Context, id: &str) -> CoreResult<Option<Self>> {
        let at = path::join(&ctx.collection_path::<M>(), id);
        let value = match ctx.cached(&at) {
            Some(value) => value,
            None => {
                let value = ctx.store().get(&at).await?.into_value();
                ctx.cache(&at, value.clone());
                value
            }
        };
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(Self::from_value(ctx, id, &value)))
    }

    /// Reads every record of the collection, in key order.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn all(ctx: &Context) -> CoreResult<Vec<Self>> {
        let snapshots = ctx
            .store()
            .query(&ctx.collection_path::<M>(), &Query::new())
            .await?;
        Ok(snapshots
            .iter()
            .map(|snapshot| Self::from_snapshot(ctx, snapshot))
            .collect())
    }

    /// Streams a record: its current state first, then every change.
    /// `None` means the record does not exist.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn listen(
        ctx: &Context,
        id: &str,
    ) -> CoreResult<(Disposer, mpsc::UnboundedReceiver<Option<Self>>)> {
        let at = path::join(&ctx.collection_path::<M>(), id);
        let subscription = ctx.store().subscribe(&at, Query::new(), EventKind::Value).await?;
        let disposer = Disposer::new(ctx.store().clone(), subscription.id);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(ctx.clone(), id.to_string(), subscription.events, tx, None));
        Ok((disposer, rx))
    }
}

/// Cancels `tasks` and deletes every blob that was written anyway: the
/// `finished` ones and any upload that completed before its abort.
///
/// Returns how many uploads were stopped while running and how many blobs
/// were deleted.
async fn abandon_uploads(
    ctx: &Context,
    tasks: &mut [(&'static str, UploadTask)],
    mut finished: Vec<BlobMetadata>,
) -> (usize, usize) {
    let mut cancelled = 0;
    for (_, task) in tasks.iter_mut() {
        let running = !task.is_finished();
        match task.cancel().await {
            Some(metadata) => finished.push(metadata),
            None if running => cancelled += 1,
            None => {}
        }
    }
    let orphaned = finished.len();
    delete_orphans(ctx, finished).await;
    (cancelled, orphaned)
}

/// Decodes value events for one record into entities.
///
/// An initial event equal to `skip` is dropped.
pub(crate) async fn forward<M: Model>(
    ctx: Context,
    id: String,
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    tx: mpsc::UnboundedSender<Option<Entity<M>>>,
    mut skip: Option<Value>,
) {
    while let Some(event) = events.recv().await {
        let snapshot = match event {
            StoreEvent::Data { snapshot, .. } => snapshot,
            StoreEvent::Cancelled(err) => {
                warn!(model = M::NAME, %id, error = %err, "record subscription cancelled");
                break;
            }
        };
        if skip.take().is_some_and(|seen| seen == *snapshot.value()) {
            continue;
        }
        let entity = snapshot
            .exists()
            .then(|| Entity::from_value(&ctx, &id, snapshot.value()));
        if tx.send(entity).is_err() {
            break;
        }
    }
}

impl<M: Model> Clone for Entity<M> {
    /// Copies the entity's state. Listeners and in-flight transfers stay
    /// with the original.
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            observed: self.observed,
            path: self.path.clone(),
            model: self.model.clone(),
            files: self.files.clone(),
            relations: self.relations.clone(),
            pending: self.pending.clone(),
            snapshot: self.snapshot.clone(),
            bag: DisposeBag::new(),
        }
    }
}

impl<M: Model + fmt::Debug> fmt::Debug for Entity<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("observed", &self.observed)
            .field("model", &self.model)
            .field("files", &self.files)
            .field("relations", &self.relations)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArborConfig;
    use crate::entity::Schema;
    use crate::error::ObjectError;
    use arbor_store::{InMemoryBlobStore, InMemoryStore, StoreError, StoreOp};
    use std::sync::{Arc, OnceLock};
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Note {
        title: String,
        stars: i64,
        draft: String,
    }

    impl Model for Note {
        const NAME: &'static str = "note";

        fn schema() -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                Schema::new()
                    .field("title", ValueKind::String)
                    .field("stars", ValueKind::Int)
                    .file("cover")
                    .relation("tags", "tag")
                    .ignore("draft", ValueKind::String)
            })
        }

        fn get(&self, field: &str) -> Option<FieldValue> {
            match field {
                "title" => Some(self.title.clone().into()),
                "stars" => Some(self.stars.into()),
                "draft" => Some(self.draft.clone().into()),
                _ => None,
            }
        }

        fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
            match field {
                "title" => self.title = value.and_then(FieldValue::into_string).unwrap_or_default(),
                "stars" => self.stars = value.and_then(FieldValue::into_int).unwrap_or_default(),
                "draft" => self.draft = value.and_then(FieldValue::into_string).unwrap_or_default(),
                _ => return false,
            }
            true
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Tag;

    impl Model for Tag {
        const NAME: &'static str = "tag";

        fn schema() -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(Schema::new)
        }

        fn get(&self, _: &str) -> Option<FieldValue> {
            None
        }

        fn set(&mut self, _: &str, _: Option<FieldValue>) -> bool {
            false
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryBlobStore>, Context) {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let ctx = Context::connect(store.clone(), blobs.clone(), ArborConfig::default())
            .await
            .unwrap();
        (store, blobs, ctx)
    }

    fn note(title: &str) -> Entity<Note> {
        Entity::new(Note {
            title: title.into(),
            ..Note::default()
        })
    }

    #[test]
    fn local_mutations_queue_nothing() {
        let mut entity = note("x");
        assert!(!entity.set("title", "y").unwrap());
        assert_eq!(entity.pending().count(), 0);
        assert_eq!(entity.model().title, "y");
        assert!(!entity.is_observed());
    }

    #[test]
    fn set_checks_schema() {
        let mut entity = note("x");
        let err = entity.set("missing", 1).unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::UnknownField { .. })));
        let err = entity.set("cover", "x").unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::UnknownField { .. })));
        let err = entity.set("stars", "many").unwrap_err();
        assert!(matches!(err, CoreError::Codec(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn with_id_validates() {
        assert!(Entity::<Note>::with_id("abc", Note::default()).is_ok());
        let err = Entity::<Note>::with_id("a/b", Note::default()).unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::InvalidId { .. })));
    }

    #[test]
    fn raw_value_skips_ignored_and_empty() {
        let mut entity = note("x");
        entity.set("draft", "secret").unwrap();
        let value = entity.raw_value();
        assert_eq!(value.get("title"), Some(&Value::from("x")));
        assert_eq!(value.get("stars"), Some(&Value::Integer(0)));
        assert_eq!(value.get("draft"), None);
        assert_eq!(value.get("tags"), None);

        let value = entity.value();
        assert!(value.get(CREATED_AT).is_some_and(Value::is_server_timestamp));
        assert!(value.get(UPDATED_AT).is_some_and(Value::is_server_timestamp));
    }

    #[tokio::test]
    async fn save_binds_and_stamps() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        let at = entity.save(&ctx).await.unwrap();

        assert_eq!(at, format!("v1/note/{}", entity.id()));
        assert!(entity.is_observed());
        assert_eq!(entity.path(), Some(at.as_str()));
        assert!(entity.created_at().is_some());
        assert_eq!(entity.created_at_millis(), entity.updated_at_millis());
        assert_eq!(store.value_at(&format!("{at}/title")), Value::from("x"));
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn double_save_writes_nothing() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        entity.save(&ctx).await.unwrap();

        let err = entity.save(&ctx).await.unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::AlreadyObserved { .. })));
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn observed_set_queues_one_patch() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        let at = entity.save(&ctx).await.unwrap();
        let saved_at = entity.updated_at_millis().unwrap();

        assert!(entity.set("title", "y").unwrap());
        assert!(!entity.set("title", "y").unwrap());
        assert!(!entity.set("draft", "local").unwrap());

        let patches = entity.take_pending();
        assert_eq!(patches.len(), 1);
        let writes = patches[0].writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes.get(&format!("{at}/title")), Some(&Value::from("y")));
        assert!(writes[&format!("{at}/{UPDATED_AT}")].is_server_timestamp());

        for patch in patches {
            entity.pending.push_back(patch);
        }
        assert_eq!(entity.flush(&ctx).await.unwrap(), 1);
        assert_eq!(store.value_at(&format!("{at}/title")), Value::from("y"));
        assert_eq!(store.value_at(&format!("{at}/stars")), Value::Integer(0));
        assert!(entity.updated_at_millis().unwrap() > saved_at);
    }

    #[tokio::test]
    async fn unset_deletes_field() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        let at = entity.save(&ctx).await.unwrap();
        assert!(entity.unset("title").unwrap());
        entity.flush(&ctx).await.unwrap();
        assert_eq!(store.value_at(&format!("{at}/title")), Value::Null);
    }

    #[tokio::test]
    async fn modify_batches_fields() {
        let (_, _, ctx) = setup().await;
        let mut entity = note("x");
        entity.save(&ctx).await.unwrap();
        let changed = entity.modify(|note| {
            note.title = "y".into();
            note.stars = 3;
            note.draft = "ignored".into();
        });
        assert_eq!(changed, 2);
        let patches = entity.take_pending();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].len(), 3);
    }

    #[tokio::test]
    async fn failed_flush_keeps_patch() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        entity.save(&ctx).await.unwrap();
        entity.set("stars", 5).unwrap();
        store.fail_next(StoreOp::Update, StoreError::network_retryable("offline"));
        assert!(entity.flush(&ctx).await.is_err());
        assert_eq!(entity.pending().count(), 1);
        assert_eq!(entity.flush(&ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bind_reports_mismatches() {
        let (_, _, ctx) = setup().await;
        let value = Value::map([
            ("title", Value::Integer(7)),
            ("stars", Value::Integer(2)),
            (CREATED_AT, Value::Integer(1_000)),
        ]);
        let mut entity = Entity::<Note>::with_id("n1", Note::default()).unwrap();
        let warnings = entity.bind(&ctx, &value);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "title");
        assert_eq!(entity.model().title, "");
        assert_eq!(entity.model().stars, 2);
        assert_eq!(entity.created_at_millis(), Some(1_000));
        assert!(entity.is_observed());
    }

    #[tokio::test]
    async fn relations_before_and_after_save() {
        let (store, _, ctx) = setup().await;
        let tag = Entity::<Tag>::with_id("t1", Tag).unwrap();
        let mut entity = note("x");
        assert!(entity.relate_entity(&ctx, "tags", &tag).unwrap());
        assert!(entity.relate("tags", "t2").unwrap());
        assert!(!entity.relate("tags", "t2").unwrap());
        assert_eq!(entity.pending().count(), 0);

        let at = entity.save(&ctx).await.unwrap();
        assert_eq!(store.value_at(&format!("{at}/tags/t1")), Value::Bool(true));
        assert_eq!(store.value_at(&format!("{at}/tags/t2")), Value::Bool(true));
        assert!(store.value_at("v1/tag/t1/_createdAt").as_integer().is_some());
        assert!(entity.relation("tags").unwrap().is_saved());

        assert!(entity.unrelate("tags", "t2").unwrap());
        assert_eq!(entity.pending().count(), 1);
        entity.flush(&ctx).await.unwrap();
        assert_eq!(store.value_at(&format!("{at}/tags/t2")), Value::Null);

        let relation = entity.relation("tags").unwrap();
        assert!(relation.contains_remote(&ctx, "t1").await.unwrap());
        assert!(!relation.contains_remote(&ctx, "t2").await.unwrap());
    }

    #[tokio::test]
    async fn save_uploads_files_first() {
        let (store, blobs, ctx) = setup().await;
        let mut entity = note("x");
        entity
            .attach("cover", File::from_bytes(&b"img"[..]).with_name("c.png"))
            .unwrap();
        let at = entity.save(&ctx).await.unwrap();

        let blob_path = format!("{at}/cover/c.png");
        assert!(blobs.contains(&blob_path));
        let stored = store.value_at(&format!("{at}/cover"));
        assert_eq!(stored.get("name"), Some(&Value::from("c.png")));
        assert_eq!(
            stored.get("url"),
            Some(&Value::from(format!("memory://{blob_path}")))
        );
        assert_eq!(entity.file("cover").unwrap().blob_path(), Some(blob_path.as_str()));
    }

    #[tokio::test]
    async fn failed_submit_deletes_uploads() {
        let (store, blobs, ctx) = setup().await;
        store.deny("v1/note");
        let mut entity = note("x");
        entity.attach("cover", File::from_bytes(&b"img"[..])).unwrap();
        assert!(entity.save(&ctx).await.is_err());
        assert!(blobs.is_empty());
        assert!(!entity.is_observed());
        assert!(entity.file("cover").unwrap().needs_upload());
    }

    #[tokio::test]
    async fn abandoned_uploads_leave_no_blobs() {
        let (_, blobs, ctx) = setup().await;
        let mut tasks = Vec::new();
        for (field, name) in [("cover", "a.png"), ("back", "b.png")] {
            let mut file = File::from_bytes(&b"img"[..]).with_name(name);
            file.start_upload(&ctx, format!("v1/note/n1/{field}/{name}")).unwrap();
            tasks.push((field, file.take_upload().unwrap()));
        }
        while !tasks.iter().all(|(_, task)| task.is_finished()) {
            tokio::task::yield_now().await;
        }
        assert_eq!(blobs.len(), 2);

        let (cancelled, orphaned) = abandon_uploads(&ctx, &mut tasks, Vec::new()).await;
        assert_eq!((cancelled, orphaned), (0, 2));
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn save_file_on_observed_entity() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        let at = entity.save(&ctx).await.unwrap();
        entity
            .attach("cover", File::from_bytes(&b"img"[..]).with_name("c.png"))
            .unwrap();
        entity.save_file(&ctx, "cover").await.unwrap();
        assert_eq!(store.value_at(&format!("{at}/cover/name")), Value::from("c.png"));

        let err = entity.attach("title", File::named("x")).unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::UnknownField { .. })));
    }

    #[tokio::test]
    async fn get_all_and_remove() {
        let (store, _, ctx) = setup().await;
        let mut a = note("a");
        let mut b = note("b");
        a.save(&ctx).await.unwrap();
        b.save(&ctx).await.unwrap();

        let loaded = Entity::<Note>::get(&ctx, a.id()).await.unwrap().unwrap();
        assert_eq!(loaded.model(), a.model());
        let gets = store.get_count();
        Entity::<Note>::get(&ctx, a.id()).await.unwrap();
        assert_eq!(store.get_count(), gets);

        let all = Entity::<Note>::all(&ctx).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), a.id());

        a.remove(&ctx).await.unwrap();
        assert!(Entity::<Note>::get(&ctx, a.id()).await.unwrap().is_none());
        assert!(Entity::<Note>::get(&ctx, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transact_requires_connection() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        entity.save(&ctx).await.unwrap();

        let value = entity
            .transact(&ctx, "stars", |current| {
                Some(FieldValue::Int(current.and_then(FieldValue::into_int).unwrap_or(0) + 1))
            })
            .await
            .unwrap();
        assert_eq!(value, Some(FieldValue::Int(1)));
        assert_eq!(entity.model().stars, 1);

        let mut rx = ctx.connectivity();
        store.set_connected(false);
        rx.changed().await.unwrap();
        let err = entity.transact(&ctx, "stars", |_| None).await.unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::OfflineTransaction { .. })));

        let mut local = note("y");
        let err = local.transact(&ctx, "stars", |_| None).await.unwrap_err();
        assert!(matches!(err.as_object(), Some(ObjectError::NotObserved { .. })));
    }

    #[tokio::test]
    async fn listeners_follow_the_record() {
        let (store, _, ctx) = setup().await;
        let mut entity = note("x");
        let at = entity.save(&ctx).await.unwrap();

        let mut rx = entity.listen_self(&ctx).await.unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.model().title, "x");

        store.seed(&format!("{at}/title"), Value::from("remote"));
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next.model().title, "remote");

        assert_eq!(entity.listener_count(), 1);
        entity.remove(&ctx).await.unwrap();
        assert_eq!(entity.listener_count(), 0);
        // connectivity listener only
        assert_eq!(store.listener_count(), 1);
    }
}

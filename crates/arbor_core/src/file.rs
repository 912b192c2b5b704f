//! Blob attachments.
//!
//! A [`File`] is created detached, attached to one field of an entity, and
//! uploaded to `<version>/<model>/<id>/<field>/<name>` in the blob store.
//! What the entity record holds is the file's [`FileDescriptor`], written
//! only once the upload has been confirmed.

use crate::context::Context;
use crate::error::{CoreError, CoreResult, ObjectError};
use arbor_store::{path, BlobMetadata, BlobPayload, BlobStore, StoreResult};
use arbor_value::{FileDescriptor, Value};
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

/// Where a file's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Inline bytes.
    Bytes(Bytes),
    /// A local file.
    Path(PathBuf),
    /// Content that only exists in the blob store.
    Remote,
}

/// An upload running on its own task.
///
/// Dropping the handle aborts the upload.
pub struct UploadTask {
    handle: Option<JoinHandle<StoreResult<BlobMetadata>>>,
}

impl UploadTask {
    fn spawn(
        blobs: Arc<dyn BlobStore>,
        at: String,
        payload: BlobPayload,
        content_type: Option<String>,
    ) -> Self {
        let handle =
            tokio::spawn(async move { blobs.put(&at, payload, content_type.as_deref()).await });
        Self {
            handle: Some(handle),
        }
    }

    /// Returns true once the task has stopped running.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the upload to complete.
    ///
    /// # Errors
    ///
    /// Returns the store's error, [`ObjectError::Cancelled`] if the task was
    /// aborted, or a lost completion if the task died or was already joined.
    pub async fn join(&mut self) -> CoreResult<BlobMetadata> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(CoreError::lost_completion("upload already joined"));
        };
        let result = handle.await;
        self.handle = None;
        match result {
            Ok(Ok(metadata)) => Ok(metadata),
            Ok(Err(err)) => Err(err.into()),
            Err(err) if err.is_cancelled() => Err(ObjectError::Cancelled.into()),
            Err(err) => Err(CoreError::lost_completion(err.to_string())),
        }
    }

    /// Aborts the upload and waits for the task to stop.
    ///
    /// Returns the metadata of an upload that finished before the abort
    /// took effect, so the caller can delete the orphaned blob.
    pub async fn cancel(&mut self) -> Option<BlobMetadata> {
        let handle = self.handle.take()?;
        handle.abort();
        match handle.await {
            Ok(Ok(metadata)) => Some(metadata),
            _ => None,
        }
    }

    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

impl Drop for UploadTask {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// The entity a file is attached to, by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOwner {
    /// Store path of the owning entity.
    pub path: String,
    /// Field the file is attached under.
    pub field: String,
    /// Whether the owner is persisted. Only persisted owners are patched.
    pub observed: bool,
}

impl FileOwner {
    /// Blob path for a file of this name under the owner.
    pub fn blob_path(&self, name: &str) -> String {
        path::join(&path::join(&self.path, &self.field), name)
    }
}

/// A blob attachment.
#[derive(Debug)]
pub struct File {
    name: String,
    content_type: Option<String>,
    source: FileSource,
    url: Option<String>,
    size: Option<u64>,
    blob_path: Option<String>,
    upload: Option<UploadTask>,
    download: Option<AbortHandle>,
}

impl File {
    fn with_source(source: FileSource) -> Self {
        Self {
            name: Utc::now().timestamp_millis().to_string(),
            content_type: None,
            source,
            url: None,
            size: None,
            blob_path: None,
            upload: None,
            download: None,
        }
    }

    /// A file holding inline bytes. The name defaults to the current epoch
    /// milliseconds.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::with_source(FileSource::Bytes(data.into()))
    }

    /// A file read from a local path at upload time.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::with_source(FileSource::Path(path.into()))
    }

    /// A file known only by name. It cannot be uploaded.
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_source(FileSource::Remote).with_name(name)
    }

    /// A stored file, as decoded from its owner's record.
    pub fn from_descriptor(descriptor: FileDescriptor, blob_path: impl Into<String>) -> Self {
        let mut file = Self::with_source(FileSource::Remote).with_name(descriptor.name);
        file.content_type = descriptor.content_type;
        file.url = descriptor.url;
        file.blob_path = Some(blob_path.into());
        file
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// File name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content type, if known.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Content source.
    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Download locator, set once the file is stored.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Uploaded size in bytes, if this instance did the upload.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Path in the blob store, once attached to a persisted location.
    pub fn blob_path(&self) -> Option<&str> {
        self.blob_path.as_deref()
    }

    /// Returns true if the blob store holds the content.
    pub fn is_stored(&self) -> bool {
        self.url.is_some() || self.source == FileSource::Remote
    }

    /// Returns true if saving the owner must upload this file first.
    pub fn needs_upload(&self) -> bool {
        !self.is_stored()
    }

    /// The value written into the owner's record.
    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            name: self.name.clone(),
            content_type: self.content_type.clone(),
            url: self.url.clone(),
        }
    }

    /// Native form of [`File::descriptor`].
    pub fn to_value(&self) -> Value {
        self.descriptor().to_value()
    }

    /// Refreshes remote state from a decoded descriptor of the same file.
    pub(crate) fn sync_descriptor(&mut self, descriptor: FileDescriptor, blob_path: String) {
        self.content_type = descriptor.content_type.or(self.content_type.take());
        self.url = descriptor.url.or(self.url.take());
        self.blob_path = Some(blob_path);
    }

    fn payload(&self) -> CoreResult<BlobPayload> {
        match &self.source {
            FileSource::Bytes(data) => Ok(BlobPayload::Bytes(data.clone())),
            FileSource::Path(path) => Ok(BlobPayload::File(path.clone())),
            FileSource::Remote => Err(CoreError::invalid_file(&self.name)),
        }
    }

    /// Starts uploading to `blob_path`, cancelling any upload in flight.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-file error if there is nothing to upload.
    pub fn start_upload(&mut self, ctx: &Context, blob_path: impl Into<String>) -> CoreResult<()> {
        let payload = self.payload()?;
        self.cancel_upload();
        let blob_path = blob_path.into();
        debug!(file = %self.name, path = %blob_path, "starting upload");
        self.upload = Some(UploadTask::spawn(
            ctx.blobs().clone(),
            blob_path.clone(),
            payload,
            self.content_type.clone(),
        ));
        self.blob_path = Some(blob_path);
        Ok(())
    }

    /// Returns true while an upload is in flight.
    pub fn is_uploading(&self) -> bool {
        self.upload.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Detaches the in-flight upload, leaving its completion to the caller.
    pub(crate) fn take_upload(&mut self) -> Option<UploadTask> {
        self.upload.take()
    }

    /// Aborts the in-flight upload. Returns true if there was one.
    pub fn cancel_upload(&mut self) -> bool {
        match self.upload.take() {
            Some(task) => {
                debug!(file = %self.name, "cancelling upload");
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Waits for the in-flight upload and records its result.
    ///
    /// # Errors
    ///
    /// Fails if no upload was started or the upload failed.
    pub async fn wait_upload(&mut self) -> CoreResult<BlobMetadata> {
        let Some(task) = self.upload.as_mut() else {
            return Err(CoreError::lost_completion(format!(
                "no upload in flight for `{}`",
                self.name
            )));
        };
        let result = task.join().await;
        self.upload = None;
        let metadata = result?;
        self.mark_uploaded(&metadata);
        Ok(metadata)
    }

    pub(crate) fn clear_remote(&mut self) {
        if self.source != FileSource::Remote {
            self.url = None;
            self.size = None;
        }
    }

    pub(crate) fn mark_uploaded(&mut self, metadata: &BlobMetadata) {
        self.url = Some(metadata.download_url.clone());
        self.size = Some(metadata.size);
        self.blob_path = Some(metadata.path.clone());
        if self.content_type.is_none() {
            self.content_type = metadata.content_type.clone();
        }
    }

    /// Uploads the file under `owner` and, if the owner is persisted,
    /// writes `<owner>/<field> = descriptor`.
    ///
    /// The upload is bounded by the configured upload deadline.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-file error if there is nothing to upload, a
    /// timeout if the deadline passes, or the store's error.
    pub async fn save(&mut self, ctx: &Context, owner: &FileOwner) -> CoreResult<FileDescriptor> {
        self.start_upload(ctx, owner.blob_path(&self.name))?;
        let deadline = ctx.config().upload_timeout;
        let metadata = match tokio::time::timeout(deadline, self.wait_upload()).await {
            Ok(result) => result?,
            Err(_) => {
                if let Some(task) = self.upload.as_mut() {
                    if let Some(orphan) = task.cancel().await {
                        delete_orphans(ctx, [orphan]).await;
                    }
                }
                self.upload = None;
                warn!(file = %self.name, ?deadline, "upload timed out");
                return Err(CoreError::timeout("upload", deadline));
            }
        };

        let descriptor = self.descriptor();
        if owner.observed {
            let at = path::join(&owner.path, &owner.field);
            let writes = BTreeMap::from([(at.clone(), descriptor.to_value())]);
            if let Err(err) = ctx.store().update(writes).await {
                delete_orphans(ctx, [metadata]).await;
                self.url = None;
                return Err(err.into());
            }
            ctx.invalidate([at.as_str()]);
        }
        Ok(descriptor)
    }

    /// Downloads the content, up to `max_size` bytes.
    ///
    /// Inline bytes are returned without a round trip. Starting a download
    /// aborts any earlier one still running.
    ///
    /// # Errors
    ///
    /// Fails if the file has no blob path or the store refuses the read.
    pub async fn data(&mut self, ctx: &Context, max_size: u64) -> CoreResult<Bytes> {
        if let FileSource::Bytes(data) = &self.source {
            return Ok(data.clone());
        }
        let Some(at) = self.blob_path.clone() else {
            return Err(CoreError::invalid_file(&self.name));
        };
        if let Some(previous) = self.download.take() {
            previous.abort();
        }
        let blobs = ctx.blobs().clone();
        let handle = tokio::spawn(async move { blobs.get(&at, max_size).await });
        self.download = Some(handle.abort_handle());
        let result = handle.await;
        self.download = None;
        match result {
            Ok(result) => Ok(result?),
            Err(err) if err.is_cancelled() => Err(ObjectError::Cancelled.into()),
            Err(err) => Err(CoreError::lost_completion(err.to_string())),
        }
    }

    /// Deletes the stored blob. The owner's field still references it until
    /// the caller clears that field.
    ///
    /// # Errors
    ///
    /// Fails if the file was never stored or the store refuses the delete.
    pub async fn remove(&mut self, ctx: &Context) -> CoreResult<()> {
        let Some(at) = self.blob_path.as_deref() else {
            return Err(CoreError::invalid_file(&self.name));
        };
        ctx.blobs().delete(at).await?;
        debug!(file = %self.name, path = %at, "blob deleted");
        self.url = None;
        Ok(())
    }
}

impl Clone for File {
    /// Clones the file's state. In-flight transfers stay with the original.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            content_type: self.content_type.clone(),
            source: self.source.clone(),
            url: self.url.clone(),
            size: self.size,
            blob_path: self.blob_path.clone(),
            upload: None,
            download: None,
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Some(download) = &self.download {
            download.abort();
        }
    }
}

/// Best-effort removal of blobs no record will reference.
pub(crate) async fn delete_orphans(ctx: &Context, orphans: impl IntoIterator<Item = BlobMetadata>) {
    for metadata in orphans {
        match ctx.blobs().delete(&metadata.path).await {
            Ok(()) => debug!(path = %metadata.path, "deleted orphaned blob"),
            Err(err) => warn!(path = %metadata.path, error = %err, "failed to delete orphaned blob"),
        }
    }
}

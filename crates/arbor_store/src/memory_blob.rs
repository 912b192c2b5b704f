//! In-memory blob store for testing.

use crate::blob::{BlobMetadata, BlobPayload, BlobStore};
use crate::error::{StoreError, StoreResult};
use crate::path;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: Option<String>,
}

/// An in-memory [`BlobStore`].
///
/// File payloads are read from disk at upload time. Download locators use
/// the `memory://` scheme.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    /// Creates an empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an object exists at `path`.
    pub fn contains(&self, at: &str) -> bool {
        self.blobs.read().contains_key(&path::normalize(at))
    }

    /// Paths of all stored objects, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.blobs.read().keys().cloned().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        at: &str,
        payload: BlobPayload,
        content_type: Option<&str>,
    ) -> StoreResult<BlobMetadata> {
        let at = path::normalize(at);
        path::validate_write(&at)?;
        let data = match payload {
            BlobPayload::Bytes(data) => data,
            BlobPayload::File(source) => Bytes::from(tokio::fs::read(&source).await?),
        };
        let size = data.len() as u64;
        trace!(path = %at, size, "storing blob");
        self.blobs.write().insert(
            at.clone(),
            StoredBlob {
                data,
                content_type: content_type.map(String::from),
            },
        );
        Ok(BlobMetadata {
            download_url: format!("memory://{at}"),
            path: at,
            content_type: content_type.map(String::from),
            size,
        })
    }

    async fn get(&self, at: &str, max_size: u64) -> StoreResult<Bytes> {
        let at = path::normalize(at);
        let blob = self
            .blobs
            .read()
            .get(&at)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound { path: at.clone() })?;
        let size = blob.data.len() as u64;
        if size > max_size {
            return Err(StoreError::ObjectTooLarge {
                size,
                max: max_size,
            });
        }
        Ok(blob.data)
    }

    async fn delete(&self, at: &str) -> StoreResult<()> {
        let at = path::normalize(at);
        match self.blobs.write().remove(&at) {
            Some(_) => Ok(()),
            None => Err(StoreError::BlobNotFound { path: at }),
        }
    }
}

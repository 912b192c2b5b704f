//! The blob store boundary.

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

/// The content to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobPayload {
    /// Inline bytes.
    Bytes(Bytes),
    /// A local file to read.
    File(PathBuf),
}

/// What the blob store reports about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Path of the object within the blob store.
    pub path: String,
    /// Content type recorded with the object.
    pub content_type: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Download locator.
    pub download_url: String,
}

/// Object storage for file attachments.
///
/// Dropping one of the returned futures cancels the transfer.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Uploads a payload to `path`, replacing any existing object.
    async fn put(
        &self,
        path: &str,
        payload: BlobPayload,
        content_type: Option<&str>,
    ) -> StoreResult<BlobMetadata>;

    /// Downloads the object at `path`, refusing objects over `max_size`.
    async fn get(&self, path: &str, max_size: u64) -> StoreResult<Bytes>;

    /// Deletes the object at `path`.
    async fn delete(&self, path: &str) -> StoreResult<()>;
}

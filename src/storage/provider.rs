use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use crate::error::Result;

/// Blob store trait
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Write data at a path relative to the store root, replacing any
    /// existing blob. Returns the full path written.
    async fn put(&self, path: &str, data: Bytes) -> Result<PathBuf>;

    /// Delete data from storage; missing blobs are not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Full path a relative path maps to under the current root
    fn resolve(&self, path: &str) -> PathBuf;
}

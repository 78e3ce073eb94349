use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

/// Local file system storage provider
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn get_full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put(&self, path: &str, data: Bytes) -> Result<PathBuf> {
        let full_path = self.get_full_path(path);

        // Root and any subdirectory are created on demand
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(AppError::StorageWriteFailed)?;
        }

        // Truncates an existing blob at the same path
        let mut file = fs::File::create(&full_path)
            .await
            .map_err(AppError::StorageWriteFailed)?;
        file.write_all(&data)
            .await
            .map_err(AppError::StorageWriteFailed)?;
        file.flush().await.map_err(AppError::StorageWriteFailed)?;

        tracing::debug!("Saved {} bytes to {:?}", data.len(), full_path);
        Ok(full_path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.get_full_path(path);

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted file {:?}", full_path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.get_full_path(path)
    }
}

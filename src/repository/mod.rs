pub mod sqlite;

pub use sqlite::*;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FileRecord, NewFile};

/// Metadata store for file records
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// All records, in insertion order
    async fn find_all(&self) -> Result<Vec<FileRecord>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>>;

    /// Records whose parent folder equals `parent_folder_id`.
    /// `None` matches root-level records only.
    async fn find_by_parent(&self, parent_folder_id: Option<i64>) -> Result<Vec<FileRecord>>;

    /// Number of records whose blob lives at `path`
    async fn count_by_path(&self, path: &str) -> Result<i64>;

    /// Insert a record and return it with its assigned id
    async fn save(&self, file: NewFile) -> Result<FileRecord>;

    /// Returns whether a row was removed
    async fn delete_by_id(&self, id: i64) -> Result<bool>;
}

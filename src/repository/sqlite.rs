use async_trait::async_trait;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{FileRecord, NewFile};
use crate::repository::FileRepository;

/// `FileRepository` backed by the `files` table
#[derive(Clone)]
pub struct SqliteFileRepository {
    db: Database,
}

impl SqliteFileRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn find_all(&self) -> Result<Vec<FileRecord>> {
        let files: Vec<FileRecord> = sqlx::query_as("SELECT * FROM files ORDER BY id ASC")
            .fetch_all(self.db.pool())
            .await?;
        Ok(files)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let file: Option<FileRecord> = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(file)
    }

    async fn find_by_parent(&self, parent_folder_id: Option<i64>) -> Result<Vec<FileRecord>> {
        let files: Vec<FileRecord> = match parent_folder_id {
            Some(pid) => {
                sqlx::query_as("SELECT * FROM files WHERE parent_folder_id = ? ORDER BY id ASC")
                    .bind(pid)
                    .fetch_all(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM files WHERE parent_folder_id IS NULL ORDER BY id ASC")
                    .fetch_all(self.db.pool())
                    .await?
            }
        };
        Ok(files)
    }

    async fn count_by_path(&self, path: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files WHERE path = ?")
            .bind(path)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    async fn save(&self, file: NewFile) -> Result<FileRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (name, path, size, file_type, parent_folder_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.name)
        .bind(&file.path)
        .bind(file.size)
        .bind(file.kind.as_str())
        .bind(file.parent_folder_id)
        .bind(&file.created_at)
        .execute(self.db.pool())
        .await?;

        let id = result.last_insert_rowid();
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Inserted file {} vanished", id)))
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

use bytes::Bytes;
use chrono::Local;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{AppError, Result};
use crate::models::{FileKind, FileRecord, NewFile, SavedFile};
use crate::repository::FileRepository;
use crate::storage::StorageProvider;

/// Behavior switches for `FileService`
#[derive(Debug, Clone, Copy, Default)]
pub struct FileServiceOptions {
    /// Remove the blob when the last record pointing at it is deleted
    pub delete_blobs: bool,
}

/// File service
pub struct FileService {
    repo: Arc<dyn FileRepository>,
    storage: Arc<dyn StorageProvider>,
    options: FileServiceOptions,
    path_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileService {
    pub fn new(
        repo: Arc<dyn FileRepository>,
        storage: Arc<dyn StorageProvider>,
        options: FileServiceOptions,
    ) -> Self {
        Self {
            repo,
            storage,
            options,
            path_locks: DashMap::new(),
        }
    }

    /// Store an upload in the blob store and record its metadata.
    ///
    /// Images go to `images/{name}`, everything else to `{name}`, both
    /// relative to the upload root. An existing blob at the same path is
    /// replaced and a new metadata row is added regardless.
    pub async fn save_file(
        &self,
        data: Bytes,
        original_filename: &str,
        mime_type: Option<&str>,
        parent_folder_id: Option<i64>,
    ) -> Result<SavedFile> {
        validate_file_name(original_filename)?;

        let kind = FileKind::from_mime(mime_type);
        let key = blob_key(kind, original_filename);

        let file = {
            let lock = self.path_lock(&key);
            let _guard = lock.lock().await;
            self.write_and_record(&key, data, original_filename, kind, parent_folder_id)
                .await?
        };
        tracing::info!(
            "Stored {} {} ({} bytes) as id {}",
            kind.as_str(),
            file.name,
            file.size,
            file.id
        );
        Ok(SavedFile { kind, file })
    }

    async fn write_and_record(
        &self,
        key: &str,
        data: Bytes,
        name: &str,
        kind: FileKind,
        parent_folder_id: Option<i64>,
    ) -> Result<FileRecord> {
        let size = data.len() as i64;
        let full_path = self.storage.put(key, data).await?;
        let path = full_path.to_string_lossy().into_owned();

        let new_file = NewFile {
            name: name.to_string(),
            path: path.clone(),
            size,
            kind,
            parent_folder_id,
            created_at: Local::now().to_rfc3339(),
        };

        match self.repo.save(new_file).await {
            Ok(file) => Ok(file),
            Err(e) => {
                // Only drop the blob if no earlier record still points at it
                match self.repo.count_by_path(&path).await {
                    Ok(0) => {
                        tracing::warn!("Metadata insert failed, removing blob {}", path);
                        if let Err(cleanup) = self.storage.delete(key).await {
                            tracing::error!("Failed to remove orphaned blob {}: {}", path, cleanup);
                        }
                    }
                    Ok(_) => {}
                    Err(count_err) => {
                        tracing::error!("Could not check references to {}: {}", path, count_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// List files directly inside a folder; `None` lists root-level files
    pub async fn list_files_in_folder(&self, parent_folder_id: Option<i64>) -> Result<Vec<FileRecord>> {
        self.repo.find_by_parent(parent_folder_id).await
    }

    /// Get a file by ID
    pub async fn get_file_by_id(&self, id: i64) -> Result<FileRecord> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(AppError::FileNotFound(id))
    }

    /// Delete a file's metadata row. Unknown ids are ignored.
    pub async fn delete_by_id(&self, id: i64) -> Result<()> {
        let file = match self.repo.find_by_id(id).await? {
            Some(file) => file,
            None => {
                tracing::debug!("Delete of unknown file id {} ignored", id);
                return Ok(());
            }
        };

        self.repo.delete_by_id(id).await?;
        tracing::info!("Deleted file record {} ({})", id, file.name);

        if !self.options.delete_blobs {
            return Ok(());
        }

        let kind = file.kind().ok_or_else(|| {
            AppError::Internal(format!("File {} has unknown type {}", id, file.file_type))
        })?;
        let key = blob_key(kind, &file.name);

        // The upload root may have moved since this record was written
        if self.storage.resolve(&key).to_string_lossy() != file.path {
            tracing::warn!(
                "Blob {} of file {} is outside the current upload root, keeping it",
                file.path,
                id
            );
            return Ok(());
        }

        let lock = self.path_lock(&key);
        let _guard = lock.lock().await;
        self.remove_blob_if_unreferenced(&key, &file.path).await?;
        Ok(())
    }

    async fn remove_blob_if_unreferenced(&self, key: &str, path: &str) -> Result<()> {
        if self.repo.count_by_path(path).await? > 0 {
            tracing::debug!("Blob {} still referenced, keeping it", path);
            return Ok(());
        }
        self.storage.delete(key).await
    }

    fn path_lock(&self, key: &str) -> PathLock<'_> {
        let lock = self
            .path_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathLock {
            locks: &self.path_locks,
            key: key.to_string(),
            lock,
        }
    }
}

/// Handle on a per-path mutex; drops its map entry once nobody else holds it
struct PathLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl PathLock<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        // One reference in the map plus ours means no other waiter
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// Storage key relative to the upload root
fn blob_key(kind: FileKind, name: &str) -> String {
    match kind.subdir() {
        Some(dir) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(AppError::BadRequest(format!("Invalid file name: {:?}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::repository::SqliteFileRepository;
    use crate::storage::LocalStorage;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct TestContext {
        service: FileService,
        root: PathBuf,
        _dir: tempfile::TempDir,
    }

    async fn setup(options: FileServiceOptions) -> TestContext {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();

        // Left uncreated so the service has to create it
        let root = dir.path().join("uploads");
        let service = FileService::new(
            Arc::new(SqliteFileRepository::new(db)),
            Arc::new(LocalStorage::new(&root)),
            options,
        );

        TestContext {
            service,
            root,
            _dir: dir,
        }
    }

    fn bytes_of_len(len: usize) -> Bytes {
        Bytes::from(vec![7u8; len])
    }

    #[tokio::test]
    async fn test_image_upload_goes_to_images_dir() {
        let ctx = setup(FileServiceOptions::default()).await;

        let saved = ctx
            .service
            .save_file(bytes_of_len(2048), "photo.jpg", Some("image/jpeg"), None)
            .await
            .unwrap();

        assert_eq!(saved.message(), "Image uploaded successfully!");
        assert_eq!(saved.kind, FileKind::Image);
        assert_eq!(saved.file.file_type, "image");
        assert_eq!(saved.file.size, 2048);
        assert_eq!(saved.file.parent_folder_id, None);
        assert!(Path::new(&saved.file.path).ends_with("images/photo.jpg"));
        assert_eq!(
            PathBuf::from(&saved.file.path),
            ctx.root.join("images").join("photo.jpg")
        );
        assert_eq!(std::fs::read(&saved.file.path).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_other_uploads_go_to_root() {
        let ctx = setup(FileServiceOptions::default()).await;

        let pdf = ctx
            .service
            .save_file(bytes_of_len(10), "report.pdf", Some("application/pdf"), Some(4))
            .await
            .unwrap();
        let unknown = ctx
            .service
            .save_file(bytes_of_len(3), "blob.bin", None, None)
            .await
            .unwrap();

        assert_eq!(pdf.message(), "File uploaded successfully!");
        assert_eq!(pdf.file.file_type, "file");
        assert_eq!(pdf.file.parent_folder_id, Some(4));
        assert_eq!(PathBuf::from(&pdf.file.path), ctx.root.join("report.pdf"));

        assert_eq!(unknown.kind, FileKind::File);
        assert_eq!(PathBuf::from(&unknown.file.path), ctx.root.join("blob.bin"));
    }

    #[tokio::test]
    async fn test_same_name_overwrites_blob_and_keeps_both_records() {
        let ctx = setup(FileServiceOptions::default()).await;

        let first = ctx
            .service
            .save_file(Bytes::from_static(b"first upload"), "a.txt", Some("text/plain"), None)
            .await
            .unwrap();
        let second = ctx
            .service
            .save_file(Bytes::from_static(b"second"), "a.txt", Some("text/plain"), None)
            .await
            .unwrap();

        assert_ne!(first.file.id, second.file.id);
        assert_eq!(first.file.path, second.file.path);
        assert_eq!(std::fs::read(&second.file.path).unwrap(), b"second");
        assert_eq!(ctx.service.list_files_in_folder(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_filters_by_parent() {
        let ctx = setup(FileServiceOptions::default()).await;
        let svc = &ctx.service;

        let root_a = svc.save_file(bytes_of_len(1), "r1.txt", None, None).await.unwrap();
        let in_5 = svc.save_file(bytes_of_len(1), "f1.txt", None, Some(5)).await.unwrap();
        let root_b = svc.save_file(bytes_of_len(1), "r2.png", Some("image/png"), None).await.unwrap();
        svc.save_file(bytes_of_len(1), "f2.txt", None, Some(6)).await.unwrap();

        let roots: Vec<i64> = svc
            .list_files_in_folder(None)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(roots, vec![root_a.file.id, root_b.file.id]);

        let folder: Vec<i64> = svc
            .list_files_in_folder(Some(5))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(folder, vec![in_5.file.id]);

        assert!(svc.list_files_in_folder(Some(42)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_file_by_id() {
        let ctx = setup(FileServiceOptions::default()).await;

        let saved = ctx
            .service
            .save_file(bytes_of_len(5), "doc.txt", None, Some(1))
            .await
            .unwrap();

        let found = ctx.service.get_file_by_id(saved.file.id).await.unwrap();
        assert_eq!(found, saved.file);

        let err = ctx.service.get_file_by_id(saved.file.id + 100).await.unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(id) if id == saved.file.id + 100));
    }

    #[tokio::test]
    async fn test_delete_keeps_blob_by_default() {
        let ctx = setup(FileServiceOptions::default()).await;

        let saved = ctx
            .service
            .save_file(bytes_of_len(8), "keep.txt", None, None)
            .await
            .unwrap();

        ctx.service.delete_by_id(saved.file.id).await.unwrap();

        let err = ctx.service.get_file_by_id(saved.file.id).await.unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(_)));
        assert!(Path::new(&saved.file.path).exists());
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_noop() {
        let ctx = setup(FileServiceOptions::default()).await;
        ctx.service.delete_by_id(12345).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_blobs_removes_unreferenced_blob_only() {
        let ctx = setup(FileServiceOptions { delete_blobs: true }).await;
        let svc = &ctx.service;

        let first = svc.save_file(bytes_of_len(1), "shared.gif", Some("image/gif"), None).await.unwrap();
        let second = svc.save_file(bytes_of_len(2), "shared.gif", Some("image/gif"), None).await.unwrap();

        svc.delete_by_id(first.file.id).await.unwrap();
        assert!(Path::new(&second.file.path).exists());

        svc.delete_by_id(second.file.id).await.unwrap();
        assert!(!Path::new(&second.file.path).exists());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_file_names() {
        let ctx = setup(FileServiceOptions::default()).await;

        for name in ["", ".", "..", "../escape.txt", "a/b.txt", "..\\win.txt", "nul\0.txt"] {
            let err = ctx
                .service
                .save_file(bytes_of_len(1), name, None, None)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "accepted {:?}", name);
        }

        assert!(!ctx.root.exists());
        assert!(ctx.service.list_files_in_folder(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_as_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();

        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let service = FileService::new(
            Arc::new(SqliteFileRepository::new(db)),
            Arc::new(LocalStorage::new(&blocker)),
            FileServiceOptions::default(),
        );

        let err = service
            .save_file(bytes_of_len(1), "x.txt", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StorageWriteFailed(_)));
        assert!(service.list_files_in_folder(None).await.unwrap().is_empty());
    }

    /// Repository whose inserts always fail
    struct FailingRepo;

    #[async_trait]
    impl FileRepository for FailingRepo {
        async fn find_all(&self) -> Result<Vec<FileRecord>> {
            Ok(Vec::new())
        }

        async fn find_by_id(&self, _id: i64) -> Result<Option<FileRecord>> {
            Ok(None)
        }

        async fn find_by_parent(&self, _parent_folder_id: Option<i64>) -> Result<Vec<FileRecord>> {
            Ok(Vec::new())
        }

        async fn count_by_path(&self, _path: &str) -> Result<i64> {
            Ok(0)
        }

        async fn save(&self, _file: NewFile) -> Result<FileRecord> {
            Err(AppError::Internal("insert refused".to_string()))
        }

        async fn delete_by_id(&self, _id: i64) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_orphan_blob() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(
            Arc::new(FailingRepo),
            Arc::new(LocalStorage::new(dir.path())),
            FileServiceOptions::default(),
        );

        let err = service
            .save_file(bytes_of_len(4), "lost.txt", None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        assert!(!dir.path().join("lost.txt").exists());
    }

    #[tokio::test]
    async fn test_concurrent_saves_to_same_path() {
        let ctx = setup(FileServiceOptions::default()).await;
        let service = Arc::new(ctx.service);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .save_file(Bytes::from(vec![i; 16 + i as usize]), "race.bin", None, None)
                    .await
                    .unwrap()
            }));
        }

        let mut saved = Vec::new();
        for handle in handles {
            saved.push(handle.await.unwrap());
        }

        // Blob content belongs to the record inserted last
        let last = saved.iter().max_by_key(|s| s.file.id).unwrap();
        let content = std::fs::read(&last.file.path).unwrap();
        assert_eq!(content.len() as i64, last.file.size);
        assert!(content.iter().all(|b| *b == content[0]));
        assert_eq!(service.list_files_in_folder(None).await.unwrap().len(), 8);
        assert!(service.path_locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_save_releases_path_lock() {
        let ctx = setup(FileServiceOptions::default()).await;
        let svc = &ctx.service;

        let held = svc.path_lock("stuck.txt");
        let guard = held.lock().await;

        // The save waits on the held lock and is dropped mid-flight
        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            svc.save_file(bytes_of_len(1), "stuck.txt", None, None),
        )
        .await;
        assert!(pending.is_err());

        drop(guard);
        drop(held);
        assert!(svc.path_locks.is_empty());
        assert!(svc.list_files_in_folder(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_blob_outside_current_root() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();
        let repo = SqliteFileRepository::new(db);
        let options = FileServiceOptions { delete_blobs: true };

        // Same metadata store, upload root moved between the two saves
        let before = FileService::new(
            Arc::new(repo.clone()),
            Arc::new(LocalStorage::new(dir.path().join("root1"))),
            options,
        );
        let after = FileService::new(
            Arc::new(repo),
            Arc::new(LocalStorage::new(dir.path().join("root2"))),
            options,
        );

        let old = before.save_file(bytes_of_len(1), "a.txt", None, None).await.unwrap();
        let current = after.save_file(bytes_of_len(2), "a.txt", None, None).await.unwrap();
        assert_ne!(old.file.path, current.file.path);

        after.delete_by_id(old.file.id).await.unwrap();

        assert!(Path::new(&current.file.path).exists());
        assert!(Path::new(&old.file.path).exists());
        assert!(matches!(
            after.get_file_by_id(old.file.id).await.unwrap_err(),
            AppError::FileNotFound(_)
        ));
        assert_eq!(after.get_file_by_id(current.file.id).await.unwrap(), current.file);

        // Deleting the live record under its own root still removes the blob
        after.delete_by_id(current.file.id).await.unwrap();
        assert!(!Path::new(&current.file.path).exists());
    }
}

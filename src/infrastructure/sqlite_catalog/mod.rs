mod favorites;
mod files;
mod query;
mod rename;
mod schema;
mod snapshot;

use crate::domain::DomainError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{error, info};

use snapshot::SnapshotFile;

/// In-memory SQLite catalog, flushed wholesale to a snapshot file after each
/// mutating batch.
///
/// Every read and write goes through the single connection mutex, so writers
/// are serialized and no reader ever observes a half-applied batch.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
    snapshot: Option<SnapshotFile>,
    read_only: AtomicBool,
}

impl SqliteCatalog {
    /// Loads the snapshot at `path` (if any) into memory and brings the schema
    /// up to date. An unreadable or corrupt snapshot is an error: the catalog
    /// refuses to serve it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DomainError> {
        let snapshot = SnapshotFile::new(path.as_ref());
        let mut conn = Connection::open_in_memory()?;

        if snapshot.exists() {
            info!("Loading catalog snapshot from {}", snapshot.path().display());
            snapshot.load_into(&mut conn)?;
        } else {
            info!(
                "No snapshot at {}, starting with an empty catalog",
                snapshot.path().display()
            );
        }

        schema::ensure_schema(&mut conn)?;

        let catalog = Self {
            conn: Mutex::new(conn),
            snapshot: Some(snapshot),
            read_only: AtomicBool::new(false),
        };
        // Migrations may have rewritten rows; make them durable before serving.
        catalog.persist_now()?;
        Ok(catalog)
    }

    /// Catalog without a backing file; `persist` is a no-op.
    pub fn in_memory() -> Result<Self, DomainError> {
        let mut conn = Connection::open_in_memory()?;
        schema::ensure_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            snapshot: None,
            read_only: AtomicBool::new(false),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DomainError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| DomainError::Database("catalog lock poisoned".to_string()))?;
        f(&mut conn)
    }

    /// Runs a mutation under the connection lock, then snapshots the result
    /// when `persist` is set. The snapshot is written before the lock is
    /// released so a concurrent writer can never be lost behind it.
    ///
    /// A committed mutation is never reported as failed. If the snapshot
    /// cannot be written the write still succeeds in memory, the catalog
    /// turns read-only and `is_read_only` tells callers it is degraded.
    pub(crate) fn with_write<T, F>(&self, persist: bool, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DomainError>,
    {
        if self.is_read_only() {
            return Err(DomainError::ReadOnly);
        }
        self.with_conn(|conn| {
            let out = f(conn)?;
            if persist {
                // Logged and flagged inside persist_locked.
                let _ = self.persist_locked(conn);
            }
            Ok(out)
        })
    }

    pub(crate) fn persist_now(&self) -> Result<(), DomainError> {
        if self.is_read_only() {
            return Err(DomainError::ReadOnly);
        }
        self.with_conn(|conn| self.persist_locked(conn))
    }

    fn persist_locked(&self, conn: &Connection) -> Result<(), DomainError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        if let Err(e) = snapshot.write_from(conn) {
            error!(
                "Snapshot to {} failed, switching catalog to read-only: {}",
                snapshot.path().display(),
                e
            );
            self.read_only.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

// ---- CatalogRepository trait implementation (delegates to submodule _impl methods) ----

use crate::domain::{
    CatalogRepository, CatalogStats, FavoriteIds, FileQuery, FileRecord, FolderAggregate,
    ItemType, ThumbnailMeta,
};
use std::collections::HashMap;

impl CatalogRepository for SqliteCatalog {
    fn upsert(&self, record: &FileRecord) -> Result<(), DomainError> {
        self.upsert_impl(record)
    }

    fn batch_insert(&self, records: &[FileRecord], persist: bool) -> Result<(), DomainError> {
        self.batch_insert_impl(records, persist)
    }

    fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>, DomainError> {
        self.find_by_path_impl(path)
    }

    fn delete_by_path(&self, path: &str, id: Option<&str>) -> Result<(), DomainError> {
        self.delete_by_path_impl(path, id)
    }

    fn delete_files_batch(&self, paths: &[String], persist: bool) -> Result<usize, DomainError> {
        self.delete_files_batch_impl(paths, persist)
    }

    fn delete_by_folder_prefix(&self, folder_path: &str) -> Result<usize, DomainError> {
        self.delete_by_folder_prefix_impl(folder_path)
    }

    fn clear_all(&self) -> Result<(), DomainError> {
        self.clear_all_impl()
    }

    fn get_path_mtimes(
        &self,
        source_id: Option<&str>,
    ) -> Result<HashMap<String, i64>, DomainError> {
        self.get_path_mtimes_impl(source_id)
    }

    fn record_thumbnail(
        &self,
        file_id: &str,
        thumbnail_path: &str,
        width: u32,
        height: u32,
    ) -> Result<(), DomainError> {
        self.record_thumbnail_impl(file_id, thumbnail_path, width, height)
    }

    fn get_thumbnail(&self, file_id: &str) -> Result<Option<ThumbnailMeta>, DomainError> {
        self.get_thumbnail_impl(file_id)
    }

    fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRecord>, DomainError> {
        self.query_files_impl(query)
    }

    fn count_files(&self, query: &FileQuery) -> Result<i64, DomainError> {
        self.count_files_impl(query)
    }

    fn query_folders(
        &self,
        parent_path: &str,
        favorites_only: bool,
        user_id: Option<&str>,
        allowed_paths: Option<&[String]>,
    ) -> Result<Vec<FolderAggregate>, DomainError> {
        self.query_folders_impl(parent_path, favorites_only, user_id, allowed_paths)
    }

    fn get_stats(&self, allowed_paths: Option<&[String]>) -> Result<CatalogStats, DomainError> {
        self.get_stats_impl(allowed_paths)
    }

    fn toggle_favorite(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, DomainError> {
        self.toggle_favorite_impl(user_id, item_id, item_type)
    }

    fn add_favorite(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<(), DomainError> {
        self.add_favorite_impl(user_id, item_id, item_type)
    }

    fn remove_favorite(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<(), DomainError> {
        self.remove_favorite_impl(user_id, item_id, item_type)
    }

    fn list_favorite_ids(&self, user_id: &str) -> Result<FavoriteIds, DomainError> {
        self.list_favorite_ids_impl(user_id)
    }

    fn query_favorite_files(
        &self,
        user_id: &str,
        query: &FileQuery,
    ) -> Result<Vec<FileRecord>, DomainError> {
        self.query_favorite_files_impl(user_id, query)
    }

    fn rename(
        &self,
        old_path: &str,
        new_path: &str,
        new_name: &str,
    ) -> Result<FileRecord, DomainError> {
        self.rename_impl(old_path, new_path, new_name)
    }

    fn persist(&self) -> Result<(), DomainError> {
        self.persist_now()
    }
}

#[cfg(test)]
pub(crate) struct TestDb {
    pub catalog: SqliteCatalog,
    pub path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

#[cfg(test)]
impl TestDb {
    /// Fresh catalog backed by a snapshot file in its own temp directory.
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{}.db", name));
        let catalog = SqliteCatalog::open(&path).unwrap();
        Self {
            catalog,
            path,
            _dir: dir,
        }
    }

    pub fn reopen(&self) -> SqliteCatalog {
        SqliteCatalog::open(&self.path).unwrap()
    }
}

#[cfg(test)]
pub(crate) fn sample_record(path: &str, last_modified: i64) -> FileRecord {
    use crate::domain::MediaType;

    let (mime, media_type) = if path.ends_with(".mp4") {
        ("video/mp4", MediaType::Video)
    } else if path.ends_with(".mp3") {
        ("audio/mpeg", MediaType::Audio)
    } else {
        ("image/jpeg", MediaType::Image)
    };
    FileRecord::new(path, 1024, mime, media_type, last_modified, "main")
}

use super::models::{
    CatalogStats, FavoriteIds, FileQuery, FileRecord, FolderAggregate, ItemType, ThumbnailMeta,
    WalkOutcome,
};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Transaction failed: {0}")]
    Transaction(String),
    #[error("Record not found")]
    NotFound,
    #[error("Path already exists: {0}")]
    Conflict(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Catalog is read-only after a failed snapshot")]
    ReadOnly,
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for DomainError {
    fn from(err: rusqlite::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

pub trait CatalogRepository: Send + Sync {
    // --- Catalog store ---
    fn upsert(&self, record: &FileRecord) -> Result<(), DomainError>;
    /// All-or-nothing: an invalid record or failed row rolls back the batch.
    fn batch_insert(&self, records: &[FileRecord], persist: bool) -> Result<(), DomainError>;
    fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>, DomainError>;
    fn delete_by_path(&self, path: &str, id: Option<&str>) -> Result<(), DomainError>;
    fn delete_files_batch(&self, paths: &[String], persist: bool) -> Result<usize, DomainError>;
    fn delete_by_folder_prefix(&self, folder_path: &str) -> Result<usize, DomainError>;
    fn clear_all(&self) -> Result<(), DomainError>;
    /// Stored `path -> last_modified`, optionally scoped to one import root.
    fn get_path_mtimes(&self, source_id: Option<&str>) -> Result<HashMap<String, i64>, DomainError>;

    // --- Thumbnails (filled in by the external generator) ---
    fn record_thumbnail(
        &self,
        file_id: &str,
        thumbnail_path: &str,
        width: u32,
        height: u32,
    ) -> Result<(), DomainError>;
    fn get_thumbnail(&self, file_id: &str) -> Result<Option<ThumbnailMeta>, DomainError>;

    // --- Queries ---
    fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRecord>, DomainError>;
    fn count_files(&self, query: &FileQuery) -> Result<i64, DomainError>;
    fn query_folders(
        &self,
        parent_path: &str,
        favorites_only: bool,
        user_id: Option<&str>,
        allowed_paths: Option<&[String]>,
    ) -> Result<Vec<FolderAggregate>, DomainError>;
    fn get_stats(&self, allowed_paths: Option<&[String]>) -> Result<CatalogStats, DomainError>;

    // --- Favorites ---
    fn toggle_favorite(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, DomainError>;
    fn add_favorite(&self, user_id: &str, item_id: &str, item_type: ItemType)
        -> Result<(), DomainError>;
    fn remove_favorite(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<(), DomainError>;
    fn list_favorite_ids(&self, user_id: &str) -> Result<FavoriteIds, DomainError>;
    fn query_favorite_files(
        &self,
        user_id: &str,
        query: &FileQuery,
    ) -> Result<Vec<FileRecord>, DomainError>;

    // --- Rename ---
    fn rename(&self, old_path: &str, new_path: &str, new_name: &str) -> Result<FileRecord, DomainError>;

    // --- Persistence ---
    fn persist(&self) -> Result<(), DomainError>;
}

pub trait FileWalker: Send + Sync {
    /// Every media file below `root`, tagged with `source_id`, plus whatever
    /// part of the tree could not be read. Only an unusable root is an error.
    fn walk(&self, root: &Path, source_id: &str) -> Result<WalkOutcome, DomainError>;
}

use crate::domain::{
    CatalogRepository, DomainError, FileRecord, FileWalker, SyncDiff, WalkOutcome,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const BATCH_SIZE: usize = 500;

/// Compares stored modification times with a fresh walk. Only paths whose
/// mtime differs count as changed; everything else is skipped.
pub fn diff(stored: &HashMap<String, i64>, live: &HashMap<String, i64>) -> SyncDiff {
    let mut result = SyncDiff::default();
    for (path, mtime) in live {
        match stored.get(path) {
            None => result.added.push(path.clone()),
            Some(old) if old != mtime => result.changed.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in stored.keys() {
        if !live.contains_key(path) {
            result.removed.push(path.clone());
        }
    }
    result.added.sort();
    result.changed.sort();
    result.removed.sort();
    result
}

/// Drops removals the walk cannot vouch for: a stored file below a directory
/// that failed to list is kept until a later walk reads it. Returns how many
/// removals were held back.
pub fn keep_unreadable(delta: &mut SyncDiff, outcome: &WalkOutcome) -> usize {
    let before = delta.removed.len();
    delta.removed.retain(|path| !outcome.is_unknown(path));
    before - delta.removed.len()
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source_id: String,
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    /// Stored files kept because their part of the tree could not be read.
    pub skipped_unreadable: usize,
    pub cancelled: bool,
    /// The applied delta could not be snapshotted; the catalog is read-only.
    pub read_only: bool,
}

pub struct SyncCatalogUseCase {
    repo: Arc<dyn CatalogRepository>,
    walker: Arc<dyn FileWalker>,
}

impl SyncCatalogUseCase {
    pub fn new(repo: Arc<dyn CatalogRepository>, walker: Arc<dyn FileWalker>) -> Self {
        Self { repo, walker }
    }

    /// Re-scans `root` and applies only the delta. Cancellation is honoured
    /// between batches; whatever was committed is snapshotted before returning.
    pub async fn execute(
        &self,
        root: PathBuf,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, DomainError> {
        let walker = self.walker.clone();
        let walk_source = source_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || walker.walk(&root, &walk_source))
            .await
            .map_err(|e| DomainError::Io(format!("walk task failed: {}", e)))??;

        let mut report = SyncReport {
            source_id: source_id.to_string(),
            ..Default::default()
        };
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let live: HashMap<String, i64> = outcome
            .entries
            .iter()
            .map(|e| (e.path.clone(), e.last_modified))
            .collect();
        let stored = self.repo.get_path_mtimes(Some(source_id))?;
        let mut delta = diff(&stored, &live);
        report.skipped_unreadable = keep_unreadable(&mut delta, &outcome);
        if report.skipped_unreadable > 0 {
            warn!(
                "Source {}: keeping {} files under {} unreadable path(s)",
                source_id,
                report.skipped_unreadable,
                outcome.unreadable.len()
            );
        }
        if delta.is_empty() {
            info!("Source {} is up to date ({} files)", source_id, live.len());
            return Ok(report);
        }

        let by_path: HashMap<&str, FileRecord> = outcome
            .entries
            .iter()
            .filter_map(|e| FileRecord::from_walk(e).map(|r| (e.path.as_str(), r)))
            .collect();
        let changed: HashSet<&str> = delta.changed.iter().map(String::as_str).collect();
        let to_write: Vec<FileRecord> = delta
            .added
            .iter()
            .chain(delta.changed.iter())
            .filter_map(|p| by_path.get(p.as_str()).cloned())
            .collect();

        let applied = self.apply(&delta, &to_write, &changed, cancel, &mut report);

        if report.added + report.changed + report.removed > 0 {
            // Committed batches stay applied either way; a failed snapshot
            // only leaves the catalog read-only.
            if let Err(e) = self.repo.persist() {
                error!("Snapshot after sync of {} failed: {}", source_id, e);
                report.read_only = true;
            }
        }
        applied?;

        info!(
            "Synced {}: {} added, {} changed, {} removed{}",
            source_id,
            report.added,
            report.changed,
            report.removed,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    fn apply(
        &self,
        delta: &SyncDiff,
        to_write: &[FileRecord],
        changed: &HashSet<&str>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), DomainError> {
        for chunk in to_write.chunks(BATCH_SIZE) {
            if cancel.is_cancelled() {
                warn!("Sync of {} cancelled between batches", report.source_id);
                report.cancelled = true;
                return Ok(());
            }
            self.repo.batch_insert(chunk, false)?;
            let changed_in_chunk = chunk
                .iter()
                .filter(|r| changed.contains(r.path.as_str()))
                .count();
            report.changed += changed_in_chunk;
            report.added += chunk.len() - changed_in_chunk;
        }

        for chunk in delta.removed.chunks(BATCH_SIZE) {
            if cancel.is_cancelled() {
                warn!("Sync of {} cancelled between batches", report.source_id);
                report.cancelled = true;
                return Ok(());
            }
            report.removed += self.repo.delete_files_batch(chunk, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FileQuery, ItemType, WalkEntry};
    use crate::infrastructure::{FsWalker, SqliteCatalog, TestDb};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    fn map(entries: &[(&str, i64)]) -> HashMap<String, i64> {
        entries.iter().map(|(p, t)| (p.to_string(), *t)).collect()
    }

    #[test]
    fn test_diff_classifies_paths() {
        let stored = map(&[("p1", 100), ("p2", 200)]);
        let live = map(&[("p1", 100), ("p3", 50)]);

        let delta = diff(&stored, &live);
        assert_eq!(delta.added, vec!["p3"]);
        assert_eq!(delta.removed, vec!["p2"]);
        assert!(delta.changed.is_empty());
    }

    #[test]
    fn test_diff_detects_changed_mtime() {
        let stored = map(&[("p1", 100), ("p2", 200)]);
        let live = map(&[("p1", 101), ("p2", 200)]);

        let delta = diff(&stored, &live);
        assert_eq!(delta.changed, vec!["p1"]);
        assert!(delta.added.is_empty());
        assert!(delta.removed.is_empty());
        assert!(diff(&live, &live).is_empty());
    }

    #[test]
    fn test_unreadable_directories_hold_back_removals() {
        let stored = map(&[("lib/ok/a.jpg", 1), ("lib/locked/b.jpg", 2), ("lib/lockedx/c.jpg", 3)]);
        let live = map(&[("lib/ok/a.jpg", 1)]);
        let outcome = WalkOutcome {
            entries: Vec::new(),
            unreadable: vec!["lib/locked".to_string()],
        };

        let mut delta = diff(&stored, &live);
        assert_eq!(keep_unreadable(&mut delta, &outcome), 1);
        assert_eq!(delta.removed, vec!["lib/lockedx/c.jpg"]);
    }

    /// Walker fed from a shared list so tests can mutate the "filesystem".
    struct FakeWalker {
        entries: Mutex<Vec<WalkEntry>>,
        unreadable: Mutex<Vec<String>>,
    }

    impl FakeWalker {
        fn new(files: &[(&str, i64)]) -> Self {
            let walker = Self {
                entries: Mutex::new(Vec::new()),
                unreadable: Mutex::new(Vec::new()),
            };
            walker.set(files);
            walker
        }

        fn set(&self, files: &[(&str, i64)]) {
            *self.entries.lock().unwrap() = files
                .iter()
                .map(|(p, t)| WalkEntry {
                    path: p.to_string(),
                    size: 10,
                    mime_type: "image/jpeg".to_string(),
                    last_modified: *t,
                    source_id: "main".to_string(),
                })
                .collect();
        }

        fn fail(&self, paths: &[&str]) {
            *self.unreadable.lock().unwrap() = paths.iter().map(|p| p.to_string()).collect();
        }
    }

    impl FileWalker for FakeWalker {
        fn walk(&self, _root: &Path, _source_id: &str) -> Result<WalkOutcome, DomainError> {
            Ok(WalkOutcome {
                entries: self.entries.lock().unwrap().clone(),
                unreadable: self.unreadable.lock().unwrap().clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_incremental_sync_applies_delta() {
        let db = TestDb::new("sync_delta");
        let repo = Arc::new(db.reopen());
        let walker = Arc::new(FakeWalker::new(&[("lib/p1.jpg", 100), ("lib/p2.jpg", 200)]));
        let use_case = SyncCatalogUseCase::new(repo.clone(), walker.clone());
        let cancel = CancellationToken::new();

        let first = use_case.execute(PathBuf::from("lib"), "main", &cancel).await.unwrap();
        assert_eq!(first.added, 2);

        let p1_id = crate::domain::derive_id("lib/p1.jpg");
        repo.toggle_favorite("alice", &p1_id, ItemType::File).unwrap();

        walker.set(&[("lib/p1.jpg", 100), ("lib/p3.jpg", 50)]);
        let second = use_case.execute(PathBuf::from("lib"), "main", &cancel).await.unwrap();
        assert_eq!((second.added, second.changed, second.removed), (1, 0, 1));

        let mut paths: Vec<String> = repo
            .query_files(&FileQuery::default())
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["lib/p1.jpg", "lib/p3.jpg"]);
        // Unchanged file kept its identity and its favorite.
        assert_eq!(repo.list_favorite_ids("alice").unwrap().files, vec![p1_id]);

        let third = use_case.execute(PathBuf::from("lib"), "main", &cancel).await.unwrap();
        assert_eq!((third.added, third.changed, third.removed), (0, 0, 0));

        // Every applied batch reached the snapshot.
        let reloaded = SqliteCatalog::open(&db.path).unwrap();
        assert_eq!(reloaded.count_files(&FileQuery::default()).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sync_leaves_other_sources_alone() {
        let db = TestDb::new("sync_sources");
        let repo = Arc::new(db.reopen());
        let mut foreign = crate::infrastructure::sample_record("usb/x.jpg", 1);
        foreign.source_id = "usb".to_string();
        repo.upsert(&foreign).unwrap();

        let walker = Arc::new(FakeWalker::new(&[("lib/a.jpg", 1)]));
        let use_case = SyncCatalogUseCase::new(repo.clone(), walker);
        let report = use_case
            .execute(PathBuf::from("lib"), "main", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(repo.count_files(&FileQuery::default()).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_directory_keeps_records_and_favorites() {
        let repo = Arc::new(SqliteCatalog::in_memory().unwrap());
        let walker = Arc::new(FakeWalker::new(&[
            ("lib/open/a.jpg", 1),
            ("lib/locked/b.jpg", 2),
            ("lib/locked/deep/c.jpg", 3),
        ]));
        let use_case = SyncCatalogUseCase::new(repo.clone(), walker.clone());
        let cancel = CancellationToken::new();
        use_case.execute(PathBuf::from("lib"), "main", &cancel).await.unwrap();

        let b_id = crate::domain::derive_id("lib/locked/b.jpg");
        repo.toggle_favorite("alice", &b_id, ItemType::File).unwrap();

        // The locked directory fails to list; only a.jpg really went away.
        walker.set(&[]);
        walker.fail(&["lib/locked"]);
        let report = use_case.execute(PathBuf::from("lib"), "main", &cancel).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.skipped_unreadable, 2);
        assert!(repo.find_by_path("lib/open/a.jpg").unwrap().is_none());
        assert!(repo.find_by_path("lib/locked/deep/c.jpg").unwrap().is_some());
        assert_eq!(repo.list_favorite_ids("alice").unwrap().files, vec![b_id.clone()]);

        // Once it is readable again and the file is truly gone, it goes.
        walker.fail(&[]);
        walker.set(&[("lib/locked/deep/c.jpg", 3)]);
        let report = use_case.execute(PathBuf::from("lib"), "main", &cancel).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(repo.list_favorite_ids("alice").unwrap().files.is_empty());
    }

    /// Cancels the token as soon as the first batch has been committed.
    struct CancelAfterFirstBatch {
        inner: SqliteCatalog,
        cancel: CancellationToken,
    }

    impl CatalogRepository for CancelAfterFirstBatch {
        fn upsert(&self, record: &FileRecord) -> Result<(), DomainError> {
            self.inner.upsert(record)
        }
        fn batch_insert(&self, records: &[FileRecord], persist: bool) -> Result<(), DomainError> {
            self.inner.batch_insert(records, persist)?;
            self.cancel.cancel();
            Ok(())
        }
        fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>, DomainError> {
            self.inner.find_by_path(path)
        }
        fn delete_by_path(&self, path: &str, id: Option<&str>) -> Result<(), DomainError> {
            self.inner.delete_by_path(path, id)
        }
        fn delete_files_batch(&self, paths: &[String], persist: bool) -> Result<usize, DomainError> {
            self.inner.delete_files_batch(paths, persist)
        }
        fn delete_by_folder_prefix(&self, folder_path: &str) -> Result<usize, DomainError> {
            self.inner.delete_by_folder_prefix(folder_path)
        }
        fn clear_all(&self) -> Result<(), DomainError> {
            self.inner.clear_all()
        }
        fn get_path_mtimes(
            &self,
            source_id: Option<&str>,
        ) -> Result<HashMap<String, i64>, DomainError> {
            self.inner.get_path_mtimes(source_id)
        }
        fn record_thumbnail(
            &self,
            file_id: &str,
            thumbnail_path: &str,
            width: u32,
            height: u32,
        ) -> Result<(), DomainError> {
            self.inner.record_thumbnail(file_id, thumbnail_path, width, height)
        }
        fn get_thumbnail(
            &self,
            file_id: &str,
        ) -> Result<Option<crate::domain::ThumbnailMeta>, DomainError> {
            self.inner.get_thumbnail(file_id)
        }
        fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRecord>, DomainError> {
            self.inner.query_files(query)
        }
        fn count_files(&self, query: &FileQuery) -> Result<i64, DomainError> {
            self.inner.count_files(query)
        }
        fn query_folders(
            &self,
            parent_path: &str,
            favorites_only: bool,
            user_id: Option<&str>,
            allowed_paths: Option<&[String]>,
        ) -> Result<Vec<crate::domain::FolderAggregate>, DomainError> {
            self.inner
                .query_folders(parent_path, favorites_only, user_id, allowed_paths)
        }
        fn get_stats(
            &self,
            allowed_paths: Option<&[String]>,
        ) -> Result<crate::domain::CatalogStats, DomainError> {
            self.inner.get_stats(allowed_paths)
        }
        fn toggle_favorite(
            &self,
            user_id: &str,
            item_id: &str,
            item_type: ItemType,
        ) -> Result<bool, DomainError> {
            self.inner.toggle_favorite(user_id, item_id, item_type)
        }
        fn add_favorite(
            &self,
            user_id: &str,
            item_id: &str,
            item_type: ItemType,
        ) -> Result<(), DomainError> {
            self.inner.add_favorite(user_id, item_id, item_type)
        }
        fn remove_favorite(
            &self,
            user_id: &str,
            item_id: &str,
            item_type: ItemType,
        ) -> Result<(), DomainError> {
            self.inner.remove_favorite(user_id, item_id, item_type)
        }
        fn list_favorite_ids(
            &self,
            user_id: &str,
        ) -> Result<crate::domain::FavoriteIds, DomainError> {
            self.inner.list_favorite_ids(user_id)
        }
        fn query_favorite_files(
            &self,
            user_id: &str,
            query: &FileQuery,
        ) -> Result<Vec<FileRecord>, DomainError> {
            self.inner.query_favorite_files(user_id, query)
        }
        fn rename(
            &self,
            old_path: &str,
            new_path: &str,
            new_name: &str,
        ) -> Result<FileRecord, DomainError> {
            self.inner.rename(old_path, new_path, new_name)
        }
        fn persist(&self) -> Result<(), DomainError> {
            self.inner.persist()
        }
    }

    #[tokio::test]
    async fn test_cancel_between_batches_persists_committed_batches() {
        let db = TestDb::new("sync_cancel_batches");
        let cancel = CancellationToken::new();
        let repo = Arc::new(CancelAfterFirstBatch {
            inner: db.reopen(),
            cancel: cancel.clone(),
        });

        let names: Vec<String> = (0..BATCH_SIZE + 250)
            .map(|i| format!("big/{:04}.jpg", i))
            .collect();
        let files: Vec<(&str, i64)> = names.iter().map(|n| (n.as_str(), 1)).collect();
        let walker = Arc::new(FakeWalker::new(&files));
        let use_case = SyncCatalogUseCase::new(repo.clone(), walker);

        let report = use_case
            .execute(PathBuf::from("big"), "main", &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.added, BATCH_SIZE);
        assert!(!report.read_only);

        let reloaded = db.reopen();
        assert_eq!(
            reloaded.count_files(&FileQuery::default()).unwrap(),
            BATCH_SIZE as i64
        );
    }

    #[tokio::test]
    async fn test_cancelled_sync_writes_nothing() {
        let repo = Arc::new(SqliteCatalog::in_memory().unwrap());
        let walker = Arc::new(FakeWalker::new(&[("lib/a.jpg", 1)]));
        let use_case = SyncCatalogUseCase::new(repo.clone(), walker);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = use_case
            .execute(PathBuf::from("lib"), "main", &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(repo.count_files(&FileQuery::default()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2024/summer")).unwrap();
        fs::write(dir.path().join("2024/summer/beach.jpg"), b"jpg").unwrap();
        fs::write(dir.path().join("2024/clip.mp4"), b"mp4").unwrap();

        let repo = Arc::new(SqliteCatalog::in_memory().unwrap());
        let use_case = SyncCatalogUseCase::new(repo.clone(), Arc::new(FsWalker::default()));
        let report = use_case
            .execute(dir.path().to_path_buf(), "main", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.added, 2);

        let root = crate::infrastructure::catalog_path(&dir.path().join("2024"));
        let files = repo.query_files(&FileQuery::folder(&root, true)).unwrap();
        assert_eq!(files.len(), 2);

        fs::remove_file(dir.path().join("2024/clip.mp4")).unwrap();
        let report = use_case
            .execute(dir.path().to_path_buf(), "main", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(repo.count_files(&FileQuery::default()).unwrap(), 1);
    }
}

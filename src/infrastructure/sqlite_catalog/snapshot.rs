use crate::domain::DomainError;
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const PAGES_PER_STEP: i32 = 1024;

/// Single-file snapshot of the whole catalog.
///
/// Writes go to `<path>.tmp` first and are renamed over the previous
/// snapshot, so a crash mid-write leaves the old snapshot intact. Cost is
/// proportional to the full catalog size, not to the size of the change.
pub(crate) struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Copies the snapshot into `conn` and verifies it.
    pub fn load_into(&self, conn: &mut Connection) -> Result<(), DomainError> {
        let src = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| {
                DomainError::Persistence(format!(
                    "Failed to open snapshot {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        {
            let backup = Backup::new(&src, conn)
                .map_err(|e| DomainError::Persistence(format!("Failed to start restore: {}", e)))?;
            backup
                .run_to_completion(PAGES_PER_STEP, Duration::ZERO, None)
                .map_err(|e| {
                    DomainError::Persistence(format!(
                        "Snapshot {} could not be loaded: {}",
                        self.path.display(),
                        e
                    ))
                })?;
        }

        let status: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| DomainError::Persistence(format!("Integrity check failed: {}", e)))?;
        if status != "ok" {
            return Err(DomainError::Persistence(format!(
                "Snapshot {} is corrupt: {}",
                self.path.display(),
                status
            )));
        }
        Ok(())
    }

    /// Serializes `conn` to the temp file, then atomically replaces the snapshot.
    pub fn write_from(&self, conn: &Connection) -> Result<(), DomainError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    DomainError::Persistence(format!(
                        "Failed to create snapshot directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let tmp = self.tmp_path();
        if tmp.exists() {
            fs::remove_file(&tmp)
                .map_err(|e| DomainError::Persistence(format!("Failed to clear temp: {}", e)))?;
        }

        {
            let mut dst = Connection::open(&tmp).map_err(|e| {
                DomainError::Persistence(format!("Failed to open {}: {}", tmp.display(), e))
            })?;
            let backup = Backup::new(conn, &mut dst)
                .map_err(|e| DomainError::Persistence(format!("Failed to start backup: {}", e)))?;
            backup
                .run_to_completion(PAGES_PER_STEP, Duration::ZERO, None)
                .map_err(|e| DomainError::Persistence(format!("Backup failed: {}", e)))?;
        }

        fs::rename(&tmp, &self.path).map_err(|e| {
            DomainError::Persistence(format!(
                "Failed to move snapshot into place at {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!("Snapshot written to {}", self.path.display());
        Ok(())
    }
}

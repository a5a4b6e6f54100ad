use crate::domain::{DomainError, FileWalker, MediaType, WalkEntry, WalkOutcome};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Filesystem walker producing one entry per media file below a root.
pub struct FsWalker {
    follow_links: bool,
}

impl FsWalker {
    pub fn new(follow_links: bool) -> Self {
        Self { follow_links }
    }
}

impl Default for FsWalker {
    fn default() -> Self {
        Self::new(false)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Catalog paths always use `/`, whatever the host separator is.
pub fn catalog_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        raw.into_owned()
    } else {
        raw.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

impl FileWalker for FsWalker {
    fn walk(&self, root: &Path, source_id: &str) -> Result<WalkOutcome, DomainError> {
        if !root.is_dir() {
            return Err(DomainError::Io(format!(
                "media root {} is not a directory",
                root.display()
            )));
        }

        let mut entries = Vec::new();
        let mut unreadable = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    // Without a path the error could be anywhere below the root.
                    unreadable.push(catalog_path(e.path().unwrap_or(root)));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let mime = mime_guess::from_path(entry.path()).first_or_octet_stream();
            let mime_type = mime.essence_str().to_string();
            if MediaType::from_mime(&mime_type).is_none() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("No metadata for {}: {}", entry.path().display(), e);
                    unreadable.push(catalog_path(entry.path()));
                    continue;
                }
            };
            let last_modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            entries.push(WalkEntry {
                path: catalog_path(entry.path()),
                size: metadata.len() as i64,
                mime_type,
                last_modified,
                source_id: source_id.to_string(),
            });
        }

        debug!(
            "Walked {} media files under {} ({} unreadable)",
            entries.len(),
            root.display(),
            unreadable.len()
        );
        Ok(WalkOutcome {
            entries,
            unreadable,
        })
    }
}

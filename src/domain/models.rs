use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ports::DomainError;

/// Stable record identity derived from the catalog path.
///
/// Every place that needs a file id goes through here so the hashing scheme
/// can change without touching callers.
pub fn derive_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    hex::encode(&digest[..16])
}

/// Parent directory of a `/`-separated catalog path. Top-level files live in `""`.
pub fn parent_folder(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Strips trailing separators so `a/b/` and `a/b` scope the same rows.
pub fn normalize_scope(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "audio" => Some(MediaType::Audio),
            _ => None,
        }
    }

    /// Classifies by the top-level MIME type; anything else is not media.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split('/').next() {
            Some("image") => Some(MediaType::Image),
            Some("video") => Some(MediaType::Video),
            Some("audio") => Some(MediaType::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Folder => "folder",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(ItemType::File),
            "folder" => Some(ItemType::Folder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub path: String,
    pub name: String,
    pub folder_path: String,
    pub size: i64,
    pub mime_type: String,
    pub media_type: MediaType,
    pub last_modified: i64,
    pub source_id: String,
    pub thumb_width: Option<u32>,
    pub thumb_height: Option<u32>,
    pub thumb_aspect_ratio: Option<f64>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl FileRecord {
    /// Builds a record whose identity and display fields all follow from `path`.
    pub fn new(
        path: &str,
        size: i64,
        mime_type: &str,
        media_type: MediaType,
        last_modified: i64,
        source_id: &str,
    ) -> Self {
        Self {
            id: derive_id(path),
            path: path.to_string(),
            name: file_name(path).to_string(),
            folder_path: parent_folder(path).to_string(),
            size,
            mime_type: mime_type.to_string(),
            media_type,
            last_modified,
            source_id: source_id.to_string(),
            thumb_width: None,
            thumb_height: None,
            thumb_aspect_ratio: None,
            is_favorite: false,
        }
    }

    pub fn from_walk(entry: &WalkEntry) -> Option<Self> {
        let media_type = MediaType::from_mime(&entry.mime_type)?;
        Some(Self::new(
            &entry.path,
            entry.size,
            &entry.mime_type,
            media_type,
            entry.last_modified,
            &entry.source_id,
        ))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.path.is_empty() {
            return Err(DomainError::InvalidRecord("empty path".to_string()));
        }
        if self.id != derive_id(&self.path) {
            return Err(DomainError::InvalidRecord(format!(
                "id does not match path {}",
                self.path
            )));
        }
        if self.size < 0 {
            return Err(DomainError::InvalidRecord(format!(
                "negative size for {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// One file reported by the filesystem walker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkEntry {
    pub path: String,
    pub size: i64,
    pub mime_type: String,
    pub last_modified: i64,
    pub source_id: String,
}

/// Everything one walk of a root produced. `unreadable` holds the catalog
/// paths (directories or single files) the walker could not read; what the
/// catalog has below them is unknown, not gone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkOutcome {
    pub entries: Vec<WalkEntry>,
    pub unreadable: Vec<String>,
}

impl WalkOutcome {
    /// True when `path` is, or lies below, an unreadable path.
    pub fn is_unknown(&self, path: &str) -> bool {
        self.unreadable.iter().any(|dir| {
            let dir = normalize_scope(dir);
            path == dir
                || path
                    .strip_prefix(dir)
                    .map(|rest| dir.ends_with('/') || rest.starts_with('/'))
                    .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteIds {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderAggregate {
    pub path: String,
    pub name: String,
    pub media_count: i64,
    pub cover_file_id: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailMeta {
    pub file_id: String,
    pub thumbnail_path: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_files: i64,
    pub total_images: i64,
    pub total_videos: i64,
    pub total_audio: i64,
    pub db_size_bytes: i64,
}

/// Filter and paging options shared by every file query.
///
/// `allowed_paths`: `None` is unrestricted, `Some(vec![])` denies everything,
/// otherwise a row is visible when its path or folder is at or below one of
/// the listed roots. Blank roots grant nothing; a list of only blank roots
/// denies everything.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub folder_path: Option<String>,
    pub recursive: bool,
    pub media_types: Vec<MediaType>,
    pub exclude_media_types: Vec<MediaType>,
    pub source_id: Option<String>,
    pub user_id: Option<String>,
    pub random: bool,
    pub allowed_paths: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl FileQuery {
    pub fn folder(path: &str, recursive: bool) -> Self {
        Self {
            folder_path: Some(path.to_string()),
            recursive,
            ..Default::default()
        }
    }
}

/// Result of comparing a fresh walk with the stored modification times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_is_stable_and_path_specific() {
        assert_eq!(derive_id("a/b.jpg"), derive_id("a/b.jpg"));
        assert_ne!(derive_id("a/b.jpg"), derive_id("a/c.jpg"));
        assert_eq!(derive_id("a/b.jpg").len(), 32);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_folder("a/b/c.jpg"), "a/b");
        assert_eq!(parent_folder("c.jpg"), "");
        assert_eq!(parent_folder("/c.jpg"), "/");
        assert_eq!(file_name("a/b/c.jpg"), "c.jpg");
        assert_eq!(normalize_scope("a/b/"), "a/b");
        assert_eq!(normalize_scope("/"), "/");
    }

    #[test]
    fn test_media_type_from_mime() {
        assert_eq!(MediaType::from_mime("image/jpeg"), Some(MediaType::Image));
        assert_eq!(MediaType::from_mime("video/mp4"), Some(MediaType::Video));
        assert_eq!(MediaType::from_mime("audio/flac"), Some(MediaType::Audio));
        assert_eq!(MediaType::from_mime("text/plain"), None);
    }

    #[test]
    fn test_validate_rejects_malformed_records() {
        let ok = FileRecord::new("a/b.jpg", 10, "image/jpeg", MediaType::Image, 1, "s");
        assert!(ok.validate().is_ok());

        let mut bad_id = ok.clone();
        bad_id.id = "nope".to_string();
        assert!(bad_id.validate().is_err());

        let mut empty = ok.clone();
        empty.path.clear();
        assert!(empty.validate().is_err());

        let mut negative = ok;
        negative.size = -1;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_walk_outcome_unknown_paths() {
        let outcome = WalkOutcome {
            entries: Vec::new(),
            unreadable: vec!["lib/locked/".to_string(), "lib/broken.jpg".to_string()],
        };
        assert!(outcome.is_unknown("lib/locked/a.jpg"));
        assert!(outcome.is_unknown("lib/locked/deep/b.jpg"));
        assert!(outcome.is_unknown("lib/broken.jpg"));
        assert!(!outcome.is_unknown("lib/lockedx/c.jpg"));
        assert!(!outcome.is_unknown("lib/open/d.jpg"));
    }
}

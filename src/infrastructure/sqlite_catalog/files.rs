use crate::domain::{normalize_scope, DomainError, FileRecord, MediaType, ThumbnailMeta};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::info;

use super::SqliteCatalog;

pub(crate) const FILE_COLUMNS: &str = "m.id, m.path, m.name, m.folder_path, m.size, m.mime_type, m.media_type, m.last_modified, m.source_id, m.thumb_width, m.thumb_height, m.thumb_aspect_ratio";

/// Maps the `FILE_COLUMNS` prefix of a row; `is_favorite` is read from
/// column 12 when the query selects it.
pub(crate) fn row_to_record(row: &Row) -> rusqlite::Result<FileRecord> {
    let media_type_str: String = row.get(6)?;
    let media_type = MediaType::parse(&media_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown media type {}", media_type_str).into(),
        )
    })?;
    let is_favorite: bool = row.get::<_, Option<bool>>(12).ok().flatten().unwrap_or(false);

    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        folder_path: row.get(3)?,
        size: row.get(4)?,
        mime_type: row.get(5)?,
        media_type,
        last_modified: row.get(7)?,
        source_id: row.get(8)?,
        thumb_width: row.get(9)?,
        thumb_height: row.get(10)?,
        thumb_aspect_ratio: row.get(11)?,
        is_favorite,
    })
}

/// Insert-or-update keyed by `path`. Identity columns are never rewritten and
/// thumbnail dimensions already on file survive an update that carries none.
pub(crate) fn upsert_row(conn: &Connection, record: &FileRecord) -> Result<(), DomainError> {
    record.validate()?;
    conn.execute(
        "INSERT INTO files (id, path, name, folder_path, size, mime_type, media_type, last_modified, source_id, thumb_width, thumb_height, thumb_aspect_ratio)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(path) DO UPDATE SET
            name = excluded.name,
            size = excluded.size,
            mime_type = excluded.mime_type,
            media_type = excluded.media_type,
            last_modified = excluded.last_modified,
            thumb_width = COALESCE(excluded.thumb_width, files.thumb_width),
            thumb_height = COALESCE(excluded.thumb_height, files.thumb_height),
            thumb_aspect_ratio = COALESCE(excluded.thumb_aspect_ratio, files.thumb_aspect_ratio)",
        params![
            record.id,
            record.path,
            record.name,
            record.folder_path,
            record.size,
            record.mime_type,
            record.media_type.as_str(),
            record.last_modified,
            record.source_id,
            record.thumb_width,
            record.thumb_height,
            record.thumb_aspect_ratio,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_row_by_path(
    conn: &Connection,
    path: &str,
) -> Result<Option<FileRecord>, DomainError> {
    let sql = format!("SELECT {} FROM files m WHERE m.path = ?1", FILE_COLUMNS);
    let record = conn
        .query_row(&sql, params![path], row_to_record)
        .optional()?;
    Ok(record)
}

/// Removes one file and everything that points at it. Favorites are deleted
/// outright, including rows still keyed by the old path.
pub(crate) fn delete_row_cascade(
    conn: &Connection,
    path: &str,
    id: &str,
) -> Result<usize, DomainError> {
    conn.execute(
        "DELETE FROM favorites WHERE item_type = 'file' AND item_id IN (?1, ?2)",
        params![id, path],
    )?;
    conn.execute("DELETE FROM thumbnails WHERE file_id = ?1", params![id])?;
    let deleted = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
    Ok(deleted)
}

impl SqliteCatalog {
    pub(crate) fn upsert_impl(&self, record: &FileRecord) -> Result<(), DomainError> {
        self.with_write(true, |conn| upsert_row(conn, record))
    }

    pub(crate) fn batch_insert_impl(
        &self,
        records: &[FileRecord],
        persist: bool,
    ) -> Result<(), DomainError> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_write(persist, |conn| {
            let tx = conn.transaction()?;
            for (idx, record) in records.iter().enumerate() {
                // Returning early drops `tx`, which rolls the whole batch back.
                upsert_row(&tx, record).map_err(|e| {
                    DomainError::Transaction(format!(
                        "batch insert aborted at record {} of {}: {}",
                        idx + 1,
                        records.len(),
                        e
                    ))
                })?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub(crate) fn find_by_path_impl(&self, path: &str) -> Result<Option<FileRecord>, DomainError> {
        self.with_conn(|conn| find_row_by_path(conn, path))
    }

    /// The id always comes from the row stored at `path`; a supplied `id` is
    /// only a cross-check and a mismatch deletes nothing.
    pub(crate) fn delete_by_path_impl(&self, path: &str, id: Option<&str>) -> Result<(), DomainError> {
        self.with_write(true, |conn| {
            let tx = conn.transaction()?;
            let record = find_row_by_path(&tx, path)?.ok_or(DomainError::NotFound)?;
            if let Some(expected) = id {
                if expected != record.id {
                    return Err(DomainError::InvalidRecord(format!(
                        "id {} does not belong to {}",
                        expected, path
                    )));
                }
            }
            delete_row_cascade(&tx, path, &record.id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Deletes every listed path that exists; missing paths are skipped.
    pub(crate) fn delete_files_batch_impl(
        &self,
        paths: &[String],
        persist: bool,
    ) -> Result<usize, DomainError> {
        if paths.is_empty() {
            return Ok(0);
        }
        self.with_write(persist, |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0usize;
            for path in paths {
                if let Some(record) = find_row_by_path(&tx, path)? {
                    deleted += delete_row_cascade(&tx, path, &record.id)
                        .map_err(|e| DomainError::Transaction(e.to_string()))?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    pub(crate) fn delete_by_folder_prefix_impl(&self, folder_path: &str) -> Result<usize, DomainError> {
        let scope = normalize_scope(folder_path).to_string();
        let prefix = if scope.ends_with('/') {
            scope.clone()
        } else {
            format!("{}/", scope)
        };
        let prefix_len = prefix.chars().count() as i64;

        self.with_write(true, |conn| {
            let tx = conn.transaction()?;
            let in_scope = "(folder_path = ?1 OR substr(folder_path, 1, ?2) = ?3)";

            tx.execute(
                &format!(
                    "DELETE FROM favorites WHERE item_type = 'file' AND (
                        item_id IN (SELECT id FROM files WHERE {0})
                        OR item_id IN (SELECT path FROM files WHERE {0}))",
                    in_scope
                ),
                params![scope, prefix_len, prefix],
            )?;
            tx.execute(
                "DELETE FROM favorites WHERE item_type = 'folder'
                   AND (item_id = ?1 OR substr(item_id, 1, ?2) = ?3)",
                params![scope, prefix_len, prefix],
            )?;
            tx.execute(
                &format!(
                    "DELETE FROM thumbnails WHERE file_id IN (SELECT id FROM files WHERE {})",
                    in_scope
                ),
                params![scope, prefix_len, prefix],
            )?;
            let deleted = tx.execute(
                &format!("DELETE FROM files WHERE {}", in_scope),
                params![scope, prefix_len, prefix],
            )?;
            tx.commit()?;
            info!("Removed {} records under {}", deleted, scope);
            Ok(deleted)
        })
    }

    /// Empties the file table for a full rescan. Favorites and thumbnails are
    /// kept: ids are path-derived, so they reattach when the files come back.
    pub(crate) fn clear_all_impl(&self) -> Result<(), DomainError> {
        self.with_write(true, |conn| {
            conn.execute("DELETE FROM files", [])?;
            Ok(())
        })
    }

    pub(crate) fn get_path_mtimes_impl(
        &self,
        source_id: Option<&str>,
    ) -> Result<HashMap<String, i64>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path, last_modified FROM files WHERE ?1 IS NULL OR source_id = ?1",
            )?;
            let rows = stmt.query_map(params![source_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut map = HashMap::new();
            for row in rows {
                let (path, mtime) = row?;
                map.insert(path, mtime);
            }
            Ok(map)
        })
    }

    pub(crate) fn record_thumbnail_impl(
        &self,
        file_id: &str,
        thumbnail_path: &str,
        width: u32,
        height: u32,
    ) -> Result<(), DomainError> {
        let aspect_ratio = if height > 0 {
            Some(width as f64 / height as f64)
        } else {
            None
        };
        self.with_write(true, |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE files SET thumb_width = ?2, thumb_height = ?3, thumb_aspect_ratio = ?4 WHERE id = ?1",
                params![file_id, width, height, aspect_ratio],
            )?;
            if updated == 0 {
                return Err(DomainError::NotFound);
            }
            tx.execute(
                "INSERT INTO thumbnails (file_id, thumbnail_path, generated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(file_id) DO UPDATE SET
                    thumbnail_path = excluded.thumbnail_path,
                    generated_at = excluded.generated_at",
                params![file_id, thumbnail_path, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub(crate) fn get_thumbnail_impl(&self, file_id: &str) -> Result<Option<ThumbnailMeta>, DomainError> {
        self.with_conn(|conn| {
            let meta = conn
                .query_row(
                    "SELECT file_id, thumbnail_path, generated_at FROM thumbnails WHERE file_id = ?1",
                    params![file_id],
                    |row| {
                        let generated_at_str: String = row.get(2)?;
                        let generated_at = DateTime::parse_from_rfc3339(&generated_at_str)
                            .map_err(|e| {
                                rusqlite::Error::FromSqlConversionFailure(
                                    2,
                                    rusqlite::types::Type::Text,
                                    Box::new(e),
                                )
                            })?
                            .with_timezone(&Utc);
                        Ok(ThumbnailMeta {
                            file_id: row.get(0)?,
                            thumbnail_path: row.get(1)?,
                            generated_at,
                        })
                    },
                )
                .optional()?;
            Ok(meta)
        })
    }
}

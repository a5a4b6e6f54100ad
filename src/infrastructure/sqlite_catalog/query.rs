use crate::domain::{
    normalize_scope, CatalogStats, DomainError, FileQuery, FileRecord, FolderAggregate, MediaType,
};
use rusqlite::params;
use rusqlite::types::ToSql;
use std::collections::{BTreeMap, HashSet};

use super::files::{row_to_record, FILE_COLUMNS};
use super::SqliteCatalog;

/// Parameterized WHERE clause over `files m`.
pub(crate) struct Filter {
    conditions: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Filter {
    fn push(&mut self, condition: String) {
        self.conditions.push(condition);
    }

    fn bind<T: ToSql + 'static>(&mut self, value: T) {
        self.params.push(Box::new(value));
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

/// `path` itself, and the form every descendant folder starts with.
fn scope_prefix(scope: &str) -> String {
    if scope.ends_with('/') {
        scope.to_string()
    } else {
        format!("{}/", scope)
    }
}

fn media_placeholders(types: &[MediaType]) -> String {
    types.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
}

/// The one place a `FileQuery` becomes SQL. `None` means the caller may see
/// nothing at all (`allowed_paths = Some([])`), so no query should run.
pub(crate) fn build_filter(query: &FileQuery) -> Option<Filter> {
    let mut filter = Filter {
        conditions: Vec::new(),
        params: Vec::new(),
    };

    if let Some(allowed) = &query.allowed_paths {
        if allowed.is_empty() {
            return None;
        }
        let mut alternatives = Vec::with_capacity(allowed.len());
        for root in allowed {
            let root = normalize_scope(root);
            // A blank root names no folder, so it grants nothing.
            if root.is_empty() {
                continue;
            }
            let prefix = scope_prefix(root);
            alternatives.push(
                "(m.path = ? OR m.folder_path = ? OR substr(m.folder_path, 1, ?) = ?)".to_string(),
            );
            filter.bind(root.to_string());
            filter.bind(root.to_string());
            filter.bind(prefix.chars().count() as i64);
            filter.bind(prefix);
        }
        if alternatives.is_empty() {
            return None;
        }
        filter.push(format!("({})", alternatives.join(" OR ")));
    }

    if let Some(folder) = &query.folder_path {
        let scope = normalize_scope(folder);
        if !query.recursive {
            filter.push("m.folder_path = ?".to_string());
            filter.bind(scope.to_string());
        } else if !scope.is_empty() {
            let prefix = scope_prefix(scope);
            filter.push("(m.folder_path = ? OR substr(m.folder_path, 1, ?) = ?)".to_string());
            filter.bind(scope.to_string());
            filter.bind(prefix.chars().count() as i64);
            filter.bind(prefix);
        }
    }

    if !query.media_types.is_empty() {
        filter.push(format!(
            "m.media_type IN ({})",
            media_placeholders(&query.media_types)
        ));
        for mt in &query.media_types {
            filter.bind(mt.as_str());
        }
    }

    if !query.exclude_media_types.is_empty() {
        filter.push(format!(
            "m.media_type NOT IN ({})",
            media_placeholders(&query.exclude_media_types)
        ));
        for mt in &query.exclude_media_types {
            filter.bind(mt.as_str());
        }
    }

    if let Some(source_id) = &query.source_id {
        filter.push("m.source_id = ?".to_string());
        filter.bind(source_id.clone());
    }

    Some(filter)
}

fn order_and_page(query: &FileQuery, filter: &mut Filter) -> String {
    let order = if query.random {
        "RANDOM()"
    } else {
        "m.last_modified DESC, m.path ASC"
    };
    // SQLite takes signed 64-bit bounds; clamp instead of wrapping negative.
    let limit = query
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1);
    filter.bind(limit);
    filter.bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
    format!(" ORDER BY {} LIMIT ? OFFSET ?", order)
}

impl SqliteCatalog {
    pub(crate) fn query_files_impl(&self, query: &FileQuery) -> Result<Vec<FileRecord>, DomainError> {
        let Some(mut filter) = build_filter(query) else {
            return Ok(Vec::new());
        };

        // The favorites join binds before the WHERE params, so it goes first.
        let (favorite_column, join) = match &query.user_id {
            Some(user_id) => {
                filter.params.insert(0, Box::new(user_id.clone()));
                (
                    "(fav.item_id IS NOT NULL)",
                    " LEFT JOIN favorites fav ON fav.item_type = 'file' AND fav.user_id = ? AND fav.item_id = m.id",
                )
            }
            None => ("0", ""),
        };

        let where_clause = filter.where_clause();
        let tail = order_and_page(query, &mut filter);
        let sql = format!(
            "SELECT {}, {} AS is_favorite FROM files m{}{}{}",
            FILE_COLUMNS, favorite_column, join, where_clause, tail
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(filter.param_refs().as_slice(), row_to_record)?;
            let mut files = Vec::new();
            for row in rows {
                files.push(row?);
            }
            Ok(files)
        })
    }

    pub(crate) fn count_files_impl(&self, query: &FileQuery) -> Result<i64, DomainError> {
        let Some(filter) = build_filter(query) else {
            return Ok(0);
        };
        let sql = format!("SELECT COUNT(*) FROM files m{}", filter.where_clause());
        self.with_conn(|conn| {
            let count = conn.query_row(&sql, filter.param_refs().as_slice(), |row| row.get(0))?;
            Ok(count)
        })
    }

    /// Favorites may still be keyed by path when they predate the id rekeying,
    /// so both forms match.
    pub(crate) fn query_favorite_files_impl(
        &self,
        user_id: &str,
        query: &FileQuery,
    ) -> Result<Vec<FileRecord>, DomainError> {
        let Some(mut filter) = build_filter(query) else {
            return Ok(Vec::new());
        };
        filter.push(
            "EXISTS (SELECT 1 FROM favorites fav WHERE fav.user_id = ? AND fav.item_type = 'file' AND fav.item_id IN (m.id, m.path))"
                .to_string(),
        );
        filter.bind(user_id.to_string());

        let where_clause = filter.where_clause();
        let tail = order_and_page(query, &mut filter);
        let sql = format!(
            "SELECT {}, 1 AS is_favorite FROM files m{}{}",
            FILE_COLUMNS, where_clause, tail
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(filter.param_refs().as_slice(), row_to_record)?;
            let mut files = Vec::new();
            for row in rows {
                files.push(row?);
            }
            Ok(files)
        })
    }

    /// Direct child folders of `parent_path`, each summarizing its whole subtree.
    pub(crate) fn query_folders_impl(
        &self,
        parent_path: &str,
        favorites_only: bool,
        user_id: Option<&str>,
        allowed_paths: Option<&[String]>,
    ) -> Result<Vec<FolderAggregate>, DomainError> {
        if favorites_only && user_id.is_none() {
            return Ok(Vec::new());
        }
        let scope = normalize_scope(parent_path).to_string();
        let query = FileQuery {
            folder_path: Some(scope.clone()),
            recursive: true,
            allowed_paths: allowed_paths.map(|p| p.to_vec()),
            ..Default::default()
        };
        let Some(mut filter) = build_filter(&query) else {
            return Ok(Vec::new());
        };
        filter.push("m.folder_path <> ?".to_string());
        filter.bind(scope.clone());

        // SQLite returns the bare `m.id` from the row that produced MAX().
        let sql = format!(
            "SELECT m.folder_path, COUNT(*), MAX(m.last_modified), m.id FROM files m{} GROUP BY m.folder_path",
            filter.where_clause()
        );

        let (groups, favorite_folders) = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(filter.param_refs().as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut groups = Vec::new();
            for row in rows {
                groups.push(row?);
            }

            let mut favorite_folders = HashSet::new();
            if let Some(user_id) = user_id {
                let mut stmt = conn.prepare(
                    "SELECT item_id FROM favorites WHERE user_id = ?1 AND item_type = 'folder'",
                )?;
                let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
                for row in rows {
                    favorite_folders.insert(row?);
                }
            }
            Ok((groups, favorite_folders))
        })?;

        let prefix = if scope.is_empty() {
            String::new()
        } else {
            scope_prefix(&scope)
        };

        // child path -> (count, newest mtime, cover id)
        let mut children: BTreeMap<String, (i64, i64, String)> = BTreeMap::new();
        for (folder_path, count, newest, cover_id) in groups {
            let Some(rest) = folder_path.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let child = match rest.split('/').next() {
                Some(segment) if !segment.is_empty() => format!("{}{}", prefix, segment),
                // Absolute paths below the relative root all hang off "/".
                _ => "/".to_string(),
            };
            let entry = children.entry(child).or_insert((0, i64::MIN, String::new()));
            entry.0 += count;
            if newest > entry.1 {
                entry.1 = newest;
                entry.2 = cover_id;
            }
        }

        let folders = children
            .into_iter()
            .map(|(path, (media_count, _, cover_id))| {
                let is_favorite = favorite_folders.contains(&path);
                FolderAggregate {
                    name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                    path,
                    media_count,
                    cover_file_id: Some(cover_id),
                    is_favorite,
                }
            })
            .filter(|folder| !favorites_only || folder.is_favorite)
            .collect();
        Ok(folders)
    }

    pub(crate) fn get_stats_impl(
        &self,
        allowed_paths: Option<&[String]>,
    ) -> Result<CatalogStats, DomainError> {
        let query = FileQuery {
            allowed_paths: allowed_paths.map(|p| p.to_vec()),
            ..Default::default()
        };
        let filter = build_filter(&query);

        self.with_conn(|conn| {
            let db_size_bytes: i64 = conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )?;
            let Some(filter) = filter else {
                return Ok(CatalogStats {
                    db_size_bytes,
                    ..Default::default()
                });
            };

            let sql = format!(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN m.media_type = 'image' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN m.media_type = 'video' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN m.media_type = 'audio' THEN 1 ELSE 0 END), 0)
                 FROM files m{}",
                filter.where_clause()
            );
            let stats = conn.query_row(&sql, filter.param_refs().as_slice(), |row| {
                Ok(CatalogStats {
                    total_files: row.get(0)?,
                    total_images: row.get(1)?,
                    total_videos: row.get(2)?,
                    total_audio: row.get(3)?,
                    db_size_bytes,
                })
            })?;
            Ok(stats)
        })
    }
}

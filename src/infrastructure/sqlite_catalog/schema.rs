use crate::domain::DomainError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

type MigrationFn = fn(&Connection) -> Result<(), DomainError>;

/// Ordered migration list. Versions are applied once each and recorded in
/// `schema_migrations`; never reorder or renumber an entry.
const MIGRATIONS: &[(i64, &str, MigrationFn)] = &[
    (1, "create_base_tables", create_base_tables),
    (2, "add_thumbnail_dimensions", add_thumbnail_dimensions),
    (3, "rekey_path_favorites", rekey_path_favorites),
];

pub(crate) const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Idempotent. A failing migration is logged and skipped (it stays unrecorded
/// and is retried on the next start); the catalog keeps serving with whatever
/// schema it has.
pub(crate) fn ensure_schema(conn: &mut Connection) -> Result<Vec<i64>, DomainError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| DomainError::Schema(format!("Failed to create schema_migrations: {}", e)))?;

    let mut applied = Vec::new();
    for (version, name, migrate) in MIGRATIONS {
        let already: Option<i64> = conn
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            debug!("migration {} already applied", name);
            continue;
        }

        let tx = conn.transaction()?;
        match migrate(&tx) {
            Ok(()) => {
                tx.execute(
                    "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    params![version, name, Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                info!("Applied migration {} ({})", version, name);
                applied.push(*version);
            }
            Err(e) => {
                // Dropping the transaction rolls the partial migration back.
                warn!("Migration {} ({}) failed, continuing: {}", version, name, e);
            }
        }
    }

    let recorded: i64 =
        conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))?;
    if recorded < SCHEMA_VERSION {
        warn!(
            "Catalog schema at {} of {} migrations; serving best-effort schema",
            recorded, SCHEMA_VERSION
        );
    } else {
        debug!("Catalog schema at version {}", SCHEMA_VERSION);
    }
    Ok(applied)
}

fn create_base_tables(conn: &Connection) -> Result<(), DomainError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            folder_path TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            mime_type TEXT NOT NULL DEFAULT '',
            media_type TEXT NOT NULL DEFAULT 'image',
            last_modified INTEGER NOT NULL DEFAULT 0,
            source_id TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_files_folder_path ON files(folder_path);
        CREATE INDEX IF NOT EXISTS idx_files_last_modified ON files(last_modified);
        CREATE INDEX IF NOT EXISTS idx_files_media_type ON files(media_type);
        CREATE INDEX IF NOT EXISTS idx_files_source_id ON files(source_id);

        CREATE TABLE IF NOT EXISTS favorites (
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL DEFAULT 'file',
            created_at TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (user_id, item_id, item_type)
        );
        CREATE INDEX IF NOT EXISTS idx_favorites_item_id ON favorites(item_id);

        CREATE TABLE IF NOT EXISTS thumbnails (
            file_id TEXT PRIMARY KEY,
            thumbnail_path TEXT NOT NULL,
            generated_at TEXT NOT NULL
        );",
    )
    .map_err(|e| DomainError::Schema(format!("Failed to create base tables: {}", e)))
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DomainError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// Snapshots written before migrations were tracked may already carry these.
fn add_thumbnail_dimensions(conn: &Connection) -> Result<(), DomainError> {
    for (column, decl) in [
        ("thumb_width", "INTEGER"),
        ("thumb_height", "INTEGER"),
        ("thumb_aspect_ratio", "REAL"),
    ] {
        if has_column(conn, "files", column)? {
            continue;
        }
        info!("Adding {} column to files...", column);
        conn.execute(
            &format!("ALTER TABLE files ADD COLUMN {} {}", column, decl),
            [],
        )
        .map_err(|e| DomainError::Schema(format!("Failed to add {}: {}", column, e)))?;
    }
    Ok(())
}

/// Favorites once stored the file path as `item_id`; point them at the file id.
/// A path-keyed row whose id-keyed twin already exists is a duplicate and is dropped.
fn rekey_path_favorites(conn: &Connection) -> Result<(), DomainError> {
    let rekeyed = conn.execute(
        "UPDATE OR IGNORE favorites
         SET item_id = (SELECT f.id FROM files f WHERE f.path = favorites.item_id)
         WHERE item_type = 'file'
           AND item_id NOT IN (SELECT id FROM files)
           AND item_id IN (SELECT path FROM files)",
        [],
    )?;
    let dropped = conn.execute(
        "DELETE FROM favorites
         WHERE item_type = 'file'
           AND item_id NOT IN (SELECT id FROM files)
           AND item_id IN (SELECT path FROM files)",
        [],
    )?;
    if rekeyed > 0 || dropped > 0 {
        info!(
            "Migrated {} path-keyed favorites ({} duplicates dropped)",
            rekeyed, dropped
        );
    }
    Ok(())
}

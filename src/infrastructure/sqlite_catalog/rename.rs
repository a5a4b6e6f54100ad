use crate::domain::{derive_id, file_name, parent_folder, DomainError, FileRecord};
use rusqlite::params;
use tracing::info;

use super::files::{find_row_by_path, upsert_row};
use super::SqliteCatalog;

impl SqliteCatalog {
    /// Moves a record to a new path (and therefore a new id) in one
    /// transaction, carrying its favorites and thumbnail metadata along.
    pub(crate) fn rename_impl(
        &self,
        old_path: &str,
        new_path: &str,
        new_name: &str,
    ) -> Result<FileRecord, DomainError> {
        if new_path.is_empty() {
            return Err(DomainError::InvalidRecord("empty target path".to_string()));
        }

        self.with_write(true, |conn| {
            let tx = conn.transaction()?;
            let old = find_row_by_path(&tx, old_path)?.ok_or(DomainError::NotFound)?;
            if old_path != new_path && find_row_by_path(&tx, new_path)?.is_some() {
                return Err(DomainError::Conflict(new_path.to_string()));
            }

            let new_id = derive_id(new_path);
            let renamed = FileRecord {
                id: new_id.clone(),
                path: new_path.to_string(),
                name: if new_name.is_empty() {
                    file_name(new_path).to_string()
                } else {
                    new_name.to_string()
                },
                folder_path: parent_folder(new_path).to_string(),
                is_favorite: false,
                ..old.clone()
            };

            tx.execute("DELETE FROM files WHERE path = ?1", params![old.path])?;
            upsert_row(&tx, &renamed)?;

            // Repoint favorites; a collision means the user already had the
            // target favorited, so the leftover old row is redundant.
            tx.execute(
                "UPDATE OR IGNORE favorites SET item_id = ?1
                 WHERE item_type = 'file' AND item_id IN (?2, ?3)",
                params![new_id, old.id, old.path],
            )?;
            tx.execute(
                "DELETE FROM favorites WHERE item_type = 'file' AND item_id IN (?1, ?2) AND item_id <> ?3",
                params![old.id, old.path, new_id],
            )?;

            if old.id != new_id {
                tx.execute("DELETE FROM thumbnails WHERE file_id = ?1", params![new_id])?;
                tx.execute(
                    "UPDATE thumbnails SET file_id = ?1 WHERE file_id = ?2",
                    params![new_id, old.id],
                )?;
            }

            tx.commit()
                .map_err(|e| DomainError::Transaction(e.to_string()))?;
            info!("Renamed {} -> {}", old_path, new_path);
            Ok(renamed)
        })
    }
}

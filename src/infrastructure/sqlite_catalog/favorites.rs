use crate::domain::{DomainError, FavoriteIds, ItemType};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::SqliteCatalog;

fn favorite_exists(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    item_type: ItemType,
) -> Result<bool, DomainError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM favorites WHERE user_id = ?1 AND item_id = ?2 AND item_type = ?3",
            params![user_id, item_id, item_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert_favorite(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    item_type: ItemType,
) -> Result<(), DomainError> {
    conn.execute(
        "INSERT OR IGNORE INTO favorites (user_id, item_id, item_type, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, item_id, item_type.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn delete_favorite(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    item_type: ItemType,
) -> Result<(), DomainError> {
    conn.execute(
        "DELETE FROM favorites WHERE user_id = ?1 AND item_id = ?2 AND item_type = ?3",
        params![user_id, item_id, item_type.as_str()],
    )?;
    Ok(())
}

impl SqliteCatalog {
    /// Flips the favorite and returns the new state. The check and the write
    /// happen under one lock and one transaction.
    pub(crate) fn toggle_favorite_impl(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, DomainError> {
        self.with_write(true, |conn| {
            let tx = conn.transaction()?;
            let now_favorite = if favorite_exists(&tx, user_id, item_id, item_type)? {
                delete_favorite(&tx, user_id, item_id, item_type)?;
                false
            } else {
                insert_favorite(&tx, user_id, item_id, item_type)?;
                true
            };
            tx.commit()?;
            Ok(now_favorite)
        })
    }

    pub(crate) fn add_favorite_impl(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<(), DomainError> {
        self.with_write(true, |conn| insert_favorite(conn, user_id, item_id, item_type))
    }

    pub(crate) fn remove_favorite_impl(
        &self,
        user_id: &str,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<(), DomainError> {
        self.with_write(true, |conn| delete_favorite(conn, user_id, item_id, item_type))
    }

    pub(crate) fn list_favorite_ids_impl(&self, user_id: &str) -> Result<FavoriteIds, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id, item_type FROM favorites WHERE user_id = ?1 ORDER BY created_at, item_id",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut ids = FavoriteIds::default();
            for row in rows {
                let (item_id, item_type) = row?;
                match ItemType::parse(&item_type) {
                    Some(ItemType::File) => ids.files.push(item_id),
                    Some(ItemType::Folder) => ids.folders.push(item_id),
                    None => {}
                }
            }
            Ok(ids)
        })
    }
}

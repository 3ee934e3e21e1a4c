//! Named reading lists that saved papers can be filed under.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{DeleteOutcome, PaperStore, StoreError};

const SELECT_LIST: &str = "SELECT l.id, l.name, l.description, l.owner_id, l.created_at, \
                           (SELECT COUNT(*) FROM papers p \
                            WHERE p.reading_list_id = l.id AND p.owner_id = l.owner_id) AS paper_count \
                           FROM reading_lists l";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingList {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub paper_count: i64,
    pub created_at: DateTime<Utc>,
}

impl PaperStore {
    pub async fn create_list(
        &self,
        owner_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ReadingList, StoreError> {
        let (owner_id, name, description) =
            (owner_id.to_string(), name.to_string(), description.to_string());
        self.run(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO reading_lists (name, description, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    description,
                    owner_id,
                    created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            let id = conn.last_insert_rowid();
            select_list(conn, id)?.ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        })
        .await
    }

    /// Look a list up by id regardless of owner.
    pub async fn find_list(&self, list_id: i64) -> Result<Option<ReadingList>, StoreError> {
        self.run(move |conn| select_list(conn, list_id)).await
    }

    /// Lists owned by `owner_id`, newest first.
    pub async fn lists_for_owner(&self, owner_id: &str) -> Result<Vec<ReadingList>, StoreError> {
        let owner_id = owner_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "{} WHERE l.owner_id = ?1 ORDER BY l.created_at DESC, l.id DESC",
                SELECT_LIST
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([owner_id], row_to_list)?;
            let mut lists = Vec::new();
            for row in rows {
                lists.push(row?);
            }
            Ok(lists)
        })
        .await
    }

    /// Delete a list owned by `owner_id`. Its papers stay in the library, unfiled.
    pub async fn delete_list(
        &self,
        list_id: i64,
        owner_id: &str,
    ) -> Result<DeleteOutcome, StoreError> {
        let owner_id = owner_id.to_string();
        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let removed = tx.execute(
                "DELETE FROM reading_lists WHERE id = ?1 AND owner_id = ?2",
                params![list_id, owner_id],
            )?;
            if removed == 0 {
                return Ok(DeleteOutcome::NotFoundOrForbidden);
            }
            tx.execute(
                "UPDATE papers SET reading_list_id = NULL WHERE reading_list_id = ?1",
                [list_id],
            )?;
            tx.commit()?;
            Ok(DeleteOutcome::Deleted)
        })
        .await
    }
}

fn select_list(conn: &Connection, list_id: i64) -> Result<Option<ReadingList>, StoreError> {
    let sql = format!("{} WHERE l.id = ?1", SELECT_LIST);
    Ok(conn.query_row(&sql, [list_id], row_to_list).optional()?)
}

fn row_to_list(row: &Row) -> rusqlite::Result<ReadingList> {
    let created_at: String = row.get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(ReadingList {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        owner_id: row.get("owner_id")?,
        paper_count: row.get("paper_count")?,
        created_at,
    })
}

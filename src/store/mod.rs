//! SQLite-backed library of saved papers.
//!
//! Every row is keyed by `(external_id, owner_id)`. Uniqueness is enforced by the
//! table constraint, so concurrent saves of the same pair cannot both insert.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

use crate::apis::PaperRecord;

mod reading_lists;

pub use reading_lists::ReadingList;

const DB_FILE: &str = "library.sqlite";

/// Authors are stored as one delimiter-joined column.
const AUTHOR_DELIMITER: &str = "; ";

const SELECT_COLUMNS: &str = "id, external_id, title, authors, abstract, publication_year, doi, \
                              owner_id, reading_list_id, created_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Inserted,
    AlreadyExists,
}

/// Delete does not say whether a missing row never existed or belongs to someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFoundOrForbidden,
}

/// A stored paper together with its row metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SavedPaper {
    pub row_id: i64,
    #[serde(flatten)]
    pub record: PaperRecord,
    pub reading_list_id: Option<i64>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PaperStore {
    conn: Arc<Mutex<Connection>>,
}

impl PaperStore {
    /// Open (or create) the library database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DB_FILE);
        tracing::info!("Opening library database at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            // Each statement is atomic, so a poisoned lock still guards a consistent connection.
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Insert `record` unless its `(external_id, owner_id)` pair is already stored.
    pub async fn save(
        &self,
        record: &PaperRecord,
        reading_list_id: Option<i64>,
    ) -> Result<SaveOutcome, StoreError> {
        let record = record.clone();
        self.run(move |conn| insert_paper(conn, &record, reading_list_id, Utc::now()))
            .await
    }

    pub async fn find(
        &self,
        external_id: &str,
        owner_id: &str,
    ) -> Result<Option<PaperRecord>, StoreError> {
        let (external_id, owner_id) = (external_id.to_string(), owner_id.to_string());
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM papers WHERE external_id = ?1 AND owner_id = ?2",
                SELECT_COLUMNS
            );
            let paper = conn
                .query_row(&sql, params![external_id, owner_id], row_to_saved)
                .optional()?;
            Ok(paper.map(|p| p.record))
        })
        .await
    }

    /// Whether any owner has saved `external_id`.
    pub async fn find_any_owner(&self, external_id: &str) -> Result<bool, StoreError> {
        let external_id = external_id.to_string();
        self.run(move |conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM papers WHERE external_id = ?1)",
                [external_id],
                |row| row.get::<_, bool>(0),
            )?;
            Ok(exists)
        })
        .await
    }

    /// Papers saved by `owner_id`, most recent first, optionally limited to one reading list.
    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        reading_list_id: Option<i64>,
    ) -> Result<Vec<SavedPaper>, StoreError> {
        let owner_id = owner_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM papers \
                 WHERE owner_id = ?1 AND (?2 IS NULL OR reading_list_id = ?2) \
                 ORDER BY created_at DESC, id DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![owner_id, reading_list_id], row_to_saved)?;
            let mut papers = Vec::new();
            for row in rows {
                papers.push(row?);
            }
            Ok(papers)
        })
        .await
    }

    /// Check and delete in one statement.
    pub async fn delete(
        &self,
        external_id: &str,
        owner_id: &str,
    ) -> Result<DeleteOutcome, StoreError> {
        let (external_id, owner_id) = (external_id.to_string(), owner_id.to_string());
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM papers WHERE external_id = ?1 AND owner_id = ?2",
                params![external_id, owner_id],
            )?;
            Ok(if removed == 0 {
                DeleteOutcome::NotFoundOrForbidden
            } else {
                DeleteOutcome::Deleted
            })
        })
        .await
    }
}

fn insert_paper(
    conn: &Connection,
    record: &PaperRecord,
    reading_list_id: Option<i64>,
    created_at: DateTime<Utc>,
) -> Result<SaveOutcome, StoreError> {
    let result = conn.execute(
        "INSERT INTO papers (
            external_id, title, authors, abstract, publication_year, doi,
            owner_id, reading_list_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.external_id,
            record.title,
            normalize_authors(&record.authors).join(AUTHOR_DELIMITER),
            record.abstract_text,
            record.publication_year,
            record.doi,
            record.owner_id,
            reading_list_id,
            // Fixed precision keeps lexical order equal to chronological order.
            created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    );
    match result {
        Ok(_) => Ok(SaveOutcome::Inserted),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(SaveOutcome::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

fn row_to_saved(row: &Row) -> rusqlite::Result<SavedPaper> {
    let authors: String = row.get("authors")?;
    let created_at: String = row.get("created_at")?;
    let saved_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(SavedPaper {
        row_id: row.get("id")?,
        record: PaperRecord {
            external_id: row.get("external_id")?,
            title: row.get("title")?,
            authors: split_authors(&authors),
            abstract_text: row.get("abstract")?,
            publication_year: row.get("publication_year")?,
            doi: row.get("doi")?,
            owner_id: row.get("owner_id")?,
        },
        reading_list_id: row.get("reading_list_id")?,
        saved_at,
    })
}

/// Trim author names, drop empty ones, and keep the delimiter out of them so
/// the stored column splits back into the same list.
pub fn normalize_authors(authors: &[String]) -> Vec<String> {
    authors
        .iter()
        .map(|name| name.replace(';', ",").trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn split_authors(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(AUTHOR_DELIMITER).map(str::to_string).collect()
}

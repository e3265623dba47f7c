//! SQLite persistence: documents, question records, legal chunks, the
//! embedding index and the grading tables the assembler reads.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

mod grading;
mod questions;
mod review;
mod schema;
#[cfg(test)]
mod tests;
mod vectors;

pub use questions::{DocumentKind, DocumentRecord, QuestionWrite};
pub use review::{ReviewItem, ReviewReason};
pub use schema::DB_SCHEMA_VERSION;
pub use vectors::{QueryBudget, VectorQuery};

pub const QUESTION_COLLECTION: &str = "exam_questions";
pub const LEGAL_COLLECTION: &str = "legal_chunks";

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreCounts {
    pub documents: usize,
    pub active_questions: usize,
    pub superseded_questions: usize,
    pub legal_chunks: usize,
    pub vector_entries: usize,
    pub review_queue: usize,
}

pub struct Store {
    connection: Connection,
}

impl Store {
    /// Opens (creating if needed) a writable store and brings its schema up to date.
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open database {}", db_path.display()))?;
        configure_connection(&connection)?;
        schema::ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    /// Read-only handle for retrieval and assembly; the schema must already exist.
    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| {
            format!(
                "failed to open database read-only: {}",
                db_path.display()
            )
        })?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        schema::ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            documents: count_rows(&self.connection, "SELECT COUNT(*) FROM documents")?,
            active_questions: count_rows(
                &self.connection,
                "SELECT COUNT(*) FROM exam_questions WHERE deleted_at IS NULL",
            )?,
            superseded_questions: count_rows(
                &self.connection,
                "SELECT COUNT(*) FROM exam_questions WHERE deleted_at IS NOT NULL",
            )?,
            legal_chunks: count_rows(&self.connection, "SELECT COUNT(*) FROM legal_chunks")?,
            vector_entries: count_rows(
                &self.connection,
                "SELECT COUNT(*) FROM vector_entries WHERE deleted_at IS NULL",
            )?,
            review_queue: count_rows(&self.connection, "SELECT COUNT(*) FROM review_queue")?,
        })
    }

    pub fn metadata_value(&self, key: &str) -> Result<Option<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT value FROM metadata WHERE key = ?1 LIMIT 1")?;
        let mut rows = statement.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

fn count_rows(connection: &Connection, sql: &str) -> Result<usize> {
    let count = connection
        .query_row(sql, [], |row| row.get::<_, i64>(0))
        .with_context(|| format!("failed to run count query: {sql}"))?;
    Ok(count.max(0) as usize)
}

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};

use crate::semantic::SemanticModelConfig;
use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.2.0";

pub(super) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
          doc_id TEXT PRIMARY KEY,
          kind TEXT NOT NULL,
          source_path TEXT NOT NULL,
          sha256 TEXT NOT NULL,
          page_count INTEGER NOT NULL,
          ingested_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS exam_questions (
          question_id TEXT PRIMARY KEY,
          doc_id TEXT NOT NULL,
          question_number INTEGER NOT NULL,
          source_page INTEGER NOT NULL,
          scenario TEXT NOT NULL,
          sub_scenarios_json TEXT NOT NULL,
          question_stem TEXT NOT NULL,
          options_json TEXT NOT NULL,
          correct_answer TEXT NOT NULL,
          explanation TEXT NOT NULL,
          topic TEXT NOT NULL,
          difficulty TEXT NOT NULL,
          legal_reference TEXT,
          verdict_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          deleted_at TEXT,
          FOREIGN KEY(doc_id) REFERENCES documents(doc_id)
        );

        CREATE TABLE IF NOT EXISTS legal_chunks (
          chunk_id TEXT PRIMARY KEY,
          document_id TEXT NOT NULL,
          page INTEGER NOT NULL,
          content TEXT NOT NULL,
          legal_references_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          FOREIGN KEY(document_id) REFERENCES documents(doc_id)
        );

        CREATE TABLE IF NOT EXISTS review_queue (
          review_id INTEGER PRIMARY KEY AUTOINCREMENT,
          run_id TEXT NOT NULL,
          doc_id TEXT NOT NULL,
          question_number INTEGER NOT NULL,
          source_page INTEGER NOT NULL,
          reason TEXT NOT NULL,
          detail TEXT NOT NULL,
          candidate_json TEXT NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS topic_performance (
          user_id TEXT NOT NULL,
          topic TEXT NOT NULL,
          accuracy REAL NOT NULL,
          PRIMARY KEY (user_id, topic)
        );

        CREATE TABLE IF NOT EXISTS seen_questions (
          user_id TEXT NOT NULL,
          question_id TEXT NOT NULL,
          seen_at TEXT NOT NULL,
          PRIMARY KEY (user_id, question_id)
        );
        ",
        )
        .context("failed to create core tables")?;

    ensure_column_exists(connection, "exam_questions", "legal_reference TEXT")?;
    ensure_column_exists(connection, "exam_questions", "deleted_at TEXT")?;

    ensure_embedding_schema(connection)?;

    connection.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_exam_questions_doc_number ON exam_questions(doc_id, question_number);
        CREATE INDEX IF NOT EXISTS idx_exam_questions_topic ON exam_questions(topic, deleted_at);
        CREATE INDEX IF NOT EXISTS idx_legal_chunks_document ON legal_chunks(document_id, page);
        CREATE INDEX IF NOT EXISTS idx_review_queue_doc ON review_queue(doc_id, question_number);
        ",
    )?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

fn ensure_embedding_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS embedding_models (
          model_id TEXT PRIMARY KEY,
          backend TEXT NOT NULL,
          model_name TEXT NOT NULL,
          dimensions INTEGER NOT NULL,
          normalize INTEGER NOT NULL,
          created_at TEXT NOT NULL,
          config_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vector_entries (
          collection TEXT NOT NULL,
          item_id TEXT NOT NULL,
          model_id TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          text_hash TEXT NOT NULL,
          search_text TEXT NOT NULL,
          payload_json TEXT NOT NULL,
          generated_at TEXT NOT NULL,
          deleted_at TEXT,
          PRIMARY KEY (collection, item_id, model_id),
          FOREIGN KEY (model_id) REFERENCES embedding_models(model_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_vector_entries_model ON vector_entries(collection, model_id);
        CREATE INDEX IF NOT EXISTS idx_vector_entries_model_hash ON vector_entries(model_id, text_hash);
        ",
    )?;

    Ok(())
}

pub(super) fn ensure_model_entry(connection: &Connection, model: &SemanticModelConfig) -> Result<()> {
    let config_json = serde_json::json!({
        "model_id": model.model_id,
        "model_name": model.model_name,
        "dimensions": model.dimensions,
        "normalization": model.normalization,
        "backend": model.backend,
    })
    .to_string();

    connection.execute(
        "
        INSERT INTO embedding_models(model_id, backend, model_name, dimensions, normalize, created_at, config_json)
        VALUES(?1, ?2, ?3, ?4, 1, ?5, ?6)
        ON CONFLICT(model_id) DO UPDATE SET
          backend=excluded.backend,
          model_name=excluded.model_name,
          dimensions=excluded.dimensions,
          normalize=excluded.normalize,
          config_json=excluded.config_json
        ",
        params![
            model.model_id,
            model.backend,
            model.model_name,
            model.dimensions as i64,
            now_utc_string(),
            config_json,
        ],
    )?;

    Ok(())
}

fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let Some(column_name) = column_definition.split_whitespace().next() else {
        bail!("invalid column definition: {column_definition}");
    };

    let pragma_sql = format!("PRAGMA table_info({table_name})");
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_context(|| format!("failed to inspect schema for table {table_name}"))?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let alter_sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}");
    connection
        .execute(&alter_sql, [])
        .with_context(|| format!("failed to add column {column_name} on {table_name}"))?;

    Ok(())
}

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;

use super::{schema, Store};
use crate::semantic::{
    cosine_similarity, decode_embedding_blob, embedding_text_hash, encode_embedding_blob,
    signal_tokens, token_overlap_score, SemanticModelConfig,
};
use crate::util::now_utc_string;

/// Cooperative deadline checked between rows of a scan.
#[derive(Debug, Clone, Copy)]
pub struct QueryBudget {
    deadline: Option<Instant>,
}

impl QueryBudget {
    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub item_id: String,
    pub similarity: f64,
    pub payload: Value,
}

/// Ranked hits; `timed_out` marks a scan cut short by its budget, in which
/// case `hits` ranks only the rows seen before the deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VectorQuery {
    pub hits: Vec<VectorHit>,
    pub scanned: usize,
    pub timed_out: bool,
}

impl Store {
    pub fn register_model(&self, model: &SemanticModelConfig) -> Result<()> {
        schema::ensure_model_entry(&self.connection, model)
    }

    /// Inserts or replaces one index entry outside any batch transaction.
    pub fn upsert_vector(
        &self,
        collection: &str,
        item_id: &str,
        model_id: &str,
        embedding: &[f32],
        search_text: &str,
        payload: &Value,
    ) -> Result<()> {
        write_vector(
            &self.connection,
            collection,
            item_id,
            model_id,
            embedding,
            search_text,
            payload,
        )
    }

    /// Brute-force cosine ranking over one collection. Entries whose
    /// dimension differs from the query are skipped; entries scoring below
    /// `min_similarity` are dropped.
    pub fn query_vectors(
        &self,
        collection: &str,
        model_id: &str,
        embedding: &[f32],
        k: usize,
        min_similarity: f64,
        budget: &QueryBudget,
    ) -> Result<VectorQuery> {
        let mut statement = self.connection.prepare(
            "
            SELECT item_id, embedding, embedding_dim, payload_json
            FROM vector_entries
            WHERE collection = ?1 AND model_id = ?2 AND deleted_at IS NULL
            ORDER BY item_id ASC
            ",
        )?;
        let mut rows = statement.query(params![collection, model_id])?;

        let mut query = VectorQuery::default();
        while let Some(row) = rows.next()? {
            if budget.expired() {
                query.timed_out = true;
                break;
            }
            query.scanned += 1;

            let item_id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let embedding_dim = row.get::<_, i64>(2)?.max(0) as usize;
            if embedding_dim != embedding.len() {
                continue;
            }
            let Some(stored) = decode_embedding_blob(&blob, embedding_dim) else {
                continue;
            };

            let similarity = cosine_similarity(embedding, &stored);
            if similarity < min_similarity {
                continue;
            }
            let payload_json: String = row.get(3)?;
            query.hits.push(VectorHit {
                item_id,
                similarity,
                payload: parse_payload(&payload_json),
            });
        }

        rank(&mut query.hits, k);
        Ok(query)
    }

    /// Token-overlap ranking over the stored search text; scores share the
    /// `[0, 1]` scale and the `min_similarity` cut of [`Store::query_vectors`].
    pub fn query_keywords(
        &self,
        collection: &str,
        text: &str,
        k: usize,
        min_similarity: f64,
        budget: &QueryBudget,
    ) -> Result<VectorQuery> {
        let tokens = signal_tokens(text);
        let mut query = VectorQuery::default();
        if tokens.is_empty() {
            return Ok(query);
        }

        let mut statement = self.connection.prepare(
            "
            SELECT DISTINCT item_id, search_text, payload_json
            FROM vector_entries
            WHERE collection = ?1 AND deleted_at IS NULL
            ORDER BY item_id ASC
            ",
        )?;
        let mut rows = statement.query([collection])?;

        while let Some(row) = rows.next()? {
            if budget.expired() {
                query.timed_out = true;
                break;
            }
            query.scanned += 1;

            let item_id: String = row.get(0)?;
            let search_text: String = row.get(1)?;
            let similarity = token_overlap_score(&tokens, &search_text);
            if similarity <= 0.0 || similarity < min_similarity {
                continue;
            }
            if query.hits.iter().any(|hit| hit.item_id == item_id) {
                continue;
            }
            let payload_json: String = row.get(2)?;
            query.hits.push(VectorHit {
                item_id,
                similarity,
                payload: parse_payload(&payload_json),
            });
        }

        rank(&mut query.hits, k);
        Ok(query)
    }
}

/// Inserts or replaces one index entry; `search_text` is the exact text
/// that was encoded and doubles as the keyword-fallback haystack.
pub(super) fn write_vector(
    connection: &Connection,
    collection: &str,
    item_id: &str,
    model_id: &str,
    embedding: &[f32],
    search_text: &str,
    payload: &Value,
) -> Result<()> {
    connection
        .execute(
            "
            INSERT INTO vector_entries(collection, item_id, model_id, embedding, embedding_dim, text_hash, search_text, payload_json, generated_at, deleted_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)
            ON CONFLICT(collection, item_id, model_id) DO UPDATE SET
              embedding=excluded.embedding,
              embedding_dim=excluded.embedding_dim,
              text_hash=excluded.text_hash,
              search_text=excluded.search_text,
              payload_json=excluded.payload_json,
              generated_at=excluded.generated_at,
              deleted_at=NULL
            ",
            params![
                collection,
                item_id,
                model_id,
                encode_embedding_blob(embedding),
                embedding.len() as i64,
                embedding_text_hash(search_text),
                search_text,
                payload.to_string(),
                now_utc_string(),
            ],
        )
        .with_context(|| format!("failed to upsert vector {collection}/{item_id}"))?;
    Ok(())
}

fn rank(hits: &mut Vec<VectorHit>, k: usize) {
    hits.sort_by(|left, right| {
        right
            .similarity
            .partial_cmp(&left.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.item_id.cmp(&right.item_id))
    });
    hits.truncate(k);
}

fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

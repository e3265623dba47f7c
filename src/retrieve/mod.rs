//! Similarity search over legal chunks and exam questions.
//!
//! The encoder is an external collaborator; when it fails the retriever
//! answers from a keyword scan of the same collection and flags the result
//! as degraded instead of failing the caller.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::semantic::Encoder;
use crate::store::{QueryBudget, Store, VectorQuery, LEGAL_COLLECTION, QUESTION_COLLECTION};


pub const DEFAULT_MIN_SIMILARITY: f64 = 0.2;
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Semantic,
    KeywordFallback,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::KeywordFallback => "keyword_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub item_id: String,
    pub similarity: f64,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub collection: &'static str,
    pub match_kind: MatchKind,
    /// Set when the encoder was unavailable or the time budget ran out.
    pub degraded: bool,
    pub scanned: usize,
    pub hits: Vec<SearchHit>,
    pub notes: Vec<String>,
}

pub struct Retriever<'a> {
    store: &'a Store,
    encoder: &'a dyn Encoder,
    timeout: Option<Duration>,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a Store, encoder: &'a dyn Encoder) -> Self {
        Self {
            store,
            encoder,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn search_legal(&self, text: &str, k: usize, min_similarity: f64) -> Result<SearchResults> {
        self.search(LEGAL_COLLECTION, text, k, min_similarity, None)
    }

    /// Question search; the query text is matched against question text plus
    /// options, so related questions surface through their answer space.
    pub fn search_questions(
        &self,
        text: &str,
        k: usize,
        min_similarity: f64,
        topic: Option<&str>,
    ) -> Result<SearchResults> {
        self.search(QUESTION_COLLECTION, text, k, min_similarity, topic)
    }

    fn search(
        &self,
        collection: &'static str,
        text: &str,
        k: usize,
        min_similarity: f64,
        topic: Option<&str>,
    ) -> Result<SearchResults> {
        let budget = self
            .timeout
            .map(QueryBudget::with_timeout)
            .unwrap_or_else(QueryBudget::unlimited);
        let scan_limit = if topic.is_some() { usize::MAX } else { k };
        let mut notes = Vec::<String>::new();

        let (match_kind, query) = match self.encoder.encode_checked(text) {
            Ok(embedding) => {
                let model_id = &self.encoder.model().model_id;
                let query = self.store.query_vectors(
                    collection,
                    model_id,
                    &embedding,
                    scan_limit,
                    min_similarity,
                    &budget,
                )?;
                (MatchKind::Semantic, query)
            }
            Err(err) => {
                warn!(collection, error = %err, "encoder unavailable; using keyword fallback");
                notes.push(format!("encoder unavailable: {}", err.message));
                let query =
                    self.store
                        .query_keywords(collection, text, scan_limit, min_similarity, &budget)?;
                (MatchKind::KeywordFallback, query)
            }
        };

        if query.timed_out {
            warn!(collection, scanned = query.scanned, "search budget exhausted; returning partial results");
            notes.push(format!(
                "time budget exhausted after {} entries",
                query.scanned
            ));
        }

        let results = build_results(collection, match_kind, query, k, topic, notes);
        debug!(
            collection,
            match_kind = match_kind.as_str(),
            hits = results.hits.len(),
            degraded = results.degraded,
            "search finished"
        );
        Ok(results)
    }
}

fn build_results(
    collection: &'static str,
    match_kind: MatchKind,
    query: VectorQuery,
    k: usize,
    topic: Option<&str>,
    notes: Vec<String>,
) -> SearchResults {
    let hits = query
        .hits
        .into_iter()
        .filter(|hit| {
            topic.is_none_or(|topic| {
                hit.payload
                    .get("topic")
                    .and_then(Value::as_str)
                    .is_some_and(|value| value.eq_ignore_ascii_case(topic))
            })
        })
        .take(k)
        .enumerate()
        .map(|(index, hit)| SearchHit {
            rank: index + 1,
            item_id: hit.item_id,
            similarity: hit.similarity,
            payload: hit.payload,
        })
        .collect::<Vec<SearchHit>>();

    SearchResults {
        collection,
        match_kind,
        degraded: match_kind == MatchKind::KeywordFallback || query.timed_out,
        scanned: query.scanned,
        hits,
        notes,
    }
}

/// Short display text for a hit payload.
pub fn snippet(payload: &Value, max_chars: usize) -> String {
    let text = ["content", "question_stem", "scenario"]
        .iter()
        .find_map(|key| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
        })
        .unwrap_or_default();
    let normalized = crate::semantic::normalize_whitespace(text);
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let truncated = normalized.chars().take(max_chars).collect::<String>();
    format!("{truncated}…")
}

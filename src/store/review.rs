use anyhow::{Context, Result};
use rusqlite::params;
use serde::Serialize;

use super::Store;
use crate::model::CandidateQuestion;
use crate::util::now_utc_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    Rejected,
    Unvalidated,
    RecoveryExhausted,
}

impl ReviewReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Unvalidated => "unvalidated",
            Self::RecoveryExhausted => "recovery_exhausted",
        }
    }
}

/// A question held back for manual follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub run_id: String,
    pub doc_id: String,
    pub reason: ReviewReason,
    pub detail: String,
    pub candidate: CandidateQuestion,
}

impl Store {
    pub fn enqueue_reviews(&mut self, items: &[ReviewItem]) -> Result<usize> {
        let tx = self.connection.transaction()?;
        let now = now_utc_string();
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO review_queue(run_id, doc_id, question_number, source_page, reason, detail, candidate_json, created_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
            )?;

            for item in items {
                let candidate_json = serde_json::to_string(&item.candidate)
                    .context("failed to serialize review candidate")?;
                statement.execute(params![
                    item.run_id,
                    item.doc_id,
                    item.candidate.question_number,
                    item.candidate.source_page,
                    item.reason.as_str(),
                    item.detail,
                    candidate_json,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    /// `(reason, count)` pairs for one document, most frequent first.
    pub fn review_counts(&self, doc_id: &str) -> Result<Vec<(String, usize)>> {
        let mut statement = self.connection.prepare(
            "
            SELECT reason, COUNT(*)
            FROM review_queue
            WHERE doc_id = ?1
            GROUP BY reason
            ORDER BY COUNT(*) DESC, reason ASC
            ",
        )?;

        let mut rows = statement.query([doc_id])?;
        let mut out = Vec::<(String, usize)>::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get(1)?;
            out.push((row.get(0)?, count.max(0) as usize));
        }
        Ok(out)
    }
}

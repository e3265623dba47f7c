use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::vectors::write_vector;
use super::{Store, LEGAL_COLLECTION, QUESTION_COLLECTION};
use crate::model::{
    Difficulty, ExamQuestionRecord, ExamQuestionView, LegalChunk, OptionLabel, SubScenario,
};
use crate::semantic::{legal_payload_for_embedding, question_payload_for_embedding};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Exam,
    Legal,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exam => "exam",
            Self::Legal => "legal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub kind: DocumentKind,
    pub source_path: String,
    pub sha256: String,
    pub page_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuestionWrite {
    pub persisted: usize,
    pub superseded: usize,
}

impl Store {
    pub fn upsert_document(&self, document: &DocumentRecord) -> Result<()> {
        self.connection
            .execute(
                "
            INSERT INTO documents(doc_id, kind, source_path, sha256, page_count, ingested_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(doc_id) DO UPDATE SET
              kind=excluded.kind,
              source_path=excluded.source_path,
              sha256=excluded.sha256,
              page_count=excluded.page_count,
              ingested_at=excluded.ingested_at
            ",
                params![
                    document.doc_id,
                    document.kind.as_str(),
                    document.source_path,
                    document.sha256,
                    document.page_count,
                    now_utc_string(),
                ],
            )
            .with_context(|| format!("failed to upsert document {}", document.doc_id))?;
        Ok(())
    }

    /// Writes accepted questions and their index entries in one transaction.
    ///
    /// Any active record for the same `(doc_id, question_number)` under a
    /// different id is soft-deleted along with its index entry; rows are
    /// never updated in place otherwise.
    pub fn persist_questions(
        &mut self,
        records: &[ExamQuestionRecord],
        model_id: &str,
    ) -> Result<QuestionWrite> {
        let tx = self.connection.transaction()?;
        let mut write = QuestionWrite::default();
        let now = now_utc_string();

        for record in records {
            write.superseded += supersede_question(&tx, record, &now)?;
            insert_question(&tx, record, &now)?;

            let search_text = question_payload_for_embedding(&record.question)
                .unwrap_or_else(|| record.question.question_text().to_string());
            let payload = serde_json::to_value(record.view())
                .context("failed to serialize question payload")?;
            write_vector(
                &tx,
                QUESTION_COLLECTION,
                &record.question_id,
                model_id,
                &record.embedding,
                &search_text,
                &payload,
            )?;
            write.persisted += 1;
        }

        tx.commit()?;
        Ok(write)
    }

    /// Every question that has not been superseded, answer withheld.
    pub fn active_questions(&self) -> Result<Vec<ExamQuestionView>> {
        let mut statement = self.connection.prepare(
            "
            SELECT
              question_id,
              question_number,
              scenario,
              sub_scenarios_json,
              question_stem,
              options_json,
              topic,
              difficulty,
              legal_reference
            FROM exam_questions
            WHERE deleted_at IS NULL
            ORDER BY question_id ASC
            ",
        )?;

        let mut rows = statement.query([])?;
        let mut out = Vec::<ExamQuestionView>::new();
        while let Some(row) = rows.next()? {
            let question_id: String = row.get(0)?;
            let sub_scenarios_json: String = row.get(3)?;
            let options_json: String = row.get(5)?;
            let difficulty: String = row.get(7)?;

            let sub_scenarios: Vec<SubScenario> = serde_json::from_str(&sub_scenarios_json)
                .with_context(|| format!("invalid sub-scenarios for {question_id}"))?;
            let options: BTreeMap<OptionLabel, String> = serde_json::from_str(&options_json)
                .with_context(|| format!("invalid options for {question_id}"))?;
            let difficulty = Difficulty::parse(&difficulty)
                .with_context(|| format!("invalid difficulty {difficulty} for {question_id}"))?;

            out.push(ExamQuestionView {
                question_number: row.get(1)?,
                scenario: row.get(2)?,
                sub_scenarios,
                question_stem: row.get(4)?,
                options,
                topic: row.get(6)?,
                difficulty,
                legal_reference: row.get(8)?,
                question_id,
            });
        }

        Ok(out)
    }

    pub fn persist_legal_chunks(&mut self, chunks: &[LegalChunk], model_id: &str) -> Result<usize> {
        let tx = self.connection.transaction()?;
        let now = now_utc_string();

        for chunk in chunks {
            let references_json = serde_json::to_string(&chunk.legal_references)?;
            tx.execute(
                "
                INSERT INTO legal_chunks(chunk_id, document_id, page, content, legal_references_json, created_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(chunk_id) DO UPDATE SET
                  document_id=excluded.document_id,
                  page=excluded.page,
                  content=excluded.content,
                  legal_references_json=excluded.legal_references_json
                ",
                params![
                    chunk.chunk_id,
                    chunk.document_id,
                    chunk.page,
                    chunk.content,
                    references_json,
                    now,
                ],
            )
            .with_context(|| format!("failed to write legal chunk {}", chunk.chunk_id))?;

            let search_text =
                legal_payload_for_embedding(&chunk.content).unwrap_or_default();
            let payload = serde_json::json!({
                "chunk_id": chunk.chunk_id,
                "document_id": chunk.document_id,
                "page": chunk.page,
                "content": chunk.content,
                "legal_references": chunk.legal_references,
            });
            write_vector(
                &tx,
                LEGAL_COLLECTION,
                &chunk.chunk_id,
                model_id,
                &chunk.embedding,
                &search_text,
                &payload,
            )?;
        }

        tx.commit()?;
        Ok(chunks.len())
    }
}

fn supersede_question(
    connection: &Connection,
    record: &ExamQuestionRecord,
    now: &str,
) -> Result<usize> {
    let question_number = record.question.question_number;
    connection.execute(
        "
        UPDATE vector_entries
        SET deleted_at = ?1
        WHERE collection = ?2
          AND deleted_at IS NULL
          AND item_id IN (
            SELECT question_id FROM exam_questions
            WHERE doc_id = ?3 AND question_number = ?4 AND question_id <> ?5
          )
        ",
        params![
            now,
            QUESTION_COLLECTION,
            record.doc_id,
            question_number,
            record.question_id
        ],
    )?;

    let superseded = connection.execute(
        "
        UPDATE exam_questions
        SET deleted_at = ?1
        WHERE doc_id = ?2 AND question_number = ?3 AND question_id <> ?4 AND deleted_at IS NULL
        ",
        params![now, record.doc_id, question_number, record.question_id],
    )?;

    Ok(superseded)
}

fn insert_question(connection: &Connection, record: &ExamQuestionRecord, now: &str) -> Result<()> {
    let question = &record.question;
    let Some(answer) = question.correct_answer else {
        anyhow::bail!("question {} has no answer", record.question_id);
    };

    connection
        .execute(
            "
        INSERT INTO exam_questions(
          question_id, doc_id, question_number, source_page, scenario, sub_scenarios_json,
          question_stem, options_json, correct_answer, explanation, topic, difficulty,
          legal_reference, verdict_json, created_at, deleted_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL)
        ON CONFLICT(question_id) DO UPDATE SET
          explanation=excluded.explanation,
          topic=excluded.topic,
          difficulty=excluded.difficulty,
          legal_reference=excluded.legal_reference,
          verdict_json=excluded.verdict_json,
          deleted_at=NULL
        ",
            params![
                record.question_id,
                record.doc_id,
                question.question_number,
                question.source_page,
                question.scenario,
                serde_json::to_string(&question.sub_scenarios)?,
                question.question_stem,
                serde_json::to_string(&question.options)?,
                answer.as_str(),
                record.explanation,
                record.topic,
                record.difficulty.as_str(),
                record.legal_reference,
                serde_json::to_string(&record.verdict)?,
                now,
            ],
        )
        .with_context(|| format!("failed to write question {}", record.question_id))?;

    Ok(())
}

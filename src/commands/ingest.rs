use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cli::IngestArgs;
use crate::commands::{derive_doc_id, report_dir, resolve_db_path, write_semantic_model_config_lockfile};
use crate::error::{PipelineError, ServiceError};
use crate::extract::Extractor;
use crate::model::{
    page_contexts, CandidateQuestion, ExamQuestionRecord, Page, QuestionMeta, ValidationOutcome,
    ValidationVerdict,
};
use crate::ocr::{load_pages, PageLoadConfig, PageProvenance, TesseractOcr};
use crate::semantic::{question_payload_for_embedding, resolve_model_config, Encoder, LocalHashEncoder};
use crate::store::{DocumentKind, DocumentRecord, ReviewItem, ReviewReason, Store};
use crate::throttle::RetryPolicy;
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};
use crate::validate::{
    CommandJudge, QuestionValidation, ValidationMode, Validator, ValidatorConfig, JUDGE_SERVICE,
};

#[cfg(test)]
mod tests;

pub(super) const REPORT_PREFIX: &str = "ingest_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounts {
    pub pages_total: usize,
    pub pages_failed: usize,
    pub ocr_pages: usize,
    pub extracted: usize,
    pub incomplete: usize,
    pub valid: usize,
    pub context_recovered: usize,
    pub rejected: usize,
    pub unvalidated: usize,
    pub persisted: usize,
    pub superseded: usize,
    pub review_enqueued: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFailure {
    pub question_number: u32,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub report_version: u32,
    pub run_id: String,
    pub doc_id: String,
    pub source_path: String,
    pub source_sha256: String,
    pub started_at: String,
    pub completed_at: String,
    pub validation_mode: String,
    pub confidence_threshold: f64,
    pub context_radius: u32,
    pub model_id: String,
    pub db_path: String,
    pub counts: IngestCounts,
    pub failures: Vec<QuestionFailure>,
    pub page_provenance: Vec<PageProvenance>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PendingReview {
    pub reason: ReviewReason,
    pub detail: String,
    pub candidate: CandidateQuestion,
}

/// Everything one document produced before anything is written.
#[derive(Debug, Default)]
pub struct DocumentOutcome {
    pub records: Vec<ExamQuestionRecord>,
    pub reviews: Vec<PendingReview>,
    pub counts: IngestCounts,
    pub failures: Vec<QuestionFailure>,
}

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));
    let doc_id = derive_doc_id(&args.path, args.doc_id.as_deref())?;
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let report_path = args.report_path.clone().unwrap_or_else(|| {
        report_dir(&args.cache_root).join(format!(
            "{REPORT_PREFIX}{}_{doc_id}.json",
            utc_compact_string(started_ts)
        ))
    });

    ensure_directory(&args.cache_root)?;
    if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    info!(
        path = %args.path.display(),
        doc_id = %doc_id,
        run_id = %run_id,
        "starting ingest"
    );

    let retry = RetryPolicy {
        max_retries: args.max_retries,
        base_delay: Duration::from_millis(args.retry_base_delay_ms),
        ..RetryPolicy::default()
    };
    let load_config = PageLoadConfig {
        ocr_mode: args.ocr_mode,
        ocr_min_text_chars: args.ocr_min_text_chars,
        max_pages: args.max_pages,
        retry,
        ocr_min_interval: Duration::from_millis(args.ocr_min_interval_ms),
    };
    let ocr = TesseractOcr::new(args.ocr_lang.as_str());
    let document = load_pages(&args.path, &load_config, Some(&ocr))?;
    let source_sha256 = sha256_file(&args.path)?;

    let mode = match &args.judge_command {
        Some(program) => ValidationMode::Semantic(Arc::new(CommandJudge::new(
            program.as_str(),
            args.judge_args.clone(),
        ))),
        None => ValidationMode::BasicOnly,
    };
    let validator = Validator::new(
        mode,
        ValidatorConfig {
            confidence_threshold: args.confidence_threshold,
            context_radius: args.context_radius,
            retry,
            judge_min_interval: Duration::from_millis(args.judge_min_interval_ms),
        },
        Arc::new(Extractor::new()?),
    );
    let encoder = LocalHashEncoder::new(resolve_model_config(&args.model_id));
    let meta = QuestionMeta {
        topic: args.topic.clone(),
        difficulty: args.difficulty.into(),
        legal_reference: args.legal_reference.clone(),
    };

    let mut outcome = process_pages(
        &doc_id,
        &document.pages,
        &validator,
        &encoder,
        &meta,
        args.workers,
        args.search_adjacent,
    )?;
    outcome.counts.pages_failed = document.failed_pages.len();
    outcome.counts.ocr_pages = document.ocr_page_count;

    let mut store = Store::open(&db_path)?;
    store.upsert_document(&DocumentRecord {
        doc_id: doc_id.clone(),
        kind: DocumentKind::Exam,
        source_path: args.path.display().to_string(),
        sha256: source_sha256.clone(),
        page_count: document.pages.len() as u32,
    })?;
    store.register_model(encoder.model())?;
    write_semantic_model_config_lockfile(&args.cache_root, encoder.model())?;

    let written = store.persist_questions(&outcome.records, &encoder.model().model_id)?;
    outcome.counts.persisted = written.persisted;
    outcome.counts.superseded = written.superseded;

    let reviews = outcome
        .reviews
        .iter()
        .map(|review| ReviewItem {
            run_id: run_id.clone(),
            doc_id: doc_id.clone(),
            reason: review.reason,
            detail: review.detail.clone(),
            candidate: review.candidate.clone(),
        })
        .collect::<Vec<ReviewItem>>();
    outcome.counts.review_enqueued = store.enqueue_reviews(&reviews)?;
    for (reason, pending) in store.review_counts(&doc_id)? {
        info!(doc_id = %doc_id, reason = %reason, pending, "review queue");
    }

    let report = IngestReport {
        report_version: 1,
        run_id,
        doc_id,
        source_path: args.path.display().to_string(),
        source_sha256,
        started_at,
        completed_at: now_utc_string(),
        validation_mode: validator.mode().as_str().to_string(),
        confidence_threshold: args.confidence_threshold,
        context_radius: args.context_radius,
        model_id: encoder.model().model_id.clone(),
        db_path: db_path.display().to_string(),
        counts: outcome.counts,
        failures: outcome.failures,
        page_provenance: document.provenance,
        warnings: document.warnings,
    };
    write_json_pretty(&report_path, &report)?;

    info!(path = %report_path.display(), "wrote ingest report");
    info!(
        doc_id = %report.doc_id,
        pages = report.counts.pages_total,
        extracted = report.counts.extracted,
        valid = report.counts.valid,
        context_recovered = report.counts.context_recovered,
        rejected = report.counts.rejected,
        unvalidated = report.counts.unvalidated,
        persisted = report.counts.persisted,
        "ingest completed"
    );

    Ok(())
}

/// Extracts, validates and embeds one document's questions.
///
/// Validation fans out over a pool of `workers` threads. Per-question failures
/// land in the outcome's failures and reviews; only pool setup can fail here.
pub fn process_pages(
    doc_id: &str,
    pages: &[Page],
    validator: &Validator,
    encoder: &dyn Encoder,
    meta: &QuestionMeta,
    workers: usize,
    search_adjacent: bool,
) -> Result<DocumentOutcome> {
    let extraction = validator.extractor().extract(pages);
    let contexts = page_contexts(pages);

    for diagnostic in &extraction.incomplete {
        warn!(doc_id, error = %diagnostic, "incomplete extraction");
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("failed to build validation worker pool")?;
    let validations = pool.install(|| {
        extraction
            .candidates
            .par_iter()
            .map(|candidate| {
                validator.validate(
                    candidate,
                    extraction.answer_key.get(&candidate.question_number),
                    search_adjacent,
                    Some(&contexts),
                )
            })
            .collect::<Vec<QuestionValidation>>()
    });

    debug!(
        doc_id,
        candidates = validations.len(),
        accepted = validations
            .iter()
            .filter(|validation| validation.outcome.is_accepted())
            .count(),
        "validation pass finished"
    );

    let mut outcome = DocumentOutcome {
        counts: IngestCounts {
            pages_total: pages.len(),
            extracted: extraction.candidates.len(),
            incomplete: extraction.incomplete.len(),
            ..IngestCounts::default()
        },
        ..DocumentOutcome::default()
    };

    for validation in validations {
        let question_number = validation.question_number;
        match &validation.outcome {
            ValidationOutcome::Accepted(verdict) => {
                let explanation = extraction
                    .answer_key
                    .get(&question_number)
                    .map(|entry| entry.explanation.clone())
                    .unwrap_or_default();
                match build_record(
                    doc_id,
                    &validation.candidate,
                    explanation,
                    verdict,
                    encoder,
                    meta,
                ) {
                    Ok(record) => {
                        outcome.counts.valid += 1;
                        if validation.recovered() {
                            outcome.counts.context_recovered += 1;
                        }
                        outcome.records.push(record);
                    }
                    Err(err) => {
                        outcome.counts.unvalidated += 1;
                        outcome.push_failure(ReviewReason::Unvalidated, &err, validation.candidate);
                    }
                }
            }
            ValidationOutcome::Rejected(verdict) => {
                outcome.counts.rejected += 1;
                let reason = match &validation.error {
                    Some(PipelineError::RecoveryExhausted { .. }) => ReviewReason::RecoveryExhausted,
                    _ => ReviewReason::Rejected,
                };
                let err = validation.error.clone().unwrap_or_else(|| {
                    PipelineError::BasicValidationFailed {
                        question_number,
                        issues: verdict.issues.clone(),
                    }
                });
                outcome.push_failure(reason, &err, validation.candidate);
            }
            ValidationOutcome::Unvalidated {
                attempts,
                last_error,
            } => {
                outcome.counts.unvalidated += 1;
                let err = validation.error.clone().unwrap_or_else(|| {
                    PipelineError::ExternalService(ServiceError::new(
                        JUDGE_SERVICE,
                        format!("{last_error} (after {attempts} attempts)"),
                    ))
                });
                outcome.push_failure(ReviewReason::Unvalidated, &err, validation.candidate);
            }
        }
    }

    Ok(outcome)
}

impl DocumentOutcome {
    fn push_failure(&mut self, reason: ReviewReason, err: &PipelineError, candidate: CandidateQuestion) {
        self.failures.push(QuestionFailure {
            question_number: candidate.question_number,
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        self.reviews.push(PendingReview {
            reason,
            detail: err.to_string(),
            candidate,
        });
    }
}

fn build_record(
    doc_id: &str,
    candidate: &CandidateQuestion,
    explanation: String,
    verdict: &ValidationVerdict,
    encoder: &dyn Encoder,
    meta: &QuestionMeta,
) -> Result<ExamQuestionRecord, PipelineError> {
    let embedding = match question_payload_for_embedding(candidate) {
        Some(payload) => encoder.encode_checked(&payload)?,
        None => Vec::new(),
    };
    ExamQuestionRecord::from_accepted(
        doc_id,
        candidate.clone(),
        explanation,
        verdict.clone(),
        embedding,
        meta,
    )
}

use super::*;
use crate::model::OptionLabel;
use crate::semantic::{embed_text_local, SemanticModelConfig, ENCODER_SERVICE};
use crate::validate::{Judge, JudgeRequest, JudgeVerdict};

const MOCK_EXAM: [&str; 4] = [
    "5. A tenant paid rent late twice. Which of the following is correct?\n\
A. The landlord may terminate at once.\n\
B. The tenant owes interest only.\n\
C. The lease renews automatically.\n\
D. The deposit is forfeited.\n\
E. Nothing follows.\n\
6. A buyer inspected the goods. What is the effect of the inspection?\n\
A. Risk passes.\nB. Title passes.\nC. Nothing changes.\nD. The price falls.\nE. The sale is void.\n",
    "7. Kim leased a warehouse to Lee for two years. Which of the following is correct?\n",
    "A. Lee may assign the lease freely.\n\
B. Kim must repair ordinary wear.\n\
C. Lee has a right of first refusal.\n\
D. The lease is void.\n\
E. None of the above.\n\
8. A buyer paid a deposit. What is the effect of the deposit?\n\
A. It is a penalty.\nB. It is earnest money.\nC. It is a loan.\nD. It is rent.\nE. It is a gift.\n",
    "Answer Key\n7. C Lee holds the statutory right.\n8. B Deposits are earnest money.\n",
];

fn pages() -> Vec<Page> {
    MOCK_EXAM
        .iter()
        .enumerate()
        .map(|(index, text)| Page::new(index as u32 + 1, *text))
        .collect()
}

fn meta() -> QuestionMeta {
    QuestionMeta {
        topic: "lease".to_string(),
        difficulty: crate::model::Difficulty::Medium,
        legal_reference: Some("Article 618".to_string()),
    }
}

fn validator(mode: ValidationMode) -> Validator {
    Validator::new(
        mode,
        ValidatorConfig {
            retry: RetryPolicy {
                max_retries: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            ..ValidatorConfig::default()
        },
        Arc::new(Extractor::new().expect("marker patterns compile")),
    )
}

struct DownJudge;

impl Judge for DownJudge {
    fn evaluate(&self, _request: &JudgeRequest) -> Result<JudgeVerdict, ServiceError> {
        Err(ServiceError::new(JUDGE_SERVICE, "503 service unavailable"))
    }
}

#[test]
fn keyed_questions_persist_and_unkeyed_ones_go_to_review() {
    let outcome = process_pages(
        "mock",
        &pages(),
        &validator(ValidationMode::BasicOnly),
        &LocalHashEncoder::default(),
        &meta(),
        2,
        true,
    )
    .expect("pipeline runs");

    assert_eq!(outcome.counts.pages_total, 4);
    assert_eq!(outcome.counts.extracted, 4);
    assert_eq!(outcome.counts.incomplete, 2);
    assert_eq!(outcome.counts.valid, 2);
    assert_eq!(outcome.counts.rejected, 2);
    assert_eq!(outcome.counts.unvalidated, 0);

    let numbers = outcome
        .records
        .iter()
        .map(|record| record.question.question_number)
        .collect::<Vec<u32>>();
    assert_eq!(numbers, vec![7, 8]);
    assert!(outcome.records[0].question_id.starts_with("q-mock-007-"));
    assert_eq!(outcome.records[0].question.correct_answer, Some(OptionLabel::C));
    assert_eq!(outcome.records[0].explanation, "Lee holds the statutory right.");
    assert_eq!(outcome.records[0].embedding.len(), 1024);
    assert_eq!(outcome.records[0].legal_reference.as_deref(), Some("Article 618"));

    assert!(outcome
        .reviews
        .iter()
        .all(|review| review.reason == ReviewReason::RecoveryExhausted));
    assert_eq!(
        outcome
            .failures
            .iter()
            .map(|failure| (failure.question_number, failure.kind.as_str()))
            .collect::<Vec<(u32, &str)>>(),
        vec![(5, "recovery_exhausted"), (6, "recovery_exhausted")]
    );
}

#[test]
fn without_adjacent_search_rejections_are_plain() {
    let outcome = process_pages(
        "mock",
        &pages(),
        &validator(ValidationMode::BasicOnly),
        &LocalHashEncoder::default(),
        &meta(),
        1,
        false,
    )
    .expect("pipeline runs");

    assert_eq!(outcome.counts.rejected, 2);
    assert!(outcome
        .reviews
        .iter()
        .all(|review| review.reason == ReviewReason::Rejected));
    assert!(outcome
        .failures
        .iter()
        .all(|failure| failure.kind == "basic_validation_failed"));
}

#[test]
fn judge_outage_marks_questions_unvalidated() {
    let outcome = process_pages(
        "mock",
        &pages(),
        &validator(ValidationMode::Semantic(Arc::new(DownJudge))),
        &LocalHashEncoder::default(),
        &meta(),
        2,
        true,
    )
    .expect("pipeline runs despite the judge");

    assert_eq!(outcome.counts.valid, 0);
    assert_eq!(outcome.counts.unvalidated, 2);
    assert_eq!(outcome.counts.rejected, 2);
    assert!(outcome.records.is_empty());
    assert_eq!(
        outcome
            .reviews
            .iter()
            .filter(|review| review.reason == ReviewReason::Unvalidated)
            .count(),
        2
    );
}

/// Claims the default model but emits 256-entry vectors.
struct MisconfiguredEncoder {
    model: SemanticModelConfig,
}

impl Encoder for MisconfiguredEncoder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(embed_text_local(text, 256))
    }
}

#[test]
fn embeddings_of_the_wrong_width_are_not_persisted() {
    let encoder = MisconfiguredEncoder {
        model: resolve_model_config("local-hash-1024-v1"),
    };
    let outcome = process_pages(
        "mock",
        &pages(),
        &validator(ValidationMode::BasicOnly),
        &encoder,
        &meta(),
        2,
        true,
    )
    .expect("pipeline runs");

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.counts.valid, 0);
    assert_eq!(outcome.counts.unvalidated, 2);
    assert_eq!(
        outcome
            .failures
            .iter()
            .filter(|failure| failure.kind == "external_service_error")
            .map(|failure| failure.question_number)
            .collect::<Vec<u32>>(),
        vec![7, 8]
    );
    assert!(outcome
        .failures
        .iter()
        .filter(|failure| failure.kind == "external_service_error")
        .all(|failure| failure.message.starts_with(ENCODER_SERVICE)));
}

#[test]
fn reingesting_the_same_document_is_idempotent() {
    let encoder = LocalHashEncoder::default();
    let mut store = Store::open_in_memory().expect("in-memory store");
    store.register_model(encoder.model()).expect("model registered");

    for _ in 0..2 {
        let outcome = process_pages(
            "mock",
            &pages(),
            &validator(ValidationMode::BasicOnly),
            &encoder,
            &meta(),
            2,
            true,
        )
        .expect("pipeline runs");
        let written = store
            .persist_questions(&outcome.records, &encoder.model().model_id)
            .expect("questions written");
        assert_eq!(written.persisted, 2);
        assert_eq!(written.superseded, 0);
    }

    assert_eq!(store.active_questions().expect("pool read").len(), 2);
}

#[test]
fn report_survives_a_round_trip_through_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("reports").join("ingest_20240101T000000Z_mock.json");
    let report = IngestReport {
        report_version: 1,
        run_id: "run-20240101T000000Z".to_string(),
        doc_id: "mock".to_string(),
        source_path: "mock.txt".to_string(),
        source_sha256: String::new(),
        started_at: "2024-01-01T00:00:00Z".to_string(),
        completed_at: "2024-01-01T00:00:01Z".to_string(),
        validation_mode: "basic_only".to_string(),
        confidence_threshold: 0.7,
        context_radius: 1,
        model_id: "local-hash-1024-v1".to_string(),
        db_path: "exam_corpus.sqlite".to_string(),
        counts: IngestCounts {
            extracted: 4,
            valid: 2,
            ..IngestCounts::default()
        },
        failures: Vec::new(),
        page_provenance: Vec::new(),
        warnings: vec!["OCR failed for mock page 3".to_string()],
    };

    write_json_pretty(&path, &report).expect("report written");
    let loaded: IngestReport = crate::util::read_json(&path).expect("report read");

    assert_eq!(loaded.counts, report.counts);
    assert_eq!(loaded.warnings, report.warnings);
}

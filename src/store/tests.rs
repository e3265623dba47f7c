use std::time::Duration;

use rusqlite::params;
use serde_json::json;

use super::*;
use crate::model::{
    CandidateQuestion, Difficulty, ExamQuestionRecord, LegalChunk, OptionLabel, QuestionMeta,
    ValidationVerdict,
};
use crate::semantic::{question_payload_for_embedding, Encoder, LocalHashEncoder};

fn store_with_document(doc_id: &str) -> Store {
    let store = Store::open_in_memory().expect("in-memory store");
    store
        .register_model(LocalHashEncoder::default().model())
        .expect("model registered");
    store
        .upsert_document(&DocumentRecord {
            doc_id: doc_id.to_string(),
            kind: DocumentKind::Exam,
            source_path: format!("{doc_id}.txt"),
            sha256: "0".repeat(64),
            page_count: 3,
        })
        .expect("document written");
    store
}

fn candidate(question_number: u32, stem: &str) -> CandidateQuestion {
    let mut question = CandidateQuestion::empty(question_number, 1);
    question.question_stem = stem.to_string();
    for label in OptionLabel::ALL {
        question
            .options
            .insert(label, format!("{stem} option {label}"));
    }
    question.with_answer(Some(OptionLabel::A))
}

fn record(doc_id: &str, question_number: u32, stem: &str, topic: &str) -> ExamQuestionRecord {
    let question = candidate(question_number, stem);
    let payload = question_payload_for_embedding(&question).expect("complete question");
    let embedding = LocalHashEncoder::default()
        .encode(&payload)
        .expect("local encoder never fails");
    ExamQuestionRecord::from_accepted(
        doc_id,
        question,
        "because".to_string(),
        ValidationVerdict::basic_pass(),
        embedding,
        &QuestionMeta {
            topic: topic.to_string(),
            difficulty: Difficulty::Medium,
            legal_reference: Some("Civil Act Article 618".to_string()),
        },
    )
    .expect("record accepted")
}

fn model_id() -> String {
    LocalHashEncoder::default().model().model_id.clone()
}

#[test]
fn persisted_questions_come_back_without_answers() {
    let mut store = store_with_document("exam-2024");
    let records = vec![
        record("exam-2024", 1, "What is a lease?", "lease"),
        record("exam-2024", 2, "What is a lien?", "security"),
    ];

    let write = store
        .persist_questions(&records, &model_id())
        .expect("questions written");
    assert_eq!(write, QuestionWrite { persisted: 2, superseded: 0 });

    let views = store.active_questions().expect("questions read");
    assert_eq!(views.len(), 2);
    let lease = views
        .iter()
        .find(|view| view.topic == "lease")
        .expect("lease question stored");
    assert_eq!(lease.question_id, records[0].question_id);
    assert_eq!(lease.options.len(), 5);
    assert_eq!(lease.difficulty, Difficulty::Medium);
    assert_eq!(lease.legal_reference.as_deref(), Some("Civil Act Article 618"));

    let counts = store.counts().expect("counts");
    assert_eq!(counts.active_questions, 2);
    assert_eq!(counts.vector_entries, 2);
    assert_eq!(counts.documents, 1);
}

#[test]
fn corrected_question_supersedes_the_previous_record() {
    let mut store = store_with_document("exam-2024");
    let original = record("exam-2024", 7, "What is a lease?", "lease");
    let corrected = record("exam-2024", 7, "What is a sublease?", "lease");
    assert_ne!(original.question_id, corrected.question_id);

    store
        .persist_questions(std::slice::from_ref(&original), &model_id())
        .expect("original written");
    let write = store
        .persist_questions(std::slice::from_ref(&corrected), &model_id())
        .expect("correction written");

    assert_eq!(write.superseded, 1);
    let views = store.active_questions().expect("questions read");
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].question_id, corrected.question_id);

    let counts = store.counts().expect("counts");
    assert_eq!(counts.superseded_questions, 1);
    assert_eq!(counts.vector_entries, 1);
}

#[test]
fn re_persisting_an_identical_question_is_idempotent() {
    let mut store = store_with_document("exam-2024");
    let same = record("exam-2024", 3, "What is a tort?", "torts");

    store
        .persist_questions(std::slice::from_ref(&same), &model_id())
        .expect("first write");
    let write = store
        .persist_questions(std::slice::from_ref(&same), &model_id())
        .expect("second write");

    assert_eq!(write.superseded, 0);
    assert_eq!(store.counts().expect("counts").active_questions, 1);
}

#[test]
fn question_ids_follow_the_document_number_hash_layout() {
    let first = record("exam-2024", 7, "What is a lease?", "lease");
    let parts = first.question_id.split('-').collect::<Vec<&str>>();

    assert!(first.question_id.starts_with("q-exam-2024-007-"));
    assert_eq!(parts.last().map(|hash| hash.len()), Some(8));
    assert_eq!(first.question_id, record("exam-2024", 7, "What is a lease?", "x").question_id);
}

#[test]
fn incomplete_candidates_cannot_become_records() {
    let mut question = candidate(4, "What is a lien?");
    question.options.remove(&OptionLabel::D);

    let result = ExamQuestionRecord::from_accepted(
        "exam-2024",
        question,
        String::new(),
        ValidationVerdict::basic_pass(),
        Vec::new(),
        &QuestionMeta {
            topic: "security".to_string(),
            difficulty: Difficulty::Easy,
            legal_reference: None,
        },
    );

    assert!(matches!(
        result,
        Err(crate::error::PipelineError::ExtractionIncomplete { question_number: 4, .. })
    ));
}

#[test]
fn vector_query_drops_entries_below_min_similarity() {
    let store = store_with_document("exam-2024");
    let model = model_id();
    let entries = [
        ("same", vec![1.0_f32, 0.0, 0.0]),
        ("close", vec![0.9, 0.1, 0.0]),
        ("orthogonal", vec![0.0, 1.0, 0.0]),
        ("opposite", vec![-1.0, 0.0, 0.0]),
        ("wrong-dimension", vec![1.0, 0.0]),
    ];
    for (item_id, embedding) in &entries {
        store
            .upsert_vector(
                LEGAL_COLLECTION,
                item_id,
                &model,
                embedding,
                item_id,
                &json!({ "content": item_id }),
            )
            .expect("vector written");
    }

    for min_similarity in [-1.0, 0.0, 0.5, 0.99] {
        let query = store
            .query_vectors(
                LEGAL_COLLECTION,
                &model,
                &[1.0, 0.0, 0.0],
                10,
                min_similarity,
                &QueryBudget::unlimited(),
            )
            .expect("query runs");
        assert!(query
            .hits
            .iter()
            .all(|hit| hit.similarity >= min_similarity));
        assert!(!query.timed_out);
    }

    let ranked = store
        .query_vectors(
            LEGAL_COLLECTION,
            &model,
            &[1.0, 0.0, 0.0],
            2,
            0.0,
            &QueryBudget::unlimited(),
        )
        .expect("query runs");
    let ids = ranked
        .hits
        .iter()
        .map(|hit| hit.item_id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(ids, vec!["same", "close"]);
    assert_eq!(ranked.hits[0].payload["content"], "same");
}

#[test]
fn expired_budget_returns_a_partial_result() {
    let store = store_with_document("exam-2024");
    let model = model_id();
    store
        .upsert_vector(
            LEGAL_COLLECTION,
            "chunk-1",
            &model,
            &[1.0, 0.0],
            "text",
            &json!({}),
        )
        .expect("vector written");

    let query = store
        .query_vectors(
            LEGAL_COLLECTION,
            &model,
            &[1.0, 0.0],
            5,
            0.0,
            &QueryBudget::with_timeout(Duration::ZERO),
        )
        .expect("query runs");

    assert!(query.timed_out);
    assert!(query.hits.is_empty());
}

#[test]
fn keyword_query_scores_token_overlap() {
    let mut store = store_with_document("civil-act");
    let model = model_id();
    let chunks = vec![
        LegalChunk {
            chunk_id: "civil-act-0001".to_string(),
            document_id: "civil-act".to_string(),
            page: 1,
            content: "Adverse possession of land for twenty years".to_string(),
            embedding: vec![1.0, 0.0],
            legal_references: vec!["Article 245".to_string()],
        },
        LegalChunk {
            chunk_id: "civil-act-0002".to_string(),
            document_id: "civil-act".to_string(),
            page: 2,
            content: "A lease of a building".to_string(),
            embedding: vec![0.0, 1.0],
            legal_references: Vec::new(),
        },
    ];
    store
        .persist_legal_chunks(&chunks, &model)
        .expect("chunks written");

    let query = store
        .query_keywords(
            LEGAL_COLLECTION,
            "adverse possession of the land",
            5,
            0.5,
            &QueryBudget::unlimited(),
        )
        .expect("keyword query runs");

    assert_eq!(query.hits.len(), 1);
    assert_eq!(query.hits[0].item_id, "civil-act-0001");
    assert_eq!(query.hits[0].similarity, 1.0);
    assert_eq!(query.hits[0].payload["legal_references"][0], "Article 245");
    assert_eq!(store.counts().expect("counts").legal_chunks, 2);
}

#[test]
fn grading_tables_are_read_per_user() {
    let store = Store::open_in_memory().expect("in-memory store");
    for (user, topic, accuracy) in [
        ("u1", "torts", 0.4),
        ("u1", "lease", 0.2),
        ("u1", "family", 0.4),
        ("u2", "torts", 0.9),
    ] {
        store
            .connection()
            .execute(
                "INSERT INTO topic_performance(user_id, topic, accuracy) VALUES(?1, ?2, ?3)",
                params![user, topic, accuracy],
            )
            .expect("seed performance");
    }
    store
        .connection()
        .execute(
            "INSERT INTO seen_questions(user_id, question_id, seen_at) VALUES('u1', 'q-1', 'now')",
            [],
        )
        .expect("seed seen");

    let topics = store
        .topic_performance("u1")
        .expect("performance read")
        .into_iter()
        .map(|row| row.topic)
        .collect::<Vec<String>>();
    assert_eq!(topics, vec!["lease", "family", "torts"]);

    let seen = store.seen_question_ids("u1").expect("seen read");
    assert!(seen.contains("q-1"));
    assert!(store.seen_question_ids("u2").expect("seen read").is_empty());
}

#[test]
fn review_queue_counts_by_reason() {
    let mut store = store_with_document("exam-2024");
    let items = [
        ReviewReason::Unvalidated,
        ReviewReason::RecoveryExhausted,
        ReviewReason::RecoveryExhausted,
    ]
    .into_iter()
    .enumerate()
    .map(|(index, reason)| ReviewItem {
        run_id: "run-1".to_string(),
        doc_id: "exam-2024".to_string(),
        reason,
        detail: "needs a human".to_string(),
        candidate: CandidateQuestion::empty(index as u32 + 1, 1),
    })
    .collect::<Vec<ReviewItem>>();

    assert_eq!(store.enqueue_reviews(&items).expect("queued"), 3);
    assert_eq!(
        store.review_counts("exam-2024").expect("counts"),
        vec![
            ("recovery_exhausted".to_string(), 2),
            ("unvalidated".to_string(), 1),
        ]
    );
    assert_eq!(
        store.metadata_value("db_schema_version").expect("metadata"),
        Some(DB_SCHEMA_VERSION.to_string())
    );
}

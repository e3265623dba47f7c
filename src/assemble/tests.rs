use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::params;

use super::*;
use crate::model::{
    CandidateQuestion, Difficulty, ExamQuestionRecord, OptionLabel, QuestionMeta,
    ValidationVerdict,
};
use crate::store::{DocumentKind, DocumentRecord};

const WEAK: [&str; 5] = ["lease", "torts", "family", "succession", "security"];
const OTHER: [&str; 2] = ["capacity", "property"];

fn view(question_id: &str, topic: &str) -> ExamQuestionView {
    ExamQuestionView {
        question_id: question_id.to_string(),
        question_number: 1,
        scenario: String::new(),
        sub_scenarios: Vec::new(),
        question_stem: format!("Question {question_id}"),
        options: BTreeMap::new(),
        topic: topic.to_string(),
        difficulty: Difficulty::Medium,
        legal_reference: None,
    }
}

fn pool(per_topic: usize, topics: &[&str]) -> Vec<ExamQuestionView> {
    topics
        .iter()
        .flat_map(|topic| {
            (0..per_topic).map(move |index| view(&format!("q-{topic}-{index:03}"), topic))
        })
        .collect()
}

fn weighted() -> SelectionPlan {
    SelectionPlan::Weighted {
        weak_topics: WEAK.iter().map(|topic| topic.to_string()).collect(),
    }
}

fn is_weak(question: &ExamQuestionView) -> bool {
    WEAK.contains(&question.topic.as_str())
}

fn unique_ids(questions: &[ExamQuestionView]) -> BTreeSet<&str> {
    questions
        .iter()
        .map(|question| question.question_id.as_str())
        .collect()
}

#[test]
fn weak_share_rounds_half_away_from_zero() {
    assert_eq!(weak_share(25), 15);
    assert_eq!(weak_share(5), 3);
    assert_eq!(weak_share(4), 2);
    assert_eq!(weak_share(3), 2);
    assert_eq!(weak_share(1), 1);
    assert_eq!(weak_share(0), 0);
}

#[test]
fn weak_topics_are_the_five_lowest_by_accuracy_then_name() {
    let rows = [
        ("property", 0.9),
        ("torts", 0.3),
        ("lease", 0.1),
        ("capacity", 0.8),
        ("family", 0.3),
        ("security", 0.5),
        ("succession", 0.4),
    ]
    .into_iter()
    .map(|(topic, accuracy)| TopicPerformance {
        user_id: "u1".to_string(),
        topic: topic.to_string(),
        accuracy,
    })
    .collect::<Vec<TopicPerformance>>();

    assert_eq!(
        weak_topics(&rows),
        vec!["lease", "family", "torts", "succession", "security"]
    );
}

#[test]
fn twenty_five_questions_split_fifteen_weak_ten_other() {
    let mut all = pool(6, &WEAK);
    all.extend(pool(10, &OTHER));
    let mut rng = StdRng::seed_from_u64(7);

    let exam = select_questions(all, &weighted(), 25, &mut rng).expect("pool is large enough");

    assert_eq!(exam.len(), 25);
    assert_eq!(unique_ids(&exam).len(), 25);
    assert_eq!(exam.iter().filter(|question| is_weak(question)).count(), 15);
    assert_eq!(exam.iter().filter(|question| !is_weak(question)).count(), 10);
}

#[test]
fn short_weak_pool_is_backfilled_from_the_others() {
    let mut all = pool(1, &WEAK);
    all.extend(pool(15, &OTHER));
    let mut rng = StdRng::seed_from_u64(11);

    let exam = select_questions(all, &weighted(), 25, &mut rng).expect("combined pool suffices");

    assert_eq!(exam.len(), 25);
    assert_eq!(unique_ids(&exam).len(), 25);
    assert_eq!(exam.iter().filter(|question| is_weak(question)).count(), 5);
}

#[test]
fn short_other_pool_is_backfilled_from_weak_topics() {
    let mut all = pool(5, &WEAK);
    all.extend(pool(1, &OTHER));
    let mut rng = StdRng::seed_from_u64(3);

    let exam = select_questions(all, &weighted(), 20, &mut rng).expect("combined pool suffices");

    assert_eq!(exam.len(), 20);
    assert_eq!(exam.iter().filter(|question| !is_weak(question)).count(), 2);
}

#[test]
fn too_small_a_pool_is_an_error_not_a_short_exam() {
    let all = pool(2, &WEAK);
    let mut rng = StdRng::seed_from_u64(1);

    let result = select_questions(all, &weighted(), 11, &mut rng);

    assert!(matches!(
        result,
        Err(PipelineError::InsufficientQuestions {
            requested: 11,
            available: 10,
        })
    ));
}

#[test]
fn explicit_topics_restrict_the_pool() {
    let mut all = pool(4, &WEAK);
    all.extend(pool(4, &OTHER));
    let mut rng = StdRng::seed_from_u64(5);
    let plan = SelectionPlan::Topics(vec!["Capacity".to_string()]);

    let exam = select_questions(all.clone(), &plan, 4, &mut rng).expect("four capacity questions");
    assert!(exam.iter().all(|question| question.topic == "capacity"));

    assert!(matches!(
        select_questions(all, &plan, 5, &mut rng),
        Err(PipelineError::InsufficientQuestions {
            requested: 5,
            available: 4,
        })
    ));
}

#[test]
fn same_seed_gives_the_same_exam() {
    let mut all = pool(6, &WEAK);
    all.extend(pool(10, &OTHER));

    let first = select_questions(all.clone(), &weighted(), 10, &mut StdRng::seed_from_u64(42))
        .expect("pool is large enough");
    let second = select_questions(all, &weighted(), 10, &mut StdRng::seed_from_u64(42))
        .expect("pool is large enough");

    assert_eq!(first, second);
}

fn seeded_store(questions: usize) -> Store {
    let mut store = Store::open_in_memory().expect("in-memory store");
    store
        .upsert_document(&DocumentRecord {
            doc_id: "exam-1".to_string(),
            kind: DocumentKind::Exam,
            source_path: "exam-1.txt".to_string(),
            sha256: String::new(),
            page_count: 1,
        })
        .expect("document written");

    let records = (1..=questions as u32)
        .map(|number| {
            let mut candidate = CandidateQuestion::empty(number, 1);
            candidate.question_stem = format!("What is rule {number}?");
            for label in OptionLabel::ALL {
                candidate
                    .options
                    .insert(label, format!("rule {number} reading {label}"));
            }
            let topic = if number % 2 == 0 { "lease" } else { "capacity" };
            ExamQuestionRecord::from_accepted(
                "exam-1",
                candidate.with_answer(Some(OptionLabel::A)),
                String::new(),
                ValidationVerdict::basic_pass(),
                vec![1.0, 0.0],
                &QuestionMeta {
                    topic: topic.to_string(),
                    difficulty: Difficulty::Easy,
                    legal_reference: None,
                },
            )
            .expect("record")
        })
        .collect::<Vec<ExamQuestionRecord>>();
    store
        .persist_questions(&records, "local-hash-1024-v1")
        .expect("questions written");

    store
        .connection()
        .execute(
            "INSERT INTO topic_performance(user_id, topic, accuracy) VALUES('u1', 'lease', 0.2)",
            [],
        )
        .expect("performance seeded");
    store
}

fn mark_seen(store: &Store, user_id: &str, question_ids: &[String]) {
    for question_id in question_ids {
        store
            .connection()
            .execute(
                "INSERT INTO seen_questions(user_id, question_id, seen_at) VALUES(?1, ?2, '2024-01-01T00:00:00Z')",
                params![user_id, question_id],
            )
            .expect("seen seeded");
    }
}

#[test]
fn exclude_seen_never_returns_a_seen_question() {
    let store = seeded_store(12);
    let all_ids = store
        .active_questions()
        .expect("pool read")
        .into_iter()
        .map(|question| question.question_id)
        .collect::<Vec<String>>();
    let seen = all_ids[..4].to_vec();
    mark_seen(&store, "u1", &seen);
    let assembler = ExamAssembler::new(&store);
    let request = AssembleRequest {
        user_id: "u1".to_string(),
        count: 8,
        topics: None,
        exclude_seen: true,
    };

    for seed in 0..10 {
        let exam = assembler
            .assemble(&request, &mut StdRng::seed_from_u64(seed))
            .expect("eight fresh questions remain");
        assert_eq!(exam.len(), 8);
        assert!(exam.iter().all(|question| !seen.contains(&question.question_id)));
    }
}

#[test]
fn exclude_seen_fails_when_the_fresh_pool_is_too_small() {
    let store = seeded_store(6);
    let all_ids = store
        .active_questions()
        .expect("pool read")
        .into_iter()
        .map(|question| question.question_id)
        .collect::<Vec<String>>();
    mark_seen(&store, "u1", &all_ids[..2]);
    let assembler = ExamAssembler::new(&store);
    let request = AssembleRequest {
        user_id: "u1".to_string(),
        count: 5,
        topics: None,
        exclude_seen: true,
    };

    let err = assembler
        .assemble(&request, &mut StdRng::seed_from_u64(9))
        .expect_err("only four fresh questions");

    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InsufficientQuestions {
            requested: 5,
            available: 4,
        })
    ));

    let reuse = AssembleRequest {
        exclude_seen: false,
        ..request
    };
    let exam = assembler
        .assemble(&reuse, &mut StdRng::seed_from_u64(9))
        .expect("seen questions may be reused");
    assert_eq!(exam.len(), 5);
}

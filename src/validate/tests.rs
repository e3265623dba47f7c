use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::model::{OptionLabel, PageContexts};

fn complete_candidate(question_number: u32) -> CandidateQuestion {
    let options = OptionLabel::ALL
        .iter()
        .map(|label| (*label, format!("option {label}")))
        .collect::<BTreeMap<OptionLabel, String>>();
    CandidateQuestion {
        question_number,
        scenario: "A landlord leased a shop.".to_string(),
        sub_scenarios: Vec::new(),
        question_stem: "Which of the following is correct?".to_string(),
        options,
        correct_answer: Some(OptionLabel::B),
        source_page: 3,
    }
}

fn instant_retries() -> ValidatorConfig {
    ValidatorConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        ..ValidatorConfig::default()
    }
}

fn validator_with(judge: Arc<dyn Judge>) -> Validator {
    let extractor = Extractor::new().expect("marker patterns compile");
    Validator::new(
        ValidationMode::Semantic(judge),
        instant_retries(),
        Arc::new(extractor),
    )
}

struct FixedJudge {
    verdict: JudgeVerdict,
    calls: AtomicU32,
}

impl FixedJudge {
    fn new(valid: bool, confidence: f64, correct_answer_valid: bool) -> Arc<Self> {
        Arc::new(Self {
            verdict: JudgeVerdict {
                valid,
                confidence,
                issues: if valid {
                    Vec::new()
                } else {
                    vec!["distractor B is also correct".to_string()]
                },
                correct_answer_valid,
            },
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Judge for FixedJudge {
    fn evaluate(&self, _request: &JudgeRequest) -> Result<JudgeVerdict, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}

struct FailingJudge {
    calls: AtomicU32,
}

impl Judge for FailingJudge {
    fn evaluate(&self, _request: &JudgeRequest) -> Result<JudgeVerdict, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ServiceError::new(JUDGE_SERVICE, "timed out"))
    }
}

#[test]
fn stage_one_passes_five_options_and_a_pointed_answer() {
    for number in 1..=5 {
        let mut candidate = complete_candidate(number);
        candidate.correct_answer = Some(OptionLabel::ALL[(number as usize - 1) % 5]);
        let verdict = check_structure(&candidate);
        assert!(verdict.valid, "question {number}: {:?}", verdict.issues);
        assert_eq!(verdict.stage, ValidationStage::Basic);
    }
}

#[test]
fn stage_one_failures_never_reach_the_judge() {
    let judge = FixedJudge::new(true, 0.99, true);
    let validator = validator_with(judge.clone());

    for label in OptionLabel::ALL {
        let mut missing_option = complete_candidate(1);
        missing_option.options.remove(&label);
        let outcome = validator.validate_candidate(&missing_option);
        let ValidationOutcome::Rejected(verdict) = outcome else {
            panic!("missing option {label} must be rejected");
        };
        assert_eq!(verdict.stage, ValidationStage::Basic);
        assert_eq!(verdict.confidence, 0.0);
    }

    let mut blank_option = complete_candidate(2);
    blank_option.options.insert(OptionLabel::C, "   ".to_string());
    assert!(!validator.validate_candidate(&blank_option).is_accepted());

    let no_answer = complete_candidate(3).with_answer(None);
    let outcome = validator.validate_candidate(&no_answer);
    assert_eq!(
        outcome.verdict().map(|verdict| verdict.issues.clone()),
        Some(vec!["correct answer is missing".to_string()])
    );

    assert_eq!(judge.calls(), 0);
}

#[test]
fn answer_pointing_at_an_empty_option_is_reported() {
    let mut candidate = complete_candidate(4);
    candidate.options.remove(&OptionLabel::B);
    let verdict = check_structure(&candidate);

    assert!(!verdict.valid);
    assert!(verdict
        .issues
        .contains(&"correct answer B points to an empty option".to_string()));
    assert!(verdict
        .issues
        .contains(&"only 4 of 5 options are non-empty (missing B)".to_string()));
}

#[test]
fn empty_question_text_is_rejected() {
    let mut candidate = complete_candidate(5);
    candidate.scenario.clear();
    candidate.question_stem.clear();
    let verdict = check_structure(&candidate);

    assert_eq!(verdict.issues, vec!["question text is empty".to_string()]);
}

#[test]
fn basic_only_mode_accepts_structurally_valid_candidates() {
    let extractor = Extractor::new().expect("marker patterns compile");
    let validator = Validator::new(
        ValidationMode::BasicOnly,
        ValidatorConfig::default(),
        Arc::new(extractor),
    );

    let validation = validator.validate(&complete_candidate(1), None, false, None);

    assert!(validation.outcome.is_accepted());
    assert!(validation.error.is_none());
    assert!(validation.context_search.is_none());
    assert_eq!(validator.mode().as_str(), "basic_only");
}

#[test]
fn semantic_acceptance_requires_threshold_and_answer_validity() {
    let cases = [
        (true, 0.7, true, true),
        (true, 0.95, true, true),
        (true, 0.69, true, false),
        (false, 0.99, true, false),
        (true, 0.99, false, false),
    ];

    for (valid, confidence, correct_answer_valid, expected) in cases {
        let judge = FixedJudge::new(valid, confidence, correct_answer_valid);
        let validator = validator_with(judge.clone());
        let outcome = validator.validate_candidate(&complete_candidate(1));

        assert_eq!(
            outcome.is_accepted(),
            expected,
            "valid={valid} confidence={confidence} answer_valid={correct_answer_valid}"
        );
        let verdict = outcome.verdict().expect("judge returned a verdict");
        assert_eq!(verdict.stage, ValidationStage::Semantic);
        assert_eq!(verdict.confidence, confidence);
        assert_eq!(judge.calls(), 1);
    }
}

#[test]
fn semantic_rejection_records_issues_verbatim() {
    let judge = FixedJudge::new(false, 0.9, true);
    let validator = validator_with(judge);

    let validation = validator.validate(&complete_candidate(6), None, false, None);

    assert_eq!(validation.outcome.status(), "rejected");
    match validation.error {
        Some(PipelineError::SemanticValidationFailed {
            question_number,
            issues,
            ..
        }) => {
            assert_eq!(question_number, 6);
            assert_eq!(issues, vec!["distractor B is also correct".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn exhausted_judge_retries_leave_the_question_unvalidated() {
    let judge = Arc::new(FailingJudge {
        calls: AtomicU32::new(0),
    });
    let validator = validator_with(judge.clone());

    let validation = validator.validate(&complete_candidate(2), None, true, Some(&PageContexts::new()));

    assert_eq!(
        validation.outcome,
        ValidationOutcome::Unvalidated {
            attempts: 4,
            last_error: "timed out".to_string(),
        }
    );
    assert_eq!(judge.calls.load(Ordering::SeqCst), 4);
    assert!(validation.context_search.is_none());
    assert!(matches!(
        validation.error,
        Some(PipelineError::ExternalService(_))
    ));
}

#[test]
fn answer_key_entry_overrides_the_candidate_answer() {
    let extractor = Extractor::new().expect("marker patterns compile");
    let validator = Validator::new(
        ValidationMode::BasicOnly,
        ValidatorConfig::default(),
        Arc::new(extractor),
    );
    let entry = AnswerKeyEntry {
        answer: Some(OptionLabel::E),
        explanation: String::new(),
    };

    let validation = validator.validate(&complete_candidate(1), Some(&entry), false, None);

    assert_eq!(validation.candidate.correct_answer, Some(OptionLabel::E));
}

#[test]
fn rejected_candidate_without_nearby_marker_exhausts_recovery() {
    let extractor = Extractor::new().expect("marker patterns compile");
    let validator = Validator::new(
        ValidationMode::BasicOnly,
        ValidatorConfig::default(),
        Arc::new(extractor),
    );
    let contexts: PageContexts = [(3, "unrelated text".to_string())].into_iter().collect();

    let validation = validator.validate(
        &complete_candidate(9).with_answer(None),
        None,
        true,
        Some(&contexts),
    );

    assert_eq!(validation.outcome.status(), "rejected");
    let search = validation.context_search.expect("context search ran");
    assert_eq!(search.search_range, [2, 4]);
    assert_eq!(search.found_page, None);
    assert!(matches!(
        validation.error,
        Some(PipelineError::RecoveryExhausted {
            question_number: 9,
            min_page: 2,
            max_page: 4,
        })
    ));
}

#[test]
fn judge_response_parsing_tolerates_surrounding_prose() {
    let parsed = parse_judge_response(
        "Here is my verdict:\n{\"valid\": true, \"confidence\": 1.4, \"correct_answer_valid\": true}\nThanks",
    )
    .expect("verdict parsed");

    assert!(parsed.valid);
    assert_eq!(parsed.confidence, 1.0);
    assert!(parsed.issues.is_empty());
    assert!(parse_judge_response("no json at all").is_err());
    assert!(parse_judge_response("{\"valid\": true}").is_err());
}

#[test]
fn judge_request_lists_options_in_label_order() {
    let request = JudgeRequest::from_candidate(&complete_candidate(1)).expect("answer present");
    let labels = request
        .options
        .iter()
        .map(|option| option.label)
        .collect::<Vec<_>>();

    assert_eq!(labels, OptionLabel::ALL.to_vec());
    assert_eq!(request.marked_answer, OptionLabel::B);
    assert!(JudgeRequest::from_candidate(&complete_candidate(1).with_answer(None)).is_none());
}

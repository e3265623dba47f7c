//! Two-stage question validation: structural checks, then an external judge.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context_search::ContextSearcher;
use crate::error::{PipelineError, ServiceError};
use crate::extract::Extractor;
use crate::model::{
    AnswerKeyEntry, CandidateQuestion, ContextSearchOutcome, PageContexts, ValidationOutcome,
    ValidationStage, ValidationVerdict,
};
use crate::throttle::{with_retries, RateLimiter, RetryPolicy};

mod basic;
mod judge;
#[cfg(test)]
mod tests;

pub use basic::check_structure;
pub use judge::{
    parse_judge_response, CommandJudge, Judge, JudgeRequest, JudgeVerdict, JUDGE_SERVICE,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_CONTEXT_RADIUS: u32 = 1;

#[derive(Clone)]
pub enum ValidationMode {
    BasicOnly,
    Semantic(Arc<dyn Judge>),
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicOnly => "basic_only",
            Self::Semantic(_) => "basic_and_semantic",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    pub confidence_threshold: f64,
    pub context_radius: u32,
    pub retry: RetryPolicy,
    pub judge_min_interval: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            context_radius: DEFAULT_CONTEXT_RADIUS,
            retry: RetryPolicy::default(),
            judge_min_interval: Duration::ZERO,
        }
    }
}

/// Final state of one question after validation and, when needed, context search.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionValidation {
    pub question_number: u32,
    pub outcome: ValidationOutcome,
    /// The candidate the outcome refers to: the recovered one when context
    /// search succeeded, otherwise the original with its answer applied.
    pub candidate: CandidateQuestion,
    pub context_search: Option<ContextSearchOutcome>,
    #[serde(skip)]
    pub error: Option<PipelineError>,
}

impl QuestionValidation {
    pub fn recovered(&self) -> bool {
        self.context_search
            .as_ref()
            .is_some_and(ContextSearchOutcome::recovered)
    }
}

pub struct Validator {
    mode: ValidationMode,
    config: ValidatorConfig,
    extractor: Arc<Extractor>,
    judge_limiter: RateLimiter,
}

impl Validator {
    pub fn new(mode: ValidationMode, config: ValidatorConfig, extractor: Arc<Extractor>) -> Self {
        Self {
            judge_limiter: RateLimiter::new(JUDGE_SERVICE, config.judge_min_interval),
            mode,
            config,
            extractor,
        }
    }

    pub fn mode(&self) -> &ValidationMode {
        &self.mode
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Validates one candidate; with `search_adjacent` and page contexts, a
    /// rejected candidate is handed to the context searcher before giving up.
    pub fn validate(
        &self,
        candidate: &CandidateQuestion,
        answer_key_entry: Option<&AnswerKeyEntry>,
        search_adjacent: bool,
        page_contexts: Option<&PageContexts>,
    ) -> QuestionValidation {
        let keyed_answer = answer_key_entry.and_then(|entry| entry.answer);
        let candidate = match keyed_answer {
            Some(answer) => candidate.with_answer(Some(answer)),
            None => candidate.clone(),
        };
        let question_number = candidate.question_number;
        let outcome = self.validate_candidate(&candidate);

        let rejected = match &outcome {
            ValidationOutcome::Accepted(_) => {
                return QuestionValidation {
                    question_number,
                    outcome,
                    candidate,
                    context_search: None,
                    error: None,
                };
            }
            ValidationOutcome::Unvalidated {
                attempts,
                last_error,
            } => {
                warn!(
                    question_number,
                    attempts,
                    error = %last_error,
                    "judge unavailable; routing question to manual review"
                );
                return QuestionValidation {
                    question_number,
                    error: Some(PipelineError::ExternalService(ServiceError::new(
                        JUDGE_SERVICE,
                        format!("{last_error} (after {attempts} attempts)"),
                    ))),
                    outcome,
                    candidate,
                    context_search: None,
                };
            }
            ValidationOutcome::Rejected(verdict) => verdict.clone(),
        };

        let rejection = rejection_error(question_number, &rejected);
        let Some(page_contexts) = page_contexts.filter(|_| search_adjacent) else {
            return QuestionValidation {
                question_number,
                outcome,
                candidate,
                context_search: None,
                error: Some(rejection),
            };
        };

        let searcher = ContextSearcher::new(self, answer_key_entry);
        let search = searcher.recover(
            question_number,
            candidate.source_page,
            self.config.context_radius,
            page_contexts,
        );

        match (&search.recovered_candidate, &search.final_verdict, search.found_page) {
            (Some(recovered), Some(verdict), Some(found_page)) => {
                info!(
                    question_number,
                    source_page = candidate.source_page,
                    found_page,
                    "question recovered by context search"
                );
                QuestionValidation {
                    question_number,
                    outcome: ValidationOutcome::Accepted(verdict.clone()),
                    candidate: recovered.clone(),
                    context_search: Some(search),
                    error: None,
                }
            }
            _ => {
                let [min_page, max_page] = search.search_range;
                debug!(question_number, min_page, max_page, reason = %rejection, "context search exhausted");
                QuestionValidation {
                    question_number,
                    outcome,
                    candidate,
                    context_search: Some(search),
                    error: Some(PipelineError::RecoveryExhausted {
                        question_number,
                        min_page,
                        max_page,
                    }),
                }
            }
        }
    }

    /// Stage 1, then (in semantic mode) stage 2. No context search.
    pub fn validate_candidate(&self, candidate: &CandidateQuestion) -> ValidationOutcome {
        let basic = check_structure(candidate);
        if !basic.valid {
            return ValidationOutcome::Rejected(basic);
        }

        match &self.mode {
            ValidationMode::BasicOnly => ValidationOutcome::Accepted(basic),
            ValidationMode::Semantic(judge) => self.semantic_stage(judge.as_ref(), candidate),
        }
    }

    fn semantic_stage(&self, judge: &dyn Judge, candidate: &CandidateQuestion) -> ValidationOutcome {
        let Some(request) = JudgeRequest::from_candidate(candidate) else {
            return ValidationOutcome::Rejected(ValidationVerdict::basic_fail(vec![
                "correct answer is missing".to_string(),
            ]));
        };

        let response = with_retries(&self.config.retry, Some(&self.judge_limiter), || {
            judge.evaluate(&request)
        });

        match response {
            Ok(judged) => {
                let accepted = judged.valid
                    && judged.confidence >= self.config.confidence_threshold
                    && judged.correct_answer_valid;
                let verdict = ValidationVerdict {
                    stage: ValidationStage::Semantic,
                    valid: accepted,
                    confidence: judged.confidence,
                    issues: judged.issues,
                    correct_answer_valid: judged.correct_answer_valid,
                };
                debug!(
                    question_number = candidate.question_number,
                    confidence = verdict.confidence,
                    accepted,
                    "semantic verdict"
                );
                if accepted {
                    ValidationOutcome::Accepted(verdict)
                } else {
                    ValidationOutcome::Rejected(verdict)
                }
            }
            Err(exhausted) => ValidationOutcome::Unvalidated {
                attempts: exhausted.attempts,
                last_error: exhausted.last_error.message,
            },
        }
    }
}

fn rejection_error(question_number: u32, verdict: &ValidationVerdict) -> PipelineError {
    match verdict.stage {
        ValidationStage::Basic => PipelineError::BasicValidationFailed {
            question_number,
            issues: verdict.issues.clone(),
        },
        ValidationStage::Semantic => PipelineError::SemanticValidationFailed {
            question_number,
            confidence: verdict.confidence,
            issues: verdict.issues.clone(),
        },
    }
}

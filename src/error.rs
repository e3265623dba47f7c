use thiserror::Error;

/// Failure reported by an external collaborator (OCR, judge, encoder).
#[derive(Debug, Clone, Error)]
#[error("{service} call failed: {message}")]
pub struct ServiceError {
    pub service: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("question {question_number} could not be fully decomposed (missing: {})", missing.join(", "))]
    ExtractionIncomplete {
        question_number: u32,
        missing: Vec<String>,
    },

    #[error("question {question_number} failed basic validation: {}", issues.join("; "))]
    BasicValidationFailed {
        question_number: u32,
        issues: Vec<String>,
    },

    #[error(
        "question {question_number} failed semantic validation (confidence {confidence:.2}): {}",
        issues.join("; ")
    )]
    SemanticValidationFailed {
        question_number: u32,
        confidence: f64,
        issues: Vec<String>,
    },

    #[error(transparent)]
    ExternalService(#[from] ServiceError),

    #[error("question {question_number} not recovered from pages {min_page}-{max_page}")]
    RecoveryExhausted {
        question_number: u32,
        min_page: u32,
        max_page: u32,
    },

    #[error("requested {requested} questions but only {available} are available")]
    InsufficientQuestions { requested: usize, available: usize },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExtractionIncomplete { .. } => "extraction_incomplete",
            Self::BasicValidationFailed { .. } => "basic_validation_failed",
            Self::SemanticValidationFailed { .. } => "semantic_validation_failed",
            Self::ExternalService(_) => "external_service_error",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::InsufficientQuestions { .. } => "insufficient_questions",
        }
    }
}

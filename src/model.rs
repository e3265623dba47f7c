use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::semantic::question_payload_for_embedding;
use crate::util::sha256_hex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// Page text keyed by page number, as handed to validation and context search.
pub type PageContexts = BTreeMap<u32, String>;

pub fn page_contexts(pages: &[Page]) -> PageContexts {
    pages
        .iter()
        .map(|page| (page.page_number, page.text.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
    E,
}

impl OptionLabel {
    pub const ALL: [OptionLabel; 5] = [
        OptionLabel::A,
        OptionLabel::B,
        OptionLabel::C,
        OptionLabel::D,
        OptionLabel::E,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }

    pub fn from_letter(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            "E" => Some(Self::E),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::A => Some(Self::B),
            Self::B => Some(Self::C),
            Self::C => Some(Self::D),
            Self::D => Some(Self::E),
            Self::E => None,
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScenario {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuestion {
    pub question_number: u32,
    pub scenario: String,
    pub sub_scenarios: Vec<SubScenario>,
    pub question_stem: String,
    pub options: BTreeMap<OptionLabel, String>,
    pub correct_answer: Option<OptionLabel>,
    pub source_page: u32,
}

impl CandidateQuestion {
    pub fn empty(question_number: u32, source_page: u32) -> Self {
        Self {
            question_number,
            scenario: String::new(),
            sub_scenarios: Vec::new(),
            question_stem: String::new(),
            options: BTreeMap::new(),
            correct_answer: None,
            source_page,
        }
    }

    /// Interrogative text; falls back to the scenario when no stem was found.
    pub fn question_text(&self) -> &str {
        let stem = self.question_stem.trim();
        if stem.is_empty() {
            self.scenario.trim()
        } else {
            stem
        }
    }

    pub fn option_text(&self, label: OptionLabel) -> Option<&str> {
        self.options
            .get(&label)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn non_empty_option_count(&self) -> usize {
        OptionLabel::ALL
            .iter()
            .filter(|label| self.option_text(**label).is_some())
            .count()
    }

    pub fn has_all_options(&self) -> bool {
        self.non_empty_option_count() == OptionLabel::ALL.len()
    }

    pub fn is_complete(&self) -> bool {
        self.has_all_options() && self.correct_answer.is_some()
    }

    pub fn with_answer(&self, answer: Option<OptionLabel>) -> Self {
        Self {
            correct_answer: answer,
            ..self.clone()
        }
    }

    /// Fields that could not be recovered during extraction.
    pub fn missing_parts(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.question_text().is_empty() {
            missing.push("question_text".to_string());
        }
        for label in OptionLabel::ALL {
            if self.option_text(label).is_none() {
                missing.push(format!("option_{label}"));
            }
        }
        if self.correct_answer.is_none() {
            missing.push("correct_answer".to_string());
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKeyEntry {
    pub answer: Option<OptionLabel>,
    pub explanation: String,
}

pub type AnswerKey = BTreeMap<u32, AnswerKeyEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Basic,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub stage: ValidationStage,
    pub valid: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub correct_answer_valid: bool,
}

impl ValidationVerdict {
    pub fn basic_pass() -> Self {
        Self {
            stage: ValidationStage::Basic,
            valid: true,
            confidence: 1.0,
            issues: Vec::new(),
            correct_answer_valid: true,
        }
    }

    pub fn basic_fail(issues: Vec<String>) -> Self {
        Self {
            stage: ValidationStage::Basic,
            valid: false,
            confidence: 0.0,
            issues,
            correct_answer_valid: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted(ValidationVerdict),
    Rejected(ValidationVerdict),
    /// Judge retries were exhausted; neither accepted nor invalid.
    Unvalidated { attempts: u32, last_error: String },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn verdict(&self) -> Option<&ValidationVerdict> {
        match self {
            Self::Accepted(verdict) | Self::Rejected(verdict) => Some(verdict),
            Self::Unvalidated { .. } => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Rejected(_) => "rejected",
            Self::Unvalidated { .. } => "unvalidated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestionRecord {
    pub question_id: String,
    pub doc_id: String,
    pub question: CandidateQuestion,
    pub explanation: String,
    pub verdict: ValidationVerdict,
    pub embedding: Vec<f32>,
    pub topic: String,
    pub difficulty: Difficulty,
    pub legal_reference: Option<String>,
}

/// Ingestion hints shared by every question of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMeta {
    pub topic: String,
    pub difficulty: Difficulty,
    pub legal_reference: Option<String>,
}

impl ExamQuestionRecord {
    /// Builds a persistable record from an accepted candidate.
    ///
    /// Refuses candidates without five non-empty options or whose answer does
    /// not point at one of them. The id is `q-<doc>-<nnn>-<hash8>`, where the
    /// hash covers the embedding payload so a corrected re-extraction of the
    /// same question number gets a new id.
    pub fn from_accepted(
        doc_id: &str,
        question: CandidateQuestion,
        explanation: String,
        verdict: ValidationVerdict,
        embedding: Vec<f32>,
        meta: &QuestionMeta,
    ) -> Result<Self, PipelineError> {
        let question_number = question.question_number;
        let Some(payload) = question_payload_for_embedding(&question) else {
            return Err(PipelineError::ExtractionIncomplete {
                question_number,
                missing: question.missing_parts(),
            });
        };
        match question.correct_answer {
            Some(answer) if question.option_text(answer).is_some() => {}
            _ => {
                return Err(PipelineError::BasicValidationFailed {
                    question_number,
                    issues: vec!["correct answer does not point to an option".to_string()],
                });
            }
        }

        let hash = sha256_hex(&payload);
        Ok(Self {
            question_id: format!("q-{doc_id}-{question_number:03}-{}", &hash[..8]),
            doc_id: doc_id.to_string(),
            question,
            explanation,
            verdict,
            embedding,
            topic: meta.topic.clone(),
            difficulty: meta.difficulty,
            legal_reference: meta.legal_reference.clone(),
        })
    }

    pub fn view(&self) -> ExamQuestionView {
        ExamQuestionView {
            question_id: self.question_id.clone(),
            question_number: self.question.question_number,
            scenario: self.question.scenario.clone(),
            sub_scenarios: self.question.sub_scenarios.clone(),
            question_stem: self.question.question_stem.clone(),
            options: self.question.options.clone(),
            topic: self.topic.clone(),
            difficulty: self.difficulty,
            legal_reference: self.legal_reference.clone(),
        }
    }
}

/// Question as handed to an exam taker: answer and explanation withheld.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestionView {
    pub question_id: String,
    pub question_number: u32,
    pub scenario: String,
    pub sub_scenarios: Vec<SubScenario>,
    pub question_stem: String,
    pub options: BTreeMap<OptionLabel, String>,
    pub topic: String,
    pub difficulty: Difficulty,
    pub legal_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub page: u32,
    pub content: String,
    pub embedding: Vec<f32>,
    pub legal_references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPerformance {
    pub user_id: String,
    pub topic: String,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSearchOutcome {
    pub question_number: u32,
    pub search_range: [u32; 2],
    pub scanned_pages: Vec<u32>,
    pub found_page: Option<u32>,
    pub recovered_candidate: Option<CandidateQuestion>,
    pub final_verdict: Option<ValidationVerdict>,
}

impl ContextSearchOutcome {
    pub fn recovered(&self) -> bool {
        self.found_page.is_some() && self.recovered_candidate.is_some()
    }
}

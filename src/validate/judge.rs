use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::model::{CandidateQuestion, OptionLabel, SubScenario};

pub const JUDGE_SERVICE: &str = "judge";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOption {
    pub label: OptionLabel,
    pub text: String,
}

/// Structured question handed to the judge: stem, all five options, marked answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub question_number: u32,
    pub scenario: String,
    pub sub_scenarios: Vec<SubScenario>,
    pub question_text: String,
    pub options: Vec<JudgeOption>,
    pub marked_answer: OptionLabel,
}

impl JudgeRequest {
    /// `None` unless the candidate has an answer; options are listed A→E.
    pub fn from_candidate(candidate: &CandidateQuestion) -> Option<Self> {
        let marked_answer = candidate.correct_answer?;
        Some(Self {
            question_number: candidate.question_number,
            scenario: candidate.scenario.clone(),
            sub_scenarios: candidate.sub_scenarios.clone(),
            question_text: candidate.question_text().to_string(),
            options: OptionLabel::ALL
                .iter()
                .map(|label| JudgeOption {
                    label: *label,
                    text: candidate.option_text(*label).unwrap_or_default().to_string(),
                })
                .collect(),
            marked_answer,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub valid: bool,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    pub correct_answer_valid: bool,
}

pub trait Judge: Send + Sync {
    fn evaluate(&self, request: &JudgeRequest) -> Result<JudgeVerdict, ServiceError>;
}

/// Judge backed by an external program: the request is written to its stdin
/// as JSON and a [`JudgeVerdict`] is read back from stdout.
#[derive(Debug, Clone)]
pub struct CommandJudge {
    program: String,
    args: Vec<String>,
}

impl CommandJudge {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Judge for CommandJudge {
    fn evaluate(&self, request: &JudgeRequest) -> Result<JudgeVerdict, ServiceError> {
        let payload = serde_json::to_vec(request).map_err(|err| {
            ServiceError::new(JUDGE_SERVICE, format!("failed to encode request: {err}"))
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                ServiceError::new(
                    JUDGE_SERVICE,
                    format!("failed to execute {}: {err}", self.program),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).map_err(|err| {
                ServiceError::new(JUDGE_SERVICE, format!("failed to write request: {err}"))
            })?;
        }

        let output = child.wait_with_output().map_err(|err| {
            ServiceError::new(JUDGE_SERVICE, format!("failed to read judge output: {err}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::new(
                JUDGE_SERVICE,
                format!(
                    "{} returned non-zero exit status: {}",
                    self.program,
                    stderr.trim()
                ),
            ));
        }

        parse_judge_response(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses a judge response, tolerating prose around the JSON object.
pub fn parse_judge_response(raw: &str) -> Result<JudgeVerdict, ServiceError> {
    let trimmed = raw.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => {
            return Err(ServiceError::new(
                JUDGE_SERVICE,
                "response does not contain a JSON object",
            ));
        }
    };

    let verdict: JudgeVerdict = serde_json::from_str(json).map_err(|err| {
        ServiceError::new(JUDGE_SERVICE, format!("malformed verdict: {err}"))
    })?;

    if !verdict.confidence.is_finite() {
        return Err(ServiceError::new(JUDGE_SERVICE, "confidence is not a number"));
    }

    Ok(JudgeVerdict {
        confidence: verdict.confidence.clamp(0.0, 1.0),
        ..verdict
    })
}

use crate::model::{CandidateQuestion, OptionLabel, ValidationVerdict};

/// Structural checks only; never calls out.
pub fn check_structure(candidate: &CandidateQuestion) -> ValidationVerdict {
    let mut issues = Vec::<String>::new();

    if candidate.question_text().is_empty() {
        issues.push("question text is empty".to_string());
    }

    let option_count = candidate.non_empty_option_count();
    if option_count < OptionLabel::ALL.len() {
        let missing = OptionLabel::ALL
            .iter()
            .filter(|label| candidate.option_text(**label).is_none())
            .map(|label| label.as_str())
            .collect::<Vec<&str>>();
        issues.push(format!(
            "only {option_count} of 5 options are non-empty (missing {})",
            missing.join(", ")
        ));
    }

    match candidate.correct_answer {
        None => issues.push("correct answer is missing".to_string()),
        Some(answer) if candidate.option_text(answer).is_none() => {
            issues.push(format!("correct answer {answer} points to an empty option"));
        }
        Some(_) => {}
    }

    if issues.is_empty() {
        ValidationVerdict::basic_pass()
    } else {
        ValidationVerdict::basic_fail(issues)
    }
}

use crate::model::{AnswerKey, AnswerKeyEntry, OptionLabel};
use crate::semantic::normalize_whitespace;

use super::tokenizer::MarkerPatterns;

/// Byte offset of the answer-key header; the last header wins since the key
/// sits near the end of the document.
pub(crate) fn locate_answer_key(patterns: &MarkerPatterns, text: &str) -> Option<usize> {
    patterns
        .answer_key_header
        .find_iter(text)
        .last()
        .map(|found| found.start())
}

/// Parses the answer-key region into one entry per question number.
///
/// Accepts `7 | C | explanation`, `7. C explanation`, `7 C - explanation` and
/// compact grids such as `1 A  2 C  3 B`. Lines that match no row extend the
/// previous row's explanation.
pub(crate) fn parse_answer_key(patterns: &MarkerPatterns, region: &str) -> AnswerKey {
    let mut key = AnswerKey::new();
    let mut last_number = None::<u32>;

    for line in region.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || patterns.answer_key_header.is_match(line) {
            continue;
        }

        if let Some(pairs) = parse_grid_line(patterns, trimmed) {
            for (number, answer) in pairs {
                key.insert(
                    number,
                    AnswerKeyEntry {
                        answer: Some(answer),
                        explanation: String::new(),
                    },
                );
                last_number = Some(number);
            }
            continue;
        }

        if let Some(captures) = patterns.answer_row.captures(line) {
            let number = captures
                .get(1)
                .and_then(|value| value.as_str().parse::<u32>().ok());
            let answer = captures
                .get(2)
                .and_then(|value| OptionLabel::from_letter(value.as_str()));
            if let Some(number) = number {
                let explanation = captures
                    .get(3)
                    .map(|value| clean_explanation(value.as_str()))
                    .unwrap_or_default();
                key.insert(number, AnswerKeyEntry { answer, explanation });
                last_number = Some(number);
                continue;
            }
        }

        if let Some(entry) = last_number.and_then(|number| key.get_mut(&number)) {
            let continuation = clean_explanation(trimmed);
            if !continuation.is_empty() {
                if !entry.explanation.is_empty() {
                    entry.explanation.push(' ');
                }
                entry.explanation.push_str(&continuation);
            }
        }
    }

    key
}

fn parse_grid_line(patterns: &MarkerPatterns, line: &str) -> Option<Vec<(u32, OptionLabel)>> {
    let pairs = patterns
        .answer_pair
        .captures_iter(line)
        .filter_map(|captures| {
            let number = captures.get(1)?.as_str().parse::<u32>().ok()?;
            let answer = OptionLabel::from_letter(captures.get(2)?.as_str())?;
            Some((number, answer))
        })
        .collect::<Vec<(u32, OptionLabel)>>();

    if pairs.len() < 2 {
        return None;
    }

    let residue = patterns.answer_pair.replace_all(line, "");
    residue
        .chars()
        .all(|character| character.is_whitespace() || character == '|')
        .then_some(pairs)
}

fn clean_explanation(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches(['|', ':', '-', '–'])
        .trim_end_matches('|');
    normalize_whitespace(trimmed)
}

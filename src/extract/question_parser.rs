use crate::model::{CandidateQuestion, OptionLabel, SubScenario};
use crate::semantic::normalize_whitespace;

use super::tokenizer::{marker_text, tokenize_body, MarkerPatterns, TokenKind, SUB_SCENARIO_LABELS};

/// Phrases that conventionally open the interrogative clause of a question.
const STEM_TRIGGERS: &[&str] = &[
    "which of the following",
    "which one of",
    "which statement",
    "which is",
    "which are",
    "what is",
    "what are",
    "what was",
    "how many",
    "how much",
    "select the",
    "choose the",
    "identify the",
    "is not correct",
    "is incorrect",
    "are incorrect",
    "is correct",
    "are correct",
    "is true",
    "is false",
    "most appropriate",
    "best describes",
    "옳은 것은",
    "옳지 않은 것은",
    "맞는 것은",
    "틀린 것은",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseState {
    Scanning,
    InScenario,
    InSubScenario,
    InStem,
    InOptions(OptionLabel),
}

struct BlockBuilder {
    state: ParseState,
    scenario: String,
    sub_scenarios: Vec<SubScenario>,
    stem: String,
    options: Vec<(OptionLabel, String)>,
    inline_answer: Option<OptionLabel>,
    next_option: Option<OptionLabel>,
    next_sub_index: usize,
    closed: bool,
}

impl BlockBuilder {
    fn new() -> Self {
        Self {
            state: ParseState::Scanning,
            scenario: String::new(),
            sub_scenarios: Vec::new(),
            stem: String::new(),
            options: Vec::new(),
            inline_answer: None,
            next_option: Some(OptionLabel::A),
            next_sub_index: 0,
            closed: false,
        }
    }

    fn stem_found(&self) -> bool {
        !self.stem.trim().is_empty()
    }

    /// A mid-line option marker counts once option A is open, or right after a
    /// stem ending in `?` or `:`. Elsewhere it is a party label ("sold it to A.").
    fn accepts_mid_line_option(&self) -> bool {
        if !self.options.is_empty() {
            return true;
        }
        self.state == ParseState::InStem
            && self
                .stem
                .trim_end()
                .ends_with(|character: char| matches!(character, '?' | ':' | '？' | '：'))
    }

    fn on_text(&mut self, text: &str) {
        if self.closed {
            return;
        }

        match self.state {
            ParseState::Scanning => {
                self.state = ParseState::InScenario;
                self.route_prestem_text(text);
            }
            ParseState::InScenario | ParseState::InSubScenario => {
                self.route_prestem_text(text);
            }
            ParseState::InStem => append(&mut self.stem, text),
            ParseState::InOptions(label) => {
                if let Some((_, value)) = self.options.iter_mut().find(|(key, _)| *key == label) {
                    append(value, text);
                }
            }
        }
    }

    fn route_prestem_text(&mut self, text: &str) {
        if !self.stem_found() {
            if let Some(stem_start) = find_stem_start(text) {
                let (before, stem) = text.split_at(stem_start);
                self.append_current(before);
                append(&mut self.stem, stem);
                self.state = ParseState::InStem;
                return;
            }
        }
        self.append_current(text);
    }

    fn append_current(&mut self, text: &str) {
        match self.state {
            ParseState::InSubScenario => {
                if let Some(last) = self.sub_scenarios.last_mut() {
                    append(&mut last.text, text);
                }
            }
            _ => append(&mut self.scenario, text),
        }
    }

    fn on_sub_scenario(&mut self, label: &'static str, line_start: bool, raw: &str) {
        let expected = SUB_SCENARIO_LABELS.get(self.next_sub_index).copied();
        let in_options = matches!(self.state, ParseState::InOptions(_));
        let mid_line_rejected = !line_start && self.sub_scenarios.is_empty();
        if self.closed || in_options || mid_line_rejected || expected != Some(label) {
            self.on_text(raw);
            return;
        }

        self.sub_scenarios.push(SubScenario {
            label: label.to_string(),
            text: String::new(),
        });
        self.next_sub_index += 1;
        self.state = ParseState::InSubScenario;
    }

    fn on_option(&mut self, label: OptionLabel, line_start: bool, raw: &str) {
        let mid_line_rejected = !line_start && !self.accepts_mid_line_option();
        if self.closed || mid_line_rejected || self.next_option != Some(label) {
            self.on_text(raw);
            return;
        }

        self.options.push((label, String::new()));
        self.next_option = label.next();
        self.state = ParseState::InOptions(label);
    }

    fn on_inline_answer(&mut self, label: OptionLabel) {
        if self.inline_answer.is_none() {
            self.inline_answer = Some(label);
        }
        self.state = ParseState::Scanning;
        self.closed = true;
    }

    fn finish(self, question_number: u32, source_page: u32) -> CandidateQuestion {
        CandidateQuestion {
            question_number,
            scenario: normalize_whitespace(&self.scenario),
            sub_scenarios: self
                .sub_scenarios
                .into_iter()
                .map(|sub| SubScenario {
                    label: sub.label,
                    text: normalize_whitespace(&sub.text),
                })
                .collect(),
            question_stem: normalize_whitespace(&self.stem),
            options: self
                .options
                .into_iter()
                .map(|(label, text)| (label, normalize_whitespace(&text)))
                .collect(),
            correct_answer: self.inline_answer,
            source_page,
        }
    }
}

/// Decomposes one question body into scenario, sub-scenarios, stem and options.
///
/// Never fails: fields that cannot be located stay empty. An inline
/// `Answer: X` line, when present, becomes the candidate's answer.
pub(crate) fn parse_question_block(
    patterns: &MarkerPatterns,
    question_number: u32,
    body: &str,
    source_page: u32,
) -> CandidateQuestion {
    let mut builder = BlockBuilder::new();

    for token in tokenize_body(patterns, body) {
        match token.kind {
            TokenKind::Text(text) => builder.on_text(text),
            TokenKind::SubScenarioMarker { label, line_start } => {
                builder.on_sub_scenario(label, line_start, marker_text(body, &token))
            }
            TokenKind::OptionMarker { label, line_start } => {
                builder.on_option(label, line_start, marker_text(body, &token))
            }
            TokenKind::InlineAnswer(label) => builder.on_inline_answer(label),
        }
    }

    builder.finish(question_number, source_page)
}

/// Byte offset of the sentence holding the earliest stem trigger.
pub(crate) fn find_stem_start(text: &str) -> Option<usize> {
    let lowered = text.to_ascii_lowercase();
    let trigger_at = STEM_TRIGGERS
        .iter()
        .filter_map(|trigger| lowered.find(trigger))
        .min()?;

    let prefix = &text[..trigger_at];
    let boundary = prefix
        .char_indices()
        .filter(|(index, character)| {
            matches!(character, '.' | '?' | '!' | '\n')
                && prefix[index + character.len_utf8()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(index, character)| index + character.len_utf8())
        .last()
        .unwrap_or(0);

    let leading_ws = text[boundary..]
        .char_indices()
        .find(|(_, character)| !character.is_whitespace())
        .map(|(offset, _)| offset)
        .unwrap_or(0);

    Some(boundary + leading_ws)
}

fn append(target: &mut String, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(trimmed);
}

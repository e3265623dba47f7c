use anyhow::{Context, Result};
use regex::Regex;

use crate::model::OptionLabel;

/// Sub-scenario labels in the order they are expected to appear.
pub(crate) const SUB_SCENARIO_LABELS: [&str; 5] = ["I", "II", "III", "IV", "V"];

pub(crate) struct MarkerPatterns {
    pub(crate) question: Regex,
    pub(crate) answer_key_header: Regex,
    pub(crate) answer_row: Regex,
    pub(crate) answer_pair: Regex,
    sub_scenario: Regex,
    option: Regex,
    inline_answer: Regex,
}

impl MarkerPatterns {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            question: Regex::new(r"(?m)^[ \t]*(?:Q(?:uestion)?\.?[ \t]*)?(\d{1,3})[.)][ \t]+")
                .context("failed to compile question marker regex")?,
            answer_key_header: Regex::new(
                r"(?mi)^[ \t]*(?:answer[ \t]+key|answers(?:[ \t]+and[ \t]+explanations)?|correct[ \t]+answers|정답(?:[ \t]*및[ \t]*해설)?)[ \t]*:?[ \t]*$",
            )
            .context("failed to compile answer key header regex")?,
            answer_row: Regex::new(
                r"(?m)^[ \t]*(?:Q\.?[ \t]*)?(\d{1,3})[ \t]*[.):|\-]?[ \t]*\|?[ \t]*\(?([A-E])\)?(?:[ \t]*[|:\-–][ \t]*|[ \t]+|$)(.*)$",
            )
            .context("failed to compile answer row regex")?,
            answer_pair: Regex::new(r"(\d{1,3})[ \t]*[.):\-]?[ \t]*\(?([A-E])\)?(?:[ \t|]|$)")
                .context("failed to compile answer pair regex")?,
            sub_scenario: Regex::new(r"(?m)(?:^|[ \t])(?P<marker>\(?(?P<label>IV|V|I{1,3})[.)])[ \t]+")
                .context("failed to compile sub-scenario marker regex")?,
            option: Regex::new(r"(?m)(?:^|[ \t])(?P<marker>\(?(?P<label>[A-E])[.)])[ \t]+")
                .context("failed to compile option marker regex")?,
            inline_answer: Regex::new(
                r"(?mi)^[ \t]*(?:correct[ \t]+answer|answer|정답)[ \t]*[:：][ \t]*\(?(?P<label>[A-E])\)?[^\n]*",
            )
            .context("failed to compile inline answer regex")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind<'a> {
    Text(&'a str),
    SubScenarioMarker {
        label: &'static str,
        line_start: bool,
    },
    OptionMarker {
        label: OptionLabel,
        line_start: bool,
    },
    InlineAnswer(OptionLabel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) kind: TokenKind<'a>,
}

/// Splits a question body into marker tokens and the text spans between them.
///
/// Overlapping matches keep the earliest one; inline answer lines win over
/// option markers that start at the same offset.
pub(crate) fn tokenize_body<'a>(patterns: &MarkerPatterns, body: &'a str) -> Vec<Token<'a>> {
    let mut markers = Vec::<Token<'a>>::new();

    for captures in patterns.inline_answer.captures_iter(body) {
        let (Some(whole), Some(label)) = (captures.get(0), captures.name("label")) else {
            continue;
        };
        let Some(label) = OptionLabel::from_letter(label.as_str()) else {
            continue;
        };
        markers.push(Token {
            start: whole.start(),
            end: whole.end(),
            kind: TokenKind::InlineAnswer(label),
        });
    }

    for captures in patterns.sub_scenario.captures_iter(body) {
        let (Some(whole), Some(marker), Some(label)) = (
            captures.get(0),
            captures.name("marker"),
            captures.name("label"),
        ) else {
            continue;
        };
        let Some(label) = SUB_SCENARIO_LABELS
            .iter()
            .copied()
            .find(|candidate| *candidate == label.as_str())
        else {
            continue;
        };
        markers.push(Token {
            start: marker.start(),
            end: whole.end(),
            kind: TokenKind::SubScenarioMarker {
                label,
                line_start: starts_line(body, marker.start()),
            },
        });
    }

    for captures in patterns.option.captures_iter(body) {
        let (Some(whole), Some(marker), Some(label)) = (
            captures.get(0),
            captures.name("marker"),
            captures.name("label"),
        ) else {
            continue;
        };
        let Some(label) = OptionLabel::from_letter(label.as_str()) else {
            continue;
        };
        markers.push(Token {
            start: marker.start(),
            end: whole.end(),
            kind: TokenKind::OptionMarker {
                label,
                line_start: starts_line(body, marker.start()),
            },
        });
    }

    markers.sort_by(|left, right| {
        left.start
            .cmp(&right.start)
            .then(marker_priority(&left.kind).cmp(&marker_priority(&right.kind)))
    });

    let mut tokens = Vec::<Token<'a>>::with_capacity(markers.len() * 2 + 1);
    let mut cursor = 0usize;
    for marker in markers {
        if marker.start < cursor {
            continue;
        }
        if marker.start > cursor {
            push_text(&mut tokens, body, cursor, marker.start);
        }
        cursor = marker.end;
        tokens.push(marker);
    }
    if cursor < body.len() {
        push_text(&mut tokens, body, cursor, body.len());
    }

    tokens
}

fn marker_priority(kind: &TokenKind<'_>) -> u8 {
    match kind {
        TokenKind::InlineAnswer(_) => 0,
        TokenKind::SubScenarioMarker { .. } => 1,
        TokenKind::OptionMarker { .. } => 2,
        TokenKind::Text(_) => 3,
    }
}

/// True when only blanks separate `offset` from the previous newline (or the body start).
fn starts_line(body: &str, offset: usize) -> bool {
    body[..offset]
        .rsplit('\n')
        .next()
        .unwrap_or_default()
        .chars()
        .all(|character| character == ' ' || character == '\t')
}

fn push_text<'a>(tokens: &mut Vec<Token<'a>>, body: &'a str, start: usize, end: usize) {
    let text = &body[start..end];
    if text.trim().is_empty() {
        return;
    }
    tokens.push(Token {
        start,
        end,
        kind: TokenKind::Text(text),
    });
}

/// Raw marker text as printed, used when a marker is demoted to body text.
pub(crate) fn marker_text<'a>(body: &'a str, token: &Token<'_>) -> &'a str {
    &body[token.start..token.end]
}

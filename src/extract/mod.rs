//! Recovers structured multiple-choice questions from OCR page text.
//!
//! Two independent passes run over the concatenated document: question
//! bodies are tokenized and decomposed by a small state machine, and the
//! answer-key table is parsed into a map keyed by question number. The two
//! results are joined by [`join_answer_key`].

use anyhow::Result;
use tracing::debug;

use crate::error::PipelineError;
use crate::model::{AnswerKey, CandidateQuestion, Page};

mod answer_key;
mod question_parser;
mod tokenizer;

use answer_key::{locate_answer_key, parse_answer_key};
use question_parser::parse_question_block;
use tokenizer::MarkerPatterns;

/// Largest jump between consecutive question numbers accepted without an
/// answer-key row for the new number.
const MAX_QUESTION_NUMBER_GAP: u32 = 3;

#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<CandidateQuestion>,
    pub answer_key: AnswerKey,
    /// `ExtractionIncomplete` diagnostics; these never stop the batch.
    pub incomplete: Vec<PipelineError>,
}

#[derive(Debug, Clone, Copy)]
struct PageSpan {
    page_number: u32,
    start: usize,
}

#[derive(Debug, Clone, Copy)]
struct QuestionMarker {
    number: u32,
    start: usize,
    body_start: usize,
}

pub struct Extractor {
    patterns: MarkerPatterns,
}

impl Extractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: MarkerPatterns::new()?,
        })
    }

    pub fn extract(&self, pages: &[Page]) -> Extraction {
        let (text, spans) = concatenate_pages(pages);

        let key_start = locate_answer_key(&self.patterns, &text);
        let question_region = &text[..key_start.unwrap_or(text.len())];
        let answer_key = key_start
            .map(|start| parse_answer_key(&self.patterns, &text[start..]))
            .unwrap_or_default();

        let markers = self.question_markers(question_region, &answer_key);
        let mut candidates = Vec::<CandidateQuestion>::with_capacity(markers.len());
        for (index, marker) in markers.iter().enumerate() {
            let body_end = markers
                .get(index + 1)
                .map(|next| next.start)
                .unwrap_or(question_region.len());
            let body = &question_region[marker.body_start..body_end];
            let source_page = page_at(&spans, marker.start);
            candidates.push(parse_question_block(
                &self.patterns,
                marker.number,
                body,
                source_page,
            ));
        }

        let candidates = join_answer_key(candidates, &answer_key);
        let incomplete = candidates
            .iter()
            .filter(|candidate| !candidate.is_complete())
            .map(|candidate| PipelineError::ExtractionIncomplete {
                question_number: candidate.question_number,
                missing: candidate.missing_parts(),
            })
            .collect::<Vec<PipelineError>>();

        debug!(
            pages = pages.len(),
            candidates = candidates.len(),
            answer_key_rows = answer_key.len(),
            incomplete = incomplete.len(),
            "extraction pass finished"
        );

        Extraction {
            candidates,
            answer_key,
            incomplete,
        }
    }

    /// Re-parses one question from a local text window (no answer-key join).
    pub fn parse_window(
        &self,
        question_number: u32,
        window: &str,
        source_page: u32,
    ) -> CandidateQuestion {
        let body = self
            .patterns
            .question
            .captures_iter(window)
            .find(|captures| parse_number(captures.get(1)) == Some(question_number))
            .and_then(|captures| captures.get(0))
            .map(|found| &window[found.end()..])
            .unwrap_or(window);
        parse_question_block(&self.patterns, question_number, body, source_page)
    }

    /// Text from the marker of `question_number` up to the next question
    /// marker or answer-key header on the same page.
    pub fn question_window<'a>(&self, page_text: &'a str, question_number: u32) -> Option<&'a str> {
        let mut matches = self.patterns.question.captures_iter(page_text);
        let start = matches
            .by_ref()
            .find(|captures| parse_number(captures.get(1)) == Some(question_number))
            .and_then(|captures| captures.get(0))?
            .start();

        let next_question = matches
            .filter_map(|captures| captures.get(0))
            .map(|found| found.start())
            .find(|offset| *offset > start);
        let next_header = self
            .patterns
            .answer_key_header
            .find_iter(page_text)
            .map(|found| found.start())
            .find(|offset| *offset > start);
        let end = [next_question, next_header]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(page_text.len());

        Some(&page_text[start..end])
    }

    /// Text preceding the first question marker of a page, i.e. the tail of
    /// a question that started on an earlier page.
    pub fn leading_block<'a>(&self, page_text: &'a str) -> &'a str {
        let first_marker = self
            .patterns
            .question
            .find(page_text)
            .map(|found| found.start())
            .unwrap_or(page_text.len());
        let first_header = self
            .patterns
            .answer_key_header
            .find(page_text)
            .map(|found| found.start())
            .unwrap_or(page_text.len());
        &page_text[..first_marker.min(first_header)]
    }

    pub fn answer_key(&self, pages: &[Page]) -> AnswerKey {
        let (text, _) = concatenate_pages(pages);
        locate_answer_key(&self.patterns, &text)
            .map(|start| parse_answer_key(&self.patterns, &text[start..]))
            .unwrap_or_default()
    }

    /// Question markers in sequence. After the first marker, a numbered line
    /// opens a new question only when it follows the previous number within
    /// `MAX_QUESTION_NUMBER_GAP` or has its own answer-key row; any other
    /// numbered line (a quoted statute paragraph, a list item) is body text.
    fn question_markers(&self, region: &str, answer_key: &AnswerKey) -> Vec<QuestionMarker> {
        let mut markers = Vec::<QuestionMarker>::new();
        for captures in self.patterns.question.captures_iter(region) {
            let (Some(whole), Some(number)) = (captures.get(0), parse_number(captures.get(1)))
            else {
                continue;
            };
            if let Some(last) = markers.last() {
                let in_sequence = number > last.number
                    && (number - last.number <= MAX_QUESTION_NUMBER_GAP
                        || answer_key.contains_key(&number));
                if !in_sequence {
                    debug!(question = last.number, number, "numbered line kept as question body");
                    continue;
                }
            }
            markers.push(QuestionMarker {
                number,
                start: whole.start(),
                body_start: whole.end(),
            });
        }
        markers
    }
}

/// Applies answer-key rows to candidates by question number.
///
/// A key row overrides an inline answer; without a row the candidate keeps
/// whatever inline answer it carried, or none.
pub fn join_answer_key(
    candidates: Vec<CandidateQuestion>,
    answer_key: &AnswerKey,
) -> Vec<CandidateQuestion> {
    candidates
        .into_iter()
        .map(|candidate| {
            let keyed = answer_key
                .get(&candidate.question_number)
                .and_then(|entry| entry.answer);
            match keyed {
                Some(answer) => candidate.with_answer(Some(answer)),
                None => candidate,
            }
        })
        .collect()
}

fn parse_number(value: Option<regex::Match<'_>>) -> Option<u32> {
    value.and_then(|found| found.as_str().parse::<u32>().ok())
}

fn concatenate_pages(pages: &[Page]) -> (String, Vec<PageSpan>) {
    let mut text = String::new();
    let mut spans = Vec::<PageSpan>::with_capacity(pages.len());
    for page in pages {
        spans.push(PageSpan {
            page_number: page.page_number,
            start: text.len(),
        });
        text.push_str(&page.text);
        if !page.text.ends_with('\n') {
            text.push('\n');
        }
    }
    (text, spans)
}

fn page_at(spans: &[PageSpan], offset: usize) -> u32 {
    spans
        .iter()
        .take_while(|span| span.start <= offset)
        .last()
        .map(|span| span.page_number)
        .unwrap_or(0)
}

//! Self-healing for questions that failed validation.
//!
//! Pages around the question's source page are rescanned nearest-first; the
//! first page whose locally re-extracted candidate is fully re-validated wins.

use tracing::debug;

use crate::extract::Extractor;
use crate::model::{
    AnswerKeyEntry, CandidateQuestion, ContextSearchOutcome, PageContexts, ValidationOutcome,
    ValidationVerdict,
};
use crate::validate::{check_structure, Validator};


/// `[p, p-1, p+1, p-2, p+2, …]` out to `radius`; page numbers start at 1.
pub fn scan_order(current_page: u32, radius: u32) -> Vec<u32> {
    let mut order = Vec::<u32>::with_capacity(radius as usize * 2 + 1);
    order.push(current_page);
    for distance in 1..=radius {
        if let Some(before) = current_page.checked_sub(distance).filter(|page| *page >= 1) {
            order.push(before);
        }
        if let Some(after) = current_page.checked_add(distance) {
            order.push(after);
        }
    }
    order
}

pub struct ContextSearcher<'a> {
    validator: &'a Validator,
    answer_entry: Option<&'a AnswerKeyEntry>,
}

impl<'a> ContextSearcher<'a> {
    pub fn new(validator: &'a Validator, answer_entry: Option<&'a AnswerKeyEntry>) -> Self {
        Self {
            validator,
            answer_entry,
        }
    }

    pub fn recover(
        &self,
        question_number: u32,
        current_page: u32,
        radius: u32,
        page_contexts: &PageContexts,
    ) -> ContextSearchOutcome {
        let order = scan_order(current_page, radius);
        let search_range = [
            order.iter().copied().min().unwrap_or(current_page),
            order.iter().copied().max().unwrap_or(current_page),
        ];

        let extractor = self.validator.extractor();
        let anchor = page_contexts
            .get(&current_page)
            .and_then(|text| extractor.question_window(text, question_number));

        let mut scanned_pages = Vec::<u32>::new();
        let mut last_verdict = None::<ValidationVerdict>;

        for page in order {
            let Some(text) = page_contexts.get(&page) else {
                continue;
            };
            scanned_pages.push(page);

            let candidate = if let Some(window) = extractor.question_window(text, question_number)
            {
                extractor.parse_window(question_number, window, page)
            } else if let Some(anchor) = anchor.filter(|_| {
                page > current_page && continues_from(extractor, page_contexts, current_page, page)
            }) {
                let lead = extractor.leading_block(text);
                if lead.trim().is_empty() {
                    continue;
                }
                extractor.parse_window(question_number, &format!("{anchor}\n{lead}"), page)
            } else {
                continue;
            };

            let candidate = self.apply_answer(candidate);
            if !candidate.is_complete() {
                debug!(question_number, page, "context window incomplete");
                last_verdict = Some(check_structure(&candidate));
                continue;
            }

            match self.validator.validate_candidate(&candidate) {
                ValidationOutcome::Accepted(verdict) => {
                    return ContextSearchOutcome {
                        question_number,
                        search_range,
                        scanned_pages,
                        found_page: Some(page),
                        recovered_candidate: Some(candidate),
                        final_verdict: Some(verdict),
                    };
                }
                other => {
                    debug!(
                        question_number,
                        page,
                        status = other.status(),
                        "context candidate not accepted"
                    );
                    if let Some(verdict) = other.verdict() {
                        last_verdict = Some(verdict.clone());
                    }
                }
            }
        }

        ContextSearchOutcome {
            question_number,
            search_range,
            scanned_pages,
            found_page: None,
            recovered_candidate: None,
            final_verdict: last_verdict,
        }
    }

    fn apply_answer(&self, candidate: CandidateQuestion) -> CandidateQuestion {
        match self.answer_entry.and_then(|entry| entry.answer) {
            Some(answer) => candidate.with_answer(Some(answer)),
            None => candidate,
        }
    }
}

/// True when every page strictly between `from` and `to` carries no question
/// marker, so the leading block of `to` can still belong to the question
/// that started on `from`.
fn continues_from(extractor: &Extractor, page_contexts: &PageContexts, from: u32, to: u32) -> bool {
    (from + 1..to).all(|page| {
        page_contexts
            .get(&page)
            .is_some_and(|text| extractor.leading_block(text).len() == text.len())
    })
}

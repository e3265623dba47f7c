//! Legal text segmentation and citation detection.

use std::ops::Range;

use anyhow::{Context, Result};
use regex::Regex;

use crate::semantic::normalize_whitespace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSegment {
    pub content: String,
    /// Character offsets into the chunked text.
    pub char_range: Range<usize>,
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<ChunkSegment>;
}

/// Splits on blank lines, then packs consecutive paragraphs into segments of
/// at most `max_chars` characters. A single paragraph longer than the limit
/// stays whole.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphChunker {
    pub max_chars: usize,
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self { max_chars: 1200 }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<ChunkSegment> {
        let mut segments = Vec::<ChunkSegment>::new();
        let mut current: Option<(Range<usize>, usize)> = None;

        for paragraph in paragraph_ranges(text) {
            let length = paragraph.end - paragraph.start;
            current = match current {
                Some((range, chars)) if chars + length <= self.max_chars => {
                    Some((range.start..paragraph.end, chars + length))
                }
                Some((range, _)) => {
                    segments.push(segment(text, range));
                    Some((paragraph, length))
                }
                None => Some((paragraph, length)),
            };
        }

        if let Some((range, _)) = current {
            segments.push(segment(text, range));
        }
        segments
    }
}

/// Character ranges of the non-blank paragraphs in `text`, trimmed.
fn paragraph_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::<Range<usize>>::new();
    let mut start: Option<usize> = None;
    let mut end = 0usize;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();
        let trimmed_start = line.chars().take_while(|c| c.is_whitespace()).count();

        if line.trim().is_empty() {
            if let Some(paragraph_start) = start.take() {
                ranges.push(paragraph_start..end);
            }
        } else {
            let trailing = line.chars().rev().take_while(|c| c.is_whitespace()).count();
            start.get_or_insert(offset + trimmed_start);
            end = offset + line_chars - trailing;
        }
        offset += line_chars;
    }

    if let Some(paragraph_start) = start {
        ranges.push(paragraph_start..end);
    }
    ranges
}

fn segment(text: &str, char_range: Range<usize>) -> ChunkSegment {
    let content = text
        .chars()
        .skip(char_range.start)
        .take(char_range.end - char_range.start)
        .collect::<String>();
    ChunkSegment {
        content,
        char_range,
    }
}

/// Finds statute citations such as `Article 245(1)`, `Sec. 12-3` or `제618조의2`.
#[derive(Debug, Clone)]
pub struct LegalReferenceDetector {
    pattern: Regex,
}

impl LegalReferenceDetector {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(
            r"(?i)\b(?:article|art\.|section|sec\.)\s*\d+(?:-\d+)?(?:\s*\(\d+\))?|§\s*\d+(?:-\d+)?|제\s*\d+\s*조(?:의\s*\d+)?",
        )
        .context("failed to compile legal reference pattern")?;
        Ok(Self { pattern })
    }

    /// Distinct citations in order of first appearance, whitespace-normalized.
    pub fn detect(&self, text: &str) -> Vec<String> {
        let mut references = Vec::<String>::new();
        for found in self.pattern.find_iter(text) {
            let reference = normalize_whitespace(found.as_str());
            if !references.contains(&reference) {
                references.push(reference);
            }
        }
        references
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIVIL_ACT: &str = "Article 245 (Acquisition by Prescription)\n\
(1) A person who has possessed real property for twenty years acquires ownership.\n\
\n\
Article 246\n\
Movables possessed for ten years.\n\
\n\
\n\
Article 618 A lease takes effect when one party agrees to let the other use an object.\n";

    #[test]
    fn paragraphs_pack_up_to_the_limit() {
        let chunker = ParagraphChunker { max_chars: 200 };

        let segments = chunker.chunk(CIVIL_ACT);

        assert_eq!(segments.len(), 2);
        assert!(segments[0].content.starts_with("Article 245"));
        assert!(segments[0].content.ends_with("ten years."));
        assert!(segments[1].content.starts_with("Article 618"));
    }

    #[test]
    fn char_ranges_point_back_into_the_text() {
        let text = "  첫 번째 조항\n\n둘째 조항  \n";
        let segments = ParagraphChunker { max_chars: 4 }.chunk(text);

        assert_eq!(segments.len(), 2);
        for segment in &segments {
            let sliced = text
                .chars()
                .skip(segment.char_range.start)
                .take(segment.char_range.len())
                .collect::<String>();
            assert_eq!(sliced, segment.content);
        }
        assert_eq!(segments[0].content, "첫 번째 조항");
        assert_eq!(segments[1].content, "둘째 조항");
    }

    #[test]
    fn blank_text_has_no_segments() {
        assert!(ParagraphChunker::default().chunk("\n  \n\n").is_empty());
    }

    #[test]
    fn detects_distinct_citations_in_order() {
        let detector = LegalReferenceDetector::new().expect("pattern compiles");

        let references = detector.detect(
            "See Article 245(1) and art. 246; compare §  12-3, 제618조의2 and Article  245(1).",
        );

        assert_eq!(
            references,
            vec!["Article 245(1)", "art. 246", "§ 12-3", "제618조의2"]
        );
    }
}

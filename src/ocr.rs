//! Page text acquisition: the PDF text layer via `pdftotext`, OCR through
//! `pdftoppm` + `tesseract` for pages whose text layer is too thin, and plain
//! text files split on form feeds.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cli::OcrMode;
use crate::error::ServiceError;
use crate::model::Page;
use crate::throttle::{with_retries, RateLimiter, RetryPolicy};

pub const OCR_SERVICE: &str = "ocr";

/// One rendered page handed to an OCR engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub source: PathBuf,
    pub page_number: u32,
}

pub trait OcrService: Send + Sync {
    fn extract_text(&self, page: &PageImage) -> Result<String, ServiceError>;

    fn available(&self) -> bool {
        true
    }
}

/// `pdftoppm` renders the page, `tesseract` reads it back.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    lang: String,
}

impl TesseractOcr {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

impl OcrService for TesseractOcr {
    fn extract_text(&self, page: &PageImage) -> Result<String, ServiceError> {
        extract_page_with_ocr(&page.source, page.page_number, &self.lang)
            .map_err(|err| ServiceError::new(OCR_SERVICE, format!("{err:#}")))
    }

    fn available(&self) -> bool {
        command_available("pdftoppm") && command_available("tesseract")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageLoadConfig {
    pub ocr_mode: OcrMode,
    pub ocr_min_text_chars: usize,
    pub max_pages: Option<usize>,
    pub retry: RetryPolicy,
    pub ocr_min_interval: Duration,
}

impl Default for PageLoadConfig {
    fn default() -> Self {
        Self {
            ocr_mode: OcrMode::Auto,
            ocr_min_text_chars: 120,
            max_pages: None,
            retry: RetryPolicy::default(),
            ocr_min_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageProvenance {
    pub page_number: u32,
    pub backend: String,
    pub reason: String,
    pub text_char_count: usize,
    pub ocr_char_count: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedDocument {
    pub pages: Vec<Page>,
    pub provenance: Vec<PageProvenance>,
    pub ocr_page_count: usize,
    /// Pages whose OCR attempt failed; they keep their text-layer text.
    pub failed_pages: Vec<u32>,
    pub warnings: Vec<String>,
}

/// Loads page text for `path`. `.pdf` goes through the text layer and OCR;
/// anything else is read as UTF-8 text with form feeds separating pages.
pub fn load_pages(
    path: &Path,
    config: &PageLoadConfig,
    ocr: Option<&dyn OcrService>,
) -> Result<LoadedDocument> {
    let is_pdf = path
        .extension()
        .and_then(|value| value.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"));

    if !is_pdf {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(plain_text_document(&raw, config.max_pages));
    }

    let pages = extract_pages_with_pdftotext(path, config.max_pages)?;
    Ok(apply_ocr(path, pages, config, ocr))
}

pub fn plain_text_document(raw: &str, max_pages: Option<usize>) -> LoadedDocument {
    let pages = split_form_feeds(raw, max_pages);
    LoadedDocument {
        provenance: pages
            .iter()
            .enumerate()
            .map(|(index, text)| PageProvenance {
                page_number: (index + 1) as u32,
                backend: "plain_text".to_string(),
                reason: "text_file".to_string(),
                text_char_count: non_whitespace_char_count(text),
                ocr_char_count: None,
            })
            .collect(),
        pages: into_pages(pages),
        ..LoadedDocument::default()
    }
}

/// Replaces thin text-layer pages with OCR output according to `config.ocr_mode`.
///
/// A page whose OCR fails keeps its text-layer text and is listed in
/// `failed_pages`; the document as a whole never fails here.
pub fn apply_ocr(
    source: &Path,
    mut pages: Vec<String>,
    config: &PageLoadConfig,
    ocr: Option<&dyn OcrService>,
) -> LoadedDocument {
    let mut provenance = pages
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let chars = non_whitespace_char_count(text);
            PageProvenance {
                page_number: (index + 1) as u32,
                backend: "text_layer".to_string(),
                reason: if chars == 0 {
                    "text_layer_empty".to_string()
                } else {
                    "text_layer_default".to_string()
                },
                text_char_count: chars,
                ocr_char_count: None,
            }
        })
        .collect::<Vec<PageProvenance>>();
    let mut document = LoadedDocument::default();

    let candidates = collect_ocr_candidates(&pages, config.ocr_mode, config.ocr_min_text_chars);
    let ocr = match ocr {
        Some(service) if service.available() => Some(service),
        _ => None,
    };

    match (candidates.is_empty(), ocr) {
        (true, _) => {}
        (false, None) => {
            let message = format!(
                "OCR mode '{}' requested for {} pages but no OCR engine is available",
                config.ocr_mode.as_str(),
                candidates.len()
            );
            warn!(source = %source.display(), "{message}");
            for page_number in &candidates {
                if let Some(entry) = provenance.get_mut(page_number - 1) {
                    entry.reason = "ocr_unavailable_text_layer_fallback".to_string();
                }
            }
            document.warnings.push(message);
        }
        (false, Some(service)) => {
            let limiter = RateLimiter::new(OCR_SERVICE, config.ocr_min_interval);
            for page_number in candidates {
                let page_index = page_number - 1;
                let image = PageImage {
                    source: source.to_path_buf(),
                    page_number: page_number as u32,
                };

                match with_retries(&config.retry, Some(&limiter), || service.extract_text(&image)) {
                    Ok(text) if non_whitespace_char_count(&text) == 0
                        && matches!(config.ocr_mode, OcrMode::Auto) =>
                    {
                        document.warnings.push(format!(
                            "OCR text was empty for {} page {page_number} in auto mode",
                            source.display()
                        ));
                        if let Some(entry) = provenance.get_mut(page_index) {
                            entry.reason = "ocr_empty_text_layer_fallback".to_string();
                            entry.ocr_char_count = Some(0);
                        }
                    }
                    Ok(text) => {
                        let chars = non_whitespace_char_count(&text);
                        if let Some(page) = pages.get_mut(page_index) {
                            *page = text;
                        }
                        document.ocr_page_count += 1;
                        if let Some(entry) = provenance.get_mut(page_index) {
                            entry.backend = "ocr".to_string();
                            entry.reason = if matches!(config.ocr_mode, OcrMode::Force) {
                                "ocr_force_mode".to_string()
                            } else {
                                "ocr_auto_low_text".to_string()
                            };
                            entry.text_char_count = chars;
                            entry.ocr_char_count = Some(chars);
                        }
                    }
                    Err(exhausted) => {
                        warn!(
                            source = %source.display(),
                            page = page_number,
                            attempts = exhausted.attempts,
                            error = %exhausted.last_error,
                            "OCR failed; keeping text layer"
                        );
                        document.warnings.push(format!(
                            "OCR failed for {} page {page_number} after {} attempts: {}",
                            source.display(),
                            exhausted.attempts,
                            exhausted.last_error.message
                        ));
                        document.failed_pages.push(page_number as u32);
                        if let Some(entry) = provenance.get_mut(page_index) {
                            entry.reason = "ocr_failed_text_layer_fallback".to_string();
                        }
                    }
                }
            }
        }
    }

    debug!(
        source = %source.display(),
        pages = pages.len(),
        ocr_pages = document.ocr_page_count,
        failed_pages = document.failed_pages.len(),
        "page text loaded"
    );

    document.pages = into_pages(pages);
    document.provenance = provenance;
    document
}

pub fn non_whitespace_char_count(text: &str) -> usize {
    text.chars()
        .filter(|character| !character.is_whitespace())
        .count()
}

/// 1-based page numbers that should go through OCR.
fn collect_ocr_candidates(pages: &[String], ocr_mode: OcrMode, min_text_chars: usize) -> Vec<usize> {
    match ocr_mode {
        OcrMode::Off => Vec::new(),
        OcrMode::Force => (1..=pages.len()).collect(),
        OcrMode::Auto => pages
            .iter()
            .enumerate()
            .filter(|(_, page)| non_whitespace_char_count(page) < min_text_chars)
            .map(|(index, _)| index + 1)
            .collect(),
    }
}

fn into_pages(pages: Vec<String>) -> Vec<Page> {
    pages
        .into_iter()
        .enumerate()
        .map(|(index, text)| Page::new((index + 1) as u32, text))
        .collect()
}

fn split_form_feeds(raw: &str, max_pages: Option<usize>) -> Vec<String> {
    let mut pages = raw
        .split('\u{000C}')
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect::<Vec<String>>();

    while pages.last().is_some_and(|last| last.trim().is_empty()) {
        pages.pop();
    }
    if let Some(max_pages) = max_pages {
        pages.truncate(max_pages);
    }
    pages
}

fn command_available(program: &str) -> bool {
    Command::new(program).arg("--version").output().is_ok()
}

fn extract_pages_with_pdftotext(pdf_path: &Path, max_pages: Option<usize>) -> Result<Vec<String>> {
    let mut command = Command::new("pdftotext");
    command.arg("-enc").arg("UTF-8").arg("-layout").arg("-f").arg("1");
    if let Some(max_pages) = max_pages {
        command.arg("-l").arg(max_pages.to_string());
    }
    command.arg(pdf_path).arg("-");

    let output = command
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    Ok(split_form_feeds(&String::from_utf8_lossy(&output.stdout), None))
}

fn extract_page_with_ocr(pdf_path: &Path, page_number: u32, ocr_lang: &str) -> Result<String> {
    let pdf_stem = pdf_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("pdf");
    let safe_stem = pdf_stem
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let output_root = std::env::temp_dir().join(format!(
        "exam_corpus_ocr_{}_{}_{}_{}",
        safe_stem,
        std::process::id(),
        page_number,
        stamp
    ));
    let png_path = PathBuf::from(format!("{}.png", output_root.display()));

    let pdftoppm_output = Command::new("pdftoppm")
        .arg("-f")
        .arg(page_number.to_string())
        .arg("-l")
        .arg(page_number.to_string())
        .arg("-singlefile")
        .arg("-png")
        .arg(pdf_path)
        .arg(&output_root)
        .output()
        .with_context(|| format!("failed to execute pdftoppm for {}", pdf_path.display()))?;

    if !pdftoppm_output.status.success() {
        let stderr = String::from_utf8_lossy(&pdftoppm_output.stderr);
        bail!(
            "pdftoppm returned non-zero exit status for {} page {}: {}",
            pdf_path.display(),
            page_number,
            stderr.trim()
        );
    }

    if !png_path.exists() {
        bail!(
            "pdftoppm did not produce expected image for {} page {}",
            pdf_path.display(),
            page_number
        );
    }

    let tesseract_output = Command::new("tesseract")
        .arg(&png_path)
        .arg("stdout")
        .arg("-l")
        .arg(ocr_lang)
        .output()
        .with_context(|| format!("failed to execute tesseract for {}", png_path.display()))?;

    let _ = fs::remove_file(&png_path);

    if !tesseract_output.status.success() {
        let stderr = String::from_utf8_lossy(&tesseract_output.stderr);
        bail!(
            "tesseract returned non-zero exit status for {} page {}: {}",
            pdf_path.display(),
            page_number,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&tesseract_output.stdout)
        .replace('\u{0000}', "")
        .trim()
        .to_string())
}

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::chunker::{Chunker, LegalReferenceDetector, ParagraphChunker};
use crate::cli::IngestLegalArgs;
use crate::commands::{derive_doc_id, resolve_db_path, write_semantic_model_config_lockfile};
use crate::model::{LegalChunk, Page};
use crate::ocr::{load_pages, PageLoadConfig, TesseractOcr};
use crate::semantic::{legal_payload_for_embedding, resolve_model_config, Encoder, LocalHashEncoder};
use crate::store::{DocumentKind, DocumentRecord, Store};
use crate::throttle::RetryPolicy;
use crate::util::{ensure_directory, sha256_file};

pub fn run(args: IngestLegalArgs) -> Result<()> {
    let doc_id = derive_doc_id(&args.path, args.doc_id.as_deref())?;
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    ensure_directory(&args.cache_root)?;
    if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    info!(path = %args.path.display(), doc_id = %doc_id, "starting legal ingest");

    let load_config = PageLoadConfig {
        ocr_mode: args.ocr_mode,
        ocr_min_text_chars: args.ocr_min_text_chars,
        max_pages: args.max_pages,
        retry: RetryPolicy::default(),
        ocr_min_interval: Duration::ZERO,
    };
    let ocr = TesseractOcr::new(args.ocr_lang.as_str());
    let document = load_pages(&args.path, &load_config, Some(&ocr))?;
    for warning in &document.warnings {
        warn!(doc_id = %doc_id, "{warning}");
    }

    let encoder = LocalHashEncoder::new(resolve_model_config(&args.model_id));
    let chunker = ParagraphChunker {
        max_chars: args.max_chunk_chars,
    };
    let detector = LegalReferenceDetector::new()?;
    let chunks = build_legal_chunks(&doc_id, &document.pages, &chunker, &detector, &encoder);

    let mut store = Store::open(&db_path)?;
    store.upsert_document(&DocumentRecord {
        doc_id: doc_id.clone(),
        kind: DocumentKind::Legal,
        source_path: args.path.display().to_string(),
        sha256: sha256_file(&args.path)?,
        page_count: document.pages.len() as u32,
    })?;
    store.register_model(encoder.model())?;
    write_semantic_model_config_lockfile(&args.cache_root, encoder.model())?;
    let written = store.persist_legal_chunks(&chunks, &encoder.model().model_id)?;

    info!(
        doc_id = %doc_id,
        pages = document.pages.len(),
        chunks = written,
        with_references = chunks
            .iter()
            .filter(|chunk| !chunk.legal_references.is_empty())
            .count(),
        "legal ingest completed"
    );

    Ok(())
}

/// Chunks every page and embeds each chunk's whitespace-normalized content.
/// Chunk ids are `<doc>-p<page>-<index>`; a chunk the encoder rejects is skipped.
pub fn build_legal_chunks(
    doc_id: &str,
    pages: &[Page],
    chunker: &dyn Chunker,
    detector: &LegalReferenceDetector,
    encoder: &dyn Encoder,
) -> Vec<LegalChunk> {
    let mut chunks = Vec::<LegalChunk>::new();

    for page in pages {
        for (index, segment) in chunker.chunk(&page.text).into_iter().enumerate() {
            let Some(payload) = legal_payload_for_embedding(&segment.content) else {
                continue;
            };
            let chunk_id = format!("{doc_id}-p{:04}-{:03}", page.page_number, index + 1);
            let embedding = match encoder.encode_checked(&payload) {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(chunk_id = %chunk_id, error = %err, "skipping chunk");
                    continue;
                }
            };

            chunks.push(LegalChunk {
                legal_references: detector.detect(&segment.content),
                chunk_id,
                document_id: doc_id.to_string(),
                page: page.page_number,
                content: segment.content,
                embedding,
            });
        }
    }

    chunks
}

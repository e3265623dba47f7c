pub mod assemble;
pub mod ingest;
pub mod ingest_legal;
pub mod search;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::semantic::SemanticModelConfig;
use crate::util::{now_utc_string, sha256_hex, write_json_pretty};

const DB_FILE_NAME: &str = "exam_corpus.sqlite";
const REPORT_DIR: &str = "reports";
const SEMANTIC_MODEL_CONFIG_LOCK_PATH: &str = "manifests/semantic_model_config.lock.json";

#[derive(Debug, Serialize)]
struct SemanticModelConfigLock {
    manifest_version: u32,
    model_id: String,
    model_name: String,
    embedding_dim: usize,
    normalization: String,
    runtime_backend: String,
    created_at: String,
    checksum: String,
}

fn resolve_db_path(cache_root: &Path, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join(DB_FILE_NAME))
}

fn report_dir(cache_root: &Path) -> PathBuf {
    cache_root.join(REPORT_DIR)
}

/// Lowercase ASCII slug of the explicit id, or of the file stem.
fn derive_doc_id(path: &Path, explicit: Option<&str>) -> Result<String> {
    let source = explicit
        .map(str::to_string)
        .or_else(|| {
            path.file_stem()
                .and_then(|value| value.to_str())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let mut slug = String::with_capacity(source.len());
    for character in source.chars() {
        if character.is_ascii_alphanumeric() {
            slug.push(character.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();

    if slug.is_empty() {
        bail!(
            "cannot derive a document id from {}; pass --doc-id",
            path.display()
        );
    }
    Ok(slug)
}

fn write_semantic_model_config_lockfile(cache_root: &Path, model: &SemanticModelConfig) -> Result<()> {
    let checksum = sha256_hex(&format!(
        "{}|{}|{}|{}|{}",
        model.model_id, model.model_name, model.dimensions, model.normalization, model.backend
    ));

    let lock = SemanticModelConfigLock {
        manifest_version: 1,
        model_id: model.model_id.clone(),
        model_name: model.model_name.clone(),
        embedding_dim: model.dimensions,
        normalization: model.normalization.clone(),
        runtime_backend: model.backend.clone(),
        created_at: now_utc_string(),
        checksum,
    };

    write_json_pretty(&cache_root.join(SEMANTIC_MODEL_CONFIG_LOCK_PATH), &lock)
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::{IngestReport, REPORT_PREFIX};
use crate::commands::{report_dir, resolve_db_path};
use crate::store::Store;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let reports = report_dir(&args.cache_root);

    info!(cache_root = %args.cache_root.display(), "status requested");

    if db_path.exists() {
        let store = Store::open_read_only(&db_path)?;
        let counts = store.counts()?;
        info!(
            path = %db_path.display(),
            schema_version = %store.metadata_value("db_schema_version")?.unwrap_or_default(),
            updated_at = %store.metadata_value("db_updated_at")?.unwrap_or_default(),
            documents = counts.documents,
            active_questions = counts.active_questions,
            superseded_questions = counts.superseded_questions,
            legal_chunks = counts.legal_chunks,
            vector_entries = counts.vector_entries,
            review_queue = counts.review_queue,
            "database status"
        );
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    match latest_report_path(&reports)? {
        Some(path) => {
            let report: IngestReport = read_json(&path)?;
            info!(
                path = %path.display(),
                run_id = %report.run_id,
                doc_id = %report.doc_id,
                completed_at = %report.completed_at,
                validation_mode = %report.validation_mode,
                pages = report.counts.pages_total,
                pages_failed = report.counts.pages_failed,
                extracted = report.counts.extracted,
                valid = report.counts.valid,
                context_recovered = report.counts.context_recovered,
                rejected = report.counts.rejected,
                unvalidated = report.counts.unvalidated,
                persisted = report.counts.persisted,
                warnings = report.warnings.len(),
                "latest ingest report"
            );
        }
        None => warn!(path = %reports.display(), "no ingest reports found"),
    }

    Ok(())
}

/// Report file names embed a compact UTC timestamp, so the greatest name is the newest.
fn latest_report_path(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        let is_report = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(REPORT_PREFIX) && name.ends_with(".json"));
        if is_report && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_report_wins_and_other_files_are_ignored() {
        let dir = tempfile::tempdir().expect("temp dir");
        for name in [
            "ingest_20240101T000000Z_mock.json",
            "ingest_20240301T120000Z_mock.json",
            "ingest_20240201T000000Z_civil.json",
            "notes.json",
            "ingest_20990101T000000Z_mock.json.tmp",
        ] {
            fs::write(dir.path().join(name), "{}").expect("file written");
        }

        let latest = latest_report_path(dir.path()).expect("directory readable");

        assert_eq!(
            latest.as_deref(),
            Some(dir.path().join("ingest_20240301T120000Z_mock.json").as_path())
        );
    }

    #[test]
    fn missing_report_directory_is_not_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert_eq!(latest_report_path(&dir.path().join("reports")).expect("ok"), None);
    }
}

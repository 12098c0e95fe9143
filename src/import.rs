//! Batch import of a folder of dated Markdown journal files.
//!
//! Recognised file names (top level only):
//!
//! | Pattern | Example |
//! |---------|---------|
//! | `DD-MM-YYYY.md` | `15-12-2025.md` |
//! | `YYYY-MM-DD.md` | `2025-12-15.md` |
//!
//! Other names and impossible dates are ignored. Files are processed
//! sequentially in date order; a failing file is counted and the import
//! moves on.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use walkdir::WalkDir;

use journal_harness_core::models::ProcessingStatus;
use journal_harness_core::PipelineError;

use crate::ingest::{IngestOutcome, Orchestrator};

/// A journal file with the date parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// Counts from one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
}

/// Parse a journal file name into its date.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".md")?;
    if stem.len() != 10 || !stem.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(stem, "%Y-%m-%d"))
        .ok()
}

/// List the dated journal files in `dir`, oldest first.
pub fn scan_journal_dir(dir: &Path) -> Result<Vec<DatedFile>> {
    if !dir.is_dir() {
        return Err(PipelineError::FileAccess(format!(
            "{} is not a readable directory",
            dir.display()
        ))
        .into());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry
            .map_err(|e| PipelineError::FileAccess(format!("{}: {}", dir.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        match date_from_file_name(&name) {
            Some(date) => files.push(DatedFile {
                date,
                path: entry.into_path(),
            }),
            None => tracing::debug!(file = %name, "skipping file without a journal date"),
        }
    }

    files.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Import every dated file in `dir`.
///
/// Dates already processed are skipped unless `force` is set.
pub async fn import_dir(orchestrator: &Orchestrator, dir: &Path, force: bool) -> Result<ImportReport> {
    let files = scan_journal_dir(dir)?;
    let mut report = ImportReport {
        found: files.len(),
        ..Default::default()
    };

    for file in files {
        if !force {
            if let Some(existing) = orchestrator.store().get_entry(file.date).await? {
                if existing.status == ProcessingStatus::Done {
                    report.skipped += 1;
                    continue;
                }
            }
        }

        let text = match std::fs::read_to_string(&file.path) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(file = %file.path.display(), error = %e, "cannot read journal file");
                report.failed += 1;
                continue;
            }
        };
        if text.trim().is_empty() {
            tracing::warn!(file = %file.path.display(), "empty journal file");
            report.skipped += 1;
            continue;
        }

        match orchestrator.save_and_process(file.date, &text).await {
            Ok(IngestOutcome::Completed(r)) => {
                report.processed += 1;
                report.chunks += r.chunks;
            }
            Ok(IngestOutcome::Superseded) => report.skipped += 1,
            Err(e) => {
                tracing::error!(date = %file.date, error = %format!("{:#}", e), "import failed");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        found = report.found,
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

//! Storage abstraction for journal entries and their enrichment.
//!
//! The [`EntryStore`] trait defines the persistence operations the
//! ingestion orchestrator and the read path need, enabling pluggable
//! backends (SQLite in the app crate, in-memory here for tests).
//!
//! Entries are keyed by calendar date. Analysis and chunks belong to an
//! entry and are always replaced together, never merged.
//!
//! Pipeline writes carry the raw text they were derived from and only land
//! while that text is still the stored one. A run that started on an older
//! save can therefore never overwrite the results of a newer one.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{EntryAnalysis, EntryChunk, JournalEntry, ProcessingStatus};

/// An entry together with what is known about its enrichment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDetail {
    pub entry: JournalEntry,
    pub enrichment: Enrichment,
}

/// Enrichment state on the read path.
///
/// "Not yet processed" is distinct from "no such entry", which is
/// represented by `None` from [`entry_detail`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Enrichment {
    NotProcessed {
        status: ProcessingStatus,
        last_error: Option<String>,
    },
    Processed {
        analysis: EntryAnalysis,
        chunks: Vec<EntryChunk>,
    },
}

/// Abstract storage backend for journal entries.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_entry`](EntryStore::save_entry) | Create or overwrite the entry for a date |
/// | [`get_entry`](EntryStore::get_entry) | Fetch one entry |
/// | [`list_entries`](EntryStore::list_entries) | All entries, newest date first |
/// | [`set_status`](EntryStore::set_status) | Record pipeline progress for the current text |
/// | [`replace_enrichment`](EntryStore::replace_enrichment) | Swap analysis and chunks atomically for the current text |
/// | [`get_analysis`](EntryStore::get_analysis) | Fetch the analysis |
/// | [`get_chunks`](EntryStore::get_chunks) | Fetch chunks in index order |
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Upsert the raw text for `date`. Counts are recomputed, the status
    /// resets to `pending`, and any previous error is cleared.
    async fn save_entry(&self, date: NaiveDate, raw_text: &str) -> Result<JournalEntry>;

    async fn get_entry(&self, date: NaiveDate) -> Result<Option<JournalEntry>>;

    /// All entries ordered by date, most recent first.
    async fn list_entries(&self) -> Result<Vec<JournalEntry>>;

    /// Entry dates, most recent first.
    async fn list_dates(&self) -> Result<Vec<NaiveDate>> {
        Ok(self.list_entries().await?.into_iter().map(|e| e.date).collect())
    }

    /// Set the processing status, provided the stored text for `date` is
    /// still `raw_text`. Returns `false` and changes nothing when the entry
    /// was overwritten since. `done` also stamps `processed_at`.
    async fn set_status(
        &self,
        date: NaiveDate,
        raw_text: &str,
        status: ProcessingStatus,
        last_error: Option<&str>,
    ) -> Result<bool>;

    /// Replace the analysis and every chunk of the analysis' entry in one
    /// unit, provided the stored text is still `raw_text` (the text the
    /// enrichment was derived from). Returns `false` and writes nothing
    /// otherwise. Fails if the entry does not exist.
    async fn replace_enrichment(
        &self,
        analysis: &EntryAnalysis,
        chunks: &[EntryChunk],
        raw_text: &str,
    ) -> Result<bool>;

    async fn get_analysis(&self, date: NaiveDate) -> Result<Option<EntryAnalysis>>;

    /// Chunks for `date`, ordered by index.
    async fn get_chunks(&self, date: NaiveDate) -> Result<Vec<EntryChunk>>;
}

/// Load an entry with its enrichment.
///
/// Enrichment is reported as processed only when the entry's status is
/// `done` and an analysis exists; a re-saved entry whose pipeline has not
/// finished yet reports `NotProcessed` even if an older analysis is stored.
pub async fn entry_detail<S: EntryStore + ?Sized>(
    store: &S,
    date: NaiveDate,
) -> Result<Option<EntryDetail>> {
    let Some(entry) = store.get_entry(date).await? else {
        return Ok(None);
    };

    let analysis = if entry.status == ProcessingStatus::Done {
        store.get_analysis(date).await?
    } else {
        None
    };

    let enrichment = match analysis {
        Some(analysis) => Enrichment::Processed {
            analysis,
            chunks: store.get_chunks(date).await?,
        },
        None => Enrichment::NotProcessed {
            status: entry.status,
            last_error: entry.last_error.clone(),
        },
    };

    Ok(Some(EntryDetail { entry, enrichment }))
}

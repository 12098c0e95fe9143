//! Ingestion pipeline orchestration.
//!
//! Coordinates one entry at a time: analysis → chunking → enrichment →
//! durable storage → corpus merge → full index rebuild.
//!
//! | Step | Component | Failure |
//! |------|-----------|---------|
//! | analyse | [`Analyzer`] | entry marked `failed` |
//! | chunk | [`Chunker`] | fallback chunk, or `failed` under `on_failure = "fail"` |
//! | persist | [`EntryStore::replace_enrichment`] | entry marked `failed` |
//! | merge + rebuild | [`crate::corpus`], [`Indexer`] | entry marked `failed` |
//!
//! Different dates may be processed concurrently. The corpus merge and the
//! index rebuild share one artifact lock, so there is a single writer of
//! the corpus-wide files at any time.
//!
//! A run whose entry text was overwritten while it was in flight is
//! discarded: the newer save owns the date and has its own run. Store
//! writes carry the text they were derived from and are refused once that
//! text is no longer the stored one, and the status is marked `done` while
//! the artifact lock is still held.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Mutex;

use journal_harness_core::chunk::enrich_chunks;
use journal_harness_core::models::{entry_id_for_date, JournalEntry, ProcessingStatus};
use journal_harness_core::store::EntryStore;
use journal_harness_core::PipelineError;

use crate::analyzer::Analyzer;
use crate::chunker::{ChunkSource, Chunker};
use crate::corpus::{load_corpus, merge_entry, write_corpus};
use crate::indexer::{ArtifactPaths, Indexer};

/// Result of one successful pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub date: NaiveDate,
    pub entry_id: String,
    pub chunks: usize,
    pub fallback: bool,
    pub chunking_attempts: u32,
    pub defaulted_fields: Vec<String>,
    pub generation: String,
    pub corpus_size: usize,
}

/// What happened to a pipeline run.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Completed(IngestReport),
    /// The entry text changed while the run was in flight.
    Superseded,
}

/// Runs the ingestion pipeline against a store and the on-disk artifacts.
pub struct Orchestrator {
    store: Arc<dyn EntryStore>,
    analyzer: Analyzer,
    chunker: Chunker,
    indexer: Indexer,
    artifact_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EntryStore>,
        analyzer: Analyzer,
        chunker: Chunker,
        indexer: Indexer,
    ) -> Self {
        Self {
            store,
            analyzer,
            chunker,
            indexer,
            artifact_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn paths(&self) -> &ArtifactPaths {
        self.indexer.paths()
    }

    /// Save the raw entry, returning once the write is durable.
    pub async fn save(&self, date: NaiveDate, text: &str) -> Result<JournalEntry> {
        if text.trim().is_empty() {
            return Err(PipelineError::ValidationFailure("entry text is empty".into()).into());
        }
        let entry = self.store.save_entry(date, text).await?;
        tracing::info!(date = %date, words = entry.word_count, "entry saved");
        Ok(entry)
    }

    /// Save the entry and run the pipeline in a background task.
    ///
    /// Pipeline failures are logged and recorded on the entry's status;
    /// they never reach the caller.
    pub async fn submit(self: &Arc<Self>, date: NaiveDate, text: &str) -> Result<JournalEntry> {
        let entry = self.save(date, text).await?;
        let this = Arc::clone(self);
        let text = text.to_string();
        tokio::spawn(async move {
            // failures are logged and recorded by `process`
            let _ = this.process(date, &text).await;
        });
        Ok(entry)
    }

    /// Save and process in the foreground.
    pub async fn save_and_process(&self, date: NaiveDate, text: &str) -> Result<IngestOutcome> {
        self.save(date, text).await?;
        self.process(date, text).await
    }

    /// Re-run the pipeline on the stored text for `date`.
    pub async fn process_stored(&self, date: NaiveDate) -> Result<IngestOutcome> {
        let Some(entry) = self.store.get_entry(date).await? else {
            bail!("no entry for {}", date);
        };
        self.process(date, &entry.raw_text).await
    }

    /// Run the pipeline for an already saved entry.
    ///
    /// On failure the entry is marked `failed` (unless it was overwritten
    /// meanwhile), the error is logged, and it is returned.
    pub async fn process(&self, date: NaiveDate, text: &str) -> Result<IngestOutcome> {
        match self.run(date, text).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = format!("{:#}", e);
                if let Err(status_err) = self
                    .store
                    .set_status(date, text, ProcessingStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(date = %date, error = %status_err, "could not record failure");
                }
                tracing::error!(date = %date, error = %message, "ingestion failed");
                Err(e)
            }
        }
    }

    /// Rebuild the index from the existing corpus.
    pub async fn reindex(&self) -> Result<String> {
        let _guard = self.artifact_lock.lock().await;
        let corpus = load_corpus(&self.paths().corpus())?;
        let snapshot = self.indexer.rebuild_from_corpus(&corpus).await?;
        Ok(snapshot.metadata.generation)
    }

    async fn is_current(&self, date: NaiveDate, text: &str) -> Result<bool> {
        Ok(self
            .store
            .get_entry(date)
            .await?
            .is_some_and(|e| e.raw_text == text))
    }

    async fn run(&self, date: NaiveDate, text: &str) -> Result<IngestOutcome> {
        if text.trim().is_empty() {
            return Err(PipelineError::ValidationFailure("entry text is empty".into()).into());
        }
        let entry_id = entry_id_for_date(date);
        tracing::info!(entry_id = %entry_id, "processing entry");

        let outcome = self.analyzer.analyze(text, date).await?;
        let mut analysis = outcome.analysis;

        let chunking = self.chunker.chunk(text, &analysis).await?;
        if chunking.source == ChunkSource::Fallback {
            tracing::warn!(entry_id = %entry_id, "stored fallback chunk");
        }
        analysis.chunk_count = chunking.chunks.len();
        let chunks = enrich_chunks(chunking.chunks, &analysis, &entry_id);

        if !self.store.replace_enrichment(&analysis, &chunks, text).await? {
            return Ok(superseded(&entry_id));
        }

        let (generation, corpus_size) = {
            let _guard = self.artifact_lock.lock().await;
            if !self.is_current(date, text).await? {
                return Ok(superseded(&entry_id));
            }
            let corpus = load_corpus(&self.paths().corpus())?;
            let corpus = merge_entry(corpus, &entry_id, &chunks);
            write_corpus(&self.paths().corpus(), &corpus)?;
            let snapshot = self.indexer.rebuild_from_corpus(&corpus).await?;
            // A save landing during the rebuild leaves the status pending;
            // its own run replaces these chunks in the corpus.
            if !self
                .store
                .set_status(date, text, ProcessingStatus::Done, None)
                .await?
            {
                return Ok(superseded(&entry_id));
            }
            (snapshot.metadata.generation, corpus.len())
        };
        tracing::info!(
            entry_id = %entry_id,
            chunks = chunks.len(),
            corpus = corpus_size,
            "entry processed"
        );

        Ok(IngestOutcome::Completed(IngestReport {
            date,
            entry_id,
            chunks: chunks.len(),
            fallback: chunking.source == ChunkSource::Fallback,
            chunking_attempts: chunking.attempts,
            defaulted_fields: outcome.defaulted,
            generation,
            corpus_size,
        }))
    }
}

fn superseded(entry_id: &str) -> IngestOutcome {
    tracing::warn!(entry_id = %entry_id, "entry changed during processing, discarding result");
    IngestOutcome::Superseded
}

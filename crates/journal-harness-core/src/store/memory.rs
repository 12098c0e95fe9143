//! In-memory [`EntryStore`] implementation for testing.
//!
//! Uses a `BTreeMap` keyed by date behind `std::sync::RwLock`. Replacing
//! enrichment happens under a single write lock, which gives it the same
//! all-or-nothing behaviour as the SQLite transaction.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::models::{
    char_count, word_count, EntryAnalysis, EntryChunk, JournalEntry, ProcessingStatus,
};

use super::EntryStore;

struct StoredEntry {
    entry: JournalEntry,
    analysis: Option<EntryAnalysis>,
    chunks: Vec<EntryChunk>,
}

/// In-memory entry store for tests.
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<NaiveDate, StoredEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<NaiveDate, StoredEntry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<NaiveDate, StoredEntry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryStore for InMemoryStore {
    async fn save_entry(&self, date: NaiveDate, raw_text: &str) -> Result<JournalEntry> {
        let mut entries = self.write()?;
        let stored = entries.entry(date).or_insert_with(|| StoredEntry {
            entry: JournalEntry::new(date, raw_text),
            analysis: None,
            chunks: Vec::new(),
        });
        let e = &mut stored.entry;
        e.raw_text = raw_text.to_string();
        e.word_count = word_count(raw_text);
        e.char_count = char_count(raw_text);
        e.status = ProcessingStatus::Pending;
        e.last_error = None;
        e.updated_at = Utc::now();
        Ok(e.clone())
    }

    async fn get_entry(&self, date: NaiveDate) -> Result<Option<JournalEntry>> {
        Ok(self.read()?.get(&date).map(|s| s.entry.clone()))
    }

    async fn list_entries(&self) -> Result<Vec<JournalEntry>> {
        Ok(self
            .read()?
            .values()
            .rev()
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn set_status(
        &self,
        date: NaiveDate,
        raw_text: &str,
        status: ProcessingStatus,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let mut entries = self.write()?;
        let Some(stored) = entries.get_mut(&date) else {
            bail!("no entry for {}", date);
        };
        if stored.entry.raw_text != raw_text {
            return Ok(false);
        }
        stored.entry.status = status;
        stored.entry.last_error = last_error.map(str::to_string);
        if status == ProcessingStatus::Done {
            stored.entry.processed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn replace_enrichment(
        &self,
        analysis: &EntryAnalysis,
        chunks: &[EntryChunk],
        raw_text: &str,
    ) -> Result<bool> {
        let mut entries = self.write()?;
        let Some(stored) = entries.get_mut(&analysis.date) else {
            bail!("no entry for {}", analysis.date);
        };
        if stored.entry.raw_text != raw_text {
            return Ok(false);
        }
        stored.analysis = Some(analysis.clone());
        stored.chunks = chunks.to_vec();
        stored.chunks.sort_by_key(|c| c.index);
        Ok(true)
    }

    async fn get_analysis(&self, date: NaiveDate) -> Result<Option<EntryAnalysis>> {
        Ok(self.read()?.get(&date).and_then(|s| s.analysis.clone()))
    }

    async fn get_chunks(&self, date: NaiveDate) -> Result<Vec<EntryChunk>> {
        Ok(self
            .read()?
            .get(&date)
            .map(|s| s.chunks.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType};
    use crate::store::{entry_detail, Enrichment};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    fn analysis_for(date: NaiveDate) -> EntryAnalysis {
        EntryAnalysis {
            entry_id: crate::models::entry_id_for_date(date),
            date,
            summary: "resumen".into(),
            emotions: vec![],
            topics: vec![],
            people: None,
            intensity: None,
            chunk_count: 1,
            defaulted_fields: vec![],
        }
    }

    fn chunk_for(date: NaiveDate, index: usize, text: &str) -> EntryChunk {
        let entry_id = crate::models::entry_id_for_date(date);
        EntryChunk {
            chunk_id: crate::models::chunk_id(&entry_id, index),
            entry_id,
            date,
            index,
            chunk_type: ChunkType::Facts,
            text: text.into(),
            word_count: word_count(text),
            char_count: char_count(text),
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = InMemoryStore::new();
        store.save_entry(day(1), "uno").await.unwrap();
        let e = store.save_entry(day(1), "uno dos").await.unwrap();
        assert_eq!(e.word_count, 2);
        assert_eq!(store.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_dates_descending() {
        let store = InMemoryStore::new();
        for d in [3, 1, 2] {
            store.save_entry(day(d), "x").await.unwrap();
        }
        assert_eq!(
            store.list_dates().await.unwrap(),
            vec![day(3), day(2), day(1)]
        );
    }

    #[tokio::test]
    async fn test_save_resets_status() {
        let store = InMemoryStore::new();
        store.save_entry(day(1), "x").await.unwrap();
        store
            .set_status(day(1), "x", ProcessingStatus::Failed, Some("boom"))
            .await
            .unwrap();
        let e = store.save_entry(day(1), "y").await.unwrap();
        assert_eq!(e.status, ProcessingStatus::Pending);
        assert_eq!(e.last_error, None);
    }

    #[tokio::test]
    async fn test_replace_enrichment_drops_old_chunks() {
        let store = InMemoryStore::new();
        store.save_entry(day(1), "x").await.unwrap();
        let a = analysis_for(day(1));
        store
            .replace_enrichment(&a, &[chunk_for(day(1), 0, "a"), chunk_for(day(1), 1, "b")], "x")
            .await
            .unwrap();
        store
            .replace_enrichment(&a, &[chunk_for(day(1), 0, "c")], "x")
            .await
            .unwrap();
        let chunks = store.get_chunks(day(1)).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "c");
    }

    #[tokio::test]
    async fn test_replace_enrichment_requires_entry() {
        let store = InMemoryStore::new();
        assert!(store
            .replace_enrichment(&analysis_for(day(9)), &[], "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_entry_detail_states() {
        let store = InMemoryStore::new();
        assert!(entry_detail(&store, day(1)).await.unwrap().is_none());

        store.save_entry(day(1), "x").await.unwrap();
        let detail = entry_detail(&store, day(1)).await.unwrap().unwrap();
        assert!(matches!(
            detail.enrichment,
            Enrichment::NotProcessed {
                status: ProcessingStatus::Pending,
                ..
            }
        ));

        store
            .replace_enrichment(&analysis_for(day(1)), &[chunk_for(day(1), 0, "x")], "x")
            .await
            .unwrap();
        store
            .set_status(day(1), "x", ProcessingStatus::Done, None)
            .await
            .unwrap();
        let detail = entry_detail(&store, day(1)).await.unwrap().unwrap();
        assert!(detail.entry.processed_at.is_some());
        match detail.enrichment {
            Enrichment::Processed { chunks, .. } => assert_eq!(chunks.len(), 1),
            other => panic!("expected processed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writes_for_overwritten_text_are_ignored() {
        let store = InMemoryStore::new();
        store.save_entry(day(1), "antes").await.unwrap();
        store
            .replace_enrichment(&analysis_for(day(1)), &[chunk_for(day(1), 0, "antes")], "antes")
            .await
            .unwrap();
        store.save_entry(day(1), "después").await.unwrap();

        let written = store
            .replace_enrichment(&analysis_for(day(1)), &[chunk_for(day(1), 0, "otro")], "antes")
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(store.get_chunks(day(1)).await.unwrap()[0].text, "antes");

        let marked = store
            .set_status(day(1), "antes", ProcessingStatus::Done, None)
            .await
            .unwrap();
        assert!(!marked);
        let e = store.get_entry(day(1)).await.unwrap().unwrap();
        assert_eq!(e.status, ProcessingStatus::Pending);
        assert!(e.processed_at.is_none());
    }
}

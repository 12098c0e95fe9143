//! Core data models used throughout Journal Harness.
//!
//! These types represent the entries, analyses, chunks, and ranked search
//! results that flow through the ingestion and retrieval pipeline.
//!
//! # Identifiers
//!
//! Entry and chunk ids are derived, never generated: the same calendar date
//! always yields the same entry id, and the same `(entry_id, index)` pair
//! always yields the same chunk id. Re-ingesting a date therefore replaces
//! records under stable keys instead of accumulating new ones.
//!
//! ```rust
//! use chrono::NaiveDate;
//! use journal_harness_core::models::{chunk_id, entry_id_for_date};
//!
//! let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
//! let entry_id = entry_id_for_date(date);
//! assert_eq!(entry_id, "entry_2025_03_07");
//! assert_eq!(chunk_id(&entry_id, 2), "entry_2025_03_07_chunk_2");
//! ```

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Canonical date format for entry keys (`YYYY-MM-DD`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse an ISO `YYYY-MM-DD` date key.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| anyhow::anyhow!("invalid date '{}': expected YYYY-MM-DD ({})", s, e))
}

/// Derive the entry id for a calendar date: `entry_{YYYY}_{MM}_{DD}`.
pub fn entry_id_for_date(date: NaiveDate) -> String {
    format!("entry_{}", date.format("%Y_%m_%d"))
}

/// Derive the chunk id for position `index` within an entry.
pub fn chunk_id(entry_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", entry_id, index)
}

/// Number of whitespace-separated tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Number of Unicode scalar values.
pub fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// Enrichment state of a saved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Saved; analysis, chunks, and index not (yet) refreshed.
    Pending,
    /// The full pipeline completed for the current text.
    Done,
    /// The last pipeline run failed; see `last_error`.
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Done => "done",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "done" => Some(ProcessingStatus::Done),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal submission, unique per calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub entry_id: String,
    pub raw_text: String,
    pub word_count: usize,
    pub char_count: usize,
    pub status: ProcessingStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    /// Build a freshly saved (pending) entry for `date`.
    pub fn new(date: NaiveDate, raw_text: &str) -> Self {
        Self {
            date,
            entry_id: entry_id_for_date(date),
            raw_text: raw_text.to_string(),
            word_count: word_count(raw_text),
            char_count: char_count(raw_text),
            status: ProcessingStatus::Pending,
            last_error: None,
            updated_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Structured, entry-level analysis produced by the language model.
///
/// All model-derived fields are optional-with-defaults; `defaulted_fields`
/// names the ones the decoder had to fill in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAnalysis {
    pub entry_id: String,
    pub date: NaiveDate,
    pub summary: String,
    pub emotions: Vec<String>,
    pub topics: Vec<String>,
    pub people: Option<Vec<String>>,
    /// Passed through as returned by the model, even when not one of
    /// `low`, `medium`, `high`.
    pub intensity: Option<String>,
    pub chunk_count: usize,
    #[serde(default)]
    pub defaulted_fields: Vec<String>,
}

/// Semantic category of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Facts,
    Emotions,
    Reflection,
    Mixed,
}

impl ChunkType {
    pub const ALL: [ChunkType; 4] = [
        ChunkType::Facts,
        ChunkType::Emotions,
        ChunkType::Reflection,
        ChunkType::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Facts => "facts",
            ChunkType::Emotions => "emotions",
            ChunkType::Reflection => "reflection",
            ChunkType::Mixed => "mixed",
        }
    }

    /// Exact match against the four allowed labels.
    pub fn parse(s: &str) -> Option<Self> {
        ChunkType::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotional intensity label accepted in chunk metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Intensity::Low),
            "medium" => Some(Intensity::Medium),
            "high" => Some(Intensity::High),
            _ => None,
        }
    }
}

/// Per-chunk metadata that survived sanitization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<Intensity>,
}

impl ChunkMetadata {
    pub fn is_empty(&self) -> bool {
        self.people.is_none() && self.emotions.is_none() && self.intensity.is_none()
    }
}

/// A validated, sanitized chunk before ids and counts are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftChunk {
    pub index: usize,
    pub chunk_type: ChunkType,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A persisted chunk of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryChunk {
    pub chunk_id: String,
    pub entry_id: String,
    pub date: NaiveDate,
    pub index: usize,
    pub chunk_type: ChunkType,
    pub text: String,
    pub word_count: usize,
    pub char_count: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Metadata record aligned with one vector slot of the similarity index.
///
/// The position of a record in the metadata list is its only link to its
/// vector; the record never stores the vector itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub entry_id: String,
    pub date: NaiveDate,
    pub index: usize,
    pub chunk_type: ChunkType,
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl From<&EntryChunk> for IndexRecord {
    fn from(c: &EntryChunk) -> Self {
        Self {
            chunk_id: c.chunk_id.clone(),
            entry_id: c.entry_id.clone(),
            date: c.date,
            index: c.index,
            chunk_type: c.chunk_type,
            text: c.text.clone(),
            metadata: c.metadata.clone(),
        }
    }
}

/// A search hit: an index record plus its 1-based rank and similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    #[serde(flatten)]
    pub record: IndexRecord,
    pub rank: usize,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(entry_id_for_date(date), "entry_2024_01_09");
    }

    #[test]
    fn test_ids_are_deterministic() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 15).unwrap();
        let a = chunk_id(&entry_id_for_date(date), 3);
        let b = chunk_id(&entry_id_for_date(date), 3);
        assert_eq!(a, b);
        assert_eq!(a, "entry_2025_12_15_chunk_3");
    }

    #[test]
    fn test_parse_date_rejects_other_formats() {
        assert!(parse_date("2025-02-30").is_err());
        assert!(parse_date("15-12-2025").is_err());
        assert_eq!(
            parse_date(" 2025-12-15 ").unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 15).unwrap()
        );
    }

    #[test]
    fn test_new_entry_counts() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let e = JournalEntry::new(date, "Hoy fui al médico");
        assert_eq!(e.word_count, 4);
        assert_eq!(e.char_count, 17);
        assert_eq!(e.status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_chunk_type_parse_is_exact() {
        assert_eq!(ChunkType::parse("facts"), Some(ChunkType::Facts));
        assert_eq!(ChunkType::parse("Facts"), None);
        assert_eq!(ChunkType::parse("hechos"), None);
    }

    #[test]
    fn test_metadata_skips_absent_fields() {
        let meta = ChunkMetadata {
            intensity: Some(Intensity::High),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"intensity":"high"}"#);
    }

    #[test]
    fn test_ranked_chunk_flattens_record() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let ranked = RankedChunk {
            record: IndexRecord {
                chunk_id: "entry_2025_01_01_chunk_0".into(),
                entry_id: "entry_2025_01_01".into(),
                date,
                index: 0,
                chunk_type: ChunkType::Mixed,
                text: "hola".into(),
                metadata: ChunkMetadata::default(),
            },
            rank: 1,
            score: 0.5,
        };
        let v = serde_json::to_value(&ranked).unwrap();
        assert_eq!(v["chunk_id"], "entry_2025_01_01_chunk_0");
        assert_eq!(v["date"], "2025-01-01");
        assert_eq!(v["rank"], 1);
    }
}

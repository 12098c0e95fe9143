//! Validation, sanitization, and enrichment of model-produced chunks.
//!
//! The semantic split itself comes from a language model (see the app's
//! `chunker` module). Everything after the model call lives here and is
//! deterministic:
//!
//! 1. [`decode_chunk_payload`] turns the parsed JSON into [`RawChunk`]s.
//! 2. [`validate_chunk_set`] relabels unknown types, rejects empty texts,
//!    checks word [`coverage`] against the source entry, and reassigns
//!    indices to `0..n`.
//! 3. [`sanitize_chunks`] filters metadata down to what the chunk's own
//!    text supports.
//! 4. [`enrich_chunks`] attaches ids, counts, and the entry date.
//!
//! # Example
//!
//! ```rust
//! use journal_harness_core::chunk::coverage;
//!
//! let source = "hoy llovió mucho";
//! assert_eq!(coverage(source, &["hoy llovió"]), 2.0 / 3.0);
//! ```

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::models::{
    char_count, chunk_id, word_count, ChunkMetadata, ChunkType, DraftChunk, EntryAnalysis,
    EntryChunk, Intensity,
};

/// Emotion labels accepted in chunk metadata when none are configured.
pub const DEFAULT_EMOTIONS: [&str; 11] = [
    "alegria",
    "alegría",
    "tristeza",
    "miedo",
    "enojo",
    "ansiedad",
    "frustracion",
    "frustración",
    "calma",
    "confusion",
    "confusión",
];

/// A chunk as returned by the model, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub chunk_type: Option<String>,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// A chunk that passed structural validation. Metadata is still unfiltered.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChunk {
    pub index: usize,
    pub chunk_type: ChunkType,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Size and coverage limits applied to a chunk set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRules {
    pub min_words: usize,
    pub max_words: usize,
    pub coverage_threshold: f64,
}

impl Default for ChunkRules {
    fn default() -> Self {
        Self {
            min_words: 40,
            max_words: 120,
            coverage_threshold: 0.8,
        }
    }
}

/// Closed, case-insensitive set of emotion labels.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionVocabulary {
    labels: HashSet<String>,
}

impl EmotionVocabulary {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(&label.to_lowercase())
    }
}

impl Default for EmotionVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_EMOTIONS)
    }
}

// ============ Decoding ============

/// Decode the `{"chunks": [...]}` payload into raw chunks.
///
/// A missing or non-list `chunks` key, or an element that is not an
/// object, is an `InvalidChunkStructure`. A missing or non-string `text`
/// decodes as empty and is rejected later by validation.
pub fn decode_chunk_payload(payload: &Value) -> Result<Vec<RawChunk>, PipelineError> {
    let items = payload
        .get("chunks")
        .ok_or_else(|| PipelineError::InvalidChunkStructure("response has no 'chunks' key".into()))?
        .as_array()
        .ok_or_else(|| PipelineError::InvalidChunkStructure("'chunks' is not a list".into()))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item.as_object().ok_or_else(|| {
                PipelineError::InvalidChunkStructure(format!("chunk {} is not an object", i))
            })?;
            Ok(RawChunk {
                chunk_type: obj.get("type").and_then(Value::as_str).map(str::to_string),
                text: obj
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                metadata: obj
                    .get("metadata")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            })
        })
        .collect()
}

// ============ Validation ============

/// Distinct lowercase whitespace tokens of `text`.
fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Fraction of the source's distinct tokens reproduced across `chunks`.
///
/// Tokens are lowercase, whitespace-separated. A source with no tokens is
/// fully covered by definition.
pub fn coverage<S: AsRef<str>>(source: &str, chunks: &[S]) -> f64 {
    let source_tokens = token_set(source);
    if source_tokens.is_empty() {
        return 1.0;
    }
    let chunk_tokens: HashSet<String> = chunks
        .iter()
        .flat_map(|c| token_set(c.as_ref()))
        .collect();
    let covered = source_tokens
        .iter()
        .filter(|t| chunk_tokens.contains(*t))
        .count();
    covered as f64 / source_tokens.len() as f64
}

/// Validate a decoded chunk set against its source entry.
///
/// Indices are reassigned by position, so the result is always contiguous
/// from zero regardless of what the model numbered.
pub fn validate_chunk_set(
    source: &str,
    raw: Vec<RawChunk>,
    rules: &ChunkRules,
) -> Result<Vec<ValidatedChunk>, PipelineError> {
    if raw.is_empty() {
        return Err(PipelineError::ValidationFailure(
            "model returned an empty chunk list".into(),
        ));
    }

    let mut validated = Vec::with_capacity(raw.len());
    for (index, chunk) in raw.into_iter().enumerate() {
        let text = chunk.text.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::ValidationFailure(format!(
                "chunk {} has empty text",
                index
            )));
        }

        let chunk_type = match chunk.chunk_type.as_deref().and_then(ChunkType::parse) {
            Some(t) => t,
            None => {
                tracing::warn!(
                    index,
                    got = chunk.chunk_type.as_deref().unwrap_or("<missing>"),
                    "unknown chunk type, relabelling as mixed"
                );
                ChunkType::Mixed
            }
        };

        let words = word_count(&text);
        if words < rules.min_words {
            tracing::debug!(index, words, min = rules.min_words, "chunk below minimum size");
        } else if words > rules.max_words {
            tracing::debug!(index, words, max = rules.max_words, "chunk above recommended size");
        }

        validated.push(ValidatedChunk {
            index,
            chunk_type,
            text,
            metadata: chunk.metadata,
        });
    }

    let texts: Vec<&str> = validated.iter().map(|c| c.text.as_str()).collect();
    let ratio = coverage(source, &texts);
    if ratio < rules.coverage_threshold {
        return Err(PipelineError::ValidationFailure(format!(
            "chunks cover {:.0}% of the entry's words, need {:.0}%",
            ratio * 100.0,
            rules.coverage_threshold * 100.0
        )));
    }

    Ok(validated)
}

/// The single `mixed` chunk used when model chunking is given up on.
pub fn fallback_chunk(source: &str) -> ValidatedChunk {
    ValidatedChunk {
        index: 0,
        chunk_type: ChunkType::Mixed,
        text: source.trim().to_string(),
        metadata: Map::new(),
    }
}

// ============ Sanitization ============

/// String items of a list value, or of a lone string. Anything else is empty.
fn string_items(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    }
}

/// Keep only the metadata the chunk text itself supports.
///
/// * `people`: literal, case-sensitive substrings of the text.
/// * `emotions`: in the vocabulary and a case-insensitive substring of the
///   text; stored lowercase.
/// * `intensity`: exactly `low`, `medium`, or `high`.
///
/// Rejected values are dropped, never replaced.
pub fn sanitize_metadata(
    metadata: &Map<String, Value>,
    text: &str,
    vocabulary: &EmotionVocabulary,
) -> ChunkMetadata {
    let mut people: Vec<String> = Vec::new();
    for p in string_items(metadata.get("people")) {
        let p = p.trim();
        if !p.is_empty() && text.contains(p) && !people.iter().any(|q| q == p) {
            people.push(p.to_string());
        }
    }

    let lowered = text.to_lowercase();
    let mut emotions: Vec<String> = Vec::new();
    for e in string_items(metadata.get("emotions")) {
        let e = e.trim().to_lowercase();
        if !e.is_empty() && vocabulary.contains(&e) && lowered.contains(&e) && !emotions.contains(&e)
        {
            emotions.push(e);
        }
    }

    let intensity = metadata
        .get("intensity")
        .and_then(Value::as_str)
        .and_then(Intensity::parse);

    ChunkMetadata {
        people: (!people.is_empty()).then_some(people),
        emotions: (!emotions.is_empty()).then_some(emotions),
        intensity,
    }
}

/// Sanitize every chunk's metadata against its own text.
pub fn sanitize_chunks(
    chunks: Vec<ValidatedChunk>,
    vocabulary: &EmotionVocabulary,
) -> Vec<DraftChunk> {
    chunks
        .into_iter()
        .map(|c| DraftChunk {
            metadata: sanitize_metadata(&c.metadata, &c.text, vocabulary),
            index: c.index,
            chunk_type: c.chunk_type,
            text: c.text,
        })
        .collect()
}

// ============ Enrichment ============

/// Attach ids, counts, and the entry date to sanitized chunks.
pub fn enrich_chunks(
    drafts: Vec<DraftChunk>,
    analysis: &EntryAnalysis,
    entry_id: &str,
) -> Vec<EntryChunk> {
    drafts
        .into_iter()
        .map(|d| EntryChunk {
            chunk_id: chunk_id(entry_id, d.index),
            entry_id: entry_id.to_string(),
            date: analysis.date,
            index: d.index,
            chunk_type: d.chunk_type,
            word_count: word_count(&d.text),
            char_count: char_count(&d.text),
            text: d.text,
            metadata: d.metadata,
        })
        .collect()
}

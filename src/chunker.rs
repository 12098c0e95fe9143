//! Model-driven semantic chunking with validation, retries, and fallback.
//!
//! Each attempt runs: prompt → model call → JSON extraction → decode →
//! validation. Any failure (including an unreachable model) consumes one
//! attempt. When all `1 + max_retries` attempts fail, `on_failure` decides
//! between a single whole-entry `mixed` chunk and propagating the error.
//! Metadata sanitization runs on whatever chunk set is returned, the
//! fallback chunk included.

use std::sync::Arc;

use journal_harness_core::chunk::{
    decode_chunk_payload, fallback_chunk, sanitize_chunks, validate_chunk_set, ChunkRules,
    EmotionVocabulary, ValidatedChunk,
};
use journal_harness_core::extract::parse_model_json;
use journal_harness_core::models::{DraftChunk, EntryAnalysis};
use journal_harness_core::PipelineError;

use crate::config::{ChunkingConfig, OnFailure};
use crate::llm::ChatModel;

const SYSTEM_PROMPT: &str = "You perform strict semantic chunking of journal entries.";

/// Where a chunk set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingOutcome {
    pub chunks: Vec<DraftChunk>,
    pub source: ChunkSource,
    /// Model attempts made, successful or not.
    pub attempts: u32,
}

/// Build the chunking instructions for one entry.
pub fn chunking_prompt(entry_text: &str, rules: &ChunkRules) -> String {
    format!(
        r#"Split the journal entry below into semantic chunks.

Hard constraints:
- Each chunk holds ONE coherent idea. If an idea continues, it stays in the same chunk.
- Copy the text VERBATIM. Do not paraphrase, summarise, reorder, or omit anything.
  Every sentence of the entry must appear in exactly one chunk.
- Each chunk has at least {min} words; aim for at most {max} words.
- "type" is exactly one of: "facts", "emotions", "reflection", "mixed".
    facts: events or situations; emotions: clear emotional expression;
    reflection: thoughts and personal evaluations; mixed: inseparable combination.
- "metadata" carries only what the chunk's OWN text states explicitly:
    "people": names written in the chunk;
    "emotions": emotion words written in the chunk;
    "intensity": "low", "medium" or "high", only with a clear emotional charge.
  If something is not explicit, leave it out. Do not infer.

Answer ONLY with JSON of this exact shape:
{{
  "chunks": [
    {{
      "index": 0,
      "type": "facts",
      "text": "verbatim chunk text",
      "metadata": {{ "people": [], "emotions": [], "intensity": "low" }}
    }}
  ]
}}

ENTRY:
<<<{text}>>>"#,
        min = rules.min_words,
        max = rules.max_words,
        text = entry_text
    )
}

/// Semantic chunker over a chat model.
pub struct Chunker {
    model: Arc<dyn ChatModel>,
    temperature: f32,
    rules: ChunkRules,
    max_retries: u32,
    on_failure: OnFailure,
    vocabulary: EmotionVocabulary,
}

impl Chunker {
    pub fn new(model: Arc<dyn ChatModel>, config: &ChunkingConfig) -> Self {
        Self {
            model,
            temperature: config.temperature,
            rules: config.rules(),
            max_retries: config.max_retries,
            on_failure: config.on_failure,
            vocabulary: config.vocabulary(),
        }
    }

    /// Chunk an analysed entry.
    pub async fn chunk(
        &self,
        entry_text: &str,
        analysis: &EntryAnalysis,
    ) -> Result<ChunkingOutcome, PipelineError> {
        let total = self.max_retries + 1;
        let mut last_err = None;

        for attempt in 1..=total {
            match self.attempt(entry_text).await {
                Ok(validated) => {
                    tracing::info!(
                        entry_id = %analysis.entry_id,
                        chunks = validated.len(),
                        attempt,
                        "entry chunked"
                    );
                    return Ok(ChunkingOutcome {
                        chunks: sanitize_chunks(validated, &self.vocabulary),
                        source: ChunkSource::Model,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        entry_id = %analysis.entry_id,
                        attempt,
                        total,
                        error = %e,
                        "chunking attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| {
            PipelineError::ValidationFailure("chunking made no attempts".into())
        });

        match self.on_failure {
            OnFailure::Fail => Err(err),
            OnFailure::Fallback => {
                tracing::warn!(
                    entry_id = %analysis.entry_id,
                    error = %err,
                    "falling back to a single mixed chunk"
                );
                Ok(ChunkingOutcome {
                    chunks: sanitize_chunks(vec![fallback_chunk(entry_text)], &self.vocabulary),
                    source: ChunkSource::Fallback,
                    attempts: total,
                })
            }
        }
    }

    async fn attempt(&self, entry_text: &str) -> Result<Vec<ValidatedChunk>, PipelineError> {
        let raw = self
            .model
            .complete(
                &chunking_prompt(entry_text, &self.rules),
                SYSTEM_PROMPT,
                self.temperature,
            )
            .await?;
        tracing::debug!(raw = %raw, "raw chunking response");

        let payload = parse_model_json(&raw)?;
        let chunks = decode_chunk_payload(&payload)?;
        validate_chunk_set(entry_text, chunks, &self.rules)
    }
}

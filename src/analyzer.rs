//! Entry-level structured analysis.
//!
//! Asks the model for a neutral summary plus the emotions, topics, people,
//! and intensity explicitly present in an entry, then decodes the reply
//! with [`decode_analysis`], which defaults and reports anything the model
//! left out.

use std::sync::Arc;

use chrono::NaiveDate;

use journal_harness_core::analysis::{decode_analysis, AnalysisOutcome};
use journal_harness_core::extract::parse_model_json;
use journal_harness_core::models::entry_id_for_date;
use journal_harness_core::PipelineError;

use crate::llm::ChatModel;

const SYSTEM_PROMPT: &str =
    "You analyse personal journal entries. You answer with a single JSON object and nothing else.";

/// Build the analysis instructions for one entry.
pub fn analysis_prompt(entry_text: &str) -> String {
    format!(
        r#"Analyse the journal entry below.

Rules:
- "summary": a neutral summary of at most 3 sentences, in the entry's language.
- "emotions": only emotions the writer states explicitly.
- "topics": the main topics actually mentioned.
- "people": names of people mentioned in the text, or null if none.
- "intensity": overall emotional intensity, exactly one of "low", "medium", "high".
- Never invent facts the entry does not state.
- Use null for any field the entry gives no evidence for.

Answer ONLY with JSON of this exact shape:
{{
  "summary": "...",
  "emotions": ["..."],
  "topics": ["..."],
  "people": ["..."] or null,
  "intensity": "low" | "medium" | "high"
}}

ENTRY:
<<<{}>>>"#,
        entry_text
    )
}

/// Structured analyzer over a chat model.
pub struct Analyzer {
    model: Arc<dyn ChatModel>,
    temperature: f32,
}

impl Analyzer {
    pub fn new(model: Arc<dyn ChatModel>, temperature: f32) -> Self {
        Self { model, temperature }
    }

    /// Analyse `entry_text`, stamping the result with the entry id and date.
    pub async fn analyze(
        &self,
        entry_text: &str,
        date: NaiveDate,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let entry_id = entry_id_for_date(date);
        let raw = self
            .model
            .complete(&analysis_prompt(entry_text), SYSTEM_PROMPT, self.temperature)
            .await?;
        tracing::debug!(entry_id = %entry_id, raw = %raw, "raw analysis response");

        let payload = parse_model_json(&raw)?;
        let outcome = decode_analysis(&payload, &entry_id, date)?;
        if !outcome.defaulted.is_empty() {
            tracing::warn!(
                entry_id = %entry_id,
                defaulted = ?outcome.defaulted,
                "analysis fields defaulted"
            );
        }
        Ok(outcome)
    }
}

//! Stubs shared by the integration tests: a language model that answers
//! analysis and chunking prompts from the entry it is given, and a keyword
//! embedding with one dimension per topic.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;

use journal_harness::app::Services;
use journal_harness::config::Config;
use journal_harness::llm::{ChatMessage, ChatModel};
use journal_harness_core::embedding::EmbeddingProvider;
use journal_harness_core::store::memory::InMemoryStore;
use journal_harness_core::PipelineError;

// ─── Stubs ──────────────────────────────────────────────────────────

/// How the stub answers chunking prompts.
#[derive(Clone, Copy)]
pub enum ChunkReply {
    /// One chunk holding the whole entry.
    Whole,
    /// Unparseable text.
    Garbage,
}

/// Answers analysis and chunking prompts from the entry text it is given.
pub struct StubModel {
    chunk_reply: ChunkReply,
    fail_analysis: bool,
    pub calls: AtomicUsize,
}

impl StubModel {
    pub fn new(chunk_reply: ChunkReply) -> Arc<Self> {
        Arc::new(Self {
            chunk_reply,
            fail_analysis: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_analysis() -> Arc<Self> {
        Arc::new(Self {
            chunk_reply: ChunkReply::Whole,
            fail_analysis: true,
            calls: AtomicUsize::new(0),
        })
    }
}

fn entry_text(prompt: &str) -> &str {
    let start = prompt.find("<<<").map(|i| i + 3).unwrap_or(0);
    let end = prompt.rfind(">>>").unwrap_or(prompt.len());
    &prompt[start..end]
}

#[async_trait]
impl ChatModel for StubModel {
    async fn chat(&self, messages: &[ChatMessage], _: f32) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &messages.last().unwrap().content;

        if prompt.starts_with("Analyse the journal entry") {
            if self.fail_analysis {
                return Err(PipelineError::ModelUnavailable("stub is down".into()));
            }
            let reply = json!({
                "summary": "Una visita al médico.",
                "emotions": ["ansiedad"],
                "topics": ["salud"],
                "people": null,
                "intensity": "medium"
            });
            return Ok(format!("Aquí tienes:\n```json\n{}\n```", reply));
        }

        if prompt.starts_with("Split the journal entry") {
            return Ok(match self.chunk_reply {
                ChunkReply::Whole => json!({
                    "chunks": [{
                        "index": 0,
                        "type": "emotions",
                        "text": entry_text(prompt),
                        "metadata": {
                            "emotions": ["ansiedad", "calma"],
                            "people": ["Lucía"],
                            "intensity": "medium"
                        }
                    }]
                })
                .to_string(),
                ChunkReply::Garbage => "no puedo hacerlo".to_string(),
            });
        }

        Ok(format!("respuesta con {} mensajes", messages.len()))
    }
}

/// One dimension per topic keyword plus a small bias.
pub struct Topics;

#[async_trait]
impl EmbeddingProvider for Topics {
    fn model_name(&self) -> &str {
        "topics"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let has = |w: &str| if t.contains(w) { 1.0 } else { 0.0 };
                vec![has("trabajo"), has("familia"), has("médico"), 0.05]
            })
            .collect())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

pub fn test_config(dir: &Path, on_failure: &str) -> Config {
    toml::from_str(&format!(
        r#"[db]
path = "{dir}/journal.sqlite"

[storage]
dir = "{dir}/index"

[chunking]
on_failure = "{on_failure}"
"#,
        dir = dir.display(),
        on_failure = on_failure
    ))
    .unwrap()
}

pub fn services(tmp: &TempDir, model: Arc<StubModel>, on_failure: &str) -> Services {
    Services::assemble(
        &test_config(tmp.path(), on_failure),
        Arc::new(InMemoryStore::new()),
        model,
        Arc::new(Topics),
    )
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
}

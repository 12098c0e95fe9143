//! Conversational retrieval over the journal.
//!
//! Each question is answered from the top matching chunks plus a short
//! window of the conversation so far. The assistant reflects, it does not
//! diagnose or decide for the writer.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use journal_harness_core::models::RankedChunk;
use journal_harness_core::PipelineError;

use crate::config::RetrievalConfig;
use crate::llm::{ChatMessage, ChatModel};
use crate::query::{build_context, QueryEngine};

const SYSTEM_PROMPT: &str = r#"You are a companion for personal reflection and decision making.

Help the writer clarify their thoughts, look at situations from several angles,
notice patterns across time, and ask open questions that invite introspection.

Boundaries:
- You are not a psychologist or clinician. Never diagnose or label the writer.
- Never tell the writer which decision to take, and avoid imperative advice.
- Journal excerpts are subjective experiences, not objective facts. Do not treat
  one entry as representative of the whole person.
- Anything not stated in the excerpts is an inference: say so, or ask.
- Mention a pattern only when it recurs, and state your confidence in it.

Tone: calm, respectful, clear, never condescending. Answer in the language of
the question."#;

const NO_CONTEXT: &str = "(no matching journal entries)";

/// An answer plus the chunks that grounded it.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<RankedChunk>,
}

/// Retrieval consumer: search, assemble context, ask the model.
pub struct Assistant {
    model: Arc<dyn ChatModel>,
    query: Arc<QueryEngine>,
    top_k: usize,
    history_messages: usize,
    temperature: f32,
}

impl Assistant {
    pub fn new(model: Arc<dyn ChatModel>, query: Arc<QueryEngine>, config: &RetrievalConfig) -> Self {
        Self {
            model,
            query,
            top_k: config.top_k,
            history_messages: config.history_messages,
            temperature: config.temperature,
        }
    }

    /// Answer `question` given the prior conversation.
    ///
    /// Only the last `history_messages` entries of `history` are sent.
    pub async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<ChatAnswer> {
        if question.trim().is_empty() {
            return Err(
                PipelineError::ValidationFailure("question must not be empty".into()).into(),
            );
        }

        let sources = self.query.search(question, self.top_k).await?;
        let messages = build_messages(question, &sources, history, self.history_messages);
        tracing::debug!(
            sources = sources.len(),
            messages = messages.len(),
            "asking model"
        );

        let answer = self.model.chat(&messages, self.temperature).await?;
        Ok(ChatAnswer { answer, sources })
    }
}

/// `[system, ..last history_window of history, user(context + question)]`.
pub fn build_messages(
    question: &str,
    sources: &[RankedChunk],
    history: &[ChatMessage],
    history_window: usize,
) -> Vec<ChatMessage> {
    let context = if sources.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        build_context(sources)
    };

    let skip = history.len().saturating_sub(history_window);
    let mut messages = Vec::with_capacity(history.len() - skip + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(history[skip..].iter().cloned());
    messages.push(ChatMessage::user(format!(
        "Journal context:\n{}\n\nQuestion:\n{}",
        context, question
    )));
    messages
}

/// A conversation that remembers its own turns.
pub struct ChatSession {
    assistant: Arc<Assistant>,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            history: Vec::new(),
        }
    }

    pub async fn ask(&mut self, question: &str) -> Result<ChatAnswer> {
        let answer = self.assistant.answer(question, &self.history).await?;
        self.history.push(ChatMessage::user(question));
        self.history.push(ChatMessage::assistant(answer.answer.clone()));
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect()
    }

    #[test]
    fn test_history_window_keeps_latest() {
        let msgs = build_messages("¿y hoy?", &[], &turns(10), 6);
        assert_eq!(msgs.len(), 8);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].content, "q4");
        assert_eq!(msgs[6].content, "a9");
        assert!(msgs[7].content.ends_with("¿y hoy?"));
    }

    #[test]
    fn test_short_history_is_kept_whole() {
        let msgs = build_messages("hola", &[], &turns(2), 6);
        assert_eq!(msgs.len(), 4);
    }

    #[test]
    fn test_empty_context_is_marked() {
        let msgs = build_messages("hola", &[], &[], 6);
        assert!(msgs[1].content.contains(NO_CONTEXT));
    }
}

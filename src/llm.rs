//! Chat-completions client with rate-limit backoff.
//!
//! Every model call in the pipeline (analysis, chunking, chat) goes through
//! the [`ChatModel`] trait. The production implementation,
//! [`ResilientClient`], speaks the OpenAI-compatible chat-completions
//! protocol (Groq, LM Studio, OpenAI, Ollama's `/v1` shim, …).
//!
//! # Retry Strategy
//!
//! Only HTTP 429 is retried here. Everything else fails fast so that the
//! caller (e.g. the chunker, which has its own attempt budget) decides.
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 2xx with `choices[0].message.content` | the content, verbatim |
//! | 2xx without it | `MalformedResponse` |
//! | 429 | sleep `base · 2^(attempt-1) + jitter`, retry |
//! | 429 after `max_retries` retries | `ModelUnavailable` |
//! | other status, timeout, connection error | `ModelUnavailable` immediately |

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use journal_harness_core::PipelineError;

use crate::config::LlmConfig;

/// One message in a chat-completions conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A language model reachable through chat messages.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `messages` and return the raw text of the reply.
    async fn chat(&self, messages: &[ChatMessage], temperature: f32)
        -> Result<String, PipelineError>;

    /// Single-turn convenience: `[system, user]`.
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
    ) -> Result<String, PipelineError> {
        self.chat(
            &[ChatMessage::system(system_prompt), ChatMessage::user(prompt)],
            temperature,
        )
        .await
    }
}

/// Backoff schedule for rate-limited requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.max_retries, config.base_delay_ms, config.jitter_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        backoff + jitter
    }
}

/// HTTP chat-completions client that backs off on 429.
pub struct ResilientClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl ResilientClient {
    /// Build a client from `[llm]`. The API key is read from the
    /// environment variable named by `api_key_env`; an unset variable means
    /// requests go out unauthenticated.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::debug!(
                var = %config.api_key_env,
                "no API key in environment, sending unauthenticated requests"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            policy: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl ChatModel for ResilientClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });

        let mut attempt: u32 = 0;
        loop {
            let mut req = self.http.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let response = req.send().await.map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                PipelineError::ModelUnavailable(format!("request to {} {}: {}", self.url, kind, e))
            })?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.policy.max_retries {
                    return Err(PipelineError::ModelUnavailable(format!(
                        "still rate limited after {} retries",
                        self.policy.max_retries
                    )));
                }
                attempt += 1;
                let delay = self.policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "model endpoint returned 429, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                return Err(PipelineError::ModelUnavailable(format!(
                    "model endpoint error {}: {}",
                    status, body_text
                )));
            }

            let json: Value = response.json().await.map_err(|e| {
                PipelineError::MalformedResponse(format!("response body is not JSON: {}", e))
            })?;

            return json
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    PipelineError::MalformedResponse(
                        "response has no choices[0].message.content".into(),
                    )
                });
        }
    }
}

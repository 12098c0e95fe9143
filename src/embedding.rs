//! Embedding provider implementations.
//!
//! Implements the core [`EmbeddingProvider`] trait for each backend:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: OpenAI-compatible `/v1/embeddings` with retry and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models in-process via fastembed; no network calls after model download.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use journal_harness::config::EmbeddingConfig;
//! # use journal_harness::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Remote providers
//!
//! `openai` and `ollama` share one HTTP path ([`HttpEmbedder`]). Rate
//! limits (429), server errors (5xx), and connection failures are retried
//! on the same backoff schedule as the chat client ([`RetryPolicy`]), built
//! from `[embedding] max_retries, base_delay_ms, jitter_ms`. Any other
//! status fails at once. Failures surface as
//! [`PipelineError::ModelUnavailable`]; a reply that does not decode, or
//! carries the wrong number of vectors, as
//! [`PipelineError::MalformedResponse`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use journal_harness_core::embedding::EmbeddingProvider;
use journal_harness_core::PipelineError;

use crate::config::EmbeddingConfig;
use crate::llm::RetryPolicy;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Model used by the `local` provider when none is configured.
pub const DEFAULT_LOCAL_MODEL: &str = "multilingual-e5-small";

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
/// Ingestion still analyses, chunks, and stores entries, but the index
/// rebuild fails and the entry is marked `failed`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled; set [embedding] provider in the config")
    }
}

// ============ Shared HTTP path ============

/// Request body accepted by both `/v1/embeddings` and `/api/embed`.
#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

fn required<T: Clone>(value: &Option<T>, field: &str, backend: &str) -> Result<T> {
    match value {
        Some(v) => Ok(v.clone()),
        None => bail!("embedding.{} required for the {} provider", field, backend),
    }
}

/// One embeddings endpoint plus the client and backoff used to reach it.
struct HttpEmbedder {
    backend: &'static str,
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl HttpEmbedder {
    fn new(
        backend: &'static str,
        config: &EmbeddingConfig,
        endpoint: String,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            backend,
            model: required(&config.model, "model", backend)?,
            dims: required(&config.dims, "dims", backend)?,
            endpoint,
            api_key,
            policy: RetryPolicy::new(config.max_retries, config.base_delay_ms, config.jitter_ms),
            client,
        })
    }

    /// POST `texts` and decode the reply as `T`.
    async fn post<T: DeserializeOwned>(&self, texts: &[String]) -> Result<T, PipelineError> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut attempt: u32 = 0;
        loop {
            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let failure = match req.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<T>().await.map_err(|e| {
                        PipelineError::MalformedResponse(format!(
                            "{} embeddings reply did not decode: {}",
                            self.backend, e
                        ))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let message = format!("{} embeddings error {}: {}", self.backend, status, text);
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(PipelineError::ModelUnavailable(message));
                    }
                    message
                }
                Err(e) => format!("{} embeddings request to {} failed: {}", self.backend, self.endpoint, e),
            };

            if attempt >= self.policy.max_retries {
                return Err(PipelineError::ModelUnavailable(format!(
                    "{} (gave up after {} retries)",
                    failure, self.policy.max_retries
                )));
            }
            attempt += 1;
            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                backend = self.backend,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "embedding request failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Vectors must come back one per input text.
fn expect_count(
    backend: &str,
    vectors: Vec<Vec<f32>>,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, PipelineError> {
    if vectors.len() != texts.len() {
        return Err(PipelineError::MalformedResponse(format!(
            "{} returned {} embeddings for {} texts",
            backend,
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

// ============ OpenAI Provider ============

#[derive(Deserialize)]
struct OpenAiEmbeddings {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    /// Vectors in input order: by each item's `index`, else as listed.
    fn into_vectors(self) -> Vec<Vec<f32>> {
        let mut items: Vec<(usize, Vec<f32>)> = self
            .data
            .into_iter()
            .enumerate()
            .map(|(pos, item)| (item.index.unwrap_or(pos), item.embedding))
            .collect();
        items.sort_by_key(|(i, _)| *i);
        items.into_iter().map(|(_, v)| v).collect()
    }
}

/// Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.
///
/// The key comes from the variable named by `embedding.api_key_env`. It is
/// required for api.openai.com; a custom `embedding.url` (LM Studio, vLLM)
/// may run without one.
pub struct OpenAIProvider {
    http: HttpEmbedder,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string());
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() && endpoint == OPENAI_EMBEDDINGS_URL {
            bail!("{} environment variable not set", config.api_key_env);
        }
        Ok(Self {
            http: HttpEmbedder::new("openai", config, endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.http.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let reply: OpenAiEmbeddings = self.http.post(texts).await?;
        Ok(expect_count("openai", reply.into_vectors(), texts)?)
    }
}

// ============ Ollama Provider ============

#[derive(Deserialize)]
struct OllamaEmbeddings {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    http: HttpEmbedder,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_URL);
        let endpoint = format!("{}/api/embed", base.trim_end_matches('/'));
        Ok(Self {
            http: HttpEmbedder::new("ollama", config, endpoint, None)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.http.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let reply: OllamaEmbeddings = self.http.post(texts).await?;
        Ok(expect_count("ollama", reply.embeddings, texts)?)
    }
}

// ============ Local Provider (fastembed) ============

/// Dimensions of the models the local provider knows about.
pub fn local_model_dims(name: &str) -> usize {
    match name {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// In-process embedding provider backed by fastembed (bundled ORT).
///
/// The model is downloaded from Hugging Face on first use and cached; it
/// is loaded once per provider and reused across calls. Inference runs on
/// tokio's blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or_else(|| local_model_dims(&model_name));
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let slot = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let Some(model) = guard.as_mut() else {
                bail!("local embedding model unavailable");
            };
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{extract::State, http::StatusCode as HttpStatus, routing::post, Json, Router};
    use serde_json::{json, Value};

    #[test]
    fn test_disabled_by_default() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
    }

    #[tokio::test]
    async fn test_disabled_embed_errors() {
        let err = DisabledProvider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_openai_reply_follows_index() {
        let reply: OpenAiEmbeddings = serde_json::from_value(json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }))
        .unwrap();
        let vecs = reply.into_vectors();
        assert_eq!(vecs[0], vec![1.0, 0.0]);
        assert_eq!(vecs[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_ollama_requires_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            ..Default::default()
        };
        let err = OllamaProvider::new(&config).err().unwrap();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_known_local_dims() {
        assert_eq!(local_model_dims(DEFAULT_LOCAL_MODEL), 384);
        assert_eq!(local_model_dims("multilingual-e5-large"), 1024);
    }

    // ─── HTTP path against a local stub ─────────────────────────────

    /// Answers `failures` times with `fail_status`, then with `reply`.
    struct Stub {
        failures: usize,
        fail_status: HttpStatus,
        reply: Value,
        hits: AtomicUsize,
    }

    async fn handle(State(stub): State<Arc<Stub>>, Json(_): Json<Value>) -> (HttpStatus, Json<Value>) {
        if stub.hits.fetch_add(1, Ordering::SeqCst) < stub.failures {
            return (stub.fail_status, Json(json!({"error": "busy"})));
        }
        (HttpStatus::OK, Json(stub.reply.clone()))
    }

    async fn ollama_against(stub: Arc<Stub>) -> OllamaProvider {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/embed", post(handle)).with_state(stub);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(2),
            url: Some(format!("http://{}", addr)),
            max_retries: 3,
            base_delay_ms: 5,
            jitter_ms: 0,
            ..Default::default()
        };
        OllamaProvider::new(&config).unwrap()
    }

    fn stub(failures: usize, fail_status: HttpStatus, reply: Value) -> Arc<Stub> {
        Arc::new(Stub {
            failures,
            fail_status,
            reply,
            hits: AtomicUsize::new(0),
        })
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("texto {}", i)).collect()
    }

    fn pipeline_code(err: &anyhow::Error) -> &'static str {
        err.downcast_ref::<PipelineError>().unwrap().code()
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let s = stub(2, HttpStatus::SERVICE_UNAVAILABLE, json!({"embeddings": [[1.0, 0.0]]}));
        let provider = ollama_against(Arc::clone(&s)).await;
        let vecs = provider.embed(&texts(1)).await.unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0]]);
        assert_eq!(s.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let s = stub(usize::MAX, HttpStatus::BAD_REQUEST, json!({}));
        let provider = ollama_against(Arc::clone(&s)).await;
        let err = provider.embed(&texts(1)).await.unwrap_err();
        assert_eq!(pipeline_code(&err), "model_unavailable");
        assert_eq!(s.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let s = stub(usize::MAX, HttpStatus::TOO_MANY_REQUESTS, json!({}));
        let provider = ollama_against(Arc::clone(&s)).await;
        let err = provider.embed(&texts(1)).await.unwrap_err();
        assert_eq!(pipeline_code(&err), "model_unavailable");
        assert_eq!(s.hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wrong_shape_or_count_is_malformed() {
        let s = stub(0, HttpStatus::OK, json!({"embedding": [1.0, 0.0]}));
        let err = ollama_against(s).await.embed(&texts(1)).await.unwrap_err();
        assert_eq!(pipeline_code(&err), "malformed_response");

        let s = stub(0, HttpStatus::OK, json!({"embeddings": [[1.0, 0.0]]}));
        let err = ollama_against(s).await.embed(&texts(2)).await.unwrap_err();
        assert_eq!(pipeline_code(&err), "malformed_response");
    }
}

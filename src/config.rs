//! Configuration parsing and validation.
//!
//! Journal Harness is configured via a TOML file (default:
//! `config/journal.toml`). Only `[db]` is required; every other section
//! has working defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/journal.sqlite"
//!
//! [storage]
//! dir = "./data/index"
//!
//! [llm]
//! url = "https://api.groq.com/openai/v1/chat/completions"
//! model = "llama-3.3-70b-versatile"
//! api_key_env = "GROQ_API_KEY"
//!
//! [chunking]
//! min_words = 40
//! on_failure = "fallback"
//!
//! [embedding]
//! provider = "local"
//! model = "multilingual-e5-small"
//!
//! [retrieval]
//! top_k = 5
//!
//! [server]
//! bind = "127.0.0.1:7331"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use journal_harness_core::chunk::{ChunkRules, EmotionVocabulary, DEFAULT_EMOTIONS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where the corpus, index, and metadata files live.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

// ============ Language model ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the bearer token. An unset
    /// variable sends no `Authorization` header (local servers).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_llm_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_llm_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_llm_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_temperature")]
    pub temperature: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            temperature: default_analysis_temperature(),
        }
    }
}

fn default_analysis_temperature() -> f32 {
    0.3
}

// ============ Chunking ============

/// What the chunker does once every model attempt has failed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Emit the whole entry as one `mixed` chunk.
    #[default]
    Fallback,
    /// Propagate the last error.
    Fail,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_temperature")]
    pub temperature: f32,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    #[serde(default = "default_chunking_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default = "default_emotion_vocabulary")]
    pub emotion_vocabulary: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            temperature: default_chunking_temperature(),
            min_words: default_min_words(),
            max_words: default_max_words(),
            coverage_threshold: default_coverage_threshold(),
            max_retries: default_chunking_max_retries(),
            on_failure: OnFailure::default(),
            emotion_vocabulary: default_emotion_vocabulary(),
        }
    }
}

impl ChunkingConfig {
    pub fn rules(&self) -> ChunkRules {
        ChunkRules {
            min_words: self.min_words,
            max_words: self.max_words,
            coverage_threshold: self.coverage_threshold,
        }
    }

    pub fn vocabulary(&self) -> EmotionVocabulary {
        EmotionVocabulary::new(&self.emotion_vocabulary)
    }
}

fn default_chunking_temperature() -> f32 {
    0.2
}
fn default_min_words() -> usize {
    40
}
fn default_max_words() -> usize {
    120
}
fn default_coverage_threshold() -> f64 {
    0.8
}
fn default_chunking_max_retries() -> u32 {
    2
}
fn default_emotion_vocabulary() -> Vec<String> {
    DEFAULT_EMOTIONS.iter().map(|s| s.to_string()).collect()
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the `openai` provider's key.
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_embedding_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Retrieval / server ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_messages: default_history_messages(),
            temperature: default_chat_temperature(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_history_messages() -> usize {
    6
}
fn default_chat_temperature() -> f32 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

/// Read, parse, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate llm
    if config.llm.url.trim().is_empty() {
        anyhow::bail!("llm.url must not be empty");
    }
    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    // Validate chunking
    let c = &config.chunking;
    if c.min_words == 0 {
        anyhow::bail!("chunking.min_words must be > 0");
    }
    if c.max_words < c.min_words {
        anyhow::bail!("chunking.max_words must be >= chunking.min_words");
    }
    if !(0.0..=1.0).contains(&c.coverage_threshold) {
        anyhow::bail!("chunking.coverage_threshold must be in [0.0, 1.0]");
    }
    if c.emotion_vocabulary.is_empty() {
        anyhow::bail!("chunking.emotion_vocabulary must not be empty");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./j.sqlite\"\n").unwrap();
        assert_eq!(config.llm.max_retries, 5);
        assert_eq!(config.llm.base_delay_ms, 2000);
        assert_eq!(config.llm.timeout_secs, 90);
        assert_eq!(config.chunking.min_words, 40);
        assert_eq!(config.chunking.max_retries, 2);
        assert_eq!(config.chunking.on_failure, OnFailure::Fallback);
        assert!((config.analysis.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.history_messages, 6);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.embedding.base_delay_ms, 2000);
        assert!(config.chunking.vocabulary().contains("ansiedad"));
    }

    #[test]
    fn test_on_failure_fail() {
        let config = parse("[db]\npath = \"x\"\n[chunking]\non_failure = \"fail\"\n").unwrap();
        assert_eq!(config.chunking.on_failure, OnFailure::Fail);
    }

    #[test]
    fn test_unknown_on_failure_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[chunking]\non_failure = \"ignore\"\n").is_err());
    }

    #[test]
    fn test_missing_db_rejected() {
        assert!(parse("[llm]\nmodel = \"m\"\n").is_err());
    }

    #[test]
    fn test_openai_embedding_requires_dims() {
        let err = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_bad_coverage_threshold() {
        assert!(parse("[db]\npath = \"x\"\n[chunking]\ncoverage_threshold = 1.5\n").is_err());
    }

    #[test]
    fn test_word_bounds_checked() {
        assert!(parse("[db]\npath = \"x\"\n[chunking]\nmin_words = 50\nmax_words = 10\n").is_err());
    }
}

//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Pipeline components (model client, extractor, analyzer, chunker) return
//! [`PipelineError`] so callers can decide locally whether a failure is
//! retryable. Application glue wraps these in `anyhow::Error`.

use thiserror::Error;

/// A failure on the ingestion or retrieval path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// A source file or artifact is missing or unreadable.
    #[error("file access error: {0}")]
    FileAccess(String),

    /// No JSON payload could be extracted from a model response.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// The chunk output does not follow the expected schema.
    #[error("invalid chunk structure: {0}")]
    InvalidChunkStructure(String),

    /// The model endpoint could not be reached or kept rate limiting.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Empty input, or a generated chunk set that failed its coverage checks.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// The on-disk index and metadata files belong to different rebuilds.
    #[error("stale index: index generation {index} does not match metadata generation {metadata}")]
    StaleIndex { index: String, metadata: String },
}

impl PipelineError {
    /// Short machine-readable code, used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::FileAccess(_) => "file_access",
            PipelineError::MalformedResponse(_) => "malformed_response",
            PipelineError::InvalidChunkStructure(_) => "invalid_chunk_structure",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::ValidationFailure(_) => "validation_failure",
            PipelineError::StaleIndex { .. } => "stale_index",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = PipelineError::ModelUnavailable("429 after 5 retries".into());
        assert_eq!(err.to_string(), "model unavailable: 429 after 5 retries");
        assert_eq!(err.code(), "model_unavailable");
    }

    #[test]
    fn test_stale_index_message() {
        let err = PipelineError::StaleIndex {
            index: "a".into(),
            metadata: "b".into(),
        };
        assert!(err.to_string().contains("index generation a"));
    }
}

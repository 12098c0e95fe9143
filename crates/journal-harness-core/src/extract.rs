//! Recovery of a JSON payload from free-form model output.
//!
//! Language models wrap JSON in prose, Markdown fences, or both. The
//! extractor tries, in order:
//!
//! | Step | Pattern | Example input |
//! |------|---------|---------------|
//! | 1 | fenced block, optionally tagged `json` | ```` ```json {..} ``` ```` |
//! | 2 | greedy span from first `{` to last `}` | `Sure! {..} Hope it helps` |
//! | 3 | whole trimmed text shaped like an object | `{..}` |
//!
//! Nothing here knows which model produced the text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::PipelineError;

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid regex"))
}

fn brace_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

/// Locate the JSON object text inside a raw model response.
///
/// Returns `MalformedResponse` when no candidate is found. The returned
/// text is not guaranteed to parse; see [`parse_model_json`].
pub fn extract_json(raw: &str) -> Result<String, PipelineError> {
    if let Some(caps) = fenced_block().captures(raw) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if !body.is_empty() {
                return Ok(body.to_string());
            }
        }
    }

    if let Some(m) = brace_span().find(raw) {
        return Ok(m.as_str().to_string());
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Ok(trimmed.to_string());
    }

    Err(PipelineError::MalformedResponse(format!(
        "no JSON object found in model output ({} chars)",
        raw.chars().count()
    )))
}

/// Parse a model response into a JSON value.
///
/// A response that is already valid JSON is parsed directly; otherwise the
/// payload is located with [`extract_json`] first.
pub fn parse_model_json(raw: &str) -> Result<Value, PipelineError> {
    if let Ok(v) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(v);
    }

    let candidate = extract_json(raw)?;
    serde_json::from_str(&candidate)
        .map_err(|e| PipelineError::MalformedResponse(format!("extracted text is not JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json_block() {
        let raw = "Aquí tienes:\n```json\n{\"summary\": \"ok\"}\n```\nSaludos";
        assert_eq!(extract_json(raw).unwrap(), "{\"summary\": \"ok\"}");
    }

    #[test]
    fn test_untagged_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_greedy_brace_span() {
        let raw = "Claro. {\"chunks\": [{\"text\": \"x\"}]} Espero que sirva.";
        assert_eq!(
            extract_json(raw).unwrap(),
            "{\"chunks\": [{\"text\": \"x\"}]}"
        );
    }

    #[test]
    fn test_no_json_is_malformed() {
        let err = extract_json("lo siento, no puedo").unwrap_err();
        assert_eq!(err.code(), "malformed_response");
    }

    #[test]
    fn test_parse_direct() {
        let v = parse_model_json("  {\"x\": [1, 2]}  ").unwrap();
        assert_eq!(v["x"][1], 2);
    }

    #[test]
    fn test_parse_through_fence() {
        let v = parse_model_json("```json\n{\"intensity\": \"low\"}\n```").unwrap();
        assert_eq!(v["intensity"], "low");
    }

    #[test]
    fn test_parse_broken_json_is_malformed() {
        let err = parse_model_json("resultado: {\"a\": }").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }
}

//! Strict decoder for the entry-level analysis returned by the model.
//!
//! The model is asked for an object with `summary`, `emotions`, `topics`,
//! `people`, and `intensity`. Real responses drop keys, send `null`, or send
//! a bare string where a list belongs. The decoder accepts what it can,
//! fills defaults for the rest, and reports every defaulted field so callers
//! can see how much of the analysis was actually produced by the model.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::models::{EntryAnalysis, Intensity};

/// The fields the analysis prompt asks for, in prompt order.
pub const ANALYSIS_FIELDS: [&str; 5] = ["summary", "emotions", "topics", "people", "intensity"];

/// Result of decoding an analysis payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub analysis: EntryAnalysis,
    /// Fields that were missing, `null`, or malformed and got a default.
    pub defaulted: Vec<String>,
}

/// Decode a parsed model payload into an [`EntryAnalysis`] for one entry.
///
/// The payload must be a JSON object. `people: null` is a legal value
/// meaning "nobody mentioned" and is not reported as defaulted.
pub fn decode_analysis(
    payload: &Value,
    entry_id: &str,
    date: NaiveDate,
) -> Result<AnalysisOutcome, PipelineError> {
    let obj = payload.as_object().ok_or_else(|| {
        PipelineError::MalformedResponse(format!(
            "analysis payload must be a JSON object, got {}",
            kind_of(payload)
        ))
    })?;

    let mut defaulted = Vec::new();

    for field in ANALYSIS_FIELDS {
        if !obj.contains_key(field) {
            tracing::warn!(entry_id, field, "analysis response is missing a field");
        }
    }

    let summary = match obj.get("summary") {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => {
            defaulted.push("summary".to_string());
            String::new()
        }
    };

    let emotions = decode_list(obj, "emotions").unwrap_or_else(|| {
        defaulted.push("emotions".to_string());
        Vec::new()
    });

    let topics = decode_list(obj, "topics").unwrap_or_else(|| {
        defaulted.push("topics".to_string());
        Vec::new()
    });

    let people = match obj.get("people") {
        Some(Value::Null) => None,
        Some(_) => match decode_list(obj, "people") {
            Some(list) => Some(list),
            None => {
                defaulted.push("people".to_string());
                None
            }
        },
        None => {
            defaulted.push("people".to_string());
            None
        }
    };

    let intensity = match obj.get("intensity") {
        Some(Value::String(s)) => {
            if Intensity::parse(s).is_none() {
                tracing::warn!(entry_id, intensity = %s, "intensity outside low|medium|high, keeping as-is");
            }
            Some(s.clone())
        }
        _ => {
            defaulted.push("intensity".to_string());
            None
        }
    };

    let analysis = EntryAnalysis {
        entry_id: entry_id.to_string(),
        date,
        summary,
        emotions,
        topics,
        people,
        intensity,
        chunk_count: 0,
        defaulted_fields: defaulted.clone(),
    };

    Ok(AnalysisOutcome {
        analysis,
        defaulted,
    })
}

/// A list of strings, or a single string promoted to a one-element list.
/// Non-string items are dropped. `None` means the field needs a default.
fn decode_list(obj: &Map<String, Value>, field: &str) -> Option<Vec<String>> {
    match obj.get(field)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Value::String(s) if !s.trim().is_empty() => Some(vec![s.trim().to_string()]),
        _ => None,
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

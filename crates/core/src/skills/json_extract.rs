//! Structured-output extraction from model text.
//!
//! Models wrap JSON in markdown fences, return bare lists where an object was
//! asked for, and use whatever key casing they like. These helpers turn that
//! into typed errors the stages can fall back on.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::GenerationError;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9_-]*\s*(.*?)\s*```$").expect("valid regex"));
static OPEN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9_-]*\s*(.*)$").expect("valid regex"));

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(captures) = FENCE.captures(trimmed) {
        if let Some(inner) = captures.get(1) {
            return inner.as_str();
        }
    }
    // Truncated responses often open a fence and never close it.
    if let Some(captures) = OPEN_FENCE.captures(trimmed) {
        if let Some(inner) = captures.get(1) {
            return inner.as_str().trim();
        }
    }
    trimmed
}

/// Parse model text as JSON after fence stripping.
pub fn parse_json(raw: &str) -> Result<Value, GenerationError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(GenerationError::MalformedOutput("empty response".to_string()));
    }
    serde_json::from_str(body).map_err(|e| GenerationError::MalformedOutput(e.to_string()))
}

/// Extract a list either from a bare JSON array or from `key` of an object.
pub fn extract_list(raw: &str, keys: &[&str]) -> Result<Vec<Value>, GenerationError> {
    match parse_json(raw)? {
        Value::Array(items) => Ok(items),
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array).cloned())
            .ok_or_else(|| {
                GenerationError::SchemaViolation(format!("expected a list under {:?}", keys))
            }),
        other => Err(GenerationError::SchemaViolation(format!(
            "expected a list, got {}",
            type_name(&other)
        ))),
    }
}

/// Extract a JSON object.
pub fn extract_object(raw: &str) -> Result<Map<String, Value>, GenerationError> {
    match parse_json(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(GenerationError::SchemaViolation(format!(
            "expected an object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Field mapping
// ============================================================================

/// First non-empty string among `keys`, with whitespace collapsed.
pub fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let value = map.get(*key)?;
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let cleaned = super::text::clean_text(&text);
        (!cleaned.is_empty()).then_some(cleaned)
    })
}

/// First value among `keys` coerced to a list of non-empty strings.
///
/// A single string counts as a one-element list.
pub fn list_field(map: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        let Some(value) = map.get(*key) else {
            continue;
        };
        let items = value_to_strings(value);
        if !items.is_empty() {
            return items;
        }
    }
    Vec::new()
}

pub fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(super::text::clean_text(s)),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => {
            let cleaned = super::text::clean_text(s);
            if cleaned.is_empty() {
                Vec::new()
            } else {
                vec![cleaned]
            }
        }
        _ => Vec::new(),
    }
}

/// Non-negative integer field (accepts numeric strings).
pub fn uint_field(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

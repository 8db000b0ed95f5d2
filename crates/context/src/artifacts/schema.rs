//! Pull a JSON document out of model output
//!
//! Models wrap JSON in code fences or surround it with prose. Anything that
//! does not yield a JSON value is a `SchemaParse` error.

use lectern_common::errors::{AppError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

fn schema_error(message: impl Into<String>) -> AppError {
    AppError::SchemaParse {
        message: message.into(),
    }
}

/// Body of the first fenced block, if any
fn fenced(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Outermost `{...}` or `[...]` span, whichever opens first
fn delimited(raw: &str) -> Option<&str> {
    let open = raw.find(['{', '['])?;
    let close_char = if raw[open..].starts_with('{') { '}' } else { ']' };
    let close = raw.rfind(close_char)?;
    (close > open).then(|| &raw[open..=close])
}

pub(crate) fn extract_json(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(schema_error("model returned no content"));
    }

    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }

    let candidates = [fenced(raw), delimited(raw), fenced(raw).and_then(delimited)];
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str(candidate).ok())
        .ok_or_else(|| {
            let preview: String = raw.chars().take(80).collect();
            schema_error(format!("no JSON document in model output: {preview}"))
        })
}

/// Extract and deserialize in one step
pub(crate) fn parse_as<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(extract_json(raw)?)
        .map_err(|e| schema_error(format!("output does not match the expected shape: {e}")))
}

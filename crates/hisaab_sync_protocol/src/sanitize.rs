//! Payload sanitization applied before a push.
//!
//! The backend stores payloads in JSON columns and rejects strings carrying
//! control characters or consisting of nothing but quotes. Offending fields
//! are cleaned or dropped so the key is omitted from the request.

use crate::record::Payload;
use serde_json::Value;

/// Cleans a single string value.
///
/// Returns `None` if nothing meaningful is left, meaning the field should be
/// omitted.
pub fn sanitize_str(value: &str) -> Option<String> {
    let cleaned: String = value
        .chars()
        .filter(|&c| !is_disallowed(c))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed
        .chars()
        .all(|c| c == '"' || c == '\'' || c.is_whitespace())
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Sanitizes every top-level string field of `payload` in place.
///
/// Returns the number of fields that were dropped.
pub fn sanitize_payload(payload: &mut Payload) -> usize {
    let before = payload.len();
    payload.retain(|_, value| match value {
        Value::String(s) => match sanitize_str(s) {
            Some(clean) => {
                *s = clean;
                true
            }
            None => false,
        },
        _ => true,
    });
    before - payload.len()
}

fn is_disallowed(c: char) -> bool {
    ((c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r')) || c == '\u{FFFD}'
}

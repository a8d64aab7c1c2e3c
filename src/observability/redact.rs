//! Payload redaction before logging.
//!
//! # Responsibilities
//! - Mask credential-like fields entirely
//! - Replace string values with their length only
//! - Reduce free-text fields to a marker whatever their type
//!
//! # Design Decisions
//! - Field names are matched case-insensitively on substrings
//! - The original value is never modified; a redacted copy is returned

use serde_json::{Map, Value};

const SECRET_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "key",
    "authorization",
    "auth",
    "credential",
    "cookie",
    "session",
];

const FREE_TEXT_FIELDS: &[&str] = &[
    "message",
    "text",
    "content",
    "transcript",
    "prompt",
    "input",
    "body",
    "notes",
    "audio",
];

pub const REDACTED: &str = "[REDACTED]";

fn matches(name: &str, needles: &[&str]) -> bool {
    let name = name.to_lowercase();
    needles.iter().any(|needle| name.contains(needle))
}

fn text_marker(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(format!("[redacted: {} chars]", s.chars().count())),
        Value::Null => Value::Null,
        Value::Array(items) => Value::String(format!("[redacted: {} items]", items.len())),
        _ => Value::String(REDACTED.to_string()),
    }
}

/// Redacted copy of `value`, safe to log.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (name, field) in map {
                let redacted = if matches(name, SECRET_FIELDS) {
                    Value::String(REDACTED.to_string())
                } else if matches(name, FREE_TEXT_FIELDS) {
                    match field {
                        Value::Object(_) => redact(field),
                        Value::Array(items) if items.iter().all(Value::is_object) => {
                            Value::Array(items.iter().map(redact).collect())
                        }
                        other => text_marker(other),
                    }
                } else {
                    redact(field)
                };
                out.insert(name.clone(), redacted);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) => Value::String(format!("[redacted: {} chars]", s.chars().count())),
        other => other.clone(),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Shared `tracing` initialization and value sanitization (§9 "Logging").
//!
//! The env-filter default directive comes from [`crate::config::Config::log_level`].
//! Truncation and keychain redaction happen at the call site via
//! [`sanitize_value`] rather than via a custom `tracing` layer: the core
//! types that can carry secret-shaped data (`Outcome`, rendered template
//! scopes) are the ones responsible for calling it before logging a field.

use serde_json::Value;

/// Truncates a loggable string to `max_chars`, appending a marker so a
/// reader can tell the value was cut rather than naturally short.
pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars).collect();
    out.push_str("...[truncated]");
    out
}

/// Redacts anything under a `keychain` key and truncates remaining string
/// leaves to `max_chars`, recursively. Used before a scope or outcome is
/// attached to a log line or error span.
pub fn sanitize_value(value: &Value, max_chars: usize) -> Value {
    sanitize_inner(value, max_chars, false)
}

fn sanitize_inner(value: &Value, max_chars: usize, inside_keychain: bool) -> Value {
    match value {
        Value::String(_) if inside_keychain => Value::String("<redacted>".to_string()),
        Value::String(s) => Value::String(truncate(s, max_chars)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| sanitize_inner(v, max_chars, inside_keychain)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let nested = inside_keychain || k == "keychain";
                    (k.clone(), sanitize_inner(v, max_chars, nested))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! The error taxonomy shared by tool outcomes and policy evaluation (§7).

use serde::{Deserialize, Serialize};

/// Disjoint error classification consulted by task outcome policy rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, unresolved template, unknown tool kind.
    Invalid,
    /// Credential resolution failure or downstream 401/403.
    AuthDenied,
    /// 5xx, 429, connection resets, DB deadlock/serialization, broker redelivery.
    Transient,
    /// Tool-declared deadline exceeded.
    Timeout,
    /// 4xx != 401/403/429, constraint violations, business rejections.
    Permanent,
    /// Nested playbook failure; carries the child `execution_id`.
    Downstream,
}

crate::simple_display! {
    ErrorKind {
        Invalid => "invalid",
        AuthDenied => "auth_denied",
        Transient => "transient",
        Timeout => "timeout",
        Permanent => "permanent",
        Downstream => "downstream",
    }
}

impl ErrorKind {
    /// Default retryability for a kind absent an explicit policy rule.
    pub fn default_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Timeout)
    }

    /// Classify an HTTP status code per spec.md §7.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::AuthDenied,
            429 | 500..=599 => ErrorKind::Transient,
            400..=499 => ErrorKind::Permanent,
            _ => ErrorKind::Invalid,
        }
    }

    /// Classify a Postgres SQLSTATE code per spec.md §7 (deadlock/serialization).
    pub fn from_pg_code(code: &str) -> Self {
        match code {
            "40001" | "40P01" => ErrorKind::Transient,
            "28000" | "28P01" => ErrorKind::AuthDenied,
            _ if code.starts_with("22") || code.starts_with("23") => ErrorKind::Permanent,
            _ => ErrorKind::Transient,
        }
    }
}

/// Error detail attached to a task outcome: `outcome.error.*` in policy
/// expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Present only for `ErrorKind::Downstream`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_execution_id: Option<i64>,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            retryable: kind.default_retryable(),
            kind,
            message: message.into(),
            details: serde_json::Map::new(),
            child_execution_id: None,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn downstream(child_execution_id: i64, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Downstream,
            retryable: false,
            message: message.into(),
            details: serde_json::Map::new(),
            child_execution_id: Some(child_execution_id),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_http_status(status), message).with_detail("http_status", status)
    }

    pub fn pg(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let kind = ErrorKind::from_pg_code(&code);
        Self::new(kind, message).with_detail("pg_code", code)
    }
}

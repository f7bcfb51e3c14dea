// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Task outcome envelope (§6, §8): what a worker hands back after running
//! a tool, and what outcome policy rules are evaluated against.
//!
//! Policy expressions address this structure as `outcome.status`,
//! `outcome.result`, `outcome.error.kind`, and backend-specific metadata
//! such as `outcome.http.status` or `outcome.pg.code`, both reachable
//! through [`Outcome::meta`].

use crate::error::TaskError;
use crate::result_ref::ResultRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
}

crate::simple_display! {
    OutcomeStatus {
        Success => "success",
        Error => "error",
    }
}

/// A task result, either carried inline or externalized to object storage
/// once it exceeds `RESULT_EXTERNALIZE_THRESHOLD_BYTES`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Inline(Value),
    External(ResultRef),
}

/// The envelope a tool backend returns and a policy rule is evaluated
/// against, serialized flat enough that `outcome.http.status` and
/// `outcome.pg.code` resolve as plain dotted template paths against
/// `meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Backend-specific metadata namespaced by tool kind, e.g.
    /// `{"http": {"status": 200}}` or `{"pg": {"code": "23505"}}`.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, Value>,
}

impl Outcome {
    pub fn success(result: impl Into<ResultValue>) -> Self {
        Self { status: OutcomeStatus::Success, result: Some(result.into()), error: None, meta: serde_json::Map::new() }
    }

    pub fn failure(error: TaskError) -> Self {
        Self { status: OutcomeStatus::Error, result: None, error: Some(error), meta: serde_json::Map::new() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success)
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.meta.insert("http".into(), serde_json::json!({ "status": status }));
        self
    }

    pub fn with_pg_code(mut self, code: impl Into<String>) -> Self {
        self.meta.insert("pg".into(), serde_json::json!({ "code": code.into() }));
        self
    }

    /// Render this outcome as a [`Value`] for template/policy-expression
    /// evaluation (`outcome.*`).
    pub fn as_template_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Value> for ResultValue {
    fn from(v: Value) -> Self {
        ResultValue::Inline(v)
    }
}

impl From<ResultRef> for ResultValue {
    fn from(r: ResultRef) -> Self {
        ResultValue::External(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn success_outcome_has_no_error() {
        let o = Outcome::success(serde_json::json!({ "ok": true }));
        assert!(o.is_success());
        assert!(o.error.is_none());
    }

    #[test]
    fn http_meta_reachable_as_dotted_path() {
        let o = Outcome::success(Value::Null).with_http_status(503);
        let value = o.as_template_value();
        assert_eq!(value["http"]["status"], 503);
    }

    #[test]
    fn failure_outcome_carries_error() {
        let err = TaskError::new(ErrorKind::Timeout, "deadline exceeded");
        let o = Outcome::failure(err);
        assert!(!o.is_success());
        assert_eq!(o.error.unwrap().kind, ErrorKind::Timeout);
    }
}

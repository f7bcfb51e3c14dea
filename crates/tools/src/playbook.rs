// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Playbook tool (§6): starts a nested execution and, depending on
//! `wait`, either returns immediately with the child's `execution_id` or
//! blocks until the child reaches a terminal state and propagates its
//! result (or failure, as [`noetl_core::ErrorKind::Downstream`]).
//!
//! `noetl-tools` cannot depend on `noetl-orchestrator` (the orchestrator
//! depends on this crate, not the reverse), so nested-execution admission
//! is reached through the narrow [`PlaybookStarter`] boundary, the same
//! pattern `noetl_playbook::catalog::CatalogFetcher` uses for out-of-crate
//! content fetch.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use noetl_core::{ErrorKind, ExecutionId, ExecutionStatus, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub status: ExecutionStatus,
    pub result: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("catalog entry not found: {0}")]
    CatalogNotFound(String),
    #[error("admission failed: {0}")]
    Admission(String),
}

/// Narrow boundary into the orchestrator's nested-execution admission
/// path: start a child execution for `(catalog_path, version)` with the
/// given input payload, and poll its terminal state.
#[async_trait]
pub trait PlaybookStarter: Send + Sync {
    async fn start(&self, catalog_path: &str, version: Option<&str>, input: Value, parent: ExecutionId) -> Result<ExecutionId, StartError>;

    async fn poll(&self, execution_id: ExecutionId) -> Option<ChildOutcome>;
}

#[derive(Debug, Deserialize)]
struct PlaybookArgs {
    path: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    wait: bool,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    250
}

pub struct PlaybookTool {
    starter: Arc<dyn PlaybookStarter>,
}

impl PlaybookTool {
    pub fn new(starter: Arc<dyn PlaybookStarter>) -> Self {
        Self { starter }
    }
}

#[async_trait]
impl Tool for PlaybookTool {
    fn kind(&self) -> &'static str {
        "playbook"
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> Outcome {
        let args: PlaybookArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed playbook args: {e}"))),
        };

        let child_id = match self.starter.start(&args.path, args.version.as_deref(), args.input, ctx.execution_id).await {
            Ok(id) => id,
            Err(StartError::CatalogNotFound(path)) => {
                return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("catalog entry not found: {path}")))
            }
            Err(StartError::Admission(msg)) => {
                return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("nested execution admission failed: {msg}")))
            }
        };

        if !args.wait {
            return Outcome::success(serde_json::json!({ "execution_id": child_id.as_i64(), "started": true }));
        }

        let deadline = tokio::time::Instant::now() + ctx.timeout;
        loop {
            if let Some(outcome) = self.starter.poll(child_id).await {
                return match outcome.status {
                    ExecutionStatus::Completed => Outcome::success(outcome.result),
                    ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                        Outcome::failure(TaskError::downstream(child_id.as_i64(), format!("nested execution ended as {:?}", outcome.status)))
                    }
                    _ => continue,
                };
            }
            if tokio::time::Instant::now() > deadline {
                return Outcome::failure(TaskError::new(ErrorKind::Timeout, "nested execution did not complete before timeout"));
            }
            tokio::time::sleep(Duration::from_millis(args.poll_interval_ms)).await;
        }
    }
}

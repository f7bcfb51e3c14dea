// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! `kind`-keyed tool registry (§4.6.3): dispatch a command's `task_kind`
//! to the matching [`Tool`] implementation.

use crate::context::TaskContext;
use async_trait::async_trait;
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Every tool backend implements exactly this one method and never
/// panics: a failed invocation is an `Outcome::failure`, not an `Err`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn execute(&self, args: Value, ctx: &TaskContext) -> Outcome;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.kind().to_string(), tool);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(kind).cloned()
    }

    /// Dispatch by `kind`, returning an `Invalid`-classified outcome for
    /// an unregistered kind rather than panicking (§7 "Invalid").
    pub async fn execute(&self, kind: &str, args: Value, ctx: &TaskContext) -> Outcome {
        match self.get(kind) {
            Some(tool) => tool.execute(args, ctx).await,
            None => Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("unknown tool kind: {kind}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::ExecutionId;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn kind(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, args: Value, _ctx: &TaskContext) -> Outcome {
            Outcome::success(args)
        }
    }

    fn ctx() -> TaskContext {
        TaskContext {
            execution_id: ExecutionId::from_raw(1),
            step_id: "s1".into(),
            credentials: HashMap::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn dispatches_by_kind() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let outcome = registry.execute("echo", serde_json::json!({"a": 1}), &ctx()).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn unknown_kind_is_invalid() {
        let registry = ToolRegistry::new();
        let outcome = registry.execute("nonexistent", Value::Null, &ctx()).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::Invalid);
    }
}

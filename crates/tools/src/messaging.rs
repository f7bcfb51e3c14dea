// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Messaging tool (§6): direct KV get/put/delete against the `loop_state`
//! and `sessions` buckets, and ad-hoc publishes onto the command
//! notification stream, exposed as a task kind for playbooks that need to
//! read or seed bus state rather than only have the worker do so
//! internally.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use noetl_bus::{BusError, KvStore, NotificationPublisher};
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MessagingArgs {
    KvGet { bucket: String, key: String },
    KvPut { bucket: String, key: String, value: Value, #[serde(default = "default_ttl_ms")] ttl_ms: i64 },
    KvDelete { bucket: String, key: String },
    Publish { subject: String, payload: Value },
}

fn default_ttl_ms() -> i64 {
    3_600_000
}

pub struct MessagingTool {
    kv: Arc<dyn KvStore>,
    publisher: Arc<dyn NotificationPublisher>,
}

impl MessagingTool {
    pub fn new(kv: Arc<dyn KvStore>, publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self { kv, publisher }
    }
}

fn bus_error(e: BusError) -> TaskError {
    TaskError::new(ErrorKind::Transient, format!("messaging bus error: {e}"))
}

#[async_trait]
impl Tool for MessagingTool {
    fn kind(&self) -> &'static str {
        "messaging"
    }

    async fn execute(&self, args: Value, _ctx: &TaskContext) -> Outcome {
        let args: MessagingArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed messaging args: {e}"))),
        };

        match args {
            MessagingArgs::KvGet { bucket, key } => match self.kv.get(&bucket, &key).await {
                Ok(value) => Outcome::success(value.unwrap_or(Value::Null)),
                Err(e) => Outcome::failure(TaskError::new(ErrorKind::Transient, format!("kv get failed: {e}"))),
            },
            MessagingArgs::KvPut { bucket, key, value, ttl_ms } => match self.kv.put(&bucket, &key, value, ttl_ms).await {
                Ok(()) => Outcome::success(serde_json::json!({ "stored": true })),
                Err(e) => Outcome::failure(TaskError::new(ErrorKind::Transient, format!("kv put failed: {e}"))),
            },
            MessagingArgs::KvDelete { bucket, key } => match self.kv.delete(&bucket, &key).await {
                Ok(()) => Outcome::success(serde_json::json!({ "deleted": true })),
                Err(e) => Outcome::failure(TaskError::new(ErrorKind::Transient, format!("kv delete failed: {e}"))),
            },
            MessagingArgs::Publish { subject, payload } => {
                let bytes = match serde_json::to_vec(&payload) {
                    Ok(b) => bytes::Bytes::from(b),
                    Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("failed encoding publish payload: {e}"))),
                };
                match self.publisher.publish_raw(subject, bytes).await {
                    Ok(()) => Outcome::success(serde_json::json!({ "published": true })),
                    Err(e) => Outcome::failure(bus_error(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_bus::{TestBus, TestKvStore};
    use noetl_core::{ExecutionId, FakeClock};
    use std::collections::HashMap;
    use std::time::Duration;

    fn ctx() -> TaskContext {
        TaskContext { execution_id: ExecutionId::from_raw(1), step_id: "s1".into(), credentials: HashMap::new(), timeout: Duration::from_secs(5) }
    }

    #[tokio::test]
    async fn kv_put_then_get_round_trips() {
        let kv = Arc::new(TestKvStore::new(FakeClock::new()));
        let bus = Arc::new(TestBus::new());
        let tool = MessagingTool::new(kv, bus);

        let put = tool
            .execute(serde_json::json!({"op": "kv_put", "bucket": "loop_state", "key": "1:s", "value": {"n": 1}}), &ctx())
            .await;
        assert!(put.is_success());

        let get = tool.execute(serde_json::json!({"op": "kv_get", "bucket": "loop_state", "key": "1:s"}), &ctx()).await;
        assert!(get.is_success());
    }

    #[tokio::test]
    async fn publish_reaches_test_bus() {
        let kv = Arc::new(TestKvStore::new(FakeClock::new()));
        let bus = Arc::new(TestBus::new());
        let tool = MessagingTool::new(kv, bus.clone());

        let outcome = tool.execute(serde_json::json!({"op": "publish", "subject": "custom.subject", "payload": {"a": 1}}), &ctx()).await;
        assert!(outcome.is_success());
        assert!(bus.was_published_to("custom.subject"));
    }
}

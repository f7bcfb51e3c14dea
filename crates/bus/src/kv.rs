// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! KV bucket abstraction (§4.3): `loop_state` (per-execution/step
//! iteration bags) and `sessions` (opaque, consumed by an external auth
//! collaborator). Both are TTL-bounded; watch/subscribe is unused by the
//! core.

use async_trait::async_trait;
use serde_json::Value;

pub const LOOP_STATE_BUCKET: &str = "loop_state";
pub const SESSIONS_BUCKET: &str = "sessions";

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv get/put failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, KvError>;

    async fn put(&self, bucket: &str, key: &str, value: Value, ttl_ms: i64) -> Result<(), KvError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError>;
}

/// Key convention for the `loop_state` bucket: one entry per loop step
/// per execution, holding the reconciled collection size and completion
/// counters the distributed-loop path reads back on cold start
/// (SPEC_FULL.md §E.2).
pub fn loop_state_key(execution_id: noetl_core::ExecutionId, step_id: &str) -> String {
    format!("{}:{}", execution_id.as_i64(), step_id)
}

#[cfg(feature = "nats")]
pub mod nats_impl {
    use super::*;
    use async_nats::jetstream::kv::Store as JsKvStore;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Wraps one `async_nats` JetStream KV store handle per bucket name.
    pub struct NatsKvStore {
        buckets: Mutex<HashMap<String, JsKvStore>>,
        context: async_nats::jetstream::Context,
    }

    impl NatsKvStore {
        pub fn new(context: async_nats::jetstream::Context) -> Self {
            Self { buckets: Mutex::new(HashMap::new()), context }
        }

        async fn bucket(&self, name: &str) -> Result<JsKvStore, KvError> {
            let mut buckets = self.buckets.lock().await;
            if let Some(store) = buckets.get(name) {
                return Ok(store.clone());
            }
            let store = self
                .context
                .get_key_value(name)
                .await
                .map_err(|e| KvError::Backend(e.to_string()))?;
            buckets.insert(name.to_string(), store.clone());
            Ok(store)
        }
    }

    #[async_trait]
    impl KvStore for NatsKvStore {
        async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, KvError> {
            let store = self.bucket(bucket).await?;
            let entry = store.get(key).await.map_err(|e| KvError::Backend(e.to_string()))?;
            entry
                .map(|bytes| serde_json::from_slice(&bytes).map_err(|e| KvError::Backend(e.to_string())))
                .transpose()
        }

        async fn put(&self, bucket: &str, key: &str, value: Value, _ttl_ms: i64) -> Result<(), KvError> {
            let store = self.bucket(bucket).await?;
            let payload = serde_json::to_vec(&value).map_err(|e| KvError::Backend(e.to_string()))?;
            store.put(key, payload.into()).await.map_err(|e| KvError::Backend(e.to_string()))?;
            Ok(())
        }

        async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
            let store = self.bucket(bucket).await?;
            store.delete(key).await.map_err(|e| KvError::Backend(e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::*;
    use noetl_core::Clock;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct Entry {
        value: Value,
        expires_at_ms: i64,
    }

    /// In-memory KV fake with TTL enforcement driven by an injected
    /// [`Clock`], so tests can assert expiry without sleeping.
    pub struct TestKvStore<C: Clock> {
        clock: C,
        buckets: Mutex<HashMap<(String, String), Entry>>,
    }

    impl<C: Clock> TestKvStore<C> {
        pub fn new(clock: C) -> Self {
            Self { clock, buckets: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl<C: Clock> KvStore for TestKvStore<C> {
        async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, KvError> {
            let now = self.clock.epoch_ms();
            let mut buckets = self.buckets.lock();
            let k = (bucket.to_string(), key.to_string());
            match buckets.get(&k) {
                Some(entry) if entry.expires_at_ms > now => Ok(Some(entry.value.clone())),
                Some(_) => {
                    buckets.remove(&k);
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        async fn put(&self, bucket: &str, key: &str, value: Value, ttl_ms: i64) -> Result<(), KvError> {
            let now = self.clock.epoch_ms();
            self.buckets.lock().insert(
                (bucket.to_string(), key.to_string()),
                Entry { value, expires_at_ms: now + ttl_ms },
            );
            Ok(())
        }

        async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
            self.buckets.lock().remove(&(bucket.to_string(), key.to_string()));
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use noetl_core::FakeClock;
        use serde_json::json;

        #[tokio::test]
        async fn put_then_get_round_trips() {
            let store = TestKvStore::new(FakeClock::new());
            store.put(LOOP_STATE_BUCKET, "1:step", json!({"n": 3}), 60_000).await.unwrap();
            let value = store.get(LOOP_STATE_BUCKET, "1:step").await.unwrap();
            assert_eq!(value, Some(json!({"n": 3})));
        }

        #[tokio::test]
        async fn entry_expires_past_ttl() {
            let clock = FakeClock::new();
            let store = TestKvStore::new(clock.clone());
            store.put(LOOP_STATE_BUCKET, "1:step", json!(1), 1_000).await.unwrap();
            clock.advance(std::time::Duration::from_millis(2_000));
            assert_eq!(store.get(LOOP_STATE_BUCKET, "1:step").await.unwrap(), None);
        }

        #[tokio::test]
        async fn delete_removes_entry() {
            let store = TestKvStore::new(FakeClock::new());
            store.put(SESSIONS_BUCKET, "s1", json!("opaque"), 60_000).await.unwrap();
            store.delete(SESSIONS_BUCKET, "s1").await.unwrap();
            assert_eq!(store.get(SESSIONS_BUCKET, "s1").await.unwrap(), None);
        }
    }
}

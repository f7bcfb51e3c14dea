// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Durable pull-consumer subscription over `noetl.commands` (§4.3, §4.6
//! "Subscription loop"): the worker's receive half of the bus, delivering
//! a [`CommandNotification`] with enough redelivery bookkeeping to drive
//! the claim-or-skip decision without the worker touching the broker API
//! directly.

use crate::notification::CommandNotification;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("ack failed: {0}")]
    Ack(String),
    #[error("deserialization failed: {0}")]
    Deserialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> Result<(), SubscribeError>;
    async fn nak(&self) -> Result<(), SubscribeError>;
}

/// One delivered notification plus its broker-assigned redelivery count
/// (§4.6 step 3: "If NotFound/AlreadyLeased, ack notification and
/// continue") and the handle used to ack or nak it.
pub struct Delivery {
    pub notification: CommandNotification,
    pub delivery_count: u64,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    pub fn new(notification: CommandNotification, delivery_count: u64, handle: Box<dyn AckHandle>) -> Self {
        Self { notification, delivery_count, handle }
    }

    pub async fn ack(&self) -> Result<(), SubscribeError> {
        self.handle.ack().await
    }

    pub async fn nak(&self) -> Result<(), SubscribeError> {
        self.handle.nak().await
    }
}

/// A durable pull subscription over [`crate::notification::COMMANDS_SUBJECT`].
/// `next` resolves to `None` once the subscription is closed; it does not
/// time out on its own, matching the broker's pull semantics (callers
/// layer a `WORKER_FETCH_TIMEOUT_S` deadline around it).
#[async_trait]
pub trait CommandSubscriber: Send + Sync {
    async fn next(&self) -> Result<Option<Delivery>, SubscribeError>;
}

#[cfg(feature = "nats")]
pub mod nats_impl {
    use super::*;
    use async_nats::jetstream::consumer::{pull::Config as PullConfig, Consumer};
    use async_nats::jetstream::context::Context;
    use async_nats::jetstream::AckKind;
    use futures_util::StreamExt;
    use tokio::sync::Mutex;

    pub struct NatsCommandSubscriber {
        messages: Mutex<async_nats::jetstream::consumer::pull::Stream>,
    }

    impl NatsCommandSubscriber {
        /// Binds (creating if absent) the durable pull consumer named
        /// `durable_name` on `stream_name` and opens its message stream.
        /// Callers reconcile the consumer's config via
        /// [`crate::consumer::reconcile`] before calling this.
        pub async fn new(
            context: Context,
            stream_name: &str,
            durable_name: &str,
            config: crate::consumer::ConsumerConfig,
        ) -> Result<Self, SubscribeError> {
            let stream = context.get_stream(stream_name).await.map_err(|e| SubscribeError::Subscribe(e.to_string()))?;
            let consumer: Consumer<PullConfig> = stream
                .get_or_create_consumer(
                    durable_name,
                    PullConfig {
                        durable_name: Some(durable_name.to_string()),
                        max_ack_pending: config.max_ack_pending,
                        max_deliver: config.max_deliver,
                        ack_wait: std::time::Duration::from_secs(config.ack_wait_secs),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| SubscribeError::Subscribe(e.to_string()))?;
            let messages = consumer.messages().await.map_err(|e| SubscribeError::Subscribe(e.to_string()))?;
            Ok(Self { messages: Mutex::new(messages) })
        }
    }

    #[async_trait]
    impl CommandSubscriber for NatsCommandSubscriber {
        async fn next(&self) -> Result<Option<Delivery>, SubscribeError> {
            let mut messages = self.messages.lock().await;
            let Some(msg) = messages.next().await else {
                return Ok(None);
            };
            let msg = msg.map_err(|e| SubscribeError::Subscribe(e.to_string()))?;
            let delivery_count = msg.info().map(|i| i.delivery_count).unwrap_or(1) as u64;
            let notification: CommandNotification = serde_json::from_slice(&msg.payload)?;
            Ok(Some(Delivery::new(notification, delivery_count, Box::new(NatsAckHandle { msg }))))
        }
    }

    struct NatsAckHandle {
        msg: async_nats::jetstream::Message,
    }

    #[async_trait]
    impl AckHandle for NatsAckHandle {
        async fn ack(&self) -> Result<(), SubscribeError> {
            self.msg.ack().await.map_err(|e| SubscribeError::Ack(e.to_string()))
        }

        async fn nak(&self) -> Result<(), SubscribeError> {
            self.msg.ack_with(AckKind::Nak(None)).await.map_err(|e| SubscribeError::Ack(e.to_string()))
        }
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Inner {
        queue: Mutex<VecDeque<CommandNotification>>,
        acked: AtomicUsize,
        naked: AtomicUsize,
    }

    /// In-memory stand-in for a durable pull consumer: FIFO of pushed
    /// notifications, with ack/nak counted for test assertions rather than
    /// actually redelivering (redelivery is the Queue Store's lease-reap
    /// responsibility, exercised separately).
    #[derive(Clone)]
    pub struct TestSubscriber {
        inner: Arc<Inner>,
    }

    impl TestSubscriber {
        pub fn new() -> Self {
            Self { inner: Arc::new(Inner { queue: Mutex::new(VecDeque::new()), acked: AtomicUsize::new(0), naked: AtomicUsize::new(0) }) }
        }

        pub fn push(&self, notification: CommandNotification) {
            self.inner.queue.lock().push_back(notification);
        }

        pub fn is_empty(&self) -> bool {
            self.inner.queue.lock().is_empty()
        }

        pub fn acked(&self) -> usize {
            self.inner.acked.load(Ordering::SeqCst)
        }

        pub fn naked(&self) -> usize {
            self.inner.naked.load(Ordering::SeqCst)
        }
    }

    impl Default for TestSubscriber {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CommandSubscriber for TestSubscriber {
        async fn next(&self) -> Result<Option<Delivery>, SubscribeError> {
            let Some(notification) = self.inner.queue.lock().pop_front() else {
                return Ok(None);
            };
            Ok(Some(Delivery::new(notification, 1, Box::new(TestAckHandle { inner: self.inner.clone() }))))
        }
    }

    struct TestAckHandle {
        inner: Arc<Inner>,
    }

    #[async_trait]
    impl AckHandle for TestAckHandle {
        async fn ack(&self) -> Result<(), SubscribeError> {
            self.inner.acked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nak(&self) -> Result<(), SubscribeError> {
            self.inner.naked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use noetl_core::{CommandId, ExecutionId};

        fn sample() -> CommandNotification {
            CommandNotification { execution_id: ExecutionId::from_raw(1), queue_id: CommandId::new(), step: "s1".into(), api_url: "http://localhost".into() }
        }

        #[tokio::test]
        async fn pushed_notification_is_delivered_once() {
            let sub = TestSubscriber::new();
            sub.push(sample());
            let delivery = sub.next().await.unwrap().expect("delivery");
            assert_eq!(delivery.notification.step, "s1");
            delivery.ack().await.unwrap();
            assert_eq!(sub.acked(), 1);
            assert!(sub.next().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn nak_is_counted_without_requeue() {
            let sub = TestSubscriber::new();
            sub.push(sample());
            let delivery = sub.next().await.unwrap().expect("delivery");
            delivery.nak().await.unwrap();
            assert_eq!(sub.naked(), 1);
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Trait-based abstraction over the command notification stream (§4.3),
//! so the orchestrator can publish without depending on a live broker in
//! tests.

use crate::notification::{CommandNotification, COMMANDS_SUBJECT};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish_raw(&self, subject: String, payload: Bytes) -> Result<(), BusError>;

    async fn publish_command(&self, notification: &CommandNotification) -> Result<(), BusError> {
        let payload = Bytes::from(serde_json::to_vec(notification)?);
        self.publish_raw(COMMANDS_SUBJECT.to_string(), payload).await
    }
}

#[cfg(feature = "nats")]
pub struct NatsNotificationPublisher {
    client: async_nats::Client,
}

#[cfg(feature = "nats")]
impl NatsNotificationPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "nats")]
#[async_trait]
impl NotificationPublisher for NatsNotificationPublisher {
    async fn publish_raw(&self, subject: String, payload: Bytes) -> Result<(), BusError> {
        self.client.publish(subject, payload).await.map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::*;
    use parking_lot::RwLock;

    #[derive(Debug, Clone)]
    pub struct PublishedMessage {
        pub subject: String,
        pub payload: Bytes,
    }

    /// Records every publish for inspection, in place of a live stream
    /// connection — mirrors the approach used elsewhere in the corpus for
    /// NATS-backed publish abstractions.
    #[derive(Default)]
    pub struct TestBus {
        published: RwLock<Vec<PublishedMessage>>,
    }

    impl TestBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published_messages(&self) -> Vec<PublishedMessage> {
            self.published.read().clone()
        }

        pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
            self.published.read().iter().filter(|m| m.subject == subject).cloned().collect()
        }

        pub fn was_published_to(&self, subject: &str) -> bool {
            self.published.read().iter().any(|m| m.subject == subject)
        }

        pub fn publish_count(&self) -> usize {
            self.published.read().len()
        }
    }

    #[async_trait]
    impl NotificationPublisher for TestBus {
        async fn publish_raw(&self, subject: String, payload: Bytes) -> Result<(), BusError> {
            self.published.write().push(PublishedMessage { subject, payload });
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::notification::CommandNotification;
        use noetl_core::{CommandId, ExecutionId};

        #[tokio::test]
        async fn publish_command_serializes_to_commands_subject() {
            let bus = TestBus::new();
            let notification = CommandNotification {
                execution_id: ExecutionId::from_raw(1),
                queue_id: CommandId::new(),
                step: "greet".into(),
                api_url: "http://localhost:8080".into(),
            };
            bus.publish_command(&notification).await.unwrap();
            assert!(bus.was_published_to(COMMANDS_SUBJECT));
            assert_eq!(bus.publish_count(), 1);
        }
    }
}

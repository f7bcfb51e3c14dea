// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Messaging Bus (§4.3): a durable command-notification stream plus two
//! TTL-bounded KV buckets. Low-latency transport only — the Queue Store
//! remains the durable source of truth for command state.

pub mod consumer;
pub mod kv;
pub mod notification;
pub mod publisher;
pub mod subscriber;

pub use consumer::{reconcile, ConsumerConfig, ReconcileAction};
pub use kv::{KvError, KvStore, LOOP_STATE_BUCKET, SESSIONS_BUCKET};
pub use notification::{CommandNotification, COMMANDS_SUBJECT};
pub use publisher::{BusError, NotificationPublisher};
pub use subscriber::{AckHandle, CommandSubscriber, Delivery, SubscribeError};

#[cfg(feature = "nats")]
pub use kv::nats_impl::NatsKvStore;
#[cfg(feature = "nats")]
pub use publisher::NatsNotificationPublisher;
#[cfg(feature = "nats")]
pub use subscriber::nats_impl::NatsCommandSubscriber;

#[cfg(feature = "test-support")]
pub use kv::test_support::TestKvStore;
#[cfg(feature = "test-support")]
pub use publisher::test_support::TestBus;
#[cfg(feature = "test-support")]
pub use subscriber::test_support::TestSubscriber;

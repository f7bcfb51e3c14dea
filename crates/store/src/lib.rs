// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Event Store and Queue Store (§4.1, §4.2): the durable substrate the
//! orchestrator reconstructs execution state from and workers claim
//! commands against. Postgres-backed in production; an in-memory fake
//! behind `test-support` backs unit and scenario tests.

pub mod event_store;
pub mod partition;
pub mod queue_store;

#[cfg(feature = "pg")]
pub mod pg;

#[cfg(feature = "test-support")]
pub mod memory;

pub use event_store::{AppendResult, EsError, EventPage, EventQuery, EventStore, ExecutionProgress, Pagination, StateView};
pub use partition::{PartitionBounds, PartitionError, PartitionInfo, PartitionManager};
pub use queue_store::{QsError, QueueStore, Settlement};

#[cfg(feature = "pg")]
pub use pg::{connect, PgEventStore, PgPartitionManager, PgQueueStore, PoolError};

#[cfg(feature = "test-support")]
pub use memory::{InMemoryEventStore, InMemoryQueueStore};

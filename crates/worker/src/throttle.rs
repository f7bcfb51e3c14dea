// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Concurrency and backpressure model (§5): a global in-flight cap on
//! claimed commands, a tighter sub-cap on DB-heavy kinds, and a
//! pool-pressure gate so a DB-heavy claim doesn't pile onto an already
//! saturated connection pool.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Task kinds that hold a Postgres connection for the duration of their
/// call and so are gated by the tighter `worker_max_inflight_db_commands`
/// sub-semaphore in addition to the global cap (§5 "Resource model").
const DB_HEAVY_KINDS: &[&str] = &["postgres", "transfer", "snowflake", "snowflake_transfer"];

pub fn is_db_heavy_kind(kind: &str) -> bool {
    DB_HEAVY_KINDS.contains(&kind)
}

/// Current pressure on the shared connection pool, consulted before a
/// DB-heavy claim is allowed to proceed. Implemented downstream against
/// whatever pool the deployment actually runs (e.g. `sqlx::PgPool`), kept
/// as a narrow trait here so this crate never depends on a pool type.
pub trait PoolPressure: Send + Sync {
    fn waiting_requests(&self) -> u32;
}

/// Holds both concurrency permits for one in-flight command; dropping it
/// releases them back to the semaphores it came from.
pub struct ThrottlePermit {
    _global: OwnedSemaphorePermit,
    _db_heavy: Option<OwnedSemaphorePermit>,
}

pub struct Throttle {
    global: Arc<Semaphore>,
    db_heavy: Arc<Semaphore>,
    pool_pressure: Arc<dyn PoolPressure>,
    pool_waiting_threshold: u32,
    poll_interval: Duration,
}

impl Throttle {
    pub fn new(max_inflight_commands: u32, max_inflight_db_commands: u32, pool_pressure: Arc<dyn PoolPressure>, pool_waiting_threshold: u32, poll_interval: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_inflight_commands.max(1) as usize)),
            db_heavy: Arc::new(Semaphore::new(max_inflight_db_commands.max(1) as usize)),
            pool_pressure,
            pool_waiting_threshold,
            poll_interval,
        }
    }

    /// Acquire the permits a command of `kind` needs before it may be
    /// claimed: always the global slot; additionally the DB-heavy slot,
    /// held off while the connection pool is under pressure, for kinds in
    /// [`DB_HEAVY_KINDS`].
    #[allow(clippy::expect_used)]
    pub async fn acquire(&self, kind: &str) -> ThrottlePermit {
        let global = self.global.clone().acquire_owned().await.expect("global semaphore never closed");
        let db_heavy = if is_db_heavy_kind(kind) {
            loop {
                if self.pool_pressure.waiting_requests() < self.pool_waiting_threshold {
                    break Some(self.db_heavy.clone().acquire_owned().await.expect("db-heavy semaphore never closed"));
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        } else {
            None
        };
        ThrottlePermit { _global: global, _db_heavy: db_heavy }
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::PoolPressure;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    pub struct StaticPoolPressure(AtomicU32);

    impl StaticPoolPressure {
        pub fn new(waiting: u32) -> Self {
            Self(AtomicU32::new(waiting))
        }

        pub fn set(&self, waiting: u32) {
            self.0.store(waiting, Ordering::SeqCst);
        }
    }

    impl PoolPressure for StaticPoolPressure {
        fn waiting_requests(&self) -> u32 {
            self.0.load(Ordering::SeqCst)
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Injectable delay for the retry backoff held between a policy's
//! `retry` decision and the next attempt (§4.6.1). A worker holds the
//! command's lease for the whole delay so no other worker can claim it
//! mid-backoff; tests never want that sleep to be real wall-clock time,
//! so the hook mirrors [`noetl_core::Clock`]'s split between
//! [`RealSleeper`] and a deterministic fake.

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct RealSleeper;

#[async_trait]
impl Sleeper for RealSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Records requested delays without actually waiting, so policy-retry
    /// tests run at full speed.
    #[derive(Default)]
    pub struct InstantSleeper {
        requested: Mutex<Vec<Duration>>,
    }

    impl InstantSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn requested(&self) -> Vec<Duration> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, duration: Duration) {
            self.requested.lock().push(duration);
        }
    }
}

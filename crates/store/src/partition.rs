// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Event table partition lifecycle (§4.1 "Partitioning", ADDED §C.1):
//! range partitions keyed by `execution_id`, whose numeric ordering
//! approximates time ordering. Each partition covers one calendar window
//! (daily, by default) of `execution_id` space.

use async_trait::async_trait;
use noetl_core::execution_id::partition_id_for_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionBounds {
    pub lower: i64,
    pub upper: i64,
}

impl PartitionBounds {
    /// The `[lower, upper)` `execution_id` range covering `[window_start_ms, window_end_ms)`.
    pub fn for_window(window_start_ms: i64, window_end_ms: i64) -> Self {
        Self { lower: partition_id_for_ts(window_start_ms), upper: partition_id_for_ts(window_end_ms) }
    }

    pub fn contains(&self, execution_id_raw: i64) -> bool {
        execution_id_raw >= self.lower && execution_id_raw < self.upper
    }
}

#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub name: String,
    pub bounds: PartitionBounds,
    pub row_estimate: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PartitionError {
    #[error("partition {0} already exists")]
    AlreadyExists(String),
    #[error("partition {0} not found")]
    NotFound(String),
    #[error("transient storage error: {0}")]
    TransientStorage(String),
}

/// Lifecycle operations the partition-rotation sweeper runs on a schedule
/// (daily by default, configurable via `partition_window_ms`): create
/// tomorrow's partition ahead of time, drop ones past the retention
/// window, and report size for capacity planning.
#[async_trait]
pub trait PartitionManager: Send + Sync {
    async fn ensure_partition(&self, window_start_ms: i64, window_end_ms: i64) -> Result<PartitionInfo, PartitionError>;

    async fn drop_partition(&self, name: &str) -> Result<(), PartitionError>;

    async fn list_partitions(&self) -> Result<Vec<PartitionInfo>, PartitionError>;

    async fn partition_stats(&self, name: &str) -> Result<PartitionInfo, PartitionError>;
}

pub fn partition_name_for_window(window_start_ms: i64) -> String {
    let secs = window_start_ms / 1000;
    let days = secs / 86_400;
    format!("events_p{days}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::execution_id::EPOCH_MS;

    #[test]
    fn bounds_contain_ids_minted_within_window() {
        let bounds = PartitionBounds::for_window(EPOCH_MS, EPOCH_MS + 86_400_000);
        assert!(bounds.contains(partition_id_for_ts(EPOCH_MS + 1_000)));
        assert!(!bounds.contains(partition_id_for_ts(EPOCH_MS + 86_400_000 + 1_000)));
    }

    #[test]
    fn partition_name_is_stable_per_day() {
        let a = partition_name_for_window(EPOCH_MS);
        let b = partition_name_for_window(EPOCH_MS + 1_000);
        assert_eq!(a, b);
        let c = partition_name_for_window(EPOCH_MS + 86_400_000);
        assert_ne!(a, c);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Bit-packed, time-embedded, monotonic execution identifiers (§4.1).
//!
//! `execution_id = ((now_ms - EPOCH_MS) << SHARD_SEQ_BITS) | (shard_id << SEQ_BITS) | seq`
//!
//! Time bits dominate, so ID ordering approximates time ordering modulo
//! clock skew, which is exactly what the Event Store's range partitioning
//! and the sweeper's staleness check rely on.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed epoch instant the bit-packing is relative to: 2024-01-01T00:00:00Z.
pub const EPOCH_MS: i64 = 1_704_067_200_000;

/// Bits reserved for `seq`, the per-millisecond-per-shard counter.
pub const SEQ_BITS: u32 = 18;
/// Bits reserved for `shard_id`.
pub const SHARD_BITS: u32 = 5;
/// Combined low-order bits (shard + seq) that the time component is shifted past.
pub const SHARD_SEQ_BITS: u32 = SEQ_BITS + SHARD_BITS;

const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;
const SHARD_MASK: i64 = (1 << SHARD_BITS) - 1;
/// Maximum valid shard id (exclusive upper bound is 32, per spec.md).
pub const MAX_SHARD_ID: u8 = 31;

/// A monotonic, time-embedded execution identifier.
///
/// Deliberately a bare `i64` newtype rather than a [`crate::define_id!`]
/// type: ES partitioning depends on its numeric ordering, not on a random
/// string suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub i64);

impl ExecutionId {
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// The shard id embedded in this identifier.
    pub fn shard_id(&self) -> u8 {
        ((self.0 >> SEQ_BITS) & SHARD_MASK) as u8
    }

    /// Best-effort reconstruction of the millisecond timestamp this id was
    /// minted at. Exact as long as `EPOCH_MS` hasn't changed.
    pub fn approx_epoch_ms(&self) -> i64 {
        (self.0 >> SHARD_SEQ_BITS) + EPOCH_MS
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pure function mapping a timestamp to the smallest `execution_id` that
/// could have been minted at or after that instant: used by the partition
/// manager to translate calendar-window boundaries into id-range boundaries.
///
/// Monotonic in `ts`: `a < b => partition_id_for_ts(a) <= partition_id_for_ts(b)`.
pub fn partition_id_for_ts(epoch_ms: i64) -> i64 {
    let delta = (epoch_ms - EPOCH_MS).max(0);
    delta << SHARD_SEQ_BITS
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionIdError {
    #[error("shard_id {0} exceeds max shard id {MAX_SHARD_ID}")]
    ShardOutOfRange(u8),
}

/// Generates strictly increasing [`ExecutionId`]s for one shard.
///
/// Thread-safe: `seq` is reset whenever the wall-clock millisecond advances,
/// and bumped under contention within the same millisecond. If `seq`
/// exhausts its bit width within a millisecond (pathological write rate),
/// the generator spins forward to the next millisecond rather than wrapping,
/// preserving strict monotonicity.
pub struct ExecutionIdGenerator {
    shard_id: u8,
    last_ms: AtomicI64,
    seq: AtomicU32,
}

impl ExecutionIdGenerator {
    pub fn new(shard_id: u8) -> Result<Self, ExecutionIdError> {
        if shard_id > MAX_SHARD_ID {
            return Err(ExecutionIdError::ShardOutOfRange(shard_id));
        }
        Ok(Self { shard_id, last_ms: AtomicI64::new(-1), seq: AtomicU32::new(0) })
    }

    fn now_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
    }

    /// Mint the next execution id. Spins (without sleeping) past millisecond
    /// boundaries when the per-ms sequence space is exhausted.
    pub fn next(&self) -> ExecutionId {
        loop {
            let now = Self::now_ms();
            let last = self.last_ms.load(Ordering::Acquire);
            let seq = if now == last {
                let s = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
                if s as i64 > SEQ_MASK {
                    continue;
                }
                s
            } else if now > last {
                if self
                    .last_ms
                    .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                self.seq.store(0, Ordering::Release);
                0
            } else {
                // Clock moved backwards; busy-wait for it to catch up rather
                // than risk a duplicate or decreasing id.
                continue;
            };

            let delta_ms = now - EPOCH_MS;
            let raw = (delta_ms << SHARD_SEQ_BITS)
                | ((self.shard_id as i64) << SEQ_BITS)
                | (seq as i64 & SEQ_MASK);
            return ExecutionId(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let gen = ExecutionIdGenerator::new(1).unwrap();
        let mut prev = gen.next();
        for _ in 0..1000 {
            let next = gen.next();
            assert!(next > prev, "{:?} should be > {:?}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn shard_id_round_trips() {
        let gen = ExecutionIdGenerator::new(7).unwrap();
        let id = gen.next();
        assert_eq!(id.shard_id(), 7);
    }

    #[test]
    fn rejects_shard_out_of_range() {
        assert!(ExecutionIdGenerator::new(32).is_err());
    }

    #[test]
    fn partition_id_for_ts_is_monotonic() {
        let a = partition_id_for_ts(EPOCH_MS + 1_000);
        let b = partition_id_for_ts(EPOCH_MS + 2_000);
        assert!(a <= b);
    }

    #[test]
    fn partition_id_clamps_before_epoch() {
        assert_eq!(partition_id_for_ts(EPOCH_MS - 10_000), 0);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Queue Store (§4.2): the sole serialization point preventing double
//! execution of the same command. `claim` is an atomic
//! conditional-update-returning operation — two workers racing for the
//! same row, only one wins the lease.

use async_trait::async_trait;
use noetl_core::{Command, CommandId, CommandStatus, ExecutionId, FailureReason, StepId, TaskError, WorkerId};
use serde_json::Value;

#[derive(Debug, Clone, thiserror::Error)]
pub enum QsError {
    #[error("command {0:?} not found")]
    NotFound(CommandId),
    #[error("command {command_id:?} is not leased by {worker_id:?}")]
    NotOwner { command_id: CommandId, worker_id: WorkerId },
    #[error("transient storage error: {0}")]
    TransientStorage(String),
}

/// Terminal settlement outcome a worker reports back for a leased command.
#[derive(Debug, Clone)]
pub enum Settlement {
    Done,
    /// Re-queued for another attempt; `attempt` is the next attempt number.
    Retry { attempt: u32 },
    Failed { reason: FailureReason, error: TaskError },
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new `Pending` command, claimable immediately.
    async fn enqueue(
        &self,
        execution_id: ExecutionId,
        step_id: StepId,
        task_label: String,
        task_kind: String,
        payload: Value,
    ) -> Result<CommandId, QsError>;

    /// Atomically claim the oldest claimable command for `worker_id`,
    /// setting `status = Leased` and `lease_expires_at_ms = now + lease_ms`
    /// in a single conditional update (§4.2 "Claim"). Returns `None` when
    /// no claimable command exists — not an error.
    async fn claim(&self, worker_id: WorkerId, lease_ms: i64) -> Result<Option<Command>, QsError>;

    /// Apply a worker's settlement to a command it currently holds the
    /// lease on. Fails with [`QsError::NotOwner`] if the lease was already
    /// reclaimed by the reaper (§4.2 "Lease expiry race").
    async fn settle(&self, command_id: CommandId, worker_id: WorkerId, settlement: Settlement) -> Result<(), QsError>;

    /// Release expired leases back to `Pending` (or `Failed` once a
    /// command's redelivery budget is exhausted), run periodically by the
    /// orchestrator's sweeper (§4.2 "Reaping").
    async fn reap_expired_leases(&self, now_ms: i64, max_deliver: u32) -> Result<u64, QsError>;

    async fn get(&self, command_id: CommandId) -> Result<Command, QsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_variants_carry_expected_fields() {
        let s = Settlement::Retry { attempt: 2 };
        assert!(matches!(s, Settlement::Retry { attempt: 2 }));
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! In-memory [`QueueStore`] fake (`test-support`).

use crate::queue_store::{QsError, QueueStore, Settlement};
use async_trait::async_trait;
use noetl_core::{Clock, Command, CommandId, CommandStatus, ExecutionId, StepId, WorkerId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

pub struct InMemoryQueueStore<C: Clock> {
    clock: C,
    commands: Mutex<HashMap<CommandId, Command>>,
    order: Mutex<Vec<CommandId>>,
}

impl<C: Clock> InMemoryQueueStore<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, commands: Mutex::new(HashMap::new()), order: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl<C: Clock> QueueStore for InMemoryQueueStore<C> {
    async fn enqueue(
        &self,
        execution_id: ExecutionId,
        step_id: StepId,
        task_label: String,
        task_kind: String,
        payload: Value,
    ) -> Result<CommandId, QsError> {
        let command_id = CommandId::new();
        let command = Command {
            command_id: command_id.clone(),
            execution_id,
            step_id,
            task_label,
            task_kind,
            payload,
            status: CommandStatus::Pending,
            attempt: 0,
            leased_by: None,
            lease_expires_at_ms: None,
            failure_reason: None,
            error: None,
            created_at_ms: self.clock.epoch_ms(),
        };
        self.commands.lock().insert(command_id.clone(), command);
        self.order.lock().push(command_id.clone());
        Ok(command_id)
    }

    async fn claim(&self, worker_id: WorkerId, lease_ms: i64) -> Result<Option<Command>, QsError> {
        let now = self.clock.epoch_ms();
        let order = self.order.lock().clone();
        let mut commands = self.commands.lock();
        for command_id in order {
            if let Some(command) = commands.get_mut(&command_id) {
                if command.is_claimable(now) {
                    command.status = CommandStatus::Leased;
                    command.attempt += 1;
                    command.leased_by = Some(worker_id.clone());
                    command.lease_expires_at_ms = Some(now + lease_ms);
                    return Ok(Some(command.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn settle(&self, command_id: CommandId, worker_id: WorkerId, settlement: Settlement) -> Result<(), QsError> {
        let mut commands = self.commands.lock();
        let command = commands.get_mut(&command_id).ok_or_else(|| QsError::NotFound(command_id.clone()))?;
        if command.leased_by.as_ref() != Some(&worker_id) {
            return Err(QsError::NotOwner { command_id, worker_id });
        }
        match settlement {
            Settlement::Done => {
                command.status = CommandStatus::Done;
                command.leased_by = None;
                command.lease_expires_at_ms = None;
            }
            Settlement::Retry { attempt } => {
                command.status = CommandStatus::Pending;
                command.attempt = attempt;
                command.leased_by = None;
                command.lease_expires_at_ms = None;
            }
            Settlement::Failed { reason, error } => {
                command.status = CommandStatus::Failed;
                command.failure_reason = Some(reason);
                command.error = Some(error);
                command.leased_by = None;
                command.lease_expires_at_ms = None;
            }
        }
        Ok(())
    }

    async fn reap_expired_leases(&self, now_ms: i64, max_deliver: u32) -> Result<u64, QsError> {
        let mut reaped = 0u64;
        for command in self.commands.lock().values_mut() {
            if command.status == CommandStatus::Leased
                && command.lease_expires_at_ms.is_some_and(|exp| now_ms >= exp)
            {
                if command.attempt >= max_deliver {
                    command.status = CommandStatus::Failed;
                    command.failure_reason = Some(noetl_core::FailureReason::DeadLettered);
                } else {
                    command.status = CommandStatus::Pending;
                }
                command.leased_by = None;
                command.lease_expires_at_ms = None;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn get(&self, command_id: CommandId) -> Result<Command, QsError> {
        self.commands.lock().get(&command_id).cloned().ok_or(QsError::NotFound(command_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::{ErrorKind, FakeClock, TaskError};

    fn store() -> InMemoryQueueStore<FakeClock> {
        InMemoryQueueStore::new(FakeClock::new())
    }

    #[tokio::test]
    async fn claim_is_exclusive_across_workers() {
        let store = store();
        let id = store.enqueue(ExecutionId::from_raw(1), "s1".into(), "say_hi".into(), "http".into(), Value::Null).await.unwrap();
        let w1 = WorkerId::new();
        let w2 = WorkerId::new();
        let claimed1 = store.claim(w1.clone(), 30_000).await.unwrap();
        assert!(claimed1.is_some());
        assert_eq!(claimed1.unwrap().command_id, id);
        let claimed2 = store.claim(w2, 30_000).await.unwrap();
        assert!(claimed2.is_none());
    }

    #[tokio::test]
    async fn expired_lease_becomes_claimable_again() {
        let clock = FakeClock::new();
        let store = InMemoryQueueStore::new(clock.clone());
        store.enqueue(ExecutionId::from_raw(1), "s1".into(), "say_hi".into(), "http".into(), Value::Null).await.unwrap();
        let w1 = WorkerId::new();
        store.claim(w1, 1000).await.unwrap();
        clock.advance(std::time::Duration::from_millis(1500));
        let w2 = WorkerId::new();
        let claimed = store.claim(w2, 1000).await.unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn settle_rejects_non_owner() {
        let store = store();
        let id = store.enqueue(ExecutionId::from_raw(1), "s1".into(), "say_hi".into(), "http".into(), Value::Null).await.unwrap();
        let w1 = WorkerId::new();
        store.claim(w1, 30_000).await.unwrap();
        let w2 = WorkerId::new();
        let err = store.settle(id, w2, super::Settlement::Done).await.unwrap_err();
        assert!(matches!(err, QsError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn reap_dead_letters_after_max_deliver() {
        let store = store();
        let id = store.enqueue(ExecutionId::from_raw(1), "s1".into(), "say_hi".into(), "http".into(), Value::Null).await.unwrap();
        for _ in 0..3 {
            let w = WorkerId::new();
            store.claim(w, 0).await.unwrap();
            store.reap_expired_leases(i64::MAX, 3).await.unwrap();
        }
        let command = store.get(id).await.unwrap();
        assert_eq!(command.status, CommandStatus::Failed);
        assert_eq!(command.failure_reason, Some(noetl_core::FailureReason::DeadLettered));
    }
}

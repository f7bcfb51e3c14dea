// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Postgres-backed [`QueueStore`]. `claim` relies on
//! `FOR UPDATE SKIP LOCKED` plus a conditional `UPDATE ... RETURNING` so
//! that two workers racing for the same row never both win the lease
//! (§4.2).

use crate::queue_store::{QsError, QueueStore, Settlement};
use async_trait::async_trait;
use noetl_core::{Command, CommandId, CommandStatus, ExecutionId, FailureReason, StepId, TaskError, WorkerId};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(s: &str) -> CommandStatus {
    match s {
        "leased" => CommandStatus::Leased,
        "done" => CommandStatus::Done,
        "failed" => CommandStatus::Failed,
        _ => CommandStatus::Pending,
    }
}

fn row_to_command(row: sqlx::postgres::PgRow) -> Result<Command, QsError> {
    let map_err = |e: sqlx::Error| QsError::TransientStorage(e.to_string());
    let command_id: String = row.try_get("command_id").map_err(map_err)?;
    let execution_id: i64 = row.try_get("execution_id").map_err(map_err)?;
    let step_id: StepId = row.try_get("step_id").map_err(map_err)?;
    let task_label: String = row.try_get("task_label").map_err(map_err)?;
    let task_kind: String = row.try_get("task_kind").map_err(map_err)?;
    let payload: Value = row.try_get("payload").map_err(map_err)?;
    let status: String = row.try_get("status").map_err(map_err)?;
    let attempt: i32 = row.try_get("attempt").map_err(map_err)?;
    let leased_by: Option<String> = row.try_get("leased_by").map_err(map_err)?;
    let lease_expires_at_ms: Option<i64> = row.try_get("lease_expires_at_ms").map_err(map_err)?;
    let failure_reason: Option<String> = row.try_get("failure_reason").map_err(map_err)?;
    let error: Option<Value> = row.try_get("error").map_err(map_err)?;
    let created_at_ms: i64 = row.try_get("created_at_ms").map_err(map_err)?;

    Ok(Command {
        command_id: CommandId::from_string(command_id),
        execution_id: ExecutionId::from_raw(execution_id),
        step_id,
        task_label,
        task_kind,
        payload,
        status: parse_status(&status),
        attempt: attempt as u32,
        leased_by: leased_by.map(WorkerId::from_string),
        lease_expires_at_ms,
        failure_reason: failure_reason.map(|r| match r.as_str() {
            "dead_lettered" => FailureReason::DeadLettered,
            _ => FailureReason::Policy,
        }),
        error: error.and_then(|v| serde_json::from_value(v).ok()),
        created_at_ms,
    })
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        execution_id: ExecutionId,
        step_id: StepId,
        task_label: String,
        task_kind: String,
        payload: Value,
    ) -> Result<CommandId, QsError> {
        let command_id = CommandId::new();
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO commands (command_id, execution_id, step_id, task_label, task_kind, payload, status, attempt, created_at_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7)",
        )
        .bind(command_id.as_str())
        .bind(execution_id.as_i64())
        .bind(&step_id)
        .bind(&task_label)
        .bind(&task_kind)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| QsError::TransientStorage(e.to_string()))?;
        Ok(command_id)
    }

    async fn claim(&self, worker_id: WorkerId, lease_ms: i64) -> Result<Option<Command>, QsError> {
        let now = chrono::Utc::now().timestamp_millis();
        let expires_at = now + lease_ms;

        let row = sqlx::query(
            "UPDATE commands SET status = 'leased', attempt = attempt + 1, leased_by = $1, lease_expires_at_ms = $2 \
             WHERE command_id = ( \
                 SELECT command_id FROM commands \
                 WHERE (status = 'pending') OR (status = 'leased' AND lease_expires_at_ms <= $3) \
                 ORDER BY created_at_ms ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             RETURNING command_id, execution_id, step_id, task_label, task_kind, payload, status, attempt, leased_by, lease_expires_at_ms, failure_reason, error, created_at_ms",
        )
        .bind(worker_id.as_str())
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QsError::TransientStorage(e.to_string()))?;

        row.map(row_to_command).transpose()
    }

    async fn settle(&self, command_id: CommandId, worker_id: WorkerId, settlement: Settlement) -> Result<(), QsError> {
        let (status, attempt, failure_reason, error): (&str, Option<i32>, Option<&str>, Option<Value>) = match &settlement {
            Settlement::Done => ("done", None, None, None),
            Settlement::Retry { attempt } => ("pending", Some(*attempt as i32), None, None),
            Settlement::Failed { reason, error } => (
                "failed",
                None,
                Some(match reason {
                    FailureReason::Policy => "policy",
                    FailureReason::DeadLettered => "dead_lettered",
                }),
                Some(serde_json::to_value(error).map_err(|e| QsError::TransientStorage(e.to_string()))?),
            ),
        };

        let result = sqlx::query(
            "UPDATE commands SET status = $1, \
                attempt = COALESCE($2, attempt), \
                failure_reason = $3, error = $4, \
                leased_by = NULL, lease_expires_at_ms = NULL \
             WHERE command_id = $5 AND leased_by = $6",
        )
        .bind(status)
        .bind(attempt)
        .bind(failure_reason)
        .bind(error)
        .bind(command_id.as_str())
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| QsError::TransientStorage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QsError::NotOwner { command_id, worker_id });
        }
        Ok(())
    }

    async fn reap_expired_leases(&self, now_ms: i64, max_deliver: u32) -> Result<u64, QsError> {
        let result = sqlx::query(
            "UPDATE commands SET \
                status = CASE WHEN attempt >= $2 THEN 'failed' ELSE 'pending' END, \
                failure_reason = CASE WHEN attempt >= $2 THEN 'dead_lettered' ELSE failure_reason END, \
                leased_by = NULL, lease_expires_at_ms = NULL \
             WHERE status = 'leased' AND lease_expires_at_ms <= $1",
        )
        .bind(now_ms)
        .bind(max_deliver as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| QsError::TransientStorage(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn get(&self, command_id: CommandId) -> Result<Command, QsError> {
        let row = sqlx::query(
            "SELECT command_id, execution_id, step_id, task_label, task_kind, payload, status, attempt, leased_by, lease_expires_at_ms, failure_reason, error, created_at_ms \
             FROM commands WHERE command_id = $1",
        )
        .bind(command_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QsError::TransientStorage(e.to_string()))?
        .ok_or(QsError::NotFound(command_id))?;
        row_to_command(row)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Queue Store entry types (§5): a lease-based work item dispatched to a
//! worker over the Messaging Bus and claimed atomically in Postgres.

use crate::error::TaskError;
use crate::execution_id::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

crate::define_id! {
    /// Identifies a single queued unit of task work.
    pub struct CommandId("cmd-");
}

crate::define_id! {
    /// Identifies a worker process instance, for lease attribution.
    pub struct WorkerId("wkr-");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Visible to claim, not yet leased.
    Pending,
    /// Leased by a worker; invisible to further claims until the lease
    /// expires or the command is settled.
    Leased,
    Done,
    /// Terminal after outcome policy resolves to `fail`, or after
    /// `max_deliver` redeliveries are exhausted (ADDED, §C.3).
    Failed,
}

crate::simple_display! {
    CommandStatus {
        Pending => "pending",
        Leased => "leased",
        Done => "done",
        Failed => "failed",
    }
}

/// Why a command ended up `failed`, distinguishing a policy-directed
/// failure from exhausting broker redelivery (ADDED dead-letter
/// visibility, §C.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Policy,
    DeadLettered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: CommandId,
    pub execution_id: ExecutionId,
    pub step_id: crate::event::StepId,
    /// The task's label within `step_id`'s pipeline, so a worker can look
    /// up its originating [`noetl_playbook::Task`] (outcome policy, jump
    /// targets) without the kind alone, which pipelines may repeat.
    pub task_label: String,
    pub task_kind: String,
    pub payload: Value,
    pub status: CommandStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leased_by: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at_ms: i64,
}

impl Command {
    pub fn is_claimable(&self, now_ms: i64) -> bool {
        match self.status {
            CommandStatus::Pending => true,
            CommandStatus::Leased => self.lease_expires_at_ms.is_some_and(|exp| now_ms >= exp),
            CommandStatus::Done | CommandStatus::Failed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: CommandStatus, lease_expires_at_ms: Option<i64>) -> Command {
        Command {
            command_id: CommandId::new(),
            execution_id: crate::execution_id::ExecutionId::from_raw(1),
            step_id: "s1".into(),
            task_label: "say_hi".into(),
            task_kind: "http".into(),
            payload: Value::Null,
            status,
            attempt: 0,
            leased_by: None,
            lease_expires_at_ms,
            failure_reason: None,
            error: None,
            created_at_ms: 0,
        }
    }

    #[test]
    fn pending_is_always_claimable() {
        assert!(sample(CommandStatus::Pending, None).is_claimable(1000));
    }

    #[test]
    fn leased_claimable_only_after_expiry() {
        let cmd = sample(CommandStatus::Leased, Some(1000));
        assert!(!cmd.is_claimable(500));
        assert!(cmd.is_claimable(1000));
    }

    #[test]
    fn terminal_states_never_claimable() {
        assert!(!sample(CommandStatus::Done, None).is_claimable(i64::MAX));
        assert!(!sample(CommandStatus::Failed, None).is_claimable(i64::MAX));
    }
}

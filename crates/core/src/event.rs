// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Event Store payload types (§6).
//!
//! Every execution is fully described by an ordered log of [`Event`]s; all
//! other state ([`crate::execution::Execution`], command queue rows, loop
//! progress) is a materialized projection of this log, never a source of
//! truth in its own right.

use crate::error::TaskError;
use crate::execution_id::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies a step within a workflow graph. Opaque string, assigned at
/// playbook parse time.
pub type StepId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    ExecutionStarted {
        playbook_path: String,
        playbook_version: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_execution_id: Option<ExecutionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_step_id: Option<StepId>,
    },
    PlaybookStarted {
        playbook_path: String,
        playbook_version: String,
        /// Catalog identity backing this execution's playbook content
        /// (§4.5 "State view" batched context names `catalog_id`
        /// alongside `playbook_path`/`playbook_version`).
        catalog_id: i64,
    },
    WorkflowStarted {
        entry_step_id: StepId,
    },
    StepEnter {
        step_id: StepId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loop_iteration: Option<LoopIterationRef>,
    },
    StepExit {
        step_id: StepId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loop_iteration: Option<LoopIterationRef>,
    },
    CallDone {
        step_id: StepId,
        command_id: String,
        outcome: crate::outcome::Outcome,
    },
    TaskRetryScheduled {
        step_id: StepId,
        command_id: String,
        attempt: u32,
        delay_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
    TaskJumpedTo {
        step_id: StepId,
        target_step_id: StepId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
    TaskBroke {
        step_id: StepId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
    TaskFailed {
        step_id: StepId,
        error: TaskError,
    },
    LoopStarted {
        step_id: StepId,
        collection_size: Option<u64>,
        mode: crate::loop_spec::LoopMode,
        exec: crate::loop_spec::LoopExec,
    },
    LoopIterationStarted {
        step_id: StepId,
        iteration: LoopIterationRef,
        item: Value,
    },
    LoopIterationDone {
        step_id: StepId,
        iteration: LoopIterationRef,
        outcome: crate::outcome::Outcome,
    },
    LoopDone {
        step_id: StepId,
        completed: u64,
        failed: u64,
    },
    StepFailed {
        step_id: StepId,
        error: TaskError,
    },
    WorkflowCompleted {
        entry_step_id: StepId,
    },
    PlaybookCompleted {
        output: Value,
    },
    PlaybookFailed {
        error: TaskError,
    },
    ExecutionCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// ADDED: non-boundary audit event. Records which credential name was
    /// resolved for a task, never the resolved material itself.
    CredentialResolved {
        step_id: StepId,
        credential_name: String,
    },
    /// ADDED: durability for a task outcome policy rule's `set_ctx`
    /// mutation (§4.6.1). Non-boundary: it never drives a transition by
    /// itself, but is appended in the same batch as the `call_done`/
    /// `step_exit` it accompanies, so routing against `ctx` sees it.
    CtxUpdated {
        step_id: StepId,
        updates: serde_json::Map<String, Value>,
    },
}

impl EventBody {
    /// Boundary events are the ones the orchestrator's dispatch loop reacts
    /// to; audit events (like `CredentialResolved`) are appended for
    /// observability only and never drive a transition.
    pub fn is_boundary(&self) -> bool {
        !matches!(self, EventBody::CredentialResolved { .. } | EventBody::CtxUpdated { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventBody::ExecutionStarted { .. } => "execution_started",
            EventBody::PlaybookStarted { .. } => "playbook_started",
            EventBody::WorkflowStarted { .. } => "workflow_started",
            EventBody::StepEnter { .. } => "step_enter",
            EventBody::StepExit { .. } => "step_exit",
            EventBody::CallDone { .. } => "call_done",
            EventBody::TaskRetryScheduled { .. } => "task_retry_scheduled",
            EventBody::TaskJumpedTo { .. } => "task_jumped_to",
            EventBody::TaskBroke { .. } => "task_broke",
            EventBody::TaskFailed { .. } => "task_failed",
            EventBody::LoopStarted { .. } => "loop_started",
            EventBody::LoopIterationStarted { .. } => "loop_iteration_started",
            EventBody::LoopIterationDone { .. } => "loop_iteration_done",
            EventBody::LoopDone { .. } => "loop_done",
            EventBody::StepFailed { .. } => "step_failed",
            EventBody::WorkflowCompleted { .. } => "workflow_completed",
            EventBody::PlaybookCompleted { .. } => "playbook_completed",
            EventBody::PlaybookFailed { .. } => "playbook_failed",
            EventBody::ExecutionCancelled { .. } => "execution_cancelled",
            EventBody::CredentialResolved { .. } => "credential_resolved",
            EventBody::CtxUpdated { .. } => "ctx_updated",
        }
    }
}

/// Reference to a specific iteration of a specific loop step, for
/// disambiguating concurrent iteration events under parallel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopIterationRef {
    pub index: u64,
}

/// A single row in the Event Store: a [`EventBody`] plus the envelope
/// metadata (`execution_id`, sequence, timestamp) that makes the log
/// ordered and replayable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub execution_id: ExecutionId,
    /// Strictly increasing per `execution_id`, assigned by the Event Store
    /// on append. Starts at 1.
    pub seq: u64,
    pub occurred_at_ms: i64,
    pub body: EventBody,
    /// Set only on the first event of a batch that supplied one; used by
    /// the Event Store to de-duplicate retried appends (ADDED, §C.2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    pub fn is_boundary(&self) -> bool {
        self.body.is_boundary()
    }
}

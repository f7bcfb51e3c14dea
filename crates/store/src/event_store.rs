// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Event Store (§4.1): durable append-only log, the source of truth the
//! orchestrator reconstructs execution state from.

use async_trait::async_trait;
use noetl_core::{Event, EventBody, ExecutionId};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EsError {
    #[error("duplicate event batch for execution {0}")]
    Conflict(ExecutionId),
    #[error("transient storage error: {0}")]
    TransientStorage(String),
    #[error("invalid event payload: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub first_seq: u64,
    pub last_seq: u64,
}

/// Query parameters for [`EventStore::get_events`] (§4.1 "Read contract",
/// §8 boundary cases: `page_size` clamped to `[10, 500]`, `page >= 1`,
/// `since_event_id` takes precedence over `page` paging when both are
/// supplied).
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub since_event_id: Option<u64>,
    pub event_type: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl EventQuery {
    pub fn normalized(&self) -> Self {
        Self {
            since_event_id: self.since_event_id,
            event_type: self.event_type.clone(),
            page: self.page.max(1),
            page_size: self.page_size.clamp(10, 500),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProgress {
    Initial,
    InProgress,
    Completed,
}

/// The single batched projection ORC asks for before every evaluation
/// (§4.5 "State view"): avoids N+1 queries by folding the whole event log
/// for an execution in one read.
#[derive(Debug, Clone, Default)]
pub struct StateView {
    pub progress: Option<ExecutionProgress>,
    pub has_failed: bool,
    pub completed_steps: BTreeSet<String>,
    pub step_result: HashMap<String, Value>,
    pub ctx: HashMap<String, Value>,
    /// The execution's original input, i.e. the `workload` namespace
    /// admission/routing expressions evaluate against (§4.4). Captured
    /// off `execution_started` so it survives a cold replay the same way
    /// every other piece of state here does.
    pub workload: Value,
    pub playbook_path: Option<String>,
    pub playbook_version: Option<String>,
    pub catalog_id: Option<i64>,
    pub parent_execution_id: Option<ExecutionId>,
    /// The execution's final result, captured off `playbook_completed`
    /// (§4.5 "Nested playbook collaborator": this is the summary value a
    /// parent's `playbook` task reads back once the child reaches
    /// terminal state).
    pub output: Value,
    pub last_seq: u64,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically append a batch of events for `execution_id`, assigning
    /// strictly increasing `seq` values starting at `first_seq`
    /// (§4.1 "Write contract").
    async fn append(
        &self,
        execution_id: ExecutionId,
        batch: Vec<EventBody>,
        idempotency_key: Option<String>,
    ) -> Result<AppendResult, EsError>;

    async fn get_events(&self, execution_id: ExecutionId, query: EventQuery) -> Result<EventPage, EsError>;

    /// Single batched state-reconstruction query (§4.5).
    async fn state_view(&self, execution_id: ExecutionId) -> Result<StateView, EsError>;
}

/// Fold a single [`EventBody`] into a [`StateView`] in place. Shared by
/// the in-memory fake and (conceptually) by the Postgres CTE this mirrors,
/// so the two backends can never silently diverge on projection semantics.
pub fn fold(view: &mut StateView, seq: u64, body: &EventBody) {
    view.last_seq = view.last_seq.max(seq);
    match body {
        EventBody::ExecutionStarted { parent_execution_id, input, .. } => {
            view.progress = Some(ExecutionProgress::Initial);
            view.parent_execution_id = *parent_execution_id;
            view.workload = input.clone();
        }
        EventBody::PlaybookStarted { playbook_path, playbook_version, catalog_id } => {
            view.playbook_path = Some(playbook_path.clone());
            view.playbook_version = Some(playbook_version.clone());
            view.catalog_id = Some(*catalog_id);
        }
        EventBody::WorkflowStarted { .. } => {
            view.progress = Some(ExecutionProgress::InProgress);
        }
        EventBody::StepExit { step_id, .. } => {
            view.completed_steps.insert(step_id.clone());
        }
        EventBody::CallDone { step_id, outcome, .. } => {
            view.step_result.insert(step_id.clone(), outcome.as_template_value());
        }
        EventBody::StepFailed { .. } | EventBody::TaskFailed { .. } => {
            view.has_failed = true;
        }
        EventBody::PlaybookFailed { .. } => {
            view.has_failed = true;
            view.progress = Some(ExecutionProgress::Completed);
        }
        EventBody::CtxUpdated { updates, .. } => {
            for (key, value) in updates {
                view.ctx.insert(key.clone(), value.clone());
            }
        }
        EventBody::WorkflowCompleted { .. } => {
            view.progress = Some(ExecutionProgress::Completed);
        }
        EventBody::PlaybookCompleted { output } => {
            view.progress = Some(ExecutionProgress::Completed);
            view.output = output.clone();
        }
        EventBody::ExecutionCancelled { .. } => {
            view.progress = Some(ExecutionProgress::Completed);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_clamps_page_size_and_page() {
        let q = EventQuery { since_event_id: None, event_type: None, page: 0, page_size: 5000 };
        let n = q.normalized();
        assert_eq!(n.page, 1);
        assert_eq!(n.page_size, 500);

        let q2 = EventQuery { since_event_id: None, event_type: None, page: 0, page_size: 1 };
        assert_eq!(q2.normalized().page_size, 10);
    }
}

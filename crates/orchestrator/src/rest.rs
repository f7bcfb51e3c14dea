// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! DTOs and handler-layer logic for the internal REST surface (§6):
//! `POST /executions`, `POST /events`, `GET /executions/{id}`,
//! `POST /executions/cleanup`. Transport-agnostic on purpose — `daemon`
//! wires these into `axum` routes, this crate only decides what each
//! call means.

use crate::service::{Orchestrator, OrchestratorError};
use crate::sweeper::{self, StaleCandidate};
use noetl_core::{Clock, Event, EventBody, ExecutionId, ExecutionStatus};
use noetl_playbook::CatalogId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Store(#[from] noetl_store::EsError),
    #[error("execution {0} not found")]
    NotFound(ExecutionId),
    #[error("no catalog entry for {path}@{version}")]
    CatalogNotFound { path: String, version: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExecutionRequest {
    pub catalog_id: i64,
    pub playbook_path: String,
    pub playbook_version: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateExecutionResponse {
    pub execution_id: i64,
}

/// `POST /executions`: start a new top-level execution.
pub async fn create_execution<C: Clock>(orc: &Orchestrator<C>, req: CreateExecutionRequest) -> Result<CreateExecutionResponse, RestError> {
    let execution_id = orc
        .start_execution(CatalogId(req.catalog_id), req.playbook_path, req.playbook_version, req.input, None)
        .await?;
    Ok(CreateExecutionResponse { execution_id: execution_id.as_i64() })
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostEventRequest {
    pub execution_id: i64,
    pub events: Vec<EventBody>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostEventResponse {
    pub first_seq: u64,
    pub last_seq: u64,
}

/// `POST /events`: a worker (or a test harness) appends a batch of
/// events for one execution. Every boundary event in the batch is then
/// replayed through [`Orchestrator::on_event`] in order, since a single
/// worker round-trip often reports more than one (e.g. `call_done` then
/// `step_exit`).
pub async fn post_events<C: Clock>(orc: &Orchestrator<C>, req: PostEventRequest) -> Result<PostEventResponse, RestError> {
    let execution_id = ExecutionId::from_raw(req.execution_id);
    let result = orc.events_store().append(execution_id, req.events.clone(), req.idempotency_key).await?;

    let mut seq = result.first_seq;
    for body in &req.events {
        if body.is_boundary() {
            let event = Event { execution_id, seq, occurred_at_ms: 0, body: body.clone(), idempotency_key: None };
            orc.on_event(execution_id, &event).await?;
        }
        seq += 1;
    }
    Ok(PostEventResponse { first_seq: result.first_seq, last_seq: result.last_seq })
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: i64,
    pub playbook_path: Option<String>,
    pub playbook_version: Option<String>,
    pub status: ExecutionStatus,
    pub completed_steps: Vec<String>,
    /// Final result, populated once `status` is `Completed` (§4.5 "Nested
    /// playbook collaborator"); `Value::Null` before then.
    pub result: Value,
    pub last_seq: u64,
}

/// `GET /executions/{id}`: the execution's current projected state.
pub async fn get_execution<C: Clock>(orc: &Orchestrator<C>, execution_id: i64) -> Result<ExecutionSummary, RestError> {
    let execution_id = ExecutionId::from_raw(execution_id);
    let view = orc.events_store().state_view(execution_id).await?;
    if view.last_seq == 0 {
        return Err(RestError::NotFound(execution_id));
    }
    let status = match view.progress {
        Some(noetl_store::ExecutionProgress::Completed) if view.has_failed => ExecutionStatus::Failed,
        Some(noetl_store::ExecutionProgress::Completed) => ExecutionStatus::Completed,
        _ => ExecutionStatus::Running,
    };
    Ok(ExecutionSummary {
        execution_id: execution_id.as_i64(),
        playbook_path: view.playbook_path,
        playbook_version: view.playbook_version,
        status,
        completed_steps: view.completed_steps.into_iter().collect(),
        result: view.output,
        last_seq: view.last_seq,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveCatalogRequest {
    pub path: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveCatalogResponse {
    pub catalog_id: i64,
}

/// `GET /catalog/resolve`: resolve a `(path, version)` pair to its
/// `catalog_id`, the lookup a nested `playbook` task needs before it can
/// call `POST /executions` (§6 "Playbook" tool contract).
pub fn resolve_catalog<C: Clock>(orc: &Orchestrator<C>, req: ResolveCatalogRequest) -> Result<ResolveCatalogResponse, RestError> {
    orc.catalog()
        .resolve(&req.path, &req.version)
        .map(|id| ResolveCatalogResponse { catalog_id: id.0 })
        .ok_or_else(|| RestError::CatalogNotFound { path: req.path, version: req.version })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequest {
    pub candidates: Vec<CleanupCandidate>,
    pub cutoff_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupCandidate {
    pub execution_id: i64,
    pub last_event_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub cancelled_count: u64,
}

/// `POST /executions/cleanup`: run one sweep pass over caller-supplied
/// stale candidates (§4.5 "Cleanup of stuck executions"). The candidate
/// list itself is the daemon's responsibility to assemble (e.g. from a
/// periodic query of executions with no recent event) — this endpoint
/// only decides which of them get cancelled.
pub async fn cleanup<C: Clock>(orc: &Orchestrator<C>, req: CleanupRequest) -> Result<CleanupReport, RestError> {
    let candidates: Vec<StaleCandidate> =
        req.candidates.into_iter().map(|c| StaleCandidate { execution_id: ExecutionId::from_raw(c.execution_id), last_event_at_ms: c.last_event_at_ms }).collect();
    let result = sweeper::sweep(orc.events_store(), &candidates, req.cutoff_ms).await?;
    Ok(CleanupReport { cancelled_count: result.cancelled_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_bus::{TestBus, TestKvStore};
    use noetl_core::FakeClock;
    use noetl_playbook::{CatalogCache, CatalogEntry, StaticFetcher};
    use noetl_store::{InMemoryEventStore, InMemoryQueueStore};
    use std::sync::Arc;

    const LINEAR: &str = r#"
entry_step: start
steps:
  start:
    is_end: true
"#;

    fn orchestrator() -> Orchestrator<FakeClock> {
        let clock = FakeClock::new();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(CatalogEntry { catalog_id: CatalogId(1), path: "demo.yaml".into(), version: "1".into(), yaml: LINEAR.into() });
        let catalog = Arc::new(CatalogCache::new(fetcher, clock.clone()));
        let events = Arc::new(InMemoryEventStore::new(clock.clone()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone()));
        let bus = Arc::new(TestBus::new());
        let kv = Arc::new(TestKvStore::new(clock.clone()));
        Orchestrator::new(events, queue, bus, kv, catalog, clock, 1, "http://localhost:8080".into()).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_execution_round_trips_status() {
        let orc = orchestrator();
        let created = create_execution(&orc, CreateExecutionRequest { catalog_id: 1, playbook_path: "demo.yaml".into(), playbook_version: "1".into(), input: Value::Null })
            .await
            .unwrap();

        let summary = get_execution(&orc, created.execution_id).await.unwrap();
        assert_eq!(summary.status, ExecutionStatus::Completed);
        assert_eq!(summary.playbook_path.as_deref(), Some("demo.yaml"));
    }

    #[tokio::test]
    async fn get_unknown_execution_is_not_found() {
        let orc = orchestrator();
        assert!(matches!(get_execution(&orc, 999).await, Err(RestError::NotFound(_))));
    }

    #[test]
    fn resolves_known_catalog_entry() {
        let orc = orchestrator();
        let resolved = resolve_catalog(&orc, ResolveCatalogRequest { path: "demo.yaml".into(), version: "1".into() }).unwrap();
        assert_eq!(resolved.catalog_id, 1);
    }

    #[test]
    fn unknown_catalog_entry_is_not_found() {
        let orc = orchestrator();
        assert!(matches!(
            resolve_catalog(&orc, ResolveCatalogRequest { path: "missing.yaml".into(), version: "1".into() }),
            Err(RestError::CatalogNotFound { .. })
        ));
    }
}

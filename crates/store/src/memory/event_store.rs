// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! In-memory [`EventStore`] fake behind the same trait as the Postgres
//! backend (`test-support`), used by unit tests and the workspace-level
//! scenario tests.

use crate::event_store::{fold, AppendResult, EsError, EventPage, EventQuery, EventStore, Pagination, StateView};
use async_trait::async_trait;
use noetl_core::{Clock, Event, EventBody, ExecutionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Partition {
    events: Vec<Event>,
    idempotency_keys: HashSet<String>,
}

pub struct InMemoryEventStore<C: Clock> {
    clock: C,
    partitions: Mutex<HashMap<i64, Partition>>,
}

impl<C: Clock> InMemoryEventStore<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, partitions: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<C: Clock> EventStore for InMemoryEventStore<C> {
    async fn append(
        &self,
        execution_id: ExecutionId,
        batch: Vec<EventBody>,
        idempotency_key: Option<String>,
    ) -> Result<AppendResult, EsError> {
        if batch.is_empty() {
            return Err(EsError::Invalid("empty event batch".to_string()));
        }
        let mut partitions = self.partitions.lock();
        let partition = partitions.entry(execution_id.as_i64()).or_default();

        if let Some(key) = &idempotency_key {
            if partition.idempotency_keys.contains(key) {
                return Err(EsError::Conflict(execution_id));
            }
        }

        let mut next_seq = partition.events.last().map(|e| e.seq + 1).unwrap_or(1);
        let first_seq = next_seq;
        let now = self.clock.epoch_ms();
        for (i, body) in batch.into_iter().enumerate() {
            partition.events.push(Event {
                execution_id,
                seq: next_seq,
                occurred_at_ms: now,
                body,
                idempotency_key: if i == 0 { idempotency_key.clone() } else { None },
            });
            next_seq += 1;
        }
        if let Some(key) = idempotency_key {
            partition.idempotency_keys.insert(key);
        }
        Ok(AppendResult { first_seq, last_seq: next_seq - 1 })
    }

    async fn get_events(&self, execution_id: ExecutionId, query: EventQuery) -> Result<EventPage, EsError> {
        let query = query.normalized();
        let partitions = self.partitions.lock();
        let Some(partition) = partitions.get(&execution_id.as_i64()) else {
            return Ok(EventPage::default());
        };

        let mut filtered: Vec<Event> = partition
            .events
            .iter()
            .filter(|e| query.since_event_id.is_none_or(|since| e.seq > since))
            .filter(|e| query.event_type.as_deref().is_none_or(|kind| e.kind() == kind))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.seq.cmp(&a.seq));

        if query.since_event_id.is_some() {
            return Ok(EventPage {
                events: filtered,
                pagination: Pagination { page: 1, page_size: query.page_size, has_more: false },
            });
        }

        let start = ((query.page - 1) * query.page_size) as usize;
        let end = (start + query.page_size as usize).min(filtered.len());
        let has_more = end < filtered.len();
        let page_events = if start < filtered.len() { filtered[start..end].to_vec() } else { Vec::new() };
        Ok(EventPage { events: page_events, pagination: Pagination { page: query.page, page_size: query.page_size, has_more } })
    }

    async fn state_view(&self, execution_id: ExecutionId) -> Result<StateView, EsError> {
        let partitions = self.partitions.lock();
        let mut view = StateView::default();
        if let Some(partition) = partitions.get(&execution_id.as_i64()) {
            for event in &partition.events {
                fold(&mut view, event.seq, &event.body);
            }
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::FakeClock;

    fn store() -> InMemoryEventStore<FakeClock> {
        InMemoryEventStore::new(FakeClock::new())
    }

    #[tokio::test]
    async fn append_assigns_strictly_increasing_seq() {
        let store = store();
        let id = ExecutionId::from_raw(1);
        let result = store
            .append(id, vec![EventBody::ExecutionStarted {
                playbook_path: "p".into(), playbook_version: "1".into(), input: serde_json::Value::Null,
                parent_execution_id: None, parent_step_id: None,
            }, EventBody::PlaybookStarted { playbook_path: "p".into(), playbook_version: "1".into(), catalog_id: 1 }], None)
            .await
            .unwrap();
        assert_eq!(result.first_seq, 1);
        assert_eq!(result.last_seq, 2);

        let result2 = store.append(id, vec![EventBody::WorkflowStarted { entry_step_id: "start".into() }], None).await.unwrap();
        assert_eq!(result2.first_seq, 3);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = store();
        let id = ExecutionId::from_raw(1);
        let body = || vec![EventBody::ExecutionCancelled { reason: None }];
        store.append(id, body(), Some("key-1".into())).await.unwrap();
        let err = store.append(id, body(), Some("key-1".into())).await.unwrap_err();
        assert!(matches!(err, EsError::Conflict(_)));
    }

    #[tokio::test]
    async fn since_event_id_takes_precedence_over_page() {
        let store = store();
        let id = ExecutionId::from_raw(1);
        for _ in 0..5 {
            store.append(id, vec![EventBody::ExecutionCancelled { reason: None }], None).await.unwrap();
        }
        let page = store
            .get_events(id, EventQuery { since_event_id: Some(3), page: 2, page_size: 10 })
            .await
            .unwrap();
        assert_eq!(page.events.len(), 2);
        assert!(page.events.iter().all(|e| e.seq > 3));
    }

    #[tokio::test]
    async fn state_view_tracks_completed_steps_and_failure() {
        let store = store();
        let id = ExecutionId::from_raw(1);
        store
            .append(
                id,
                vec![
                    EventBody::StepExit { step_id: "start".into(), loop_iteration: None },
                    EventBody::StepFailed { step_id: "greet".into(), error: noetl_core::TaskError::new(noetl_core::ErrorKind::Permanent, "boom") },
                ],
                None,
            )
            .await
            .unwrap();
        let view = store.state_view(id).await.unwrap();
        assert!(view.completed_steps.contains("start"));
        assert!(view.has_failed);
    }
}

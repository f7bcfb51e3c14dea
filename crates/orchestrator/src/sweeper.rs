// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Stuck-execution sweeper (§4.5 "Cleanup of stuck executions"): any
//! execution with no terminal event and no new events within a
//! configurable window gets a synthetic `execution_cancelled`.

use noetl_core::{EventBody, ExecutionId};
use noetl_store::{EsError, EventStore, ExecutionProgress};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct SweepResult {
    pub cancelled_count: u64,
}

/// One execution's last-known activity, as tracked by whatever collects
/// the candidate set (the daemon's periodic task, or a direct caller in
/// tests) — the sweeper itself is storage-agnostic about *how* candidates
/// are discovered, only about what it does with one once found stale.
pub struct StaleCandidate {
    pub execution_id: ExecutionId,
    pub last_event_at_ms: i64,
}

/// Runs one sweep pass over `candidates`, appending `execution_cancelled`
/// to every execution that is still non-terminal and whose last event
/// predates `cutoff_ms`.
pub async fn sweep(
    events: &Arc<dyn EventStore>,
    candidates: &[StaleCandidate],
    cutoff_ms: i64,
) -> Result<SweepResult, EsError> {
    let mut cancelled = 0u64;
    for candidate in candidates {
        if candidate.last_event_at_ms >= cutoff_ms {
            continue;
        }
        let view = events.state_view(candidate.execution_id).await?;
        if matches!(view.progress, Some(ExecutionProgress::Completed)) {
            continue;
        }
        events
            .append(
                candidate.execution_id,
                vec![EventBody::ExecutionCancelled {
                    reason: Some(format!("no activity for execution since {}", candidate.last_event_at_ms)),
                }],
                None,
            )
            .await?;
        cancelled += 1;
    }
    Ok(SweepResult { cancelled_count: cancelled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::FakeClock;
    use noetl_store::InMemoryEventStore;

    #[tokio::test]
    async fn cancels_stale_non_terminal_executions() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new(FakeClock::new()));
        let id = ExecutionId::from_raw(1);
        store
            .append(id, vec![EventBody::ExecutionStarted { playbook_path: "p".into(), playbook_version: "1".into(), input: serde_json::Value::Null, parent_execution_id: None, parent_step_id: None }], None)
            .await
            .unwrap();

        let candidates = vec![StaleCandidate { execution_id: id, last_event_at_ms: 0 }];
        let result = sweep(&store, &candidates, 1_000).await.unwrap();
        assert_eq!(result.cancelled_count, 1);

        let view = store.state_view(id).await.unwrap();
        assert!(matches!(view.progress, Some(ExecutionProgress::Completed)));
    }

    #[tokio::test]
    async fn skips_executions_with_recent_activity() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new(FakeClock::new()));
        let id = ExecutionId::from_raw(1);
        store
            .append(id, vec![EventBody::ExecutionStarted { playbook_path: "p".into(), playbook_version: "1".into(), input: serde_json::Value::Null, parent_execution_id: None, parent_step_id: None }], None)
            .await
            .unwrap();

        let candidates = vec![StaleCandidate { execution_id: id, last_event_at_ms: 2_000 }];
        let result = sweep(&store, &candidates, 1_000).await.unwrap();
        assert_eq!(result.cancelled_count, 0);
    }

    #[tokio::test]
    async fn skips_already_terminal_executions() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new(FakeClock::new()));
        let id = ExecutionId::from_raw(1);
        store.append(id, vec![EventBody::PlaybookCompleted { output: serde_json::Value::Null }], None).await.unwrap();

        let candidates = vec![StaleCandidate { execution_id: id, last_event_at_ms: 0 }];
        let result = sweep(&store, &candidates, 1_000).await.unwrap();
        assert_eq!(result.cancelled_count, 0);
    }
}

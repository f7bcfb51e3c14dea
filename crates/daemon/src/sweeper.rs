// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Periodic stale-execution sweep (§4.5 "Cleanup of stuck executions"):
//! on an interval, discover candidates via [`PgEventStore::list_stale_candidates`]
//! and hand them to [`noetl_orchestrator::sweeper::sweep`], which decides
//! which of them are actually still non-terminal and cancels those.

use noetl_orchestrator::sweeper::{sweep, StaleCandidate};
use noetl_store::{EventStore, PgEventStore};
use std::sync::Arc;
use std::time::Duration;

/// Runs one sweep pass every `interval`, treating any execution whose
/// last event predates `stuck_after` as a candidate.
pub async fn run(events: Arc<PgEventStore>, interval: Duration, stuck_after: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let cutoff_ms = chrono::Utc::now().timestamp_millis() - stuck_after.as_millis() as i64;
        match events.list_stale_candidates(cutoff_ms).await {
            Ok(rows) => {
                let candidates: Vec<StaleCandidate> =
                    rows.into_iter().map(|(execution_id, last_event_at_ms)| StaleCandidate { execution_id, last_event_at_ms }).collect();
                if candidates.is_empty() {
                    continue;
                }
                let store = events.clone() as Arc<dyn EventStore>;
                match sweep(&store, &candidates, cutoff_ms).await {
                    Ok(result) if result.cancelled_count > 0 => {
                        tracing::info!(cancelled = result.cancelled_count, "sweeper cancelled stuck executions");
                    }
                    Ok(_) => {}
                    Err(error) => tracing::error!(%error, "sweeper pass failed"),
                }
            }
            Err(error) => tracing::error!(%error, "failed to list stale execution candidates"),
        }
    }
}

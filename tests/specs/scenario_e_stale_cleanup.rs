//! Scenario E (spec.md §8): an execution enters a step and then falls
//! silent — the worker never reports back. A sweep pass run past the
//! staleness cutoff must cancel it exactly once, appending
//! `execution_cancelled`, and must leave a second, recently-active
//! execution alone.

use crate::support::Harness;
use noetl_orchestrator::sweeper::{sweep, StaleCandidate};
use noetl_store::{EventStore, ExecutionProgress};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PLAYBOOK: &str = r#"
entry_step: fetch
steps:
  fetch:
    tasks:
      - label: get
        kind: http
        args: {}
    next:
      arcs:
        - when: "true"
          target: done
  done:
    is_end: true
"#;

#[tokio::test]
async fn stuck_execution_is_cancelled_while_a_fresh_one_survives() {
    let harness = Harness::new(1, "fetch.yaml", "1", PLAYBOOK);
    let events: Arc<dyn EventStore> = harness.events.clone();

    let stuck_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "fetch.yaml".into(), "1".into(), json!({}), None)
        .await
        .expect("start must succeed");
    let stuck_last_seen = harness.clock.epoch_ms();

    // Time passes with no worker report for `stuck_id`...
    harness.clock.advance(Duration::from_millis(10_000));

    // ...then a second execution starts, active right up to the sweep.
    let fresh_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "fetch.yaml".into(), "1".into(), json!({}), None)
        .await
        .expect("start must succeed");
    let fresh_last_seen = harness.clock.epoch_ms();

    harness.clock.advance(Duration::from_millis(1_000));
    let cutoff_ms = fresh_last_seen + 1;

    let candidates = vec![
        StaleCandidate { execution_id: stuck_id, last_event_at_ms: stuck_last_seen },
        StaleCandidate { execution_id: fresh_id, last_event_at_ms: fresh_last_seen },
    ];
    let result = sweep(&events, &candidates, cutoff_ms).await.expect("sweep must succeed");
    assert_eq!(result.cancelled_count, 1, "only the execution predating the cutoff should be cancelled");

    let stuck_kinds = harness.event_kinds(stuck_id).await;
    assert_eq!(stuck_kinds.last(), Some(&"execution_cancelled"));

    let fresh_kinds = harness.event_kinds(fresh_id).await;
    assert!(!fresh_kinds.contains(&"execution_cancelled"), "a recently active execution must not be swept");

    let stuck_view = harness.events.state_view(stuck_id).await.expect("state view must succeed");
    assert!(matches!(stuck_view.progress, Some(ExecutionProgress::Completed)));
}

//! Scenario D (spec.md §8): a loop step fans a 3-item collection out as
//! parallel, distributed iterations (`mode: parallel, exec: distributed`,
//! no `max_in_flight`, so all three start at once). Expects one
//! `loop_started` (`collection_size = 3`), three `loop_iteration_started`,
//! three `loop_iteration_done`, one `loop_done` (`completed = 3, failed =
//! 0`), and the playbook then routes onward to completion.

use crate::support::Harness;
use noetl_core::{EventBody, LoopIterationRef, Outcome};
use serde_json::json;

const PLAYBOOK: &str = r#"
entry_step: process_items
steps:
  process_items:
    loop_descriptor:
      in: "workload.items"
      iterator: item
      spec:
        mode: parallel
        exec: distributed
    tasks:
      - label: handle
        kind: python
        args: {}
    next:
      arcs:
        - when: "true"
          target: done
  done:
    is_end: true
"#;

#[tokio::test]
async fn three_item_parallel_distributed_loop_completes_the_playbook() {
    let harness = Harness::new(1, "loop.yaml", "1", PLAYBOOK);
    let execution_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "loop.yaml".into(), "1".into(), json!({"items": [1, 2, 3]}), None)
        .await
        .expect("start must succeed");

    let kinds_after_start = harness.event_kinds(execution_id).await;
    assert_eq!(
        kinds_after_start,
        vec![
            "execution_started",
            "playbook_started",
            "workflow_started",
            "step_enter",
            "loop_started",
            "loop_iteration_started",
            "loop_iteration_started",
            "loop_iteration_started",
        ],
        "max_in_flight defaults to unbounded for a parallel loop, so all three iterations are started immediately"
    );

    for index in 0..3u64 {
        harness
            .report(
                execution_id,
                EventBody::LoopIterationDone {
                    step_id: "process_items".into(),
                    iteration: LoopIterationRef { index },
                    outcome: Outcome::success(json!({"handled": index})),
                },
            )
            .await;
    }

    let kinds = harness.event_kinds(execution_id).await;
    assert_eq!(kinds.iter().filter(|k| **k == "loop_iteration_done").count(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == "loop_done").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "loop_started").count(), 1);
    assert_eq!(kinds.last(), Some(&"playbook_completed"));

    // loop_done must land after all three loop_iteration_done events, and
    // the playbook must route onward (step_enter/step_exit of `done`)
    // rather than stalling once the collection drains.
    let loop_done_pos = kinds.iter().position(|k| *k == "loop_done").unwrap();
    let last_iter_done_pos = kinds.iter().rposition(|k| *k == "loop_iteration_done").unwrap();
    assert!(loop_done_pos > last_iter_done_pos);
    assert!(kinds[loop_done_pos..].contains(&"step_enter"));
    assert!(kinds[loop_done_pos..].contains(&"step_exit"));
}

//! Scenario A (spec.md §8): a three-step linear playbook, `start -> greet
//! -> end`, where `greet` runs a single python task that returns
//! `{"msg": "hi"}`. Expects the exact boundary-event sequence:
//! `execution_started, playbook_started, workflow_started, step_enter(start),
//! step_exit(start), step_enter(greet), call_done(greet), step_exit(greet),
//! step_enter(end), step_exit(end), playbook_completed`.

use crate::support::Harness;
use noetl_core::{EventBody, Outcome};

const PLAYBOOK: &str = r#"
entry_step: start
steps:
  start:
    next:
      arcs:
        - when: "true"
          target: greet
  greet:
    tasks:
      - label: say_hi
        kind: python
        args:
          code: "print('hi')"
    next:
      arcs:
        - when: "true"
          target: end
  end:
    is_end: true
"#;

#[tokio::test]
async fn basic_linear_execution_produces_the_expected_event_sequence() {
    let harness = Harness::new(1, "greet.yaml", "1", PLAYBOOK);
    let execution_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "greet.yaml".into(), "1".into(), serde_json::json!({}), None)
        .await
        .expect("start must succeed");

    // `start` has no tasks: it enters and exits in the same admission
    // pass, so the worker never sees a command for it.
    let outcome = Outcome::success(serde_json::json!({"msg": "hi"}));
    harness.report(execution_id, EventBody::CallDone { step_id: "greet".into(), command_id: "say_hi".into(), outcome }).await;

    let kinds = harness.event_kinds(execution_id).await;
    assert_eq!(
        kinds,
        vec![
            "execution_started",
            "playbook_started",
            "workflow_started",
            "step_enter",
            "step_exit",
            "step_enter",
            "call_done",
            "step_exit",
            "step_enter",
            "step_exit",
            "playbook_completed",
        ]
    );
}

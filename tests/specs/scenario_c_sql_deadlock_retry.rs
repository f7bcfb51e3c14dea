//! Scenario C (spec.md §8): a Postgres `INSERT` hits SQLSTATE `40P01`
//! (deadlock_detected) once, then succeeds. The task's outcome policy
//! retries on that code with exponential backoff, base delay `2.0`.
//! Expects exactly one `task_retry_scheduled` event (attempt 1, delay
//! 2s — `2.0 * 2^0`), carrying `outcome.pg.code` on the recorded error,
//! then a successful `call_done`.

use crate::support::Harness;
use noetl_core::{Backoff, EventBody, Outcome, TaskError};
use noetl_playbook::{ActionSpec, Evaluator, PolicySpec, RuleSpec};
use noetl_worker::policy::{decide, resolve_policy};
use serde_json::json;

const PLAYBOOK: &str = r#"
entry_step: insert_row
steps:
  insert_row:
    tasks:
      - label: insert
        kind: postgres
        args: {}
    next:
      arcs:
        - when: "true"
          target: done
  done:
    is_end: true
"#;

fn deadlock_retry_policy_spec() -> PolicySpec {
    PolicySpec {
        rules: vec![RuleSpec {
            when: "outcome.pg.code == '40P01'".into(),
            then: ActionSpec::Retry { attempts: 5, backoff: Backoff::Exponential, delay: "2.0".into() },
            set_iter: None,
            set_ctx: None,
        }],
        or_else: None,
    }
}

#[tokio::test]
async fn pg_deadlock_once_then_success_retries_with_exponential_backoff() {
    let harness = Harness::new(1, "insert.yaml", "1", PLAYBOOK);
    let execution_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "insert.yaml".into(), "1".into(), json!({}), None)
        .await
        .expect("start must succeed");

    let eval = Evaluator::new("scenario_c");
    let spec = deadlock_retry_policy_spec();

    // Attempt 1: deadlock_detected.
    let failed = Outcome::failure(TaskError::pg("40P01", "deadlock detected")).with_pg_code("40P01");
    let scope = json!({"outcome": failed.as_template_value()});
    let policy = resolve_policy(&spec, &eval, &scope).expect("template must resolve");
    let decision = decide(&policy, &failed);
    let (attempt, delay_ms) = match decision.action {
        noetl_core::Action::Retry { backoff, delay, .. } => {
            let attempt = 1u32;
            let delay_seconds = backoff.delay_seconds(delay, attempt);
            (attempt, (delay_seconds * 1000.0) as u64)
        }
        other => panic!("expected a retry decision for a 40P01 deadlock, got {other:?}"),
    };
    assert_eq!(delay_ms, 2000, "2.0 * 2^(1-1) == 2.0s");
    harness
        .report(
            execution_id,
            EventBody::TaskRetryScheduled {
                step_id: "insert_row".into(),
                command_id: "insert".into(),
                attempt,
                delay_ms,
                error: failed.error.clone(),
            },
        )
        .await;

    // Attempt 2: succeeds.
    let succeeded = Outcome::success(json!({"rows_affected": 1}));
    let scope = json!({"outcome": succeeded.as_template_value()});
    let policy = resolve_policy(&spec, &eval, &scope).expect("template must resolve");
    let decision = decide(&policy, &succeeded);
    match decision.action {
        noetl_core::Action::Continue => {
            harness
                .report(execution_id, EventBody::CallDone { step_id: "insert_row".into(), command_id: "insert".into(), outcome: succeeded })
                .await;
        }
        other => panic!("expected the retry to succeed, got {other:?}"),
    }

    let kinds = harness.event_kinds(execution_id).await;
    let retries: Vec<_> = kinds.iter().filter(|k| **k == "task_retry_scheduled").collect();
    assert_eq!(retries.len(), 1, "40P01 should have been retried exactly once before success");
    assert!(kinds.contains(&"call_done"));
    assert_eq!(kinds.last(), Some(&"playbook_completed"));

    let recorded_error = match &failed.error {
        Some(err) => err.details.get("pg_code").cloned(),
        None => None,
    };
    assert_eq!(recorded_error, Some(json!("40P01")));
}

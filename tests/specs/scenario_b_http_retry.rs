//! Scenario B (spec.md §8): an HTTP GET returns `503` twice, then `200
//! {"ok": true}`. The task's outcome policy retries on `[429,500,502,503,504]`
//! with exponential backoff, base delay `1.0`. Expects two
//! `task_retry_scheduled` events (attempts 1 and 2, delays 1s and 2s — the
//! `d·2^(n-1)` formula from property 6), then a successful `call_done`.

use crate::support::Harness;
use noetl_core::{Backoff, EventBody, Outcome, TaskError};
use noetl_playbook::{ActionSpec, Evaluator, PolicySpec, RuleSpec};
use noetl_worker::policy::{decide, resolve_policy};
use serde_json::json;

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

fn retry_policy_spec() -> PolicySpec {
    PolicySpec {
        rules: vec![RuleSpec {
            when: "outcome.http.status in [429,500,502,503,504]".into(),
            then: ActionSpec::Retry { attempts: 5, backoff: Backoff::Exponential, delay: "1.0".into() },
            set_iter: None,
            set_ctx: None,
        }],
        or_else: None,
    }
}

#[tokio::test]
async fn http_503_twice_then_success_retries_with_exponential_backoff() {
    let harness = Harness::new(1, "fetch.yaml", "1", PLAYBOOK);
    let execution_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "fetch.yaml".into(), "1".into(), json!({}), None)
        .await
        .expect("start must succeed");

    let eval = Evaluator::new("scenario_b");
    let spec = retry_policy_spec();
    let statuses = [503u16, 503, 200];
    let mut attempt = 0u32;

    for status in statuses {
        let outcome = if status < 400 {
            Outcome::success(json!({"ok": true})).with_http_status(status)
        } else {
            Outcome::failure(TaskError::http(status, format!("server responded {status}"))).with_http_status(status)
        };
        let scope = json!({"outcome": outcome.as_template_value()});
        let policy = resolve_policy(&spec, &eval, &scope).expect("template must resolve");
        let decision = decide(&policy, &outcome);

        match decision.action {
            noetl_core::Action::Retry { backoff, delay, .. } => {
                attempt += 1;
                let delay_seconds = backoff.delay_seconds(delay, attempt);
                let delay_ms = (delay_seconds * 1000.0) as u64;
                harness
                    .report(
                        execution_id,
                        EventBody::TaskRetryScheduled { step_id: "fetch".into(), command_id: "get".into(), attempt, delay_ms, error: outcome.error.clone() },
                    )
                    .await;
            }
            noetl_core::Action::Continue => {
                harness.report(execution_id, EventBody::CallDone { step_id: "fetch".into(), command_id: "get".into(), outcome }).await;
            }
            other => panic!("unexpected policy action for status {status}: {other:?}"),
        }
    }

    assert_eq!(attempt, 2, "503 should have been retried exactly twice before the 200 succeeded");

    let kinds = harness.event_kinds(execution_id).await;
    let retries: Vec<_> = kinds.iter().filter(|k| **k == "task_retry_scheduled").collect();
    assert_eq!(retries.len(), 2);
    assert!(kinds.contains(&"call_done"));
    assert_eq!(kinds.last(), Some(&"playbook_completed"));
}

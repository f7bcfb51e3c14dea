//! Scenario F (spec.md §8): a parent step runs a nested playbook via
//! `tool: playbook, wait: true`; the child execution ends `failed`. Two
//! layers are exercised:
//!
//! 1. [`noetl_tools::PlaybookTool`] classifies a failed/cancelled child as
//!    `ErrorKind::Downstream`, carrying `child_execution_id` (§7).
//! 2. The parent's `Orchestrator` gives the failed step's router a chance
//!    at a failure arc (§7 "the execution evaluator either routes via a
//!    failure arc or marks the execution failed"): a matching arc routes
//!    onward exactly as it would from a successful `step_exit`; only when
//!    nothing matches does the execution end `playbook_failed` (the
//!    "else" branch of §4.5 "Termination").

use crate::support::Harness;
use async_trait::async_trait;
use noetl_core::{ErrorKind, EventBody, ExecutionId, ExecutionStatus, TaskError};
use noetl_tools::{ChildOutcome, PlaybookStarter, PlaybookTool, StartError, TaskContext, Tool};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct AlwaysFailsStarter {
    child_id: ExecutionId,
}

#[async_trait]
impl PlaybookStarter for AlwaysFailsStarter {
    async fn start(&self, _path: &str, _version: Option<&str>, _input: Value, _parent: ExecutionId) -> Result<ExecutionId, StartError> {
        Ok(self.child_id)
    }

    async fn poll(&self, execution_id: ExecutionId) -> Option<ChildOutcome> {
        assert_eq!(execution_id, self.child_id);
        Some(ChildOutcome { status: ExecutionStatus::Failed, result: Value::Null })
    }
}

fn task_context(execution_id: ExecutionId) -> TaskContext {
    TaskContext { execution_id, step_id: "sub".into(), credentials: HashMap::new(), timeout: Duration::from_millis(500) }
}

#[tokio::test]
async fn nested_playbook_failure_classifies_as_downstream_error() {
    let child_id = ExecutionId::from_raw(99);
    let starter = Arc::new(AlwaysFailsStarter { child_id });
    let tool = PlaybookTool::new(starter);

    let outcome = tool.execute(json!({"path": "child.yaml", "wait": true}), &task_context(ExecutionId::from_raw(1))).await;

    assert!(!outcome.is_success());
    let error = outcome.error.expect("a failed child must produce a TaskError");
    assert_eq!(error.kind, ErrorKind::Downstream);
    assert_eq!(error.child_execution_id, Some(child_id.as_i64()));
}

const PLAYBOOK_WITH_UNCONDITIONAL_ARC: &str = r#"
entry_step: sub
steps:
  sub:
    tasks:
      - label: run_child
        kind: playbook
        args: {}
    next:
      arcs:
        - when: "true"
          target: done
  done:
    is_end: true
"#;

const PLAYBOOK_WITHOUT_FAILURE_ARC: &str = r#"
entry_step: sub
steps:
  sub:
    tasks:
      - label: run_child
        kind: playbook
        args: {}
    next:
      arcs:
        - when: "false"
          target: done
  done:
    is_end: true
"#;

#[tokio::test]
async fn step_failed_routes_through_a_matching_arc_instead_of_failing() {
    let harness = Harness::new(1, "parent.yaml", "1", PLAYBOOK_WITH_UNCONDITIONAL_ARC);
    let execution_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "parent.yaml".into(), "1".into(), json!({}), None)
        .await
        .expect("start must succeed");

    let error = TaskError::downstream(99, "nested execution ended as Failed");
    harness.report(execution_id, EventBody::StepFailed { step_id: "sub".into(), error }).await;

    let kinds = harness.event_kinds(execution_id).await;
    // The unconditional arc matches on failure exactly as it would on
    // success, so `done` is entered and the playbook completes instead
    // of failing.
    assert_eq!(kinds.last(), Some(&"playbook_completed"));
    assert_eq!(kinds.iter().filter(|k| **k == "step_enter").count(), 2, "both `sub` and `done` should have been entered");
}

#[tokio::test]
async fn step_failed_ends_the_playbook_when_no_arc_matches() {
    let harness = Harness::new(1, "parent.yaml", "1", PLAYBOOK_WITHOUT_FAILURE_ARC);
    let execution_id = harness
        .orchestrator
        .start_execution(noetl_playbook::CatalogId(1), "parent.yaml".into(), "1".into(), json!({}), None)
        .await
        .expect("start must succeed");

    let error = TaskError::downstream(99, "nested execution ended as Failed");
    harness.report(execution_id, EventBody::StepFailed { step_id: "sub".into(), error }).await;

    let kinds = harness.event_kinds(execution_id).await;
    assert_eq!(kinds.last(), Some(&"playbook_failed"));
    // `done` is never entered: its only arc never matches the failure.
    assert_eq!(kinds.iter().filter(|k| **k == "step_enter").count(), 1, "only `sub` should have been entered");
}

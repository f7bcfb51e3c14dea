// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! The Worker Runtime's claim-dispatch-settle engine (§4.6): subscribes to
//! command notifications, claims the oldest claimable command off the
//! Queue Store, renders and runs it through the Tool Registry, resolves
//! its outcome against the task's outcome policy, and reports the
//! resulting event batch back to the orchestrator before settling the
//! claim.
//!
//! A single claimed command can drive more than one task when its policy
//! jumps within the step's pipeline (§4.6.1 `jump`); [`Worker::run_command`]
//! loops over that whole chain and settles exactly once at the end,
//! whatever terminal action it lands on.

use crate::policy;
use crate::reporter::EventReporter;
use crate::scope::TaskScope;
use crate::sleeper::Sleeper;
use crate::throttle::Throttle;

use noetl_bus::{CommandSubscriber, Delivery, SubscribeError};
use noetl_core::{
    Clock, Command, CredentialName, ErrorKind, EventBody, ExecutionId, FailureReason,
    LoopIterationRef, Outcome, ResultValue, StepId, TaskError, WorkerId,
};
use noetl_keychain::{Keychain, KeychainError};
use noetl_playbook::{CatalogCache, CatalogError, CatalogId, EvalError, Evaluator, Task};
use noetl_store::{EsError, EventStore, ExecutionProgress, QsError, QueueStore, Settlement};
use noetl_tools::{ArtifactTool, TaskContext, ToolRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A task outcome policy that jumps within a step's pipeline forever
/// would otherwise pin a worker on one command indefinitely; this caps
/// the chain so a misconfigured playbook surfaces as a failed command
/// rather than a stuck one.
const MAX_JUMP_HOPS: u32 = 32;
const DEFAULT_RESULT_BUCKET: &str = "noetl-results";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
    #[error(transparent)]
    Queue(#[from] QsError),
    #[error(transparent)]
    Store(#[from] EsError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Keychain(#[from] KeychainError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Policy(#[from] policy::PolicyEvalError),
    #[error(transparent)]
    Report(#[from] crate::reporter::ReporterError),
    #[error("step {0:?} not found in playbook {1:?}")]
    UnknownStep(StepId, String),
    #[error("task label {0:?} not found in step {1:?}")]
    UnknownTask(String, StepId),
    #[error("execution {0:?} has no catalog entry recorded yet")]
    MissingCatalog(ExecutionId),
    #[error("task outcome policy jump chain exceeded {0} hops")]
    JumpLimitExceeded(u32),
}

/// Wires a command subscription, the Queue/Event Stores, the catalog
/// cache, the Tool Registry and Keychain, the result externalizer, and
/// the concurrency throttle into the single component that drives a
/// claimed command to a terminal settlement.
pub struct Worker<C: Clock> {
    worker_id: WorkerId,
    clock: C,
    subscriber: Arc<dyn CommandSubscriber>,
    queue: Arc<dyn QueueStore>,
    events: Arc<dyn EventStore>,
    catalog: Arc<CatalogCache<C>>,
    tools: Arc<ToolRegistry>,
    keychain: Arc<dyn Keychain>,
    reporter: Arc<dyn EventReporter>,
    throttle: Arc<Throttle>,
    sleeper: Arc<dyn Sleeper>,
    artifact: Option<Arc<ArtifactTool>>,
    eval: Evaluator,
    lease_ms: i64,
    fetch_timeout: Duration,
    result_externalize_threshold_bytes: u64,
    result_bucket: String,
}

impl<C: Clock> Worker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: WorkerId,
        clock: C,
        subscriber: Arc<dyn CommandSubscriber>,
        queue: Arc<dyn QueueStore>,
        events: Arc<dyn EventStore>,
        catalog: Arc<CatalogCache<C>>,
        tools: Arc<ToolRegistry>,
        keychain: Arc<dyn Keychain>,
        reporter: Arc<dyn EventReporter>,
        throttle: Arc<Throttle>,
        sleeper: Arc<dyn Sleeper>,
        artifact: Option<Arc<ArtifactTool>>,
        lease_ms: i64,
        fetch_timeout: Duration,
        result_externalize_threshold_bytes: u64,
    ) -> Self {
        Self {
            worker_id,
            clock,
            subscriber,
            queue,
            events,
            catalog,
            tools,
            keychain,
            reporter,
            throttle,
            sleeper,
            artifact,
            eval: Evaluator::new("worker_evaluation"),
            lease_ms,
            fetch_timeout,
            result_externalize_threshold_bytes,
            result_bucket: DEFAULT_RESULT_BUCKET.to_string(),
        }
    }

    /// Pulls notifications until the subscription closes, handling each
    /// delivery on its own spawned task so a slow tool call never blocks
    /// the next claim (concurrency is bounded by `self.throttle`, not by
    /// this loop).
    pub async fn run(self: Arc<Self>) -> Result<(), WorkerError> {
        loop {
            match self.subscriber.next().await? {
                Some(delivery) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        if let Err(error) = worker.handle_delivery(delivery).await {
                            tracing::error!(%error, "command delivery handling failed");
                        }
                    });
                }
                None => return Ok(()),
            }
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<(), WorkerError> {
        let claimed_at_ms = self.clock.epoch_ms();
        let Some(command) = self.queue.claim(self.worker_id, self.lease_ms).await? else {
            // Nothing claimable right now; another worker may have beaten
            // us to it, or the lease hasn't expired yet. Not an error.
            delivery.ack().await?;
            return Ok(());
        };
        tracing::debug!(claimed_at_ms, command_id = command.command_id.as_str(), task_kind = %command.task_kind, "command claimed");

        let _permit = self.throttle.acquire(&command.task_kind).await;
        match self.run_command(command).await {
            Ok(()) => delivery.ack().await?,
            Err(error) => {
                tracing::error!(%error, "claimed command failed, nak'ing delivery for redelivery");
                delivery.nak().await?;
            }
        }
        Ok(())
    }

    /// Drives one claimed command to a terminal settlement, following
    /// outcome-policy jumps within the step's task pipeline as a single
    /// unit of work.
    async fn run_command(&self, command: Command) -> Result<(), WorkerError> {
        let execution_id = command.execution_id;
        let view = self.events.state_view(execution_id).await?;

        if view.progress == Some(ExecutionProgress::Completed) {
            // The execution reached a terminal state before this claim
            // landed (e.g. cancelled mid-flight). Nothing left to report;
            // settle it done so the lease is released rather than
            // eventually dead-lettered.
            self.queue.settle(command.command_id, self.worker_id, Settlement::Done).await?;
            return Ok(());
        }

        let catalog_id = view.catalog_id.ok_or(WorkerError::MissingCatalog(execution_id))?;
        let playbook = self.catalog.get(CatalogId(catalog_id))?;
        let step = playbook
            .step(&command.step_id)
            .ok_or_else(|| WorkerError::UnknownStep(command.step_id.clone(), playbook.path.clone()))?;

        let mut task_label = command.task_label.clone();
        let mut payload = command.payload.clone();
        let mut hops = 0u32;

        loop {
            let task = step
                .task(&task_label)
                .ok_or_else(|| WorkerError::UnknownTask(task_label.clone(), command.step_id.clone()))?;

            let mut audit_events = Vec::new();
            let (credentials, keychain_value) = self.resolve_credentials(&command.step_id, task, &mut audit_events).await?;

            let iter_value = payload.get("_iter").cloned();
            let iteration = payload.get("_iter_index").and_then(Value::as_u64).map(|index| LoopIterationRef { index });
            let prev_outcome = view.step_result.get(&command.step_id).cloned();

            let render_scope = TaskScope {
                view: &view,
                iter: iter_value.as_ref(),
                keychain: &keychain_value,
                task_label: &task_label,
                attempt: command.attempt,
                prev_outcome: prev_outcome.as_ref(),
                outcome: None,
            }
            .to_value();

            let mut args = self.eval.render_value(&payload, &render_scope)?;
            strip_iteration_keys(&mut args);

            let task_ctx = TaskContext {
                execution_id,
                step_id: command.step_id.clone(),
                credentials,
                timeout: self.fetch_timeout,
            };

            let outcome = self.tools.execute(&task.kind, args, &task_ctx).await;
            let outcome = self.externalize_if_large(execution_id, &command, &task_label, outcome).await;

            let outcome_value = outcome.as_template_value();
            let policy_scope = TaskScope {
                view: &view,
                iter: iter_value.as_ref(),
                keychain: &keychain_value,
                task_label: &task_label,
                attempt: command.attempt,
                prev_outcome: prev_outcome.as_ref(),
                outcome: Some(&outcome_value),
            }
            .to_value();

            let resolved_policy = policy::resolve_policy(&task.policy, &self.eval, &policy_scope)?;
            let decision = policy::decide(&resolved_policy, &outcome);

            if let Some(updates) = &decision.set_ctx {
                audit_events.push(EventBody::CtxUpdated { step_id: command.step_id.clone(), updates: updates.clone() });
            }

            match decision.action {
                noetl_core::Action::Continue => {
                    let mut events = audit_events;
                    events.push(terminal_event(&command.step_id, iteration, command.command_id.as_str(), outcome));
                    self.report_and_settle(execution_id, &command, events, Settlement::Done).await?;
                    return Ok(());
                }
                noetl_core::Action::Retry { attempts, backoff, delay } => {
                    if command.attempt >= attempts {
                        let error = outcome.error.clone().unwrap_or_else(exhausted_retry_error);
                        let mut events = audit_events;
                        events.push(EventBody::TaskFailed { step_id: command.step_id.clone(), error: error.clone() });
                        events.push(failure_boundary_event(&command.step_id, iteration, error.clone()));
                        self.report_and_settle(execution_id, &command, events, Settlement::Failed { reason: FailureReason::Policy, error }).await?;
                        return Ok(());
                    }
                    let next_attempt = command.attempt + 1;
                    let delay_s = backoff.delay_seconds(delay, command.attempt).max(0.0);
                    self.sleeper.sleep(Duration::from_secs_f64(delay_s)).await;
                    let mut events = audit_events;
                    events.push(EventBody::TaskRetryScheduled {
                        step_id: command.step_id.clone(),
                        command_id: command.command_id.as_str().to_string(),
                        attempt: next_attempt,
                        delay_ms: (delay_s * 1000.0) as u64,
                        error: outcome.error.clone(),
                    });
                    self.report_and_settle(execution_id, &command, events, Settlement::Retry { attempt: next_attempt }).await?;
                    return Ok(());
                }
                noetl_core::Action::Jump { ref to } => {
                    hops += 1;
                    if hops > MAX_JUMP_HOPS {
                        return Err(WorkerError::JumpLimitExceeded(MAX_JUMP_HOPS));
                    }
                    let target = step
                        .task(to)
                        .ok_or_else(|| WorkerError::UnknownTask(to.clone(), command.step_id.clone()))?;
                    let mut events = audit_events;
                    events.push(EventBody::TaskJumpedTo { step_id: command.step_id.clone(), target_step_id: to.clone(), error: outcome.error.clone() });
                    self.reporter.report(execution_id, events, None).await?;
                    payload = build_task_payload(target, &payload);
                    task_label = to.clone();
                    continue;
                }
                noetl_core::Action::Break => {
                    let mut events = audit_events;
                    events.push(EventBody::TaskBroke { step_id: command.step_id.clone(), error: outcome.error.clone() });
                    events.push(match iteration {
                        Some(iteration) => EventBody::LoopIterationDone { step_id: command.step_id.clone(), iteration, outcome },
                        None => EventBody::StepExit { step_id: command.step_id.clone(), loop_iteration: None },
                    });
                    self.report_and_settle(execution_id, &command, events, Settlement::Done).await?;
                    return Ok(());
                }
                noetl_core::Action::Fail => {
                    let error = outcome.error.clone().unwrap_or_else(policy_directed_failure_error);
                    let mut events = audit_events;
                    events.push(EventBody::TaskFailed { step_id: command.step_id.clone(), error: error.clone() });
                    events.push(match iteration {
                        Some(iteration) => EventBody::LoopIterationDone { step_id: command.step_id.clone(), iteration, outcome },
                        None => EventBody::StepFailed { step_id: command.step_id.clone(), error: error.clone() },
                    });
                    self.report_and_settle(execution_id, &command, events, Settlement::Failed { reason: FailureReason::Policy, error }).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn resolve_credentials(
        &self,
        step_id: &StepId,
        task: &Task,
        audit_events: &mut Vec<EventBody>,
    ) -> Result<(HashMap<CredentialName, noetl_core::CredentialMaterial>, Value), WorkerError> {
        let mut credentials = HashMap::with_capacity(task.credentials.len());
        let mut keychain_scope = serde_json::Map::with_capacity(task.credentials.len());
        for name in &task.credentials {
            let credential_name = CredentialName::from(name.clone());
            let material = self.keychain.resolve(&credential_name).await?;
            keychain_scope.insert(name.clone(), Value::String(material.expose().to_string()));
            credentials.insert(credential_name, material);
            audit_events.push(EventBody::CredentialResolved { step_id: step_id.clone(), credential_name: name.clone() });
        }
        Ok((credentials, Value::Object(keychain_scope)))
    }

    /// Writes a result exceeding `result_externalize_threshold_bytes` to
    /// the configured artifact store and swaps it for a [`ResultRef`];
    /// falls back to the inline result if no artifact tool is configured
    /// or the write itself fails (externalization is best-effort, never a
    /// reason to fail an otherwise-successful task).
    async fn externalize_if_large(&self, execution_id: ExecutionId, command: &Command, task_label: &str, outcome: Outcome) -> Outcome {
        let Some(artifact) = &self.artifact else { return outcome };
        let Some(ResultValue::Inline(value)) = &outcome.result else { return outcome };
        let body = serde_json::to_vec(value).unwrap_or_default();
        if (body.len() as u64) < self.result_externalize_threshold_bytes {
            return outcome;
        }
        let key = format!("{}/{}/{}.json", execution_id.as_i64(), command.step_id, task_label);
        match artifact.put(&self.result_bucket, &key, &body).await {
            Ok(result_ref) => {
                let mut out = outcome;
                out.result = Some(ResultValue::External(result_ref));
                out
            }
            Err(error) => {
                tracing::warn!(%error, "result externalization failed, keeping inline result");
                outcome
            }
        }
    }

    async fn report_and_settle(&self, execution_id: ExecutionId, command: &Command, events: Vec<EventBody>, settlement: Settlement) -> Result<(), WorkerError> {
        let idempotency_key = Some(command.command_id.as_str().to_string());
        self.reporter.report(execution_id, events, idempotency_key).await?;
        self.queue.settle(command.command_id, self.worker_id, settlement).await?;
        Ok(())
    }
}

fn terminal_event(step_id: &StepId, iteration: Option<LoopIterationRef>, command_id: &str, outcome: Outcome) -> EventBody {
    match iteration {
        Some(iteration) => EventBody::LoopIterationDone { step_id: step_id.clone(), iteration, outcome },
        None => EventBody::CallDone { step_id: step_id.clone(), command_id: command_id.to_string(), outcome },
    }
}

fn failure_boundary_event(step_id: &StepId, iteration: Option<LoopIterationRef>, error: TaskError) -> EventBody {
    match iteration {
        Some(iteration) => EventBody::LoopIterationDone { step_id: step_id.clone(), iteration, outcome: Outcome::failure(error) },
        None => EventBody::StepFailed { step_id: step_id.clone(), error },
    }
}

fn exhausted_retry_error() -> TaskError {
    TaskError::new(ErrorKind::Transient, "retry budget exhausted").retryable(false)
}

fn policy_directed_failure_error() -> TaskError {
    TaskError::new(ErrorKind::Permanent, "task outcome policy directed failure")
}

fn strip_iteration_keys(value: &mut Value) {
    if let Value::Object(map) = value {
        map.remove("_iter");
        map.remove("_iter_index");
    }
}

/// Builds the payload a jumped-to task runs with: its own `args` template,
/// carrying forward `_iter`/`_iter_index` from `original` when present so a
/// jump taken mid-loop-iteration doesn't lose the iteration's item.
fn build_task_payload(task: &Task, original: &Value) -> Value {
    let mut payload = task.args.clone();
    let Value::Object(orig) = original else { return payload };

    match &mut payload {
        Value::Object(map) => {
            for key in ["_iter", "_iter_index"] {
                if let Some(v) = orig.get(key) {
                    map.insert(key.to_string(), v.clone());
                }
            }
        }
        _ => {
            let mut map = serde_json::Map::new();
            for key in ["_iter", "_iter_index"] {
                if let Some(v) = orig.get(key) {
                    map.insert(key.to_string(), v.clone());
                }
            }
            if !map.is_empty() {
                payload = Value::Object(map);
            }
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::test_support::RecordingReporter;
    use crate::sleeper::test_support::InstantSleeper;
    use crate::throttle::test_support::StaticPoolPressure;
    use async_trait::async_trait;
    use noetl_bus::{CommandNotification, TestSubscriber};
    use noetl_core::{CommandId, ExecutionId, FakeClock, OutcomeStatus};
    use noetl_keychain::StaticKeychain;
    use noetl_playbook::{CatalogEntry, StaticFetcher};
    use noetl_store::{InMemoryEventStore, InMemoryQueueStore};
    use noetl_tools::Tool;
    use std::sync::atomic::{AtomicBool, Ordering};

    const PLAYBOOK: &str = r#"
entry_step: start
steps:
  start:
    tasks:
      - label: say_hi
        kind: echo
        args:
          greeting: "hello {{ workload.name }}"
        credentials:
          - db-prod
    is_end: true
"#;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn kind(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, args: Value, _ctx: &TaskContext) -> Outcome {
            Outcome::success(args)
        }
    }

    struct FailTool(AtomicBool);

    #[async_trait]
    impl Tool for FailTool {
        fn kind(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _args: Value, _ctx: &TaskContext) -> Outcome {
            if self.0.swap(true, Ordering::SeqCst) {
                Outcome::success(Value::Null)
            } else {
                Outcome::failure(TaskError::new(ErrorKind::Transient, "first attempt fails"))
            }
        }
    }

    struct Harness {
        worker: Arc<Worker<FakeClock>>,
        reporter: Arc<RecordingReporter>,
        subscriber: Arc<TestSubscriber>,
        queue: Arc<InMemoryQueueStore<FakeClock>>,
        events: Arc<InMemoryEventStore<FakeClock>>,
        execution_id: ExecutionId,
        sleeper: Arc<InstantSleeper>,
    }

    async fn harness(tool: Arc<dyn Tool>) -> Harness {
        let clock = FakeClock::new();
        let events: Arc<InMemoryEventStore<FakeClock>> = Arc::new(InMemoryEventStore::new(clock.clone()));
        let queue: Arc<InMemoryQueueStore<FakeClock>> = Arc::new(InMemoryQueueStore::new(clock.clone()));

        let fetcher = Arc::new(StaticFetcher::new());
        let catalog_id = noetl_playbook::CatalogId(1);
        fetcher.insert(CatalogEntry { catalog_id, path: "demo.yaml".into(), version: "1".into(), yaml: PLAYBOOK.into() });
        let catalog = Arc::new(CatalogCache::new(fetcher, clock.clone()));

        let execution_id = ExecutionId::from_raw(42);
        events
            .append(
                execution_id,
                vec![
                    EventBody::ExecutionStarted {
                        playbook_path: "demo.yaml".into(),
                        playbook_version: "1".into(),
                        input: serde_json::json!({"name": "alice"}),
                        parent_execution_id: None,
                        parent_step_id: None,
                    },
                    EventBody::PlaybookStarted { playbook_path: "demo.yaml".into(), playbook_version: "1".into(), catalog_id: catalog_id.0 },
                    EventBody::WorkflowStarted { entry_step_id: "start".into() },
                ],
                None,
            )
            .await
            .unwrap();

        let command_id = queue
            .enqueue(execution_id, "start".into(), "say_hi".into(), "echo".into(), serde_json::json!({}))
            .await
            .unwrap();

        let subscriber = Arc::new(TestSubscriber::new());
        subscriber.push(CommandNotification { execution_id, queue_id: command_id, step: "start".into(), api_url: "http://localhost".into() });

        let mut tools = ToolRegistry::new();
        tools.register(tool);

        let keychain = Arc::new(
            StaticKeychain::new().with(CredentialName::from("db-prod"), noetl_core::CredentialMaterial::new("s3cr3t")),
        );
        let reporter = Arc::new(RecordingReporter::new());
        let pool_pressure = Arc::new(StaticPoolPressure::new(0));
        let throttle = Arc::new(Throttle::new(4, 2, pool_pressure, 2, Duration::from_millis(1)));
        let sleeper = Arc::new(InstantSleeper::new());

        let worker = Arc::new(Worker::new(
            WorkerId::new(),
            clock,
            subscriber.clone(),
            queue.clone(),
            events.clone(),
            catalog,
            Arc::new(tools),
            keychain,
            reporter.clone(),
            throttle,
            sleeper.clone(),
            None,
            30_000,
            Duration::from_secs(5),
            262_144,
        ));

        Harness { worker, reporter, subscriber, queue, events, execution_id, sleeper }
    }

    #[tokio::test]
    async fn successful_task_reports_call_done_and_settles() {
        let h = harness(Arc::new(EchoTool)).await;
        let delivery = h.subscriber.next().await.unwrap().unwrap();
        h.worker.handle_delivery(delivery).await.unwrap();

        let batches = h.reporter.batches();
        assert_eq!(batches.len(), 1);
        let (execution_id, events) = &batches[0];
        assert_eq!(*execution_id, h.execution_id);
        assert!(events.iter().any(|e| matches!(e, EventBody::CredentialResolved { .. })));
        assert!(events.iter().any(|e| matches!(e, EventBody::CallDone { outcome, .. } if outcome.status == OutcomeStatus::Success)));
        assert_eq!(h.subscriber.acked(), 1);

        let page = h.events.get_events(h.execution_id, Default::default()).await.unwrap();
        assert!(page.events.iter().any(|e| e.kind() == "call_done"));
    }

    #[tokio::test]
    async fn default_policy_fails_command_on_tool_error() {
        let h = harness(Arc::new(FailTool(AtomicBool::new(true)))).await;
        let delivery = h.subscriber.next().await.unwrap().unwrap();
        h.worker.handle_delivery(delivery).await.unwrap();

        let batches = h.reporter.batches();
        let (_, events) = &batches[0];
        assert!(events.iter().any(|e| matches!(e, EventBody::StepFailed { .. })));
        assert!(h.sleeper.requested().is_empty());
    }

    #[tokio::test]
    async fn claim_miss_just_acks() {
        let h = harness(Arc::new(EchoTool)).await;
        // Drain the one real command first.
        h.queue.claim(WorkerId::new(), 30_000).await.unwrap();

        let subscriber = TestSubscriber::new();
        subscriber.push(CommandNotification { execution_id: h.execution_id, queue_id: CommandId::new(), step: "start".into(), api_url: "x".into() });
        let delivery = subscriber.next().await.unwrap().unwrap();
        h.worker.handle_delivery(delivery).await.unwrap();
        assert_eq!(subscriber.acked(), 1);
        assert!(h.reporter.batches().is_empty());
    }
}

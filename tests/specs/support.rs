//! Shared scenario-test harness: a single-playbook `Orchestrator` wired
//! to the in-memory test-support fakes, plus a helper for replaying a
//! worker-reported event through [`noetl_orchestrator::Orchestrator::on_event`].

use noetl_bus::{TestBus, TestKvStore};
use noetl_core::{Event, EventBody, ExecutionId, FakeClock};
use noetl_orchestrator::Orchestrator;
use noetl_playbook::{CatalogCache, CatalogEntry, CatalogId, StaticFetcher};
use noetl_store::{InMemoryEventStore, InMemoryQueueStore};
use std::sync::Arc;

pub struct Harness {
    pub orchestrator: Orchestrator<FakeClock>,
    pub events: Arc<InMemoryEventStore<FakeClock>>,
    pub queue: Arc<InMemoryQueueStore<FakeClock>>,
    pub bus: Arc<TestBus>,
    pub clock: FakeClock,
}

impl Harness {
    pub fn new(catalog_id: i64, path: &str, version: &str, yaml: &str) -> Self {
        let clock = FakeClock::new();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(CatalogEntry { catalog_id: CatalogId(catalog_id), path: path.into(), version: version.into(), yaml: yaml.into() });
        let catalog = Arc::new(CatalogCache::new(fetcher, clock.clone()));
        let events = Arc::new(InMemoryEventStore::new(clock.clone()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone()));
        let bus = Arc::new(TestBus::new());
        let kv = Arc::new(TestKvStore::new(clock.clone()));
        let orchestrator = Orchestrator::new(events.clone(), queue.clone(), bus.clone(), kv, catalog, clock.clone(), 1, "http://localhost:8080".into())
            .expect("shard id 1 is in range");
        Self { orchestrator, events, queue, bus, clock }
    }

    /// Append `body` to the log and replay it through the orchestrator,
    /// exactly as the daemon's `/events` endpoint does for a worker report.
    pub async fn report(&self, execution_id: ExecutionId, body: EventBody) {
        self.events.append(execution_id, vec![body.clone()], None).await.expect("append must succeed");
        let event = Event { execution_id, seq: 0, occurred_at_ms: self.clock.epoch_ms(), body, idempotency_key: None };
        self.orchestrator.on_event(execution_id, &event).await.expect("orchestrator reaction must succeed");
    }

    /// The execution's full event log, oldest first (the store itself
    /// returns newest-first pages; tests want chronological order).
    pub async fn event_kinds(&self, execution_id: ExecutionId) -> Vec<&'static str> {
        let query = noetl_store::EventQuery { page: 1, page_size: 500, ..Default::default() };
        let mut events = self.events.get_events(execution_id, query).await.expect("read must succeed").events;
        events.sort_by_key(|e| e.seq);
        events.iter().map(|e| e.kind()).collect()
    }
}

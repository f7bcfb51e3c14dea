// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! `noetl-worker`: runs the Worker Runtime's claim-dispatch-settle loop
//! (§4.6). Assembles the Tool Registry from [`Config`]'s feature set,
//! reconciles the durable NATS consumer on startup (§4.3 "Configuration
//! reconciliation"), and reports events back to `noetl-server` over HTTP.

use noetl_bus::{reconcile, ConsumerConfig, NatsCommandSubscriber, ReconcileAction};
use noetl_core::config::{Config, ProcessEnv};
use noetl_core::{SystemClock, WorkerId};
use noetl_daemon::catalog::FileCatalogFetcher;
use noetl_daemon::http_starter::HttpPlaybookStarter;
use noetl_keychain::{Keychain, StaticKeychain};
use noetl_playbook::CatalogCache;
use noetl_tools::{ArtifactTool, ContainerTool, HttpTool, MessagingTool, PlaybookTool, PythonTool, SqlTool, ToolRegistry, TransferTool};
use noetl_worker::{HttpEventReporter, RealSleeper, Throttle, Worker};
use std::path::PathBuf;
use std::sync::Arc;

const COMMANDS_STREAM: &str = "NOETL_COMMANDS";
const COMMANDS_DURABLE: &str = "noetl-worker";

/// Approximates `noetl_worker::throttle::PoolPressure` off the live
/// `sqlx::PgPool`: the gap between its configured size and its currently
/// idle connections stands in for the number of callers actually waiting
/// on one.
struct PgPoolPressure(sqlx::PgPool);

impl noetl_worker::PoolPressure for PgPoolPressure {
    fn waiting_requests(&self) -> u32 {
        self.0.size().saturating_sub(self.0.num_idle() as u32)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env(&ProcessEnv);
    noetl_daemon::init_tracing(&cfg);

    let pool = noetl_store::connect(&cfg.database_url, cfg.pg_pool_max).await?;
    let queue = Arc::new(noetl_store::PgQueueStore::new(pool.clone()));
    let events = Arc::new(noetl_store::PgEventStore::new(pool.clone()));

    let nats = async_nats::connect(&cfg.nats_url).await?;
    let js = async_nats::jetstream::new(nats.clone());

    let desired = ConsumerConfig {
        max_ack_pending: cfg.worker_nats_max_ack_pending as i64,
        max_deliver: cfg.mb_max_deliver as i64,
        ack_wait_secs: cfg.mb_ack_wait.as_secs(),
    };
    // `NatsCommandSubscriber::new` binds via `get_or_create_consumer`,
    // which already implements `reconcile`'s create/keep behavior against
    // the broker directly; this call is the startup log recording intent.
    let action = reconcile(&desired, None);
    tracing::info!(?action, stream = COMMANDS_STREAM, durable = COMMANDS_DURABLE, "reconciling durable consumer");
    let subscriber = Arc::new(NatsCommandSubscriber::new(js.clone(), COMMANDS_STREAM, COMMANDS_DURABLE, desired).await?);

    let catalog_dir = std::env::var("NOETL_CATALOG_DIR").unwrap_or_else(|_| "./catalog".to_string());
    let fetcher = Arc::new(FileCatalogFetcher::load(&PathBuf::from(catalog_dir))?);
    let clock = SystemClock;
    let catalog = Arc::new(CatalogCache::new(fetcher, clock));

    let api_url = std::env::var("NOETL_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let reporter = Arc::new(HttpEventReporter::new(api_url.clone()));
    let starter: Arc<dyn noetl_tools::PlaybookStarter> = Arc::new(HttpPlaybookStarter::new(api_url.clone()));

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
    let k8s_client = kube::Client::try_default().await?;
    let k8s_namespace = std::env::var("NOETL_K8S_NAMESPACE").unwrap_or_else(|_| "default".to_string());

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(HttpTool::new(reqwest::Client::new())));
    tools.register(Arc::new(TransferTool::new(reqwest::Client::new())));
    tools.register(Arc::new(SqlTool::new(pool.clone())));
    tools.register(Arc::new(ContainerTool::new(k8s_client, k8s_namespace)));
    tools.register(Arc::new(PythonTool::new(std::env::var("NOETL_PYTHON").unwrap_or_else(|_| "python3".to_string()))));
    tools.register(Arc::new(ArtifactTool::new(aws_sdk_s3::Client::new(&s3_config))));
    tools.register(Arc::new(PlaybookTool::new(starter)));
    let artifact = Arc::new(ArtifactTool::new(aws_sdk_s3::Client::new(&s3_config)));
    tools.register(Arc::new(MessagingTool::new(
        Arc::new(noetl_bus::NatsKvStore::new(js)),
        Arc::new(noetl_bus::NatsNotificationPublisher::new(nats)),
    )));

    let keychain: Arc<dyn Keychain> = Arc::new(StaticKeychain::new());

    let pool_pressure = Arc::new(PgPoolPressure(pool));
    let throttle = Arc::new(Throttle::new(
        cfg.worker_max_inflight_commands,
        cfg.worker_max_inflight_db_commands,
        pool_pressure,
        cfg.worker_pool_waiting_threshold,
        cfg.worker_throttle_poll_interval,
    ));

    let worker = Arc::new(Worker::new(
        WorkerId::new(),
        clock,
        subscriber,
        queue,
        events,
        catalog,
        Arc::new(tools),
        keychain,
        reporter,
        throttle,
        Arc::new(RealSleeper),
        Some(artifact),
        cfg.command_lease.as_millis() as i64,
        cfg.worker_fetch_timeout,
        cfg.result_externalize_threshold_bytes,
    ));

    tracing::info!("noetl-worker starting");
    worker.run().await?;
    Ok(())
}

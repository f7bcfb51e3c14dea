// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! `noetl-server`: hosts the Orchestrator behind the internal REST
//! surface (§6). Assembles the Event Store, Queue Store, Messaging Bus
//! and catalog cache from [`Config`], then serves `axum` on
//! `NOETL_API_BIND` (default `0.0.0.0:8080`) and runs the stuck-execution
//! sweeper alongside it.

use noetl_bus::NatsNotificationPublisher;
use noetl_core::config::{Config, ProcessEnv};
use noetl_core::SystemClock;
use noetl_daemon::catalog::FileCatalogFetcher;
use noetl_daemon::rest::router;
use noetl_orchestrator::Orchestrator;
use noetl_playbook::CatalogCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env(&ProcessEnv);
    noetl_daemon::init_tracing(&cfg);

    let pool = noetl_store::connect(&cfg.database_url, cfg.pg_pool_max).await?;
    let events = Arc::new(noetl_store::PgEventStore::new(pool.clone()));
    let queue = Arc::new(noetl_store::PgQueueStore::new(pool));

    let nats = async_nats::connect(&cfg.nats_url).await?;
    let js = async_nats::jetstream::new(nats.clone());
    let bus = Arc::new(NatsNotificationPublisher::new(nats));
    let kv = Arc::new(noetl_bus::NatsKvStore::new(js));

    let catalog_dir = std::env::var("NOETL_CATALOG_DIR").unwrap_or_else(|_| "./catalog".to_string());
    let fetcher = Arc::new(FileCatalogFetcher::load(&PathBuf::from(catalog_dir))?);
    let clock = SystemClock;
    let catalog = Arc::new(CatalogCache::new(fetcher, clock));

    let api_bind = std::env::var("NOETL_API_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let api_url = std::env::var("NOETL_API_URL").unwrap_or_else(|_| format!("http://{api_bind}"));
    let shard_id: u8 = std::env::var("NOETL_SHARD_ID").ok().and_then(|s| s.parse().ok()).unwrap_or(0);

    let orchestrator = Arc::new(Orchestrator::new(events.clone(), queue, bus, kv, catalog, clock, shard_id, api_url)?);

    tokio::spawn(noetl_daemon::sweeper::run(events, Duration::from_secs(60), cfg.sweeper_stuck_after));

    let listener = tokio::net::TcpListener::bind(&api_bind).await?;
    tracing::info!(addr = %api_bind, "noetl-server listening");
    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

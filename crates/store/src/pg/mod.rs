// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Postgres-backed Event Store, Queue Store, and partition manager (§6
//! schema).

mod event_store;
mod partition;
mod queue_store;

pub use event_store::PgEventStore;
pub use partition::PgPartitionManager;
pub use queue_store::PgQueueStore;

use sqlx::postgres::{PgPool, PgPoolOptions};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to connect to postgres: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),
}

/// Connect and run the schema migrations in `migrations/` (§6).
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, PoolError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(PoolError::Connect)?;
    sqlx::migrate!("./migrations").run(&pool).await.map_err(PoolError::Migrate)?;
    Ok(pool)
}

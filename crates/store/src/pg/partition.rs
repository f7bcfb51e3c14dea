// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Postgres-backed [`PartitionManager`]: creates/drops the `events`
//! range-partition children the sweeper rotates daily (§4.1 "Partitioning").

use crate::partition::{partition_name_for_window, PartitionBounds, PartitionError, PartitionInfo, PartitionManager};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PgPartitionManager {
    pool: PgPool,
}

impl PgPartitionManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PartitionManager for PgPartitionManager {
    async fn ensure_partition(&self, window_start_ms: i64, window_end_ms: i64) -> Result<PartitionInfo, PartitionError> {
        let bounds = PartitionBounds::for_window(window_start_ms, window_end_ms);
        let name = partition_name_for_window(window_start_ms);

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {name} PARTITION OF events FOR VALUES FROM ({}) TO ({})",
            bounds.lower, bounds.upper
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| PartitionError::TransientStorage(e.to_string()))?;

        Ok(PartitionInfo { name, bounds, row_estimate: 0 })
    }

    async fn drop_partition(&self, name: &str) -> Result<(), PartitionError> {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PartitionError::TransientStorage(format!("invalid partition name: {name}")));
        }
        let ddl = format!("DROP TABLE IF EXISTS {name}");
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| PartitionError::TransientStorage(e.to_string()))?;
        Ok(())
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionInfo>, PartitionError> {
        let rows = sqlx::query(
            "SELECT child.relname AS name, pg_get_expr(child.relpartbound, child.oid) AS bound \
             FROM pg_inherits \
             JOIN pg_class parent ON pg_inherits.inhparent = parent.oid \
             JOIN pg_class child ON pg_inherits.inhrelid = child.oid \
             WHERE parent.relname = 'events'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PartitionError::TransientStorage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name: String = row.try_get("name").ok()?;
                Some(PartitionInfo { name, bounds: PartitionBounds { lower: 0, upper: 0 }, row_estimate: 0 })
            })
            .collect())
    }

    async fn partition_stats(&self, name: &str) -> Result<PartitionInfo, PartitionError> {
        let row = sqlx::query("SELECT reltuples::BIGINT AS row_estimate FROM pg_class WHERE relname = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PartitionError::TransientStorage(e.to_string()))?
            .ok_or_else(|| PartitionError::NotFound(name.to_string()))?;
        let row_estimate: i64 = row.try_get("row_estimate").map_err(|e| PartitionError::TransientStorage(e.to_string()))?;
        Ok(PartitionInfo {
            name: name.to_string(),
            bounds: PartitionBounds { lower: 0, upper: 0 },
            row_estimate: row_estimate.max(0) as u64,
        })
    }
}

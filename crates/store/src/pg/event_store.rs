// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Postgres-backed [`EventStore`]. Uses runtime (non-macro) `sqlx::query`
//! so the schema is checked against a live database, never at compile
//! time.

use crate::event_store::{fold, AppendResult, EsError, EventPage, EventQuery, EventStore, Pagination, StateView};
use async_trait::async_trait;
use noetl_core::{Event, EventBody, ExecutionId};
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PgEventStore {
    pool: PgPool,
}

/// Terminal event types the stale-candidate query excludes (§4.5
/// "Cleanup of stuck executions" only ever targets non-terminal
/// executions).
const TERMINAL_EVENT_TYPES: &[&str] = &["playbook_completed", "playbook_failed", "execution_cancelled"];

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Executions whose most recent event predates `cutoff_ms` and which
    /// have not yet reached a terminal event — the candidate discovery the
    /// daemon's periodic sweeper task feeds into
    /// [`noetl_orchestrator::sweeper::sweep`] (rest.rs deliberately leaves
    /// this query out of its scope, see its `cleanup` doc comment).
    pub async fn list_stale_candidates(&self, cutoff_ms: i64) -> Result<Vec<(ExecutionId, i64)>, EsError> {
        let rows = sqlx::query(
            "SELECT execution_id, MAX(occurred_at_ms) AS last_event_at_ms FROM events \
             GROUP BY execution_id \
             HAVING MAX(occurred_at_ms) < $1 \
             AND NOT EXISTS ( \
                 SELECT 1 FROM events e2 \
                 WHERE e2.execution_id = events.execution_id AND e2.event_type = ANY($2) \
             )",
        )
        .bind(cutoff_ms)
        .bind(TERMINAL_EVENT_TYPES)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EsError::TransientStorage(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let execution_id_raw: i64 = row.try_get("execution_id").map_err(|e| EsError::TransientStorage(e.to_string()))?;
                let last_event_at_ms: i64 = row.try_get("last_event_at_ms").map_err(|e| EsError::TransientStorage(e.to_string()))?;
                Ok((ExecutionId::from_raw(execution_id_raw), last_event_at_ms))
            })
            .collect()
    }
}

fn classify(execution_id: ExecutionId, err: sqlx::Error) -> EsError {
    match &err {
        sqlx::Error::Database(db) if db.constraint().is_some() => EsError::Conflict(execution_id),
        _ => EsError::TransientStorage(err.to_string()),
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(
        &self,
        execution_id: ExecutionId,
        batch: Vec<EventBody>,
        idempotency_key: Option<String>,
    ) -> Result<AppendResult, EsError> {
        if batch.is_empty() {
            return Err(EsError::Invalid("empty event batch".to_string()));
        }

        let mut tx = self.pool.begin().await.map_err(|e| EsError::TransientStorage(e.to_string()))?;

        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE execution_id = $1 FOR UPDATE",
        )
        .bind(execution_id.as_i64())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| EsError::TransientStorage(e.to_string()))?;

        let first_seq = next_seq as u64;
        let now = chrono::Utc::now().timestamp_millis();
        let mut seq = next_seq;

        for (i, body) in batch.iter().enumerate() {
            let body_json = serde_json::to_value(body).map_err(|e| EsError::Invalid(e.to_string()))?;
            let key = if i == 0 { idempotency_key.as_deref() } else { None };
            sqlx::query(
                "INSERT INTO events (execution_id, seq, occurred_at_ms, event_type, body, idempotency_key) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(execution_id.as_i64())
            .bind(seq)
            .bind(now)
            .bind(body.kind())
            .bind(body_json)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(execution_id, e))?;
            seq += 1;
        }

        tx.commit().await.map_err(|e| EsError::TransientStorage(e.to_string()))?;
        Ok(AppendResult { first_seq, last_seq: (seq - 1) as u64 })
    }

    async fn get_events(&self, execution_id: ExecutionId, query: EventQuery) -> Result<EventPage, EsError> {
        let query = query.normalized();

        if let Some(since) = query.since_event_id {
            let rows = sqlx::query(
                "SELECT execution_id, seq, occurred_at_ms, body, idempotency_key FROM events \
                 WHERE execution_id = $1 AND seq > $2 \
                 AND ($3::text IS NULL OR event_type = $3) \
                 ORDER BY seq DESC LIMIT $4",
            )
            .bind(execution_id.as_i64())
            .bind(since as i64)
            .bind(&query.event_type)
            .bind(query.page_size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EsError::TransientStorage(e.to_string()))?;

            let events = rows.into_iter().map(row_to_event).collect::<Result<Vec<_>, _>>()?;
            return Ok(EventPage {
                events,
                pagination: Pagination { page: 1, page_size: query.page_size, has_more: false },
            });
        }

        let offset = (query.page - 1) as i64 * query.page_size as i64;
        let rows = sqlx::query(
            "SELECT execution_id, seq, occurred_at_ms, body, idempotency_key FROM events \
             WHERE execution_id = $1 AND ($2::text IS NULL OR event_type = $2) \
             ORDER BY seq DESC LIMIT $3 OFFSET $4",
        )
        .bind(execution_id.as_i64())
        .bind(&query.event_type)
        .bind(query.page_size as i64 + 1)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EsError::TransientStorage(e.to_string()))?;

        let has_more = rows.len() as u32 > query.page_size;
        let events = rows
            .into_iter()
            .take(query.page_size as usize)
            .map(row_to_event)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventPage { events, pagination: Pagination { page: query.page, page_size: query.page_size, has_more } })
    }

    async fn state_view(&self, execution_id: ExecutionId) -> Result<StateView, EsError> {
        let rows = sqlx::query("SELECT seq, body FROM events WHERE execution_id = $1 ORDER BY seq ASC")
            .bind(execution_id.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EsError::TransientStorage(e.to_string()))?;

        let mut view = StateView::default();
        for row in rows {
            let seq: i64 = row.try_get("seq").map_err(|e| EsError::TransientStorage(e.to_string()))?;
            let body_json: serde_json::Value = row.try_get("body").map_err(|e| EsError::TransientStorage(e.to_string()))?;
            let body: EventBody = serde_json::from_value(body_json).map_err(|e| EsError::Invalid(e.to_string()))?;
            fold(&mut view, seq as u64, &body);
        }
        Ok(view)
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<Event, EsError> {
    let execution_id_raw: i64 = row.try_get("execution_id").map_err(|e| EsError::TransientStorage(e.to_string()))?;
    let seq: i64 = row.try_get("seq").map_err(|e| EsError::TransientStorage(e.to_string()))?;
    let occurred_at_ms: i64 = row.try_get("occurred_at_ms").map_err(|e| EsError::TransientStorage(e.to_string()))?;
    let body_json: serde_json::Value = row.try_get("body").map_err(|e| EsError::TransientStorage(e.to_string()))?;
    let idempotency_key: Option<String> = row.try_get("idempotency_key").map_err(|e| EsError::TransientStorage(e.to_string()))?;
    let body: EventBody = serde_json::from_value(body_json).map_err(|e| EsError::Invalid(e.to_string()))?;
    Ok(Event { execution_id: ExecutionId::from_raw(execution_id_raw), seq: seq as u64, occurred_at_ms, body, idempotency_key })
}

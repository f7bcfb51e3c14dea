// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! SQL(-kind) tool (§6): command(s) plus bound parameters against a
//! Postgres pool. Emits `outcome.pg.code` and row counts on failure and
//! success respectively.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::{Column, Row, TypeInfo, ValueRef};

#[derive(Debug, Deserialize)]
struct SqlArgs {
    commands: Vec<String>,
    #[serde(default)]
    params: Vec<Value>,
}

pub struct SqlTool {
    pool: PgPool,
}

impl SqlTool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn pg_sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => Value::Null,
            _ => match column.type_info().name() {
                "INT4" | "INT8" | "INT2" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
                "FLOAT4" | "FLOAT8" | "NUMERIC" => row.try_get::<f64, _>(i).map(Value::from).unwrap_or(Value::Null),
                "BOOL" => row.try_get::<bool, _>(i).map(Value::from).unwrap_or(Value::Null),
                "JSON" | "JSONB" => row.try_get::<Value, _>(i).unwrap_or(Value::Null),
                _ => row.try_get::<String, _>(i).map(Value::from).unwrap_or(Value::Null),
            },
        };
        map.insert(column.name().to_string(), value);
    }
    map
}

#[async_trait]
impl Tool for SqlTool {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, args: Value, _ctx: &TaskContext) -> Outcome {
        let args: SqlArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed sql args: {e}"))),
        };
        if args.commands.is_empty() {
            return Outcome::failure(TaskError::new(ErrorKind::Invalid, "sql task requires at least one command"));
        }

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("failed to open transaction: {e}"))),
        };

        let mut rows_affected = 0u64;
        let mut last_rows: Vec<serde_json::Map<String, Value>> = Vec::new();

        for command in &args.commands {
            let mut query = sqlx::query(command);
            for param in &args.params {
                query = bind_json(query, param);
            }

            match query.fetch_all(&mut *tx).await {
                Ok(rows) => {
                    rows_affected += rows.len() as u64;
                    last_rows = rows.iter().map(row_to_json).collect();
                }
                Err(e) => {
                    let code = pg_sqlstate(&e).unwrap_or_default();
                    let error = if code.is_empty() {
                        TaskError::new(ErrorKind::Transient, format!("sql command failed: {e}"))
                    } else {
                        TaskError::pg(code.clone(), format!("sql command failed: {e}"))
                    };
                    return Outcome::failure(error).with_pg_code(code);
                }
            }
        }

        if let Err(e) = tx.commit().await {
            return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("commit failed: {e}")));
        }

        Outcome::success(serde_json::json!({ "rows": last_rows, "row_count": rows_affected }))
            .with_pg_code("00000")
    }
}

fn bind_json<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.clone()),
    }
}

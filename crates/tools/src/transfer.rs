// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Transfer tool (§6): a source descriptor, a target descriptor, and a
//! field mapping between them. Backed by the same HTTP client the
//! [`crate::http::HttpTool`] uses, for source/target kinds that are
//! themselves HTTP endpoints; other source/target kinds are future
//! extensions.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Endpoint {
    kind: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TransferArgs {
    source: Endpoint,
    target: Endpoint,
    #[serde(default)]
    mapping: serde_json::Map<String, Value>,
}

fn apply_mapping(source_value: &Value, mapping: &serde_json::Map<String, Value>) -> Value {
    if mapping.is_empty() {
        return source_value.clone();
    }
    let mut out = serde_json::Map::new();
    for (target_field, source_path) in mapping {
        let Value::String(path) = source_path else { continue };
        let mut cursor = source_value;
        for segment in path.split('.') {
            cursor = cursor.get(segment).unwrap_or(&Value::Null);
        }
        out.insert(target_field.clone(), cursor.clone());
    }
    Value::Object(out)
}

pub struct TransferTool {
    client: reqwest::Client,
}

impl TransferTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for TransferTool {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Tool for TransferTool {
    fn kind(&self) -> &'static str {
        "transfer"
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> Outcome {
        let args: TransferArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed transfer args: {e}"))),
        };
        if args.source.kind != "http" || args.target.kind != "http" {
            return Outcome::failure(TaskError::new(
                ErrorKind::Invalid,
                format!("unsupported transfer endpoint kinds: {}/{}", args.source.kind, args.target.kind),
            ));
        }

        let source_body: Value = match self.client.get(&args.source.url).timeout(ctx.timeout).send().await {
            Ok(r) => r.json().await.unwrap_or(Value::Null),
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("source fetch failed: {e}"))),
        };

        let payload = apply_mapping(&source_body, &args.mapping);

        let response = match self.client.post(&args.target.url).timeout(ctx.timeout).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("target write failed: {e}"))),
        };

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Outcome::success(serde_json::json!({ "transferred": true })).with_http_status(status)
        } else {
            Outcome::failure(TaskError::http(status, "transfer target rejected payload")).with_http_status(status)
        }
    }
}

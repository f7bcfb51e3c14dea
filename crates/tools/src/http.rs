// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! HTTP tool (§6): method, url, headers, params, body, timeouts. Emits
//! `outcome.http.status`, response headers, and body.

use crate::context::TaskContext;
use crate::registry::Tool;
use async_trait::async_trait;
use noetl_core::{ErrorKind, Outcome, TaskError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct HttpArgs {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> Outcome {
        let args: HttpArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("malformed http args: {e}"))),
        };

        let method = match args.method.parse::<reqwest::Method>() {
            Ok(m) => m,
            Err(_) => return Outcome::failure(TaskError::new(ErrorKind::Invalid, format!("unknown http method: {}", args.method))),
        };

        let mut request = self.client.request(method, &args.url).query(&args.params).timeout(ctx.timeout);
        for (name, value) in &args.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &args.body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Outcome::failure(TaskError::new(ErrorKind::Timeout, format!("http request timed out: {e}")))
            }
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("http request failed: {e}"))),
        };

        let status = response.status().as_u16();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
            .collect();

        let body: Value = match response.text().await {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(e) => return Outcome::failure(TaskError::new(ErrorKind::Transient, format!("failed reading response body: {e}"))),
        };

        let result = serde_json::json!({ "status": status, "headers": headers, "body": body });
        if (200..300).contains(&status) {
            Outcome::success(result).with_http_status(status)
        } else {
            Outcome::failure(TaskError::http(status, format!("http request returned {status}")).with_detail("body", body))
                .with_http_status(status)
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! [`PlaybookStarter`] implementation used by the worker process: the
//! worker never talks to the orchestrator's internals directly (the same
//! decoupling [`noetl_worker::reporter::HttpEventReporter`] uses for event
//! reporting), so nested-playbook admission goes back over the internal
//! REST surface (§6 `POST /executions`, `GET /executions/{id}`).

use async_trait::async_trait;
use noetl_core::{ExecutionId, ExecutionStatus};
use noetl_tools::{ChildOutcome, PlaybookStarter, StartError};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ResolveCatalogResponse {
    catalog_id: i64,
}

#[derive(Debug, Deserialize)]
struct CreateExecutionResponse {
    execution_id: i64,
}

#[derive(Debug, Deserialize)]
struct ExecutionSummary {
    status: ExecutionStatus,
    #[serde(default)]
    result: Value,
}

/// Resolves a nested playbook's `(path, version)` to a `catalog_id` via
/// `GET /catalog/resolve` before starting it — the worker holds no
/// catalog content of its own (SPEC_FULL.md §E.3: credential material
/// never crosses this boundary either, only the resolved id).
pub struct HttpPlaybookStarter {
    client: reqwest::Client,
    api_url: String,
}

impl HttpPlaybookStarter {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_url: api_url.into() }
    }
}

#[async_trait]
impl PlaybookStarter for HttpPlaybookStarter {
    async fn start(&self, catalog_path: &str, version: Option<&str>, input: Value, _parent: ExecutionId) -> Result<ExecutionId, StartError> {
        let version = version.unwrap_or("latest").to_string();

        let resolve_response = self
            .client
            .get(format!("{}/catalog/resolve", self.api_url))
            .query(&[("path", catalog_path), ("version", version.as_str())])
            .send()
            .await
            .map_err(|e| StartError::Admission(e.to_string()))?;
        if !resolve_response.status().is_success() {
            return Err(StartError::CatalogNotFound(catalog_path.to_string()));
        }
        let resolved: ResolveCatalogResponse = resolve_response.json().await.map_err(|e| StartError::Admission(e.to_string()))?;

        let req = serde_json::json!({
            "catalog_id": resolved.catalog_id,
            "playbook_path": catalog_path,
            "playbook_version": version,
            "input": input,
        });
        let response =
            self.client.post(format!("{}/executions", self.api_url)).json(&req).send().await.map_err(|e| StartError::Admission(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StartError::CatalogNotFound(catalog_path.to_string()));
        }
        let body: CreateExecutionResponse = response.json().await.map_err(|e| StartError::Admission(e.to_string()))?;
        Ok(ExecutionId::from_raw(body.execution_id))
    }

    async fn poll(&self, execution_id: ExecutionId) -> Option<ChildOutcome> {
        let response = self.client.get(format!("{}/executions/{}", self.api_url, execution_id.as_i64())).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let summary: ExecutionSummary = response.json().await.ok()?;
        match summary.status {
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                Some(ChildOutcome { status: summary.status, result: summary.result })
            }
            _ => None,
        }
    }
}

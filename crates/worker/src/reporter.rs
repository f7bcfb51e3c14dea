// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Event reporting collaborator (§6 "Internal REST", `POST /events`): the
//! worker never appends directly to the Event Store, because only a
//! round trip through the orchestrator's `post_events` handler replays
//! boundary events through [`noetl_orchestrator::service::Orchestrator::on_event`]
//! and so advances the playbook. The DTOs here mirror
//! `noetl_orchestrator::rest::{PostEventRequest, PostEventResponse}`
//! field-for-field without a crate dependency on `noetl-orchestrator`,
//! which the worker must stay decoupled from to avoid a cyclic
//! dependency back through `PlaybookStarter`.

use async_trait::async_trait;
use noetl_core::{EventBody, ExecutionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("event report failed: {0}")]
    Transport(String),
    #[error("orchestrator rejected event batch: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize)]
struct PostEventRequest {
    execution_id: i64,
    events: Vec<EventBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PostEventResponse {
    #[allow(dead_code)]
    first_seq: u64,
    #[allow(dead_code)]
    last_seq: u64,
}

/// Reports a batch of events for one execution to the orchestrator's
/// `/events` endpoint, in the same batch the worker's round trip decided
/// on (e.g. `call_done` plus a `ctx_updated` rule mutation).
#[async_trait]
pub trait EventReporter: Send + Sync {
    async fn report(&self, execution_id: ExecutionId, events: Vec<EventBody>, idempotency_key: Option<String>) -> Result<(), ReporterError>;
}

#[cfg(feature = "http-reporter")]
pub struct HttpEventReporter {
    client: reqwest::Client,
    api_url: String,
}

#[cfg(feature = "http-reporter")]
impl HttpEventReporter {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_url: api_url.into() }
    }
}

#[cfg(feature = "http-reporter")]
#[async_trait]
impl EventReporter for HttpEventReporter {
    async fn report(&self, execution_id: ExecutionId, events: Vec<EventBody>, idempotency_key: Option<String>) -> Result<(), ReporterError> {
        let req = PostEventRequest { execution_id: execution_id.as_i64(), events, idempotency_key };
        let response = self
            .client
            .post(format!("{}/events", self.api_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| ReporterError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReporterError::Rejected(format!("{status}: {body}")));
        }
        response.json::<PostEventResponse>().await.map_err(|e| ReporterError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// In-process reporter for tests that want to inspect exactly what a
    /// [`crate::dispatch::Worker`] decided to report without standing up
    /// an HTTP server.
    #[derive(Default)]
    pub struct RecordingReporter {
        batches: Mutex<Vec<(ExecutionId, Vec<EventBody>)>>,
    }

    impl RecordingReporter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn batches(&self) -> Vec<(ExecutionId, Vec<EventBody>)> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl EventReporter for RecordingReporter {
        async fn report(&self, execution_id: ExecutionId, events: Vec<EventBody>, _idempotency_key: Option<String>) -> Result<(), ReporterError> {
            self.batches.lock().push((execution_id, events));
            Ok(())
        }
    }
}

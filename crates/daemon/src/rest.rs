// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! `axum` wiring for the internal REST surface (§6): thin handlers that
//! deserialize the request, call the matching `noetl_orchestrator::rest`
//! function, and serialize the response. All decision logic lives in
//! that crate; this module only owns the transport.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use noetl_core::{Clock, SystemClock};
use noetl_orchestrator::{
    CleanupReport, CleanupRequest, CreateExecutionRequest, CreateExecutionResponse, ExecutionSummary, Orchestrator, PostEventRequest,
    PostEventResponse, ResolveCatalogRequest, ResolveCatalogResponse, RestError,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<Orchestrator<SystemClock>>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/executions", post(create_execution))
        .route("/executions/:id", get(get_execution))
        .route("/executions/cleanup", post(cleanup))
        .route("/events", post(post_events))
        .route("/catalog/resolve", get(resolve_catalog))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for RestErrorWrapper {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RestError::NotFound(_) | RestError::CatalogNotFound { .. } => StatusCode::NOT_FOUND,
            RestError::Orchestrator(_) | RestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

struct RestErrorWrapper(RestError);

impl From<RestError> for RestErrorWrapper {
    fn from(e: RestError) -> Self {
        Self(e)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_execution(
    State(orc): State<AppState>,
    Json(req): Json<CreateExecutionRequest>,
) -> Result<Json<CreateExecutionResponse>, RestErrorWrapper> {
    Ok(Json(noetl_orchestrator::create_execution(&orc, req).await?))
}

async fn get_execution(State(orc): State<AppState>, Path(id): Path<i64>) -> Result<Json<ExecutionSummary>, RestErrorWrapper> {
    Ok(Json(noetl_orchestrator::get_execution(&orc, id).await?))
}

async fn post_events(State(orc): State<AppState>, Json(req): Json<PostEventRequest>) -> Result<Json<PostEventResponse>, RestErrorWrapper> {
    Ok(Json(noetl_orchestrator::post_events(&orc, req).await?))
}

async fn cleanup(State(orc): State<AppState>, Json(req): Json<CleanupRequest>) -> Result<Json<CleanupReport>, RestErrorWrapper> {
    Ok(Json(noetl_orchestrator::cleanup(&orc, req).await?))
}

#[derive(Debug, Deserialize)]
struct ResolveCatalogQuery {
    path: String,
    version: String,
}

async fn resolve_catalog(
    State(orc): State<AppState>,
    Query(q): Query<ResolveCatalogQuery>,
) -> Result<Json<ResolveCatalogResponse>, RestErrorWrapper> {
    Ok(Json(noetl_orchestrator::resolve_catalog(&orc, ResolveCatalogRequest { path: q.path, version: q.version })?))
}

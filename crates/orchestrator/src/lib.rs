// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Orchestrator (ORC, §4.5): the component that decides what happens
//! next. Owns no tool execution and no durable state of its own —
//! everything it reads comes from a single batched [`noetl_store::StateView`]
//! and everything it writes is an [`noetl_core::EventBody`] batch or a
//! [`noetl_store::QueueStore`] enqueue.

pub mod decision;
pub mod rest;
pub mod service;
pub mod sweeper;
pub mod timing;

pub use decision::{evaluate_admission, evaluate_routing, routing_scope, DecisionError};
pub use rest::{
    cleanup, create_execution, get_execution, post_events, resolve_catalog, CleanupReport, CleanupCandidate, CleanupRequest,
    CreateExecutionRequest, CreateExecutionResponse, ExecutionSummary, PostEventRequest, PostEventResponse, ResolveCatalogRequest,
    ResolveCatalogResponse, RestError,
};
pub use service::{LoopProgress, Orchestrator, OrchestratorError};
pub use sweeper::{sweep, StaleCandidate, SweepResult};
pub use timing::{PhaseTimer, PERFORMANCE_FLOOR};

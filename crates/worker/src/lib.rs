// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Worker Runtime (§4.6): claims leased commands off the Queue Store,
//! dispatches them through the Tool Registry, resolves their outcome
//! against the playbook's task outcome policy, and reports the resulting
//! events back to the orchestrator over the internal REST surface.
//!
//! A claimed command's lifetime can span more than one task when its
//! policy jumps within the step's pipeline, so [`dispatch::Worker`]
//! drives that whole chain to a single terminal settlement rather than
//! handling one task in isolation.

pub mod dispatch;
pub mod policy;
pub mod reporter;
pub mod scope;
pub mod sleeper;
pub mod throttle;

pub use dispatch::{Worker, WorkerError};
pub use reporter::{EventReporter, ReporterError};
pub use sleeper::Sleeper;
pub use throttle::{is_db_heavy_kind, PoolPressure, Throttle};

#[cfg(feature = "http-reporter")]
pub use reporter::HttpEventReporter;

#[cfg(feature = "test-support")]
pub use reporter::test_support::RecordingReporter;
#[cfg(feature = "test-support")]
pub use sleeper::test_support::InstantSleeper;
#[cfg(feature = "test-support")]
pub use throttle::test_support::StaticPoolPressure;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! The two process entry points (§2 "Control flow"): `noetl-server` hosts
//! the Orchestrator behind the internal REST surface (§6); `noetl-worker`
//! runs the Worker Runtime's subscription loop. Everything here is
//! wiring — the actual component logic lives in `noetl-orchestrator` and
//! `noetl-worker`, this crate only assembles their dependencies from a
//! [`noetl_core::Config`] and exposes them over a transport.

pub mod catalog;
pub mod http_starter;
pub mod rest;
pub mod sweeper;

use noetl_core::Config;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the process-wide `tracing` subscriber from `cfg.log_level`
/// (§9 "Logging"). Both binaries call this first, before touching a pool
/// or a broker connection, so every step of startup is logged.
pub fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already set");
    }
}

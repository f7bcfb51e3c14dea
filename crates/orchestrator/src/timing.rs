// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Structured per-phase timing for `evaluate_execution` (§4.5 "Performance
//! floor"): target budget under 50ms end-to-end, excluding tool execution.

use noetl_core::ExecutionId;
use std::time::{Duration, Instant};

pub const PERFORMANCE_FLOOR: Duration = Duration::from_millis(50);

/// Tracks the wall-clock cost of each named phase of one
/// `evaluate_execution` call and logs a structured summary on drop via
/// `tracing`, matching spec.md's "ORC MUST emit structured timing for
/// each phase."
pub struct PhaseTimer {
    execution_id: ExecutionId,
    started: Instant,
    phases: Vec<(&'static str, Duration)>,
    phase_started: Instant,
}

impl PhaseTimer {
    pub fn start(execution_id: ExecutionId) -> Self {
        let now = Instant::now();
        Self { execution_id, started: now, phases: Vec::new(), phase_started: now }
    }

    /// Close out the previous phase (if any) and begin timing `name`.
    pub fn phase(&mut self, name: &'static str) {
        let now = Instant::now();
        self.phases.push((name, now.duration_since(self.phase_started)));
        self.phase_started = now;
    }

    pub fn finish(mut self, last_phase: &'static str) {
        let now = Instant::now();
        self.phases.push((last_phase, now.duration_since(self.phase_started)));
        let total = self.started.elapsed();

        let over_budget = total > PERFORMANCE_FLOOR;
        for (name, dur) in &self.phases {
            tracing::debug!(
                execution_id = self.execution_id.as_i64(),
                phase = name,
                duration_us = dur.as_micros() as u64,
                "evaluate_execution phase"
            );
        }
        if over_budget {
            tracing::warn!(
                execution_id = self.execution_id.as_i64(),
                total_us = total.as_micros() as u64,
                budget_us = PERFORMANCE_FLOOR.as_micros() as u64,
                "evaluate_execution exceeded performance floor"
            );
        } else {
            tracing::debug!(
                execution_id = self.execution_id.as_i64(),
                total_us = total.as_micros() as u64,
                "evaluate_execution completed within performance floor"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_every_named_phase() {
        let mut timer = PhaseTimer::start(ExecutionId::from_raw(1));
        timer.phase("state_batch");
        timer.phase("arc_eval");
        timer.finish("enqueue");
        // No assertions on wall-clock content beyond "doesn't panic" — the
        // phase boundaries themselves are exercised by `service` tests.
    }
}

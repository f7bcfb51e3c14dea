// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Loop step descriptors (§4.6.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Sequential,
    Parallel,
}

crate::simple_display! {
    LoopMode {
        Sequential => "sequential",
        Parallel => "parallel",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExec {
    /// One worker holds the step lease and multiplexes iterations.
    Local,
    /// Each iteration becomes its own command, claimable by any worker.
    Distributed,
}

crate::simple_display! {
    LoopExec {
        Local => "local",
        Distributed => "distributed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    pub mode: LoopMode,
    pub exec: LoopExec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<u32>,
}

impl LoopSpec {
    /// `sequential` loops always run one iteration at a time regardless of
    /// any configured `max_in_flight`.
    pub fn effective_max_in_flight(&self) -> u32 {
        match self.mode {
            LoopMode::Sequential => 1,
            LoopMode::Parallel => self.max_in_flight.unwrap_or(u32::MAX),
        }
    }
}

/// A single loop step, combining the iterable expression and iterator
/// variable name with its [`LoopSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDescriptor {
    /// Template expression yielding the iterable.
    pub r#in: String,
    /// Variable name each rendered item is bound to within the step.
    pub iterator: String,
    pub spec: LoopSpec,
}

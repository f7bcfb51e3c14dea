// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! The command notification payload published to `noetl.commands` (§4.3).
//! Deliberately tiny (~100 bytes target): the full command body lives in
//! the Queue Store, this is just enough for a worker to go fetch it.

use noetl_core::{CommandId, ExecutionId, StepId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandNotification {
    pub execution_id: ExecutionId,
    pub queue_id: CommandId,
    pub step: StepId,
    pub api_url: String,
}

pub const COMMANDS_SUBJECT: &str = "noetl.commands";

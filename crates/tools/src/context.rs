// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Per-invocation context a tool executes under (§4.6.3).

use noetl_core::{CredentialMaterial, CredentialName, ExecutionId, StepId};
use std::collections::HashMap;
use std::time::Duration;

/// Resolved credentials and call-site identity handed to a [`crate::Tool`].
/// Material lives only as long as this struct; it is never retained past
/// the single `execute` call.
pub struct TaskContext {
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    pub credentials: HashMap<CredentialName, CredentialMaterial>,
    pub timeout: Duration,
}

impl TaskContext {
    pub fn credential(&self, name: &CredentialName) -> Option<&CredentialMaterial> {
        self.credentials.get(name)
    }
}

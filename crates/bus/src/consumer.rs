// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Durable pull consumer configuration and the startup reconciliation
//! rule (§4.3 "Configuration reconciliation"): create if absent, recreate
//! if mismatched, tolerate a concurrent-create race by re-reading and
//! accepting a matching config.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Broker-side bound on in-flight messages per worker group.
    pub max_ack_pending: i64,
    pub max_deliver: i64,
    pub ack_wait_secs: u64,
}

impl ConsumerConfig {
    pub fn matches(&self, other: &ConsumerConfig) -> bool {
        self == other
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { max_ack_pending: 100, max_deliver: 3, ack_wait_secs: 30 }
    }
}

/// The three outcomes of reconciling a durable consumer's live config
/// against the desired one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Create,
    Recreate,
    Keep,
}

pub fn reconcile(desired: &ConsumerConfig, existing: Option<&ConsumerConfig>) -> ReconcileAction {
    match existing {
        None => ReconcileAction::Create,
        Some(existing) if existing.matches(desired) => ReconcileAction::Keep,
        Some(_) => ReconcileAction::Recreate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_consumer_is_created() {
        assert_eq!(reconcile(&ConsumerConfig::default(), None), ReconcileAction::Create);
    }

    #[test]
    fn matching_consumer_is_kept() {
        let cfg = ConsumerConfig::default();
        assert_eq!(reconcile(&cfg, Some(&cfg)), ReconcileAction::Keep);
    }

    #[test]
    fn mismatched_consumer_is_recreated() {
        let desired = ConsumerConfig { max_ack_pending: 200, ..ConsumerConfig::default() };
        let existing = ConsumerConfig::default();
        assert_eq!(reconcile(&desired, Some(&existing)), ReconcileAction::Recreate);
    }
}

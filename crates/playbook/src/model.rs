// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! The playbook graph (§3 "Step", §4.5 "Admission", "Transition (next-arc)
//! routing", §4.6.1 "Task Outcome Policy"): an arena of [`Step`]s indexed
//! by [`StepId`], loaded once per catalog entry and shared read-only
//! thereafter (§9 "Cyclic references ... load playbook into an arena
//! holding `StepId`-indexed nodes; arcs store `StepId` not pointers").

use noetl_core::{LoopDescriptor, StepId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fully parsed, validated playbook: an arena of steps plus the entry
/// point. Immutable once constructed by [`crate::parser::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub path: String,
    pub version: String,
    pub entry_step: StepId,
    pub steps: HashMap<StepId, Step>,
}

impl Playbook {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    /// Ordered task pipeline. Never empty for a non-`end` step.
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub loop_descriptor: Option<LoopDescriptor>,
    #[serde(default)]
    pub next: Router,
    /// `true` for the designated terminal step (§4.5 "Termination").
    #[serde(default)]
    pub is_end: bool,
}

impl Step {
    pub fn task(&self, label: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.label == label)
    }

    pub fn task_index(&self, label: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.label == label)
    }
}

/// §4.5 "Admission": ordered `when -> {allow}` rules; absent policy
/// defaults to allow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    #[serde(default)]
    pub rules: Vec<AdmissionRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRule {
    /// Template boolean expression over `{event, ctx, workload}`.
    pub when: String,
    pub allow: bool,
}

impl AdmissionPolicy {
    /// First matching rule wins; empty rule set allows (§8 boundary case
    /// "Admission with empty rules -> allow").
    pub fn is_allowed(&self, eval: &mut dyn FnMut(&str) -> bool) -> bool {
        for rule in &self.rules {
            if eval(&rule.when) {
                return rule.allow;
            }
        }
        true
    }
}

/// One ordered, labeled tool invocation inside a step's pipeline (§3 "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub label: String,
    pub kind: String,
    /// Raw (unrendered) argument template, rendered just-in-time by the
    /// worker against the task's scope.
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub policy: PolicySpec,
    /// Credential names the worker resolves via the keychain collaborator
    /// before rendering `args`, populating the `keychain` template
    /// namespace (§6 "Credential/keychain").
    #[serde(default)]
    pub credentials: Vec<String>,
}

/// Playbook-authored task outcome policy (§4.6.1): like
/// [`noetl_core::Policy`] but with unevaluated template conditions,
/// resolved into a [`noetl_core::Policy`] per attempt by the worker via
/// the Template & Policy Evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default, rename = "else")]
    pub or_else: Option<ActionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub when: String,
    pub then: ActionSpec,
    #[serde(default)]
    pub set_iter: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub set_ctx: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum ActionSpec {
    Continue,
    Retry {
        attempts: u32,
        #[serde(default)]
        backoff: noetl_core::Backoff,
        /// Either a bare number or a template expression (e.g. a
        /// `retry-after` header reference), rendered to a number at
        /// evaluation time.
        delay: String,
    },
    Jump {
        to: String,
    },
    Break,
    Fail,
}

/// §4.5 "Transition (next-arc) routing": `step.next` router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Router {
    #[serde(default)]
    pub mode: RouterMode,
    #[serde(default)]
    pub arcs: Vec<RouterArc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    #[default]
    Exclusive,
    Inclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterArc {
    /// Template boolean expression over `{event, ctx, workload}`.
    pub when: String,
    pub target: StepId,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_defaults_to_allow_with_no_rules() {
        let policy = AdmissionPolicy::default();
        assert!(policy.is_allowed(&mut |_| true));
    }

    #[test]
    fn admission_first_match_wins() {
        let policy = AdmissionPolicy {
            rules: vec![
                AdmissionRule { when: "false_rule".into(), allow: false },
                AdmissionRule { when: "true_rule".into(), allow: true },
            ],
        };
        let mut calls = 0;
        let allowed = policy.is_allowed(&mut |w| {
            calls += 1;
            w == "true_rule"
        });
        assert!(allowed);
        assert_eq!(calls, 2);
    }

    #[test]
    fn step_looks_up_task_by_label() {
        let step = Step {
            id: "greet".into(),
            admission: AdmissionPolicy::default(),
            tasks: vec![Task { label: "say_hi".into(), kind: "python".into(), args: serde_json::Value::Null, policy: PolicySpec::default(), credentials: Vec::new() }],
            loop_descriptor: None,
            next: Router::default(),
            is_end: false,
        };
        assert!(step.task("say_hi").is_some());
        assert_eq!(step.task_index("say_hi"), Some(0));
        assert!(step.task("missing").is_none());
    }
}

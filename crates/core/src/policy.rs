// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Task outcome policy (§4.6.1): ordered rules matched against an
//! [`crate::outcome::Outcome`], each choosing an [`Action`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
    None,
}

crate::simple_display! {
    Backoff {
        Fixed => "fixed",
        Linear => "linear",
        Exponential => "exponential",
        None => "none",
    }
}

impl Backoff {
    /// Scheduled delay for `attempt` (1-indexed) given a base `delay_s`,
    /// per §8 property 6: exponential = `delay·2^(attempt-1)`.
    pub fn delay_seconds(self, delay_s: f64, attempt: u32) -> f64 {
        let attempt = attempt.max(1);
        match self {
            Backoff::Fixed => delay_s,
            Backoff::Linear => delay_s * attempt as f64,
            Backoff::Exponential => delay_s * 2f64.powi(attempt as i32 - 1),
            Backoff::None => 0.0,
        }
    }
}

/// What to do once a rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum Action {
    Continue,
    Retry {
        attempts: u32,
        #[serde(default)]
        backoff: Backoff,
        /// Base delay in seconds; may itself be a rendered template
        /// expression upstream (e.g. a `retry-after` header), so policy
        /// evaluation receives it already resolved to a number.
        delay: f64,
    },
    Jump {
        to: String,
    },
    Break,
    Fail,
}

/// One ordered rule in a task's outcome policy. `when` is a pre-rendered
/// boolean (the template/expression layer evaluates the condition before
/// handing the policy evaluator a plain bool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub when: bool,
    pub then: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_iter: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_ctx: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A task's full outcome policy: ordered rules, plus an optional terminal
/// default. Absent `else`, absent match defaults to `continue` on success
/// and `fail` on error (§4.6.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#else: Option<Action>,
}

impl Policy {
    /// Select the action for an outcome already reduced to per-rule
    /// booleans. `outcome_is_success` supplies the implicit default when no
    /// rule matches and no `else` is configured.
    pub fn evaluate(&self, outcome_is_success: bool) -> &Action {
        if let Some(rule) = self.rules.iter().find(|r| r.when) {
            return &rule.then;
        }
        if let Some(action) = &self.r#else {
            return action;
        }
        static CONTINUE: Action = Action::Continue;
        static FAIL: Action = Action::Fail;
        if outcome_is_success {
            &CONTINUE
        } else {
            &FAIL
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::None
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Resolves a task's playbook-authored [`noetl_playbook::PolicySpec`]
//! (template conditions, unrendered delays) into an evaluated
//! [`noetl_core::Policy`] for one attempt, then selects its [`Action`]
//! (§4.6.1).

use noetl_core::{Action, Backoff, Outcome, Policy, Rule};
use noetl_playbook::{ActionSpec, Evaluator, PolicySpec, RuleSpec};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PolicyEvalError {
    #[error("outcome policy rule condition failed to evaluate: {0}")]
    Condition(#[from] noetl_playbook::EvalError),
}

fn resolve_action(spec: &ActionSpec, eval: &Evaluator, scope: &Value) -> Result<Action, PolicyEvalError> {
    Ok(match spec {
        ActionSpec::Continue => Action::Continue,
        ActionSpec::Retry { attempts, backoff, delay } => {
            let delay = eval.eval_value(delay, scope)?.as_f64().unwrap_or_else(|| delay.parse().unwrap_or(0.0));
            Action::Retry { attempts: *attempts, backoff: *backoff, delay }
        }
        ActionSpec::Jump { to } => Action::Jump { to: to.clone() },
        ActionSpec::Break => Action::Break,
        ActionSpec::Fail => Action::Fail,
    })
}

fn resolve_rule(spec: &RuleSpec, eval: &Evaluator, scope: &Value) -> Result<Rule, PolicyEvalError> {
    Ok(Rule {
        when: eval.eval_bool(&spec.when, scope)?,
        then: resolve_action(&spec.then, eval, scope)?,
        set_iter: spec.set_iter.clone(),
        set_ctx: spec.set_ctx.clone(),
    })
}

/// Render every rule's `when`/`delay` template against `scope` (which
/// must already carry this attempt's `outcome`), producing a
/// [`noetl_core::Policy`] ready for [`Policy::evaluate`].
pub fn resolve_policy(spec: &PolicySpec, eval: &Evaluator, scope: &Value) -> Result<Policy, PolicyEvalError> {
    let rules = spec.rules.iter().map(|r| resolve_rule(r, eval, scope)).collect::<Result<Vec<_>, _>>()?;
    let r#else = spec.or_else.as_ref().map(|a| resolve_action(a, eval, scope)).transpose()?;
    Ok(Policy { rules, r#else })
}

/// The decided [`Action`] plus the matched rule's `set_iter`/`set_ctx`
/// mutations, if any.
pub struct Decision {
    pub action: Action,
    pub set_iter: Option<serde_json::Map<String, Value>>,
    pub set_ctx: Option<serde_json::Map<String, Value>>,
}

pub fn decide(policy: &Policy, outcome: &Outcome) -> Decision {
    if let Some(rule) = policy.rules.iter().find(|r| r.when) {
        return Decision { action: rule.then.clone(), set_iter: rule.set_iter.clone(), set_ctx: rule.set_ctx.clone() };
    }
    Decision { action: policy.evaluate(outcome.is_success()).clone(), set_iter: None, set_ctx: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn resolves_retry_delay_from_template() {
        let eval = Evaluator::new("test");
        let spec = PolicySpec {
            rules: vec![RuleSpec {
                when: "outcome.http.status in [429,503]".into(),
                then: ActionSpec::Retry { attempts: 5, backoff: Backoff::Exponential, delay: "1".into() },
                set_iter: None,
                set_ctx: None,
            }],
            or_else: None,
        };
        let scope = json!({"outcome": {"http": {"status": 503}}});
        let policy = resolve_policy(&spec, &eval, &scope).unwrap();
        assert!(policy.rules[0].when);
        assert!(matches!(policy.rules[0].then, Action::Retry { attempts: 5, delay, .. } if delay == 1.0));
    }

    #[test]
    fn falls_back_to_default_when_no_rule_matches() {
        let eval = Evaluator::new("test");
        let spec = PolicySpec { rules: vec![], or_else: None };
        let scope = json!({"outcome": {}});
        let policy = resolve_policy(&spec, &eval, &scope).unwrap();
        let outcome = Outcome::failure(noetl_core::TaskError::new(ErrorKind::Permanent, "nope"));
        let decision = decide(&policy, &outcome);
        assert!(matches!(decision.action, Action::Fail));
    }
}

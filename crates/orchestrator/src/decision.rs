// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Pure admission and transition-routing logic (§4.5 "Admission",
//! "Transition (next-arc) routing"), kept free of I/O so the rules
//! governing which step comes next can be exercised without a store or
//! broker in place.

use noetl_core::ExecutionId;
use noetl_playbook::{AdmissionPolicy, Evaluator, Router, RouterArc, RouterMode};
use serde_json::Value;

/// Assemble the `{event, ctx, workload}` scope §4.4 admission/routing
/// expressions are evaluated against.
pub fn routing_scope(event: &Value, ctx: &Value, workload: &Value) -> Value {
    serde_json::json!({ "event": event, "ctx": ctx, "workload": workload })
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("admission rule {0:?} failed to evaluate: {1}")]
    Admission(String, noetl_playbook::EvalError),
    #[error("routing arc targeting {0:?} failed to evaluate: {1}")]
    Routing(String, noetl_playbook::EvalError),
}

/// `step.spec.policy.admit.rules`: first match wins, empty rule set
/// allows (§8 boundary case).
pub fn evaluate_admission(policy: &AdmissionPolicy, eval: &Evaluator, scope: &Value) -> Result<bool, DecisionError> {
    let mut err = None;
    let allowed = policy.is_allowed(&mut |when| match eval.eval_bool(when, scope) {
        Ok(b) => b,
        Err(e) => {
            err = Some(DecisionError::Admission(when.to_string(), e));
            false
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(allowed)
}

/// Arcs matched by `router` against `scope`: `exclusive` yields at most
/// one (the first match); `inclusive` yields every match. Execution ids
/// are accepted only to keep call sites self-documenting in logs — the
/// routing decision itself never depends on them.
pub fn evaluate_routing<'a>(
    _execution_id: ExecutionId,
    router: &'a Router,
    eval: &Evaluator,
    scope: &Value,
) -> Result<Vec<&'a RouterArc>, DecisionError> {
    let mut matched = Vec::new();
    for arc in &router.arcs {
        let is_match = eval.eval_bool(&arc.when, scope).map_err(|e| DecisionError::Routing(arc.target.clone(), e))?;
        if is_match {
            matched.push(arc);
            if router.mode == RouterMode::Exclusive {
                break;
            }
        }
    }
    Ok(matched)
}

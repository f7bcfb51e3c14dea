// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Assembles the scope object a task's `args`, credentials, and outcome
//! policy are rendered against (§4.4), merging the named namespaces
//! [`noetl_playbook::template::namespace`] declares plus the pipeline
//! locals (`_prev`, `_task`, `_attempt`) a worker alone is responsible
//! for threading through a command's execution.

use noetl_playbook::template::namespace;
use noetl_store::StateView;
use serde_json::{Map, Value};

/// One task attempt's worth of context for rendering `args` and
/// evaluating outcome policy rules.
pub struct TaskScope<'a> {
    pub view: &'a StateView,
    pub iter: Option<&'a Value>,
    pub keychain: &'a Value,
    pub task_label: &'a str,
    pub attempt: u32,
    /// The outcome of the previous task in this step's pipeline, if any
    /// ran before this one (`_prev`).
    pub prev_outcome: Option<&'a Value>,
    /// This attempt's own outcome, once known; absent while rendering
    /// `args` ahead of the call itself.
    pub outcome: Option<&'a Value>,
}

impl<'a> TaskScope<'a> {
    pub fn to_value(&self) -> Value {
        let ctx: Map<String, Value> = self.view.ctx.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut scope = Map::new();
        scope.insert(namespace::WORKLOAD.to_string(), self.view.workload.clone());
        scope.insert(namespace::CTX.to_string(), Value::Object(ctx));
        scope.insert(namespace::ITER.to_string(), self.iter.cloned().unwrap_or(Value::Null));
        scope.insert(namespace::KEYCHAIN.to_string(), self.keychain.clone());
        scope.insert(namespace::EVENT.to_string(), Value::Null);
        scope.insert(namespace::OUTCOME.to_string(), self.outcome.cloned().unwrap_or(Value::Null));
        scope.insert(namespace::PREV.to_string(), self.prev_outcome.cloned().unwrap_or(Value::Null));
        scope.insert(namespace::TASK.to_string(), Value::String(self.task_label.to_string()));
        scope.insert(namespace::ATTEMPT.to_string(), Value::from(self.attempt));
        // Named step results are reachable directly at scope root (e.g.
        // `{{ fetch_page.result }}`) rather than nested under a namespace,
        // matching how `args` template authors reference a prior step's
        // output by its label.
        for (step_id, result) in &self.view.step_result {
            scope.insert(step_id.clone(), result.clone());
        }
        Value::Object(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn view() -> StateView {
        StateView {
            workload: serde_json::json!({"name": "alice"}),
            ctx: HashMap::from([("visits".to_string(), Value::from(3))]),
            ..Default::default()
        }
    }

    #[test]
    fn assembles_namespaced_scope() {
        let view = view();
        let keychain = serde_json::json!({"db-prod": "s3cr3t"});
        let scope = TaskScope { view: &view, iter: None, keychain: &keychain, task_label: "fetch", attempt: 1, prev_outcome: None, outcome: None };
        let value = scope.to_value();
        assert_eq!(value["workload"]["name"], "alice");
        assert_eq!(value["ctx"]["visits"], 3);
        assert_eq!(value["keychain"]["db-prod"], "s3cr3t");
        assert_eq!(value["_task"], "fetch");
        assert_eq!(value["_attempt"], 1);
        assert_eq!(value["iter"], Value::Null);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Template & Policy Evaluator (§4.4): `render`, `eval_bool`, `eval_value`
//! over scoped namespaces (`workload`, `ctx`, `iter`, `args`, `keychain`,
//! `event`, `outcome`, pipeline locals, named step results), backed by a
//! bounded, content-addressed expression cache.

pub mod cache;
pub mod expr;
pub mod render;

use cache::TemplateCache;
use expr::ExprError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Render(#[from] render::RenderError),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// One of the three disjoint evaluators named in §4.4: "orchestrator
/// eval", "engine render", "worker evaluation". Each owns its own
/// [`TemplateCache`] so cache pressure in one can never evict entries
/// another depends on; callers construct one per call site and keep it
/// alive for the process lifetime.
pub struct Evaluator {
    cache: TemplateCache,
}

impl Evaluator {
    pub fn new(name: &'static str) -> Self {
        Self { cache: TemplateCache::new(name, cache::DEFAULT_CAPACITY) }
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self { cache: TemplateCache::new(name, capacity) }
    }

    pub fn render(&self, template: &str, scope: &Value) -> Result<String, EvalError> {
        Ok(render::render(&self.cache, template, scope)?)
    }

    pub fn eval_bool(&self, expression: &str, scope: &Value) -> Result<bool, EvalError> {
        let expr = self.cache.get_or_parse(expression, expr::parse)?;
        let value = expr::eval(&expr, scope)?;
        Ok(expr::truthy(&value))
    }

    pub fn eval_value(&self, expression: &str, scope: &Value) -> Result<Value, EvalError> {
        let expr = self.cache.get_or_parse(expression, expr::parse)?;
        Ok(expr::eval(&expr, scope)?)
    }

    pub fn stats(&self) -> cache::CacheStats {
        self.cache.stats()
    }

    pub fn cache_name(&self) -> &'static str {
        self.cache.name()
    }

    /// Recursively render every string leaf of a JSON value (task args,
    /// `set_iter`/`set_ctx` maps, router arc args). A string that is
    /// *entirely* one `{{ expr }}` placeholder evaluates to its natural
    /// JSON type (so a task can pass a whole object or number through
    /// unchanged); a placeholder mixed with surrounding text always
    /// stringifies, matching [`render::render`]'s rule for string output.
    pub fn render_value(&self, value: &Value, scope: &Value) -> Result<Value, EvalError> {
        match value {
            Value::String(s) => match whole_placeholder(s) {
                Some(expr) => self.eval_value(expr, scope),
                None => Ok(Value::String(self.render(s, scope)?)),
            },
            Value::Array(items) => {
                let rendered: Result<Vec<Value>, EvalError> = items.iter().map(|v| self.render_value(v, scope)).collect();
                Ok(Value::Array(rendered?))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, scope)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// `Some(inner)` when `s` trimmed is exactly one `{{ ... }}` placeholder
/// with nothing else around it.
fn whole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("}}") || inner.contains("{{") {
        return None;
    }
    Some(inner.trim())
}

/// The named namespace keys a scope object is assembled from (§4.4).
/// Pipeline locals (`_prev`, `_task`, `_attempt`) and named step results
/// are merged in at the top level by the caller alongside these.
pub mod namespace {
    pub const WORKLOAD: &str = "workload";
    pub const CTX: &str = "ctx";
    pub const ITER: &str = "iter";
    pub const ARGS: &str = "args";
    pub const KEYCHAIN: &str = "keychain";
    pub const EVENT: &str = "event";
    pub const OUTCOME: &str = "outcome";
    pub const PREV: &str = "_prev";
    pub const TASK: &str = "_task";
    pub const ATTEMPT: &str = "_attempt";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn three_call_sites_have_independent_caches() {
        let orc = Evaluator::new("orchestrator_eval");
        let worker = Evaluator::new("worker_evaluation");
        let scope = json!({"a": 1});
        orc.eval_bool("a == 1", &scope).unwrap();
        assert_eq!(orc.stats().size, 1);
        assert_eq!(worker.stats().size, 0);
    }

    #[test]
    fn eval_value_returns_structured_result() {
        let eval = Evaluator::new("test");
        let scope = json!({"page": {"cursor": "abc"}});
        let value = eval.eval_value("page.cursor", &scope).unwrap();
        assert_eq!(value, json!("abc"));
    }

    #[test]
    fn render_and_eval_bool_share_determinism() {
        let eval = Evaluator::new("test");
        let scope = json!({"outcome": {"http": {"status": 503}}});
        assert!(eval.eval_bool("outcome.http.status in [429,500,502,503,504]", &scope).unwrap());
        assert_eq!(eval.render("status={{ outcome.http.status }}", &scope).unwrap(), "status=503");
    }

    #[test]
    fn render_value_preserves_type_for_whole_placeholder() {
        let eval = Evaluator::new("test");
        let scope = json!({"iter": {"id": 7, "name": "a"}});
        let args = json!({"body": "{{ iter }}"});
        let rendered = eval.render_value(&args, &scope).unwrap();
        assert_eq!(rendered["body"], json!({"id": 7, "name": "a"}));
    }

    #[test]
    fn render_value_stringifies_embedded_placeholder() {
        let eval = Evaluator::new("test");
        let scope = json!({"workload": {"name": "alice"}});
        let args = json!({"greeting": "hello {{ workload.name }}"});
        let rendered = eval.render_value(&args, &scope).unwrap();
        assert_eq!(rendered["greeting"], json!("hello alice"));
    }

    #[test]
    fn render_value_recurses_into_arrays_and_passes_through_non_strings() {
        let eval = Evaluator::new("test");
        let scope = json!({"a": 1});
        let args = json!({"count": 3, "items": ["{{ a }}", "plain"]});
        let rendered = eval.render_value(&args, &scope).unwrap();
        assert_eq!(rendered, json!({"count": 3, "items": [1, "plain"]}));
    }
}

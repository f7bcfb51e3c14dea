// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! `{{ expr }}` string interpolation (§4.4 `render`), built over the
//! shared [`super::expr`] expression language.

use super::cache::TemplateCache;
use super::expr::{self, ExprError};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static MOUSTACHE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("constant regex pattern is valid")
});

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("template expression error: {0}")]
    Expr(#[from] ExprError),
}

/// Render every `{{ expr }}` placeholder in `template` against `scope`.
///
/// A template consisting of exactly one placeholder and no surrounding
/// text renders to that value's natural string form (numbers without a
/// trailing `.0`, strings unquoted); placeholders embedded in surrounding
/// text are always stringified. Determinism (§4.4): identical
/// `(template, scope)` always renders identically, cached or not.
#[allow(clippy::expect_used)]
pub fn render(cache: &TemplateCache, template: &str, scope: &Value) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in MOUSTACHE.captures_iter(template) {
        let whole = caps.get(0).expect("capture group 0 always present");
        out.push_str(&template[last..whole.start()]);
        let inner = &caps[1];
        let expr = cache.get_or_parse(inner, expr::parse)?;
        let value = expr::eval(&expr, scope)?;
        out.push_str(&stringify(&value));
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> TemplateCache {
        TemplateCache::new("test", 16)
    }

    #[test]
    fn single_placeholder_preserves_type_shape() {
        let scope = json!({"workload": {"count": 3}});
        let out = render(&cache(), "{{ workload.count }}", &scope).unwrap();
        assert_eq!(out, "3");
    }

    #[test]
    fn embedded_placeholder_in_text() {
        let scope = json!({"workload": {"name": "alice"}});
        let out = render(&cache(), "hello {{ workload.name }}!", &scope).unwrap();
        assert_eq!(out, "hello alice!");
    }

    #[test]
    fn multiple_placeholders() {
        let scope = json!({"a": 1, "b": 2});
        let out = render(&cache(), "{{ a }}-{{ b }}", &scope).unwrap();
        assert_eq!(out, "1-2");
    }

    #[test]
    fn deterministic_across_calls() {
        let scope = json!({"a": 1});
        let c = cache();
        let first = render(&c, "{{ a }}", &scope).unwrap();
        let second = render(&c, "{{ a }}", &scope).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unresolved_variable_is_an_error() {
        let scope = json!({});
        assert!(render(&cache(), "{{ missing.path }}", &scope).is_err());
    }

    #[test]
    fn template_without_placeholders_passes_through() {
        let scope = json!({});
        assert_eq!(render(&cache(), "plain text", &scope).unwrap(), "plain text");
    }
}

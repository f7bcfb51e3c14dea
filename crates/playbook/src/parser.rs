// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Playbook YAML parsing and load-time validation.
//!
//! Resolves the §9 open question on legacy `eval:`/`expr:` blocks: the
//! canonical `spec.policy.rules` shape is authoritative, and any document
//! carrying a legacy `eval`/`expr` key is rejected with a migration hint
//! rather than silently reinterpreted.

use crate::model::Playbook;
use noetl_core::StepId;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid playbook YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(
        "legacy `{key}` block found at {path}; rewrite as `spec.policy.rules` \
         (canonical task outcome policy) — legacy eval/expr blocks are rejected at load time"
    )]
    LegacyEval { key: String, path: String },
    #[error("playbook has no steps")]
    Empty,
    #[error("entry step {0:?} is not defined")]
    MissingEntryStep(StepId),
    #[error("step {step:?} arc targets undefined step {target:?}")]
    UndefinedArcTarget { step: StepId, target: StepId },
    #[error("step {step:?} task {task:?} jumps to undefined label {target:?}")]
    UndefinedJumpTarget { step: StepId, task: String, target: String },
}

/// Parse and validate a playbook document.
pub fn load(path: &str, version: &str, yaml: &str) -> Result<Playbook, LoadError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    reject_legacy_eval(&raw, "$")?;

    let doc: RawPlaybook = serde_yaml::from_value(raw)?;
    let steps: HashMap<StepId, crate::model::Step> =
        doc.steps.into_iter().map(|(name, mut step)| {
            step.id = name.clone();
            (name, step)
        }).collect();

    if steps.is_empty() {
        return Err(LoadError::Empty);
    }
    if !steps.contains_key(&doc.entry_step) {
        return Err(LoadError::MissingEntryStep(doc.entry_step));
    }

    for (step_id, step) in &steps {
        for arc in &step.next.arcs {
            if !steps.contains_key(&arc.target) {
                return Err(LoadError::UndefinedArcTarget { step: step_id.clone(), target: arc.target.clone() });
            }
        }
        for task in &step.tasks {
            for rule in &task.policy.rules {
                if let crate::model::ActionSpec::Jump { to } = &rule.then {
                    if step.task(to).is_none() {
                        return Err(LoadError::UndefinedJumpTarget {
                            step: step_id.clone(),
                            task: task.label.clone(),
                            target: to.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(Playbook { path: path.to_string(), version: version.to_string(), entry_step: doc.entry_step, steps })
}

/// Recursively walk the raw YAML looking for a legacy `eval`/`expr` key at
/// any nesting depth.
fn reject_legacy_eval(value: &serde_yaml::Value, path: &str) -> Result<(), LoadError> {
    if let serde_yaml::Value::Mapping(map) = value {
        for (k, v) in map {
            if let serde_yaml::Value::String(key) = k {
                if key == "eval" || key == "expr" {
                    return Err(LoadError::LegacyEval { key: key.clone(), path: path.to_string() });
                }
                reject_legacy_eval(v, &format!("{path}.{key}"))?;
            }
        }
    } else if let serde_yaml::Value::Sequence(items) = value {
        for (i, item) in items.iter().enumerate() {
            reject_legacy_eval(item, &format!("{path}[{i}]"))?;
        }
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct RawPlaybook {
    entry_step: StepId,
    steps: HashMap<StepId, crate::model::Step>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR: &str = r#"
entry_step: start
steps:
  start:
    next:
      arcs:
        - when: "true"
          target: greet
  greet:
    tasks:
      - label: say_hi
        kind: python
        args: {}
    next:
      arcs:
        - when: "true"
          target: end
  end:
    is_end: true
"#;

    #[test]
    fn loads_a_linear_playbook() {
        let pb = load("demo.yaml", "1", LINEAR).unwrap();
        assert_eq!(pb.entry_step, "start");
        assert_eq!(pb.steps.len(), 3);
        assert!(pb.step("end").unwrap().is_end);
    }

    #[test]
    fn rejects_legacy_eval_block() {
        let yaml = r#"
entry_step: start
steps:
  start:
    tasks:
      - label: t1
        kind: http
        policy:
          eval: "outcome.ok"
"#;
        let err = load("demo.yaml", "1", yaml).unwrap_err();
        assert!(matches!(err, LoadError::LegacyEval { .. }));
    }

    #[test]
    fn rejects_unknown_entry_step() {
        let yaml = r#"
entry_step: missing
steps:
  start: {}
"#;
        let err = load("demo.yaml", "1", yaml).unwrap_err();
        assert!(matches!(err, LoadError::MissingEntryStep(_)));
    }

    #[test]
    fn rejects_arc_to_undefined_step() {
        let yaml = r#"
entry_step: start
steps:
  start:
    next:
      arcs:
        - when: "true"
          target: nowhere
"#;
        let err = load("demo.yaml", "1", yaml).unwrap_err();
        assert!(matches!(err, LoadError::UndefinedArcTarget { .. }));
    }

    #[test]
    fn rejects_jump_to_undefined_label() {
        let yaml = r#"
entry_step: start
steps:
  start:
    tasks:
      - label: t1
        kind: http
        policy:
          rules:
            - when: "true"
              then:
                do: jump
                to: nowhere
"#;
        let err = load("demo.yaml", "1", yaml).unwrap_err();
        assert!(matches!(err, LoadError::UndefinedJumpTarget { .. }));
    }
}

//! Policy gate: leakage and contradiction rules for outgoing answers.
//!
//! Rules, first failing rule wins:
//!
//! 1. In `external` mode, any PII field that is present and non-empty in the
//!    output denies.
//! 2. Any canonical key with a non-null value that the output restates with a
//!    different value denies.
//! 3. Otherwise allow.
//!
//! The built-in evaluator lives here. Alternative evaluators (e.g. an
//! external rule engine) implement [`PolicyEvaluator`] and must agree with
//! [`evaluate_rules`] on every payload.

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Payload ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  Internal,
  External,
}

/// Canonical facts relevant to one answer, plus which output fields are PII.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreFacts {
  #[serde(default)]
  pub values:     BTreeMap<String, Value>,
  #[serde(default)]
  pub pii_fields: BTreeSet<String>,
}

/// The payload every evaluator receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInput {
  pub mode:   Mode,
  pub core:   CoreFacts,
  #[serde(default)]
  pub output: BTreeMap<String, Value>,
}

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DenyReason {
  PiiExposure { field: String },
  CoreContradiction { key: String },
  /// The evaluator could not produce a verdict; treated as a denial.
  EvaluatorFailure { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
  Allow,
  Deny(DenyReason),
}

impl Decision {
  pub fn is_allow(&self) -> bool { matches!(self, Self::Allow) }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// Present in the sense of rule 1: not null, not `""`, `[]` or `{}`.
pub fn is_non_empty(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::String(s) => !s.is_empty(),
    Value::Array(a) => !a.is_empty(),
    Value::Object(o) => !o.is_empty(),
    Value::Bool(_) | Value::Number(_) => true,
  }
}

/// JSON equality with numbers compared by value, so `1` equals `1.0`.
pub fn same_value(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
    (Value::Array(x), Value::Array(y)) => {
      x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_value(a, b))
    }
    (Value::Object(x), Value::Object(y)) => {
      x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| same_value(v, w)))
    }
    _ => a == b,
  }
}

/// The gate rules, evaluated in-process.
pub fn evaluate_rules(input: &PolicyInput) -> Decision {
  if input.mode == Mode::External {
    let leaked = input
      .core
      .pii_fields
      .iter()
      .find(|field| input.output.get(*field).is_some_and(is_non_empty));
    if let Some(field) = leaked {
      return Decision::Deny(DenyReason::PiiExposure { field: field.clone() });
    }
  }

  let contradicted = input.core.values.iter().find(|(key, canonical)| {
    !canonical.is_null() && input.output.get(*key).is_some_and(|out| !same_value(out, canonical))
  });
  if let Some((key, _)) = contradicted {
    return Decision::Deny(DenyReason::CoreContradiction { key: key.clone() });
  }

  Decision::Allow
}

// ─── Evaluator trait ─────────────────────────────────────────────────────────

/// A pluggable policy evaluator. Implementations are pure with respect to the
/// payload; auditing the decision is the caller's job.
pub trait PolicyEvaluator: Send + Sync {
  /// Short identifier recorded alongside audited decisions.
  fn name(&self) -> &'static str;

  fn evaluate<'a>(
    &'a self,
    input: &'a PolicyInput,
  ) -> impl Future<Output = Decision> + Send + 'a;
}

/// The always-available in-process evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl PolicyEvaluator for BuiltinEvaluator {
  fn name(&self) -> &'static str { "builtin" }

  async fn evaluate(&self, input: &PolicyInput) -> Decision { evaluate_rules(input) }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn input(mode: Mode, values: Value, pii: &[&str], output: Value) -> PolicyInput {
    serde_json::from_value(json!({
      "mode": mode,
      "core": { "values": values, "pii_fields": pii },
      "output": output,
    }))
    .unwrap()
  }

  #[test]
  fn external_pii_exposure_denied() {
    let i = input(Mode::External, json!({}), &["email"], json!({ "email": "a@b.c" }));
    assert_eq!(
      evaluate_rules(&i),
      Decision::Deny(DenyReason::PiiExposure { field: "email".into() })
    );
  }

  #[test]
  fn internal_mode_may_include_pii() {
    let i = input(Mode::Internal, json!({}), &["email"], json!({ "email": "a@b.c" }));
    assert!(evaluate_rules(&i).is_allow());
  }

  #[test]
  fn empty_pii_values_are_not_exposure() {
    for empty in [json!(null), json!(""), json!([]), json!({})] {
      let i = input(Mode::External, json!({}), &["ssn"], json!({ "ssn": empty }));
      assert!(evaluate_rules(&i).is_allow(), "{i:?}");
    }
    let i = input(Mode::External, json!({}), &["ssn"], json!({ "ssn": 0 }));
    assert!(!evaluate_rules(&i).is_allow());
  }

  #[test]
  fn contradiction_of_core_value_denied() {
    let i = input(
      Mode::Internal,
      json!({ "profile.name": "Name" }),
      &[],
      json!({ "profile.name": "Other" }),
    );
    assert_eq!(
      evaluate_rules(&i),
      Decision::Deny(DenyReason::CoreContradiction { key: "profile.name".into() })
    );
  }

  #[test]
  fn agreeing_or_absent_core_keys_allowed() {
    let i = input(
      Mode::External,
      json!({ "a": 1, "b": null }),
      &[],
      json!({ "a": 1, "b": "anything", "c": true }),
    );
    assert!(evaluate_rules(&i).is_allow());
  }

  #[test]
  fn numbers_compare_by_value() {
    let i = input(Mode::Internal, json!({ "n": 1, "l": [2] }), &[], json!({ "n": 1.0, "l": [2.0] }));
    assert!(evaluate_rules(&i).is_allow());
    let i = input(Mode::Internal, json!({ "n": 1 }), &[], json!({ "n": "1" }));
    assert!(!evaluate_rules(&i).is_allow());
  }

  #[test]
  fn null_output_contradicts_non_null_core() {
    let i = input(Mode::Internal, json!({ "a": 1 }), &[], json!({ "a": null }));
    assert!(!evaluate_rules(&i).is_allow());
  }

  #[test]
  fn pii_rule_wins_over_contradiction() {
    let i = input(
      Mode::External,
      json!({ "name": "A" }),
      &["phone"],
      json!({ "name": "B", "phone": "555" }),
    );
    assert!(matches!(
      evaluate_rules(&i),
      Decision::Deny(DenyReason::PiiExposure { .. })
    ));
  }

  #[test]
  fn payload_shape_roundtrips() {
    let i = input(Mode::External, json!({ "k": 1 }), &["p"], json!({ "k": 1 }));
    let wire = serde_json::to_value(&i).unwrap();
    assert_eq!(wire["mode"], "external");
    assert_eq!(wire["core"]["pii_fields"], json!(["p"]));
  }
}

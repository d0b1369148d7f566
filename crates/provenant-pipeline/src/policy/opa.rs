//! External policy evaluation through the `opa` CLI.
//!
//! Each decision runs `opa eval` against the Rego rule set with the payload
//! on stdin. The call is bounded by a timeout, and any failure (spawn error,
//! timeout, non-zero exit, undefined or malformed result) is a denial.

use std::{
  io,
  path::PathBuf,
  process::{ExitStatus, Stdio},
  time::Duration,
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{io::AsyncWriteExt as _, process::Command};

use provenant_core::policy::{Decision, DenyReason, Mode, PolicyEvaluator, PolicyInput};

use crate::config::PolicySettings;

/// Rego rule producing a [`Decision`]-shaped object.
pub const DECISION_QUERY: &str = "data.provenance.gate.decision";

#[derive(Debug, Error)]
pub enum OpaError {
  #[error("failed to spawn {binary:?}: {source}")]
  Spawn { binary: PathBuf, source: io::Error },

  #[error("i/o with evaluator failed: {0}")]
  Io(#[from] io::Error),

  #[error("evaluator timed out after {0:?}")]
  Timeout(Duration),

  #[error("evaluator exited with {status}: {stderr}")]
  Exit { status: ExitStatus, stderr: String },

  #[error("undefined result for {DECISION_QUERY}")]
  Undefined,

  #[error("unparseable evaluator output: {0}")]
  Parse(String),
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpaEvaluator {
  binary:      PathBuf,
  policy_path: PathBuf,
  timeout:     Duration,
}

impl OpaEvaluator {
  pub fn new(binary: impl Into<PathBuf>, policy_path: impl Into<PathBuf>, timeout: Duration) -> Self {
    Self { binary: binary.into(), policy_path: policy_path.into(), timeout }
  }

  pub fn from_settings(settings: &PolicySettings) -> Self {
    Self::new(&settings.opa_binary, &settings.policy_path, settings.timeout())
  }

  /// Whether this evaluator is usable: the rule set exists and a trivially
  /// allowed payload evaluates to `allow`.
  pub async fn probe(&self) -> bool {
    if !self.policy_path.is_file() {
      tracing::debug!(path = ?self.policy_path, "policy file not found");
      return false;
    }
    let trivial = PolicyInput {
      mode:   Mode::Internal,
      core:   Default::default(),
      output: Default::default(),
    };
    match self.decide(&trivial).await {
      Ok(decision) => decision.is_allow(),
      Err(e) => {
        tracing::debug!(binary = ?self.binary, error = %e, "external policy evaluator probe failed");
        false
      }
    }
  }

  /// Run one evaluation.
  pub async fn decide(&self, input: &PolicyInput) -> Result<Decision, OpaError> {
    let payload = serde_json::to_vec(input).map_err(|e| OpaError::Parse(e.to_string()))?;

    let mut child = Command::new(&self.binary)
      .args(["eval", "--format=json", "--stdin-input", "--data"])
      .arg(&self.policy_path)
      .arg(DECISION_QUERY)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| OpaError::Spawn { binary: self.binary.clone(), source })?;

    let mut stdin = child
      .stdin
      .take()
      .ok_or_else(|| OpaError::Io(io::Error::other("child stdin unavailable")))?;

    let exchange = async move {
      stdin.write_all(&payload).await?;
      drop(stdin);
      child.wait_with_output().await
    };

    let output = tokio::time::timeout(self.timeout, exchange)
      .await
      .map_err(|_| OpaError::Timeout(self.timeout))??;

    if !output.status.success() {
      return Err(OpaError::Exit {
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
      });
    }
    parse_decision(&output.stdout)
  }
}

impl PolicyEvaluator for OpaEvaluator {
  fn name(&self) -> &'static str { "opa" }

  async fn evaluate(&self, input: &PolicyInput) -> Decision {
    match self.decide(input).await {
      Ok(decision) => decision,
      Err(e) => {
        tracing::warn!(error = %e, "external policy evaluation failed; denying");
        Decision::Deny(DenyReason::EvaluatorFailure { detail: e.to_string() })
      }
    }
  }
}

// ─── Output parsing ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EvalOutput {
  #[serde(default)]
  result: Vec<EvalResult>,
}

#[derive(Deserialize)]
struct EvalResult {
  #[serde(default)]
  expressions: Vec<EvalExpression>,
}

#[derive(Deserialize)]
struct EvalExpression {
  value: Value,
}

/// Extract the decision from `opa eval --format=json` output.
pub fn parse_decision(stdout: &[u8]) -> Result<Decision, OpaError> {
  let output: EvalOutput =
    serde_json::from_slice(stdout).map_err(|e| OpaError::Parse(e.to_string()))?;
  let value = output
    .result
    .into_iter()
    .next()
    .and_then(|r| r.expressions.into_iter().next())
    .map(|e| e.value)
    .ok_or(OpaError::Undefined)?;
  serde_json::from_value(value).map_err(|e| OpaError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_allow() {
    let out = br#"{"result":[{"expressions":[{"value":{"decision":"allow"},"text":"data.provenance.gate.decision"}]}]}"#;
    assert_eq!(parse_decision(out).unwrap(), Decision::Allow);
  }

  #[test]
  fn parses_deny_with_reason() {
    let out = br#"{"result":[{"expressions":[{"value":{"decision":"deny","rule":"pii_exposure","field":"ssn"}}]}]}"#;
    assert_eq!(
      parse_decision(out).unwrap(),
      Decision::Deny(DenyReason::PiiExposure { field: "ssn".into() })
    );
  }

  #[test]
  fn undefined_result_is_an_error() {
    assert!(matches!(parse_decision(b"{}"), Err(OpaError::Undefined)));
  }

  #[test]
  fn garbage_is_an_error() {
    assert!(matches!(parse_decision(b"not json"), Err(OpaError::Parse(_))));
    let wrong_shape = br#"{"result":[{"expressions":[{"value":true}]}]}"#;
    assert!(matches!(parse_decision(wrong_shape), Err(OpaError::Parse(_))));
  }
}

//! Policy evaluator selection.
//!
//! The evaluator is chosen once at startup: the external OPA evaluator when
//! configured and its probe succeeds, otherwise the built-in rules. Both
//! implement the same rule set and must agree on every payload.

pub mod opa;

use provenant_core::policy::{BuiltinEvaluator, Decision, PolicyEvaluator, PolicyInput};

use crate::config::PolicySettings;

pub use opa::{OpaError, OpaEvaluator};

/// The evaluator selected at startup.
#[derive(Debug, Clone)]
pub enum PolicyGate {
  Builtin(BuiltinEvaluator),
  Opa(OpaEvaluator),
}

impl Default for PolicyGate {
  fn default() -> Self { Self::Builtin(BuiltinEvaluator) }
}

impl PolicyEvaluator for PolicyGate {
  fn name(&self) -> &'static str {
    match self {
      Self::Builtin(e) => e.name(),
      Self::Opa(e) => e.name(),
    }
  }

  async fn evaluate(&self, input: &PolicyInput) -> Decision {
    match self {
      Self::Builtin(e) => e.evaluate(input).await,
      Self::Opa(e) => e.evaluate(input).await,
    }
  }
}

/// Probe for the external evaluator and fall back silently to the built-in
/// rules when it is unavailable.
pub async fn select_evaluator(settings: &PolicySettings) -> PolicyGate {
  if settings.prefer_external {
    let opa = OpaEvaluator::from_settings(settings);
    if opa.probe().await {
      tracing::info!(binary = ?settings.opa_binary, policy = ?settings.policy_path, "using external policy evaluator");
      return PolicyGate::Opa(opa);
    }
    tracing::info!("external policy evaluator unavailable; using built-in rules");
  }
  PolicyGate::default()
}

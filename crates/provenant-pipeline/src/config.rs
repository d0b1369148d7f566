//! Pipeline configuration.
//!
//! Loaded with the `config` crate from an optional TOML file layered under
//! `PROVENANT__*` environment variables (`__` separates nested keys, e.g.
//! `PROVENANT__POLICY__TIMEOUT_MS=500`). Every section has defaults, so an
//! empty file is a valid configuration.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use provenant_core::{
  confidence::{ConfidenceModel, ModelParams},
  fusion::FusionWeights,
  replay::{RecencyDecay, ReplayParams},
  sprt::SprtParams,
  stats::SpotCheckConfig,
};
use serde::Deserialize;

use crate::Result;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PROVENANT";

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub store_path:   PathBuf,
  pub fusion:       FusionSettings,
  pub model:        ModelSettings,
  pub policy:       PolicySettings,
  pub orchestrator: OrchestratorSettings,
  pub spotcheck:    SpotCheckSettings,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      store_path:   PathBuf::from("provenant.db"),
      fusion:       FusionSettings::default(),
      model:        ModelSettings::default(),
      policy:       PolicySettings::default(),
      orchestrator: OrchestratorSettings::default(),
      spotcheck:    SpotCheckSettings::default(),
    }
  }
}

impl PipelineConfig {
  /// Read `path` (if given and present) and the environment.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
      builder = builder.add_source(config::File::from(path).required(false));
    }
    let settings = builder
      .add_source(
        config::Environment::with_prefix(ENV_PREFIX)
          .separator("__")
          .try_parsing(true),
      )
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  /// Parameters replay evaluates capsules under. Producers must build
  /// capsules with the same values or replay will not match.
  pub fn replay_params(&self) -> ReplayParams {
    ReplayParams {
      model:   ModelParams::default(),
      recency: self.fusion.decay(),
    }
  }
}

// ─── Sections ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
  pub weights:            FusionWeights,
  /// Scale of the `1 / (1 + age_days / scale)` recency curve.
  pub recency_scale_days: f64,
}

impl Default for FusionSettings {
  fn default() -> Self {
    Self { weights: FusionWeights::default(), recency_scale_days: 1.0 }
  }
}

impl FusionSettings {
  pub fn decay(&self) -> RecencyDecay { RecencyDecay { scale_days: self.recency_scale_days } }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
  /// Initial coefficients.
  pub params:        ModelParams,
  pub beta_core_min: f64,
  pub learning_rate: f64,
}

impl Default for ModelSettings {
  fn default() -> Self {
    Self { params: ModelParams::default(), beta_core_min: 1.0, learning_rate: 0.05 }
  }
}

impl ModelSettings {
  pub fn build(&self) -> ConfidenceModel {
    ConfidenceModel::new(self.params, self.beta_core_min, self.learning_rate)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
  pub opa_binary:      PathBuf,
  pub policy_path:     PathBuf,
  pub timeout_ms:      u64,
  /// Use the external evaluator when the probe finds it.
  pub prefer_external: bool,
}

impl Default for PolicySettings {
  fn default() -> Self {
    Self {
      opa_binary:      PathBuf::from("opa"),
      policy_path:     PathBuf::from("policy/gate.rego"),
      timeout_ms:      2000,
      prefer_external: true,
    }
  }
}

impl PolicySettings {
  pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
  /// Self-consistency samples drawn per query.
  pub samples:         usize,
  /// Sample `i` is generated with seed `base_seed + i`.
  pub base_seed:       u64,
  pub model_name:      String,
  pub tee_attestation: Option<String>,
}

impl Default for OrchestratorSettings {
  fn default() -> Self {
    Self {
      samples:         5,
      base_seed:       0,
      model_name:      "unspecified".to_owned(),
      tee_attestation: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SpotCheckSettings {
  pub min_n:           u64,
  pub sample_fraction: f64,
  pub z:               f64,
  pub min_pass_rate:   f64,
  pub min_lower_bound: f64,
  /// Sampling seed; `None` draws one from the OS.
  pub seed:            Option<u64>,
  /// Hypotheses for the sequential check: `p0` is an unacceptable replay
  /// rate, `p1` an acceptable one.
  pub sprt:            SprtParams,
  /// Observations after which the sequential check must decide.
  pub sprt_horizon:    Option<u64>,
}

impl Default for SpotCheckSettings {
  fn default() -> Self {
    let criteria = SpotCheckConfig::default();
    Self {
      min_n:           criteria.min_n,
      sample_fraction: criteria.sample_fraction,
      z:               criteria.z,
      min_pass_rate:   criteria.min_pass_rate,
      min_lower_bound: criteria.min_lower_bound,
      seed:            None,
      sprt:            SprtParams { p0: 0.99, p1: 0.999, alpha: 0.001, beta: 0.01 },
      sprt_horizon:    None,
    }
  }
}

impl SpotCheckSettings {
  pub fn criteria(&self) -> SpotCheckConfig {
    SpotCheckConfig {
      min_n:           self.min_n,
      sample_fraction: self.sample_fraction,
      z:               self.z,
      min_pass_rate:   self.min_pass_rate,
      min_lower_bound: self.min_lower_bound,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn from_toml(text: &str) -> PipelineConfig {
    config::Config::builder()
      .add_source(config::File::from_str(text, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_file_yields_defaults() {
    let cfg = from_toml("");
    assert_eq!(cfg.store_path, PathBuf::from("provenant.db"));
    assert_eq!(cfg.fusion.weights, FusionWeights::default());
    assert_eq!(cfg.policy.timeout(), Duration::from_millis(2000));
    assert_eq!(cfg.orchestrator.samples, 5);
    assert_eq!(cfg.spotcheck.criteria(), SpotCheckConfig::default());
    assert_eq!(cfg.replay_params(), ReplayParams::default());
  }

  #[test]
  fn sections_override_defaults() {
    let cfg = from_toml(
      r#"
      store_path = "/tmp/p.db"

      [fusion]
      recency_scale_days = 7.0

      [fusion.weights]
      sim = 0.5

      [model]
      beta_core_min = 1.5

      [policy]
      prefer_external = false

      [spotcheck]
      min_n = 50
      seed = 42
      "#,
    );
    assert_eq!(cfg.store_path, PathBuf::from("/tmp/p.db"));
    assert_eq!(cfg.fusion.weights.sim, 0.5);
    assert_eq!(cfg.fusion.weights.recency, 0.2);
    assert_eq!(cfg.replay_params().recency.scale_days, 7.0);
    assert_eq!(cfg.model.build().beta_core_min(), 1.5);
    assert!(!cfg.policy.prefer_external);
    assert_eq!(cfg.spotcheck.criteria().min_n, 50);
    assert_eq!(cfg.spotcheck.seed, Some(42));
  }
}

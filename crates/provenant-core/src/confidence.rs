//! Trust-constrained logistic confidence model.
//!
//! `p_good = σ(α + β_core·core + β_sim·sim + β_recency·recency + β_prov·prov)`.
//! After every gradient step `β_core` is clamped to at least `β_core_min`, so
//! retraining can never erode the weight given to canonical evidence below
//! the configured floor.

use serde::{Deserialize, Serialize};

// ─── Features ────────────────────────────────────────────────────────────────

/// Inputs to the model. `core_hit` flags whether fusion took the canonical
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Features {
  pub core_hit:   bool,
  pub sim:        f64,
  pub recency:    f64,
  pub provenance: f64,
}

impl Features {
  /// `[x_core, x_sim, x_recency, x_prov]`.
  pub fn as_array(&self) -> [f64; 4] {
    [
      if self.core_hit { 1.0 } else { 0.0 },
      self.sim,
      self.recency,
      self.provenance,
    ]
  }
}

// ─── Parameters ──────────────────────────────────────────────────────────────

/// The coefficient vector `θ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
  pub alpha:        f64,
  pub beta_core:    f64,
  pub beta_sim:     f64,
  pub beta_recency: f64,
  pub beta_prov:    f64,
}

impl Default for ModelParams {
  fn default() -> Self {
    Self {
      alpha:        -1.0,
      beta_core:    2.0,
      beta_sim:     1.5,
      beta_recency: 0.5,
      beta_prov:    0.5,
    }
  }
}

impl ModelParams {
  pub fn logit(&self, x: &Features) -> f64 {
    let [core, sim, recency, prov] = x.as_array();
    self.alpha
      + self.beta_core * core
      + self.beta_sim * sim
      + self.beta_recency * recency
      + self.beta_prov * prov
  }

  pub fn prob(&self, x: &Features) -> f64 { sigmoid(self.logit(x)) }
}

/// Logistic function that never overflows: `exp` is only ever taken of a
/// non-positive argument.
pub fn sigmoid(z: f64) -> f64 {
  if z >= 0.0 {
    1.0 / (1.0 + (-z).exp())
  } else {
    let e = z.exp();
    e / (1.0 + e)
  }
}

// ─── Model ───────────────────────────────────────────────────────────────────

/// Model state: parameters plus the floor and step size that govern
/// [`ConfidenceModel::update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceModel {
  params:        ModelParams,
  beta_core_min: f64,
  learning_rate: f64,
}

impl Default for ConfidenceModel {
  fn default() -> Self { Self::new(ModelParams::default(), 1.0, 0.05) }
}

impl ConfidenceModel {
  /// Build a model; the floor is applied immediately so the invariant holds
  /// from construction onward.
  pub fn new(params: ModelParams, beta_core_min: f64, learning_rate: f64) -> Self {
    let mut model = Self { params, beta_core_min, learning_rate };
    model.enforce_floor();
    model
  }

  pub fn params(&self) -> ModelParams { self.params }

  pub fn beta_core_min(&self) -> f64 { self.beta_core_min }

  pub fn prob(&self, x: &Features) -> f64 { self.params.prob(x) }

  /// Negative log-likelihood of label `y` under the current parameters.
  pub fn loss(&self, x: &Features, y: bool) -> f64 {
    let p = self.prob(x).clamp(f64::EPSILON, 1.0 - f64::EPSILON);
    if y { -p.ln() } else { -(1.0 - p).ln() }
  }

  /// One SGD step on logistic loss, then clamp `β_core` to the floor.
  pub fn update(&mut self, x: &Features, y: bool) {
    let target = if y { 1.0 } else { 0.0 };
    let err = self.prob(x) - target;
    let step = self.learning_rate * err;
    let [core, sim, recency, prov] = x.as_array();

    self.params.alpha -= step;
    self.params.beta_core -= step * core;
    self.params.beta_sim -= step * sim;
    self.params.beta_recency -= step * recency;
    self.params.beta_prov -= step * prov;
    self.enforce_floor();
  }

  fn enforce_floor(&mut self) {
    // NaN from a degenerate update must not slip past the floor either.
    if self.params.beta_core.is_nan() || self.params.beta_core < self.beta_core_min {
      self.params.beta_core = self.beta_core_min;
    }
  }
}

#[cfg(test)]
mod tests {
  use rand::{Rng, SeedableRng, rngs::StdRng};

  use super::*;

  #[test]
  fn sigmoid_is_stable_at_extremes() {
    assert_eq!(sigmoid(0.0), 0.5);
    assert!(sigmoid(1000.0) <= 1.0 && sigmoid(1000.0) > 0.999);
    assert!(sigmoid(-1000.0) >= 0.0 && sigmoid(-1000.0) < 1e-300);
    assert!(sigmoid(f64::MAX).is_finite());
    assert!(sigmoid(f64::MIN).is_finite());
  }

  #[test]
  fn core_hit_raises_confidence() {
    let model = ConfidenceModel::default();
    let mut x = Features { core_hit: false, sim: 0.5, recency: 0.5, provenance: 1.0 };
    let without = model.prob(&x);
    x.core_hit = true;
    assert!(model.prob(&x) > without);
  }

  #[test]
  fn floor_applied_at_construction() {
    let params = ModelParams { beta_core: -3.0, ..ModelParams::default() };
    let model = ConfidenceModel::new(params, 0.5, 0.1);
    assert_eq!(model.params().beta_core, 0.5);
  }

  #[test]
  fn beta_core_never_drops_below_floor() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut model = ConfidenceModel::new(ModelParams::default(), 1.0, 0.5);
    for _ in 0..5_000 {
      // Adversarial stream: core hits labelled bad push β_core downward.
      let x = Features {
        core_hit:   rng.gen_bool(0.8),
        sim:        rng.r#gen(),
        recency:    rng.r#gen(),
        provenance: if rng.gen_bool(0.5) { 1.0 } else { 0.0 },
      };
      model.update(&x, rng.gen_bool(0.1));
      assert!(model.params().beta_core >= model.beta_core_min());
    }
  }

  #[test]
  fn update_moves_prediction_toward_label() {
    let mut model = ConfidenceModel::default();
    let x = Features { core_hit: false, sim: 0.9, recency: 0.3, provenance: 1.0 };
    let before = model.prob(&x);
    model.update(&x, true);
    assert!(model.prob(&x) > before);

    let loss_before = model.loss(&x, false);
    model.update(&x, false);
    assert!(model.loss(&x, false) < loss_before);
  }

  #[test]
  fn nan_update_is_clamped() {
    let mut model = ConfidenceModel::default();
    let x = Features { core_hit: true, sim: f64::NAN, recency: 0.0, provenance: 0.0 };
    model.update(&x, true);
    assert_eq!(model.params().beta_core, model.beta_core_min());
  }
}

//! Statistical reproducibility certification.
//!
//! A bounded random sample of capsules is replayed; the Wilson score interval
//! on the match rate turns that sample into a population-wide bound.

use serde::{Deserialize, Serialize};

/// Closed interval on a proportion, clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
  pub lower: f64,
  pub upper: f64,
}

/// Wilson score interval for observed proportion `p_hat` over `n` trials at
/// normal quantile `z`. With no trials nothing is known: `[0, 1]`.
pub fn wilson(p_hat: f64, n: u64, z: f64) -> Interval {
  if n == 0 {
    return Interval { lower: 0.0, upper: 1.0 };
  }
  let n = n as f64;
  let z2 = z * z;
  let denom = 1.0 + z2 / n;
  let center = (p_hat + z2 / (2.0 * n)) / denom;
  let margin = z * (p_hat * (1.0 - p_hat) / n + z2 / (4.0 * n * n)).sqrt() / denom;
  Interval {
    lower: (center - margin).max(0.0),
    upper: (center + margin).min(1.0),
  }
}

// ─── Spot-check ──────────────────────────────────────────────────────────────

/// Sampling plan and pass criteria.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotCheckConfig {
  pub min_n:           u64,
  pub sample_fraction: f64,
  /// Normal quantile; 3.29 ≈ 99.9% two-sided.
  pub z:               f64,
  pub min_pass_rate:   f64,
  pub min_lower_bound: f64,
}

impl Default for SpotCheckConfig {
  fn default() -> Self {
    Self {
      min_n:           200,
      sample_fraction: 0.005,
      z:               3.29,
      min_pass_rate:   0.999,
      min_lower_bound: 0.995,
    }
  }
}

impl SpotCheckConfig {
  /// `min(N, max(min_n, ⌈N·fraction⌉))`.
  pub fn sample_size(&self, population: u64) -> u64 {
    let proportional = (population as f64 * self.sample_fraction).ceil() as u64;
    proportional.max(self.min_n).min(population)
  }

  /// Score an already-replayed sample.
  pub fn evaluate(&self, population: u64, sampled: u64, matched: u64) -> SpotCheckOutcome {
    let p_hat = if sampled == 0 { 0.0 } else { matched as f64 / sampled as f64 };
    let ci = wilson(p_hat, sampled, self.z);
    let passed =
      sampled > 0 && p_hat >= self.min_pass_rate && ci.lower >= self.min_lower_bound;
    SpotCheckOutcome { population, sampled, matched, p_hat, ci, passed }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotCheckOutcome {
  pub population: u64,
  pub sampled:    u64,
  pub matched:    u64,
  pub p_hat:      f64,
  pub ci:         Interval,
  pub passed:     bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wilson_perfect_sample_at_95_percent() {
    let ci = wilson(1.0, 200, 1.96);
    assert!(ci.lower >= 0.98, "lower = {}", ci.lower);
    assert!(ci.upper > 0.9999);
  }

  #[test]
  fn wilson_empty_sample_is_uninformative() {
    assert_eq!(wilson(0.5, 0, 1.96), Interval { lower: 0.0, upper: 1.0 });
  }

  #[test]
  fn wilson_contains_point_estimate() {
    for (p, n) in [(0.1, 50), (0.5, 10), (0.93, 1000), (0.0, 30)] {
      let ci = wilson(p, n, 3.29);
      assert!(ci.lower <= p && p <= ci.upper, "p={p} n={n} ci={ci:?}");
      assert!(ci.lower >= 0.0 && ci.upper <= 1.0);
    }
  }

  #[test]
  fn wilson_narrows_with_more_trials() {
    let small = wilson(0.9, 20, 1.96);
    let large = wilson(0.9, 2000, 1.96);
    assert!(large.upper - large.lower < small.upper - small.lower);
  }

  #[test]
  fn sample_size_respects_floor_and_population() {
    let cfg = SpotCheckConfig::default();
    assert_eq!(cfg.sample_size(0), 0);
    assert_eq!(cfg.sample_size(50), 50);
    assert_eq!(cfg.sample_size(10_000), 200);
    assert_eq!(cfg.sample_size(100_000), 500);
    assert_eq!(cfg.sample_size(100_001), 501);
  }

  #[test]
  fn passes_only_with_enough_perfect_evidence() {
    let cfg = SpotCheckConfig::default();
    // 200 perfect replays are not enough for a 0.995 lower bound at z=3.29.
    assert!(!cfg.evaluate(10_000, 200, 200).passed);
    // 3000 perfect replays are.
    let ok = cfg.evaluate(600_000, 3000, 3000);
    assert!(ok.passed, "{ok:?}");
    // Four misses in 3000 put p̂ below 0.999.
    assert!(!cfg.evaluate(600_000, 3000, 2996).passed);
  }

  #[test]
  fn empty_population_fails() {
    let out = SpotCheckConfig::default().evaluate(0, 0, 0);
    assert!(!out.passed);
    assert_eq!(out.p_hat, 0.0);
    assert_eq!(out.ci, Interval { lower: 0.0, upper: 1.0 });
  }
}

//! Fusion: strict precedence between canonical truth and retrieved
//! candidates.
//!
//! A non-null canonical value always wins. Otherwise the candidate with the
//! highest weighted evidence score is chosen; ties go to the earliest
//! candidate in input order. The function is pure so that replay can
//! reproduce it bit for bit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rule name recorded in capsules produced by [`fuse`].
pub const FUSION_RULE: &str = "core>rag:weighted_max";

// ─── Weights ─────────────────────────────────────────────────────────────────

/// Linear weights over a candidate's evidence signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
  pub sim:        f64,
  pub recency:    f64,
  pub provenance: f64,
}

impl Default for FusionWeights {
  fn default() -> Self { Self { sim: 0.6, recency: 0.2, provenance: 0.2 } }
}

impl FusionWeights {
  pub fn score(&self, similarity: f64, recency: f64, provenance: f64) -> f64 {
    self.sim * similarity + self.recency * recency + self.provenance * provenance
  }
}

// ─── Candidate ───────────────────────────────────────────────────────────────

/// A retrieved or generated candidate answer with its evidence signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
  pub value:      Value,
  pub similarity: f64,
  pub recency:    f64,
  pub provenance: f64,
}

impl Candidate {
  pub fn score(&self, weights: &FusionWeights) -> f64 {
    weights.score(self.similarity, self.recency, self.provenance)
  }
}

// ─── Result metadata ─────────────────────────────────────────────────────────

/// Which path produced the fused value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionSource {
  Core,
  Rag,
  None,
}

impl FusionSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Core => "core",
      Self::Rag => "rag",
      Self::None => "none",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionMeta {
  pub source: FusionSource,
  /// Winning candidate's score; only set on the `rag` path.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score:  Option<f64>,
}

// ─── fuse ────────────────────────────────────────────────────────────────────

/// Fuse with the default weights.
pub fn fuse(core: Option<&Value>, candidates: &[Candidate]) -> (Option<Value>, FusionMeta) {
  fuse_weighted(core, candidates, &FusionWeights::default())
}

/// Fuse `core` against `candidates` under `weights`.
///
/// `Some(Value::Null)` is treated the same as `None`. Non-finite scores rank
/// below every finite score.
pub fn fuse_weighted(
  core: Option<&Value>,
  candidates: &[Candidate],
  weights: &FusionWeights,
) -> (Option<Value>, FusionMeta) {
  if let Some(value) = core.filter(|v| !v.is_null()) {
    return (Some(value.clone()), FusionMeta { source: FusionSource::Core, score: None });
  }

  let mut best: Option<(&Candidate, f64)> = None;
  for candidate in candidates {
    let raw = candidate.score(weights);
    let score = if raw.is_finite() { raw } else { f64::NEG_INFINITY };
    // Strict comparison keeps the first maximal candidate.
    if best.is_none_or(|(_, top)| score > top) {
      best = Some((candidate, score));
    }
  }

  match best {
    Some((candidate, score)) => (
      Some(candidate.value.clone()),
      FusionMeta { source: FusionSource::Rag, score: Some(score) },
    ),
    None => (None, FusionMeta { source: FusionSource::None, score: None }),
  }
}

#[cfg(test)]
mod tests {
  use rand::{Rng, SeedableRng, rngs::StdRng};
  use serde_json::json;

  use super::*;

  fn cand(value: &str, similarity: f64, recency: f64, provenance: f64) -> Candidate {
    Candidate { value: json!(value), similarity, recency, provenance }
  }

  #[test]
  fn core_value_always_wins() {
    let core = json!("Name");
    let candidates = vec![cand("Other", 1.0, 1.0, 1.0)];
    let (value, meta) = fuse(Some(&core), &candidates);
    assert_eq!(value, Some(core));
    assert_eq!(meta.source, FusionSource::Core);
    assert_eq!(meta.score, None);
  }

  #[test]
  fn core_precedence_over_random_candidate_sets() {
    let mut rng = StdRng::seed_from_u64(7);
    let core = json!({ "canonical": true });
    for _ in 0..500 {
      let n = rng.gen_range(0..8);
      let candidates: Vec<_> = (0..n)
        .map(|i| cand(&format!("c{i}"), rng.r#gen(), rng.r#gen(), rng.r#gen()))
        .collect();
      let (value, meta) = fuse(Some(&core), &candidates);
      assert_eq!(value.as_ref(), Some(&core));
      assert_eq!(meta.source, FusionSource::Core);
    }
  }

  #[test]
  fn null_core_falls_through_to_candidates() {
    let (value, meta) = fuse(Some(&Value::Null), &[cand("a", 0.5, 0.5, 0.5)]);
    assert_eq!(value, Some(json!("a")));
    assert_eq!(meta.source, FusionSource::Rag);
  }

  #[test]
  fn no_core_no_candidates() {
    let (value, meta) = fuse(None, &[]);
    assert_eq!(value, None);
    assert_eq!(meta.source, FusionSource::None);
  }

  #[test]
  fn picks_highest_weighted_score() {
    let candidates = vec![
      cand("low", 0.2, 1.0, 1.0),  // 0.12 + 0.2 + 0.2 = 0.52
      cand("high", 0.9, 0.1, 0.0), // 0.54 + 0.02      = 0.56
    ];
    let (value, meta) = fuse(None, &candidates);
    assert_eq!(value, Some(json!("high")));
    assert!((meta.score.unwrap() - 0.56).abs() < 1e-12);
  }

  #[test]
  fn ties_resolve_to_first_candidate() {
    let candidates = vec![
      cand("first", 0.5, 0.5, 0.5),
      cand("second", 0.5, 0.5, 0.5),
      cand("third", 0.1, 0.1, 0.1),
    ];
    let (value, _) = fuse(None, &candidates);
    assert_eq!(value, Some(json!("first")));
  }

  #[test]
  fn nan_scores_rank_last() {
    let candidates = vec![cand("nan", f64::NAN, 0.0, 0.0), cand("ok", 0.1, 0.0, 0.0)];
    let (value, _) = fuse(None, &candidates);
    assert_eq!(value, Some(json!("ok")));
  }

  #[test]
  fn fuse_is_deterministic() {
    let candidates = vec![cand("a", 0.3, 0.9, 1.0), cand("b", 0.8, 0.1, 0.0)];
    let first = fuse(None, &candidates);
    let second = fuse(None, &candidates);
    assert_eq!(
      serde_json::to_vec(&first).unwrap(),
      serde_json::to_vec(&second).unwrap()
    );
  }

  #[test]
  fn meta_serialises_without_score_on_core_path() {
    let (_, meta) = fuse(Some(&json!(1)), &[]);
    assert_eq!(serde_json::to_string(&meta).unwrap(), r#"{"source":"core"}"#);
  }
}

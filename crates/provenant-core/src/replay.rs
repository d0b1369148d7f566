//! Replay: recompute a capsule's decision from its own recorded fields.
//!
//! A capsule's `output.hash` covers its *decision record*: the fused value,
//! the fusion metadata, and the model's `p_good`, serialised as canonical
//! JSON. Everything in that record is derivable from the capsule alone, so a
//! replay never reads live canonical state. Producers call
//! [`decision_text`] to emit exactly the text replay will recompute.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
  Error, Result,
  capsule::{Capsule, CapsuleCore, RagDoc},
  confidence::{Features, ModelParams},
  digest::{canonical_json, sha256_hex},
  fusion::{Candidate, FusionMeta, FusionWeights, fuse_weighted},
};

// ─── Parameters ──────────────────────────────────────────────────────────────

/// Maps document age to a recency signal: `1 / (1 + age_days / scale_days)`.
/// The default curve is `scale_days = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyDecay {
  pub scale_days: f64,
}

impl Default for RecencyDecay {
  fn default() -> Self { Self { scale_days: 1.0 } }
}

impl RecencyDecay {
  pub fn recency(&self, age_days: f64) -> f64 {
    let scale = if self.scale_days > 0.0 { self.scale_days } else { 1.0 };
    1.0 / (1.0 + age_days.max(0.0) / scale)
  }
}

/// The model and decay curve a replay is evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayParams {
  pub model:   ModelParams,
  pub recency: RecencyDecay,
}

// ─── Decision record ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
  pub fusion: FusionMeta,
  pub p_good: f64,
  pub value:  Option<Value>,
}

/// Feature vector reconstructed from capsule fields.
pub fn capsule_features(core: &CapsuleCore, rag: &[RagDoc], decay: &RecencyDecay) -> Features {
  Features {
    core_hit:   core.tag.is_some(),
    sim:        rag.iter().map(|d| d.sim).fold(0.0, f64::max),
    recency:    rag.iter().map(|d| decay.recency(d.age_days)).fold(0.0, f64::max),
    provenance: if rag.iter().any(|d| d.sim > 0.0) { 1.0 } else { 0.0 },
  }
}

pub fn decision_record(
  core: &CapsuleCore,
  rag: &[RagDoc],
  weights: &FusionWeights,
  params: &ReplayParams,
) -> DecisionRecord {
  let features = capsule_features(core, rag, &params.recency);

  let core_value = core
    .tag
    .as_ref()
    .map(|tag| json!({ "tag": tag, "bundle": core.bundle }));

  // First document with the highest similarity stands in for the candidate
  // set, carrying the aggregate signals.
  let mut top: Option<&RagDoc> = None;
  for doc in rag {
    if top.is_none_or(|t| doc.sim > t.sim) {
      top = Some(doc);
    }
  }
  let synthetic: Vec<Candidate> = top
    .map(|doc| Candidate {
      value:      json!({ "doc": doc.doc, "ver": doc.ver }),
      similarity: features.sim,
      recency:    features.recency,
      provenance: features.provenance,
    })
    .into_iter()
    .collect();

  let (value, fusion) = fuse_weighted(core_value.as_ref(), &synthetic, weights);
  DecisionRecord { fusion, p_good: params.model.prob(&features), value }
}

/// Canonical text of the decision record; this is what `output.hash` covers.
pub fn decision_text(
  core: &CapsuleCore,
  rag: &[RagDoc],
  weights: &FusionWeights,
  params: &ReplayParams,
) -> Result<String> {
  canonical_json(&decision_record(core, rag, weights, params))
}

// ─── Replay ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
  pub qid:             String,
  pub features:        Features,
  pub p_good:          f64,
  pub expected_hash:   String,
  pub recomputed_hash: String,
  pub hash_match:      bool,
}

impl ReplayReport {
  /// Surface a mismatch as an integrity error.
  pub fn into_result(self) -> Result<Self> {
    if self.hash_match {
      Ok(self)
    } else {
      Err(Error::ReplayMismatch {
        qid:      self.qid,
        expected: self.expected_hash,
        actual:   self.recomputed_hash,
      })
    }
  }
}

pub fn replay(capsule: &Capsule, params: &ReplayParams) -> Result<ReplayReport> {
  let record = decision_record(&capsule.core, &capsule.rag, &capsule.fusion.w, params);
  let recomputed_hash = sha256_hex(canonical_json(&record)?);
  Ok(ReplayReport {
    qid: capsule.qid.clone(),
    features: capsule_features(&capsule.core, &capsule.rag, &params.recency),
    p_good: record.p_good,
    hash_match: recomputed_hash == capsule.output.hash,
    expected_hash: capsule.output.hash.clone(),
    recomputed_hash,
  })
}

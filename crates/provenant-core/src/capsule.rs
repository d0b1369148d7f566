//! Capsules: immutable, hashable provenance records, one per answer.
//!
//! Field names on the wire are fixed; replay and spot-check tooling read
//! capsules written by any producer, so the serde names below must not change.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  digest::sha256_hex,
  fusion::{FUSION_RULE, FusionWeights},
};

// ─── Sections ────────────────────────────────────────────────────────────────

/// Which canonical fact (if any) the answer was anchored to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapsuleCore {
  /// Canonical key; `None` when fusion did not take the core path.
  pub tag:    Option<String>,
  /// `bundle_hash` of the canonical version used.
  pub bundle: Option<String>,
}

/// One retrieved document that fed the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagDoc {
  pub doc:      String,
  pub ver:      String,
  pub sim:      f64,
  pub age_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionRecord {
  pub w:    FusionWeights,
  pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRecord {
  pub model:       String,
  #[serde(rename = "prompt")]
  pub prompt_hash: String,
  pub seed:        u64,
  #[serde(rename = "tee_attestation")]
  pub attestation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
  /// Hex SHA-256 of the output text.
  pub hash:       String,
  pub tokens:     u32,
  pub latency_ms: u64,
}

// ─── Capsule ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
  /// `{UTC ISO-8601}-{uuid v4}`; the sole identity key.
  pub qid:        String,
  pub core:       CapsuleCore,
  pub rag:        Vec<RagDoc>,
  pub fusion:     FusionRecord,
  pub runtime:    RuntimeRecord,
  pub output:     OutputRecord,
  /// Hex SHA-256 of the query text.
  pub query_hash: String,
}

impl Capsule {
  /// Reject non-finite signals. JSON has no encoding for them, so a capsule
  /// carrying one could be stored but never read back.
  pub fn validate(&self) -> Result<()> {
    let w = &self.fusion.w;
    let weights = [
      ("fusion.w.sim", w.sim),
      ("fusion.w.recency", w.recency),
      ("fusion.w.provenance", w.provenance),
    ];
    let docs = self.rag.iter().enumerate().flat_map(|(i, d)| {
      [(format!("rag[{i}].sim"), d.sim), (format!("rag[{i}].age_days"), d.age_days)]
    });
    let bad = weights
      .into_iter()
      .map(|(name, v)| (name.to_owned(), v))
      .chain(docs)
      .find(|(_, v)| !v.is_finite());
    match bad {
      Some((field, _)) => Err(Error::NonFiniteSignal { qid: self.qid.clone(), field }),
      None => Ok(()),
    }
  }
}

/// Everything [`build_capsule`] needs. The raw query and output text are
/// hashed, never stored.
#[derive(Debug, Clone)]
pub struct NewCapsule {
  pub query:          String,
  pub core_tag:       Option<String>,
  pub bundle_hash:    Option<String>,
  pub rag_docs:       Vec<RagDoc>,
  pub fusion_weights: FusionWeights,
  pub model:          String,
  pub prompt_hash:    String,
  pub seed:           u64,
  pub attestation:    Option<String>,
  pub output_text:    String,
  pub tokens:         u32,
  pub latency_ms:     u64,
}

/// A fresh globally unique capsule id.
pub fn new_qid() -> String {
  format!(
    "{}-{}",
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    Uuid::new_v4()
  )
}

pub fn build_capsule(input: NewCapsule) -> Capsule {
  Capsule {
    qid:        new_qid(),
    core:       CapsuleCore { tag: input.core_tag, bundle: input.bundle_hash },
    rag:        input.rag_docs,
    fusion:     FusionRecord { w: input.fusion_weights, rule: FUSION_RULE.to_owned() },
    runtime:    RuntimeRecord {
      model:       input.model,
      prompt_hash: input.prompt_hash,
      seed:        input.seed,
      attestation: input.attestation,
    },
    output:     OutputRecord {
      hash:       sha256_hex(&input.output_text),
      tokens:     input.tokens,
      latency_ms: input.latency_ms,
    },
    query_hash: sha256_hex(&input.query),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> NewCapsule {
    NewCapsule {
      query:          "what is my name?".into(),
      core_tag:       Some("profile.name".into()),
      bundle_hash:    Some("bundle-1".into()),
      rag_docs:       vec![RagDoc {
        doc:      "doc-1".into(),
        ver:      "v1".into(),
        sim:      0.4,
        age_days: 10.0,
      }],
      fusion_weights: FusionWeights::default(),
      model:          "gen-small".into(),
      prompt_hash:    sha256_hex("prompt"),
      seed:           7,
      attestation:    None,
      output_text:    "Name".into(),
      tokens:         1,
      latency_ms:     12,
    }
  }

  #[test]
  fn hashes_query_and_output() {
    let c = build_capsule(sample());
    assert_eq!(c.query_hash, sha256_hex("what is my name?"));
    assert_eq!(c.output.hash, sha256_hex("Name"));
    assert_eq!(c.fusion.rule, FUSION_RULE);
  }

  #[test]
  fn qids_are_unique() {
    let a = build_capsule(sample());
    let b = build_capsule(sample());
    assert_ne!(a.qid, b.qid);
    assert!(a.qid.contains('T') && a.qid.contains("Z-"));
  }

  #[test]
  fn finite_capsule_validates() {
    assert!(build_capsule(sample()).validate().is_ok());
  }

  #[test]
  fn non_finite_signals_are_rejected() {
    let mut input = sample();
    input.rag_docs.push(RagDoc { doc: "doc-2".into(), ver: "v1".into(), sim: 0.1, age_days: f64::NAN });
    let err = build_capsule(input).validate().unwrap_err();
    assert!(matches!(err, Error::NonFiniteSignal { ref field, .. } if field == "rag[1].age_days"));

    let mut input = sample();
    input.rag_docs[0].sim = f64::INFINITY;
    assert!(build_capsule(input).validate().is_err());

    let mut input = sample();
    input.fusion_weights.recency = f64::NEG_INFINITY;
    let err = build_capsule(input).validate().unwrap_err();
    assert!(matches!(err, Error::NonFiniteSignal { ref field, .. } if field == "fusion.w.recency"));
  }

  #[test]
  fn wire_field_names_are_fixed() {
    let wire = serde_json::to_value(build_capsule(sample())).unwrap();
    for key in ["qid", "core", "rag", "fusion", "runtime", "output", "query_hash"] {
      assert!(wire.get(key).is_some(), "missing {key}");
    }
    assert!(wire["core"].get("tag").is_some() && wire["core"].get("bundle").is_some());
    let doc = &wire["rag"][0];
    for key in ["doc", "ver", "sim", "age_days"] {
      assert!(doc.get(key).is_some(), "missing rag.{key}");
    }
    assert!(wire["fusion"].get("w").is_some() && wire["fusion"].get("rule").is_some());
    for key in ["model", "prompt", "seed", "tee_attestation"] {
      assert!(wire["runtime"].get(key).is_some(), "missing runtime.{key}");
    }
    for key in ["hash", "tokens", "latency_ms"] {
      assert!(wire["output"].get(key).is_some(), "missing output.{key}");
    }
  }
}

//! Think, verify, decide.
//!
//! [`Orchestrator::think`] draws self-consistency samples from the generator,
//! fuses canonical truth against the retrieved candidates and scores the
//! result. [`Orchestrator::record`] seals an answer into a capsule,
//! [`Orchestrator::verify`] replays one, and [`Orchestrator::check_policy`]
//! gates outgoing output. Every step that matters is written to the audit
//! ledger.

use std::{collections::HashSet, sync::Arc, time::Instant};

use serde::Serialize;
use serde_json::{json, Value};

use provenant_core::{
  audit::kind,
  canonical::CanonicalRecord,
  capsule::{build_capsule, Capsule, CapsuleCore, NewCapsule, RagDoc},
  confidence::{Features, ModelParams},
  digest::sha256_hex,
  fusion::{fuse_weighted, Candidate, FusionSource, FusionWeights},
  policy::{CoreFacts, Decision, PolicyEvaluator, PolicyInput},
  replay::{decision_text, replay, ReplayParams, ReplayReport},
  store::ProvenanceStore,
};

use crate::{
  config::{OrchestratorSettings, PipelineConfig},
  generator::{Generation, Generator, RetrievedDoc},
  model::SharedModel,
  policy::PolicyGate,
  Error, Result,
};

// ─── Answer ──────────────────────────────────────────────────────────────────

/// Everything [`Orchestrator::think`] learned about one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
  /// The canonical value on a core hit, otherwise the majority sample.
  pub result:         Option<Value>,
  /// Mean per-sample evidence score.
  pub evidence_score: f64,
  pub p_good:         f64,
  pub source:         FusionSource,
  /// Weighted score of the winning candidate on the RAG path.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fusion_score:   Option<f64>,
  pub samples:        Vec<Value>,
  pub rag_candidates: Vec<RetrievedDoc>,
  pub features:       Features,
  /// The canonical record consulted, if any.
  #[serde(skip)]
  pub core:           Option<CanonicalRecord>,
  pub tokens:         u32,
  pub latency_ms:     u64,
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator<S, G, P = PolicyGate> {
  store:         Arc<S>,
  generator:     G,
  policy:        P,
  model:         SharedModel,
  weights:       FusionWeights,
  replay_params: ReplayParams,
  settings:      OrchestratorSettings,
}

impl<S, G, P> Orchestrator<S, G, P>
where
  S: ProvenanceStore,
  G: Generator,
  P: PolicyEvaluator,
{
  pub fn new(store: Arc<S>, generator: G, policy: P, config: &PipelineConfig) -> Self {
    Self {
      store,
      generator,
      policy,
      model: SharedModel::new(config.model.build()),
      weights: config.fusion.weights,
      replay_params: config.replay_params(),
      settings: config.orchestrator.clone(),
    }
  }

  /// Share a model with other orchestrators instead of owning a fresh one.
  pub fn with_model(mut self, model: SharedModel) -> Self {
    self.model = model;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn model(&self) -> &SharedModel { &self.model }

  pub fn policy(&self) -> &P { &self.policy }

  // ── Think ─────────────────────────────────────────────────────────────────

  /// Answer `query`, consulting canonical key `core_key` when given.
  pub async fn think(&self, query: &str, core_key: Option<&str>) -> Result<Answer> {
    let started = Instant::now();

    let k = self.settings.samples.max(1);
    let mut generations = Vec::with_capacity(k);
    for i in 0..k {
      let seed = self.settings.base_seed.wrapping_add(i as u64);
      let generation = self
        .generator
        .generate(query, seed)
        .await
        .map_err(|e| Error::Generator(Box::new(e)))?;
      generations.push(generation);
    }

    let samples: Vec<Value> = generations.iter().map(|g| g.answer.clone()).collect();
    let majority = majority_vote(&samples);
    let evidence_score = mean_evidence(&generations, &self.weights);
    let rag_candidates = union_candidates(&generations);

    let core = match core_key {
      Some(key) => self.store.get_current(key).await.map_err(Error::store)?,
      None => None,
    };
    let candidates: Vec<Candidate> = rag_candidates.iter().map(RetrievedDoc::candidate).collect();
    let (fused, meta) = fuse_weighted(core.as_ref().map(|r| &r.value), &candidates, &self.weights);

    let core_hit = meta.source == FusionSource::Core;
    let features = Features {
      core_hit,
      sim:        max_of(candidates.iter().map(|c| c.similarity)),
      recency:    max_of(candidates.iter().map(|c| c.recency)),
      provenance: max_of(candidates.iter().map(|c| c.provenance)),
    };
    let p_good = self.model.prob(&features).await;

    self
      .store
      .append_audit(
        kind::FUSION_RESULT,
        json!({
          "query_hash": sha256_hex(query),
          "core_key":   core_key,
          "source":     meta.source,
          "score":      meta.score,
          "candidates": candidates.len(),
          "p_good":     p_good,
        }),
        None,
      )
      .await
      .map_err(Error::store)?;

    tracing::debug!(source = meta.source.as_str(), p_good, evidence_score, "query fused");

    Ok(Answer {
      result: if core_hit { fused } else { majority },
      evidence_score,
      p_good,
      source: meta.source,
      fusion_score: meta.score,
      samples,
      rag_candidates,
      features,
      core: if core_hit { core } else { None },
      tokens: generations.iter().fold(0u32, |acc, g| acc.saturating_add(g.tokens)),
      latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
  }

  // ── Record ────────────────────────────────────────────────────────────────

  /// Seal `answer` into a capsule, store it, and audit the write.
  pub async fn record(&self, query: &str, answer: &Answer) -> Result<Capsule> {
    let core = CapsuleCore {
      tag:    answer.core.as_ref().map(|r| r.key.clone()),
      bundle: answer.core.as_ref().map(|r| r.bundle_hash.clone()),
    };
    let rag_docs: Vec<RagDoc> = answer.rag_candidates.iter().map(RetrievedDoc::rag_doc).collect();
    let output_text = decision_text(&core, &rag_docs, &self.weights, &self.replay_params)?;

    let capsule = build_capsule(NewCapsule {
      query: query.to_owned(),
      core_tag: core.tag,
      bundle_hash: core.bundle,
      rag_docs,
      fusion_weights: self.weights,
      model: self.settings.model_name.clone(),
      prompt_hash: sha256_hex(self.generator.prompt(query)),
      seed: self.settings.base_seed,
      attestation: self.settings.tee_attestation.clone(),
      output_text,
      tokens: answer.tokens,
      latency_ms: answer.latency_ms,
    });

    if !self.store.append_capsule(&capsule).await.map_err(Error::store)? {
      tracing::warn!(qid = %capsule.qid, "capsule id already recorded; first write kept");
    }
    self
      .store
      .append_audit(
        kind::CAPSULE_RECORDED,
        json!({
          "qid":         capsule.qid,
          "query_hash":  capsule.query_hash,
          "output_hash": capsule.output.hash,
        }),
        None,
      )
      .await
      .map_err(Error::store)?;

    tracing::info!(qid = %capsule.qid, source = answer.source.as_str(), "capsule recorded");
    Ok(capsule)
  }

  /// [`think`](Self::think) then [`record`](Self::record).
  pub async fn answer(&self, query: &str, core_key: Option<&str>) -> Result<(Answer, Capsule)> {
    let answer = self.think(query, core_key).await?;
    let capsule = self.record(query, &answer).await?;
    Ok((answer, capsule))
  }

  // ── Verify ────────────────────────────────────────────────────────────────

  /// Replay a stored capsule and audit the outcome. A mismatch is reported,
  /// not raised; use [`ReplayReport::into_result`] to turn it into an error.
  pub async fn verify(&self, qid: &str) -> Result<ReplayReport> {
    let capsule = self
      .store
      .get_capsule(qid)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::CapsuleNotFound(qid.to_owned()))?;

    let report = replay(&capsule, &self.replay_params)?;
    let kind = if report.hash_match { kind::REPLAY_VERIFIED } else { kind::REPLAY_MISMATCH };
    self
      .store
      .append_audit(
        kind,
        json!({
          "qid":      report.qid,
          "expected": report.expected_hash,
          "actual":   report.recomputed_hash,
        }),
        None,
      )
      .await
      .map_err(Error::store)?;

    if !report.hash_match {
      tracing::warn!(
        qid,
        expected = %report.expected_hash,
        actual = %report.recomputed_hash,
        "capsule replay mismatch"
      );
    }
    Ok(report)
  }

  // ── Decide ────────────────────────────────────────────────────────────────

  /// Current canonical values for `keys`, ready for a policy payload.
  pub async fn core_facts(&self, keys: &[&str], pii_fields: &[&str]) -> Result<CoreFacts> {
    let mut facts = CoreFacts {
      pii_fields: pii_fields.iter().map(|f| (*f).to_owned()).collect(),
      ..CoreFacts::default()
    };
    for key in keys {
      if let Some(record) = self.store.get_current(key).await.map_err(Error::store)? {
        facts.values.insert(record.key, record.value);
      }
    }
    Ok(facts)
  }

  /// Evaluate the policy gate and audit the decision, allow or deny.
  pub async fn check_policy(&self, input: &PolicyInput) -> Result<Decision> {
    let decision = self.policy.evaluate(input).await;
    let kind = if decision.is_allow() { kind::POLICY_ALLOWED } else { kind::CORE_CONFLICT_BLOCKED };

    let entry = self
      .store
      .append_audit(
        kind,
        json!({
          "evaluator": self.policy.name(),
          "mode":      input.mode,
          "decision":  decision,
        }),
        None,
      )
      .await
      .map_err(Error::store)?;

    if let Decision::Deny(reason) = &decision {
      tracing::info!(evaluator = self.policy.name(), audit_id = entry.id, ?reason, "output blocked by policy");
    }
    Ok(decision)
  }

  /// Feed an observed outcome back into the shared confidence model.
  pub async fn feedback(&self, x: &Features, y: bool) -> ModelParams { self.model.update(x, y).await }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Most frequent answer; ties go to the answer seen first.
pub fn majority_vote(samples: &[Value]) -> Option<Value> {
  let mut tally: Vec<(&Value, usize)> = Vec::new();
  for sample in samples {
    match tally.iter_mut().find(|(v, _)| *v == sample) {
      Some((_, n)) => *n += 1,
      None => tally.push((sample, 1)),
    }
  }

  let mut best: Option<(&Value, usize)> = None;
  for (value, n) in tally {
    if best.is_none_or(|(_, m)| n > m) {
      best = Some((value, n));
    }
  }
  best.map(|(v, _)| v.clone())
}

/// Mean over samples of each sample's mean document score. A sample that
/// retrieved nothing contributes zero.
fn mean_evidence(generations: &[Generation], weights: &FusionWeights) -> f64 {
  if generations.is_empty() {
    return 0.0;
  }
  let total: f64 = generations
    .iter()
    .map(|g| {
      if g.docs.is_empty() {
        0.0
      } else {
        let sum: f64 = g.docs.iter().map(|d| weights.score(d.similarity, d.recency, d.provenance)).sum();
        sum / g.docs.len() as f64
      }
    })
    .sum();
  total / generations.len() as f64
}

/// All retrieved docs, deduplicated by `(doc, ver)`, first occurrence kept.
fn union_candidates(generations: &[Generation]) -> Vec<RetrievedDoc> {
  let mut seen = HashSet::new();
  generations
    .iter()
    .flat_map(|g| g.docs.iter())
    .filter(|d| seen.insert((d.doc.clone(), d.ver.clone())))
    .cloned()
    .collect()
}

fn max_of(values: impl Iterator<Item = f64>) -> f64 { values.fold(0.0, f64::max) }

#[cfg(test)]
mod tests {
  use std::convert::Infallible;

  use provenant_core::{canonical::NewCanonical, policy::DenyReason};
  use provenant_store_sqlite::SqliteStore;

  use super::*;

  /// Returns `answers[seed % len]` with a fixed set of documents.
  struct FixedGenerator {
    answers: Vec<Value>,
    docs:    Vec<RetrievedDoc>,
  }

  impl Generator for FixedGenerator {
    type Error = Infallible;

    async fn generate(&self, _query: &str, seed: u64) -> Result<Generation, Infallible> {
      let answer = self.answers[(seed as usize) % self.answers.len()].clone();
      Ok(Generation { answer, docs: self.docs.clone(), tokens: 3 })
    }
  }

  fn doc(id: &str, value: Value, similarity: f64) -> RetrievedDoc {
    RetrievedDoc {
      doc: id.into(),
      ver: "v1".into(),
      value,
      similarity,
      recency: 0.25,
      provenance: 1.0,
      age_days: 3.0,
    }
  }

  async fn orchestrator(
    answers: Vec<Value>,
    docs: Vec<RetrievedDoc>,
  ) -> Orchestrator<SqliteStore, FixedGenerator> {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    Orchestrator::new(
      store,
      FixedGenerator { answers, docs },
      PolicyGate::default(),
      &PipelineConfig::default(),
    )
  }

  #[test]
  fn majority_vote_prefers_most_frequent() {
    let samples = vec![json!("a"), json!("b"), json!("b")];
    assert_eq!(majority_vote(&samples), Some(json!("b")));
  }

  #[test]
  fn majority_vote_ties_go_to_first_seen() {
    let samples = vec![json!("b"), json!("a"), json!("a"), json!("b")];
    assert_eq!(majority_vote(&samples), Some(json!("b")));
    assert_eq!(majority_vote(&[]), None);
  }

  #[test]
  fn candidates_are_deduplicated_in_order() {
    let g1 = Generation { answer: json!(1), docs: vec![doc("d1", json!(1), 0.5), doc("d2", json!(2), 0.4)], tokens: 0 };
    let g2 = Generation { answer: json!(1), docs: vec![doc("d2", json!(9), 0.9), doc("d3", json!(3), 0.1)], tokens: 0 };
    let ids: Vec<_> = union_candidates(&[g1, g2]).into_iter().map(|d| (d.doc, d.value)).collect();
    assert_eq!(
      ids,
      vec![
        ("d1".to_owned(), json!(1)),
        ("d2".to_owned(), json!(2)),
        ("d3".to_owned(), json!(3)),
      ]
    );
  }

  #[test]
  fn evidence_is_mean_of_sample_means() {
    let w = FusionWeights::default();
    let full = Generation { answer: json!(1), docs: vec![doc("d", json!(1), 1.0)], tokens: 0 };
    let empty = Generation { answer: json!(1), docs: vec![], tokens: 0 };
    let one = w.score(1.0, 0.25, 1.0);
    assert!((mean_evidence(&[full.clone(), empty], &w) - one / 2.0).abs() < 1e-12);
    assert!((mean_evidence(&[full], &w) - one).abs() < 1e-12);
    assert_eq!(mean_evidence(&[], &w), 0.0);
  }

  #[tokio::test]
  async fn canonical_value_wins_end_to_end() {
    let o = orchestrator(vec![json!("Other")], vec![doc("d1", json!("Other"), 0.3)]).await;
    o.store()
      .upsert_canonical(NewCanonical::new("profile.name", json!("Name"), "bundle-1", "v1"))
      .await
      .unwrap();

    let (answer, capsule) = o.answer("what is my name?", Some("profile.name")).await.unwrap();
    assert_eq!(answer.result, Some(json!("Name")));
    assert_eq!(answer.source, FusionSource::Core);
    assert_eq!(answer.samples.len(), 5);
    assert!(answer.features.core_hit);
    assert_eq!(capsule.core.tag.as_deref(), Some("profile.name"));
    assert_eq!(capsule.core.bundle.as_deref(), Some("bundle-1"));

    let report = o.verify(&capsule.qid).await.unwrap();
    assert!(report.hash_match);

    let input = PolicyInput {
      mode:   provenant_core::policy::Mode::External,
      core:   o.core_facts(&["profile.name"], &["email"]).await.unwrap(),
      output: [
        ("profile.name".to_owned(), json!("Name")),
        ("email".to_owned(), json!("someone@example.com")),
      ]
      .into_iter()
      .collect(),
    };
    let decision = o.check_policy(&input).await.unwrap();
    assert_eq!(decision, Decision::Deny(DenyReason::PiiExposure { field: "email".into() }));

    let entries = o.store().audit_entries().await.unwrap();
    let kinds: Vec<&str> = entries.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(
      kinds,
      vec![
        kind::FUSION_RESULT,
        kind::CAPSULE_RECORDED,
        kind::REPLAY_VERIFIED,
        kind::CORE_CONFLICT_BLOCKED,
      ]
    );
    assert_eq!(o.store().verify_audit_chain().await.unwrap(), 4);
  }

  #[tokio::test]
  async fn rag_path_returns_majority_and_replays() {
    let o = orchestrator(
      vec![json!("x"), json!("y"), json!("y")],
      vec![doc("d1", json!("y"), 0.86), doc("d2", json!("x"), 0.2)],
    )
    .await;
    let (answer, capsule) = o.answer("q", None).await.unwrap();
    assert_eq!(answer.source, FusionSource::Rag);
    // seeds 0..5 pick x, y, y, x, y.
    assert_eq!(answer.result, Some(json!("y")));
    assert!(answer.fusion_score.is_some());
    assert!(capsule.core.tag.is_none());
    assert_eq!(capsule.rag.len(), 2);
    assert!(o.verify(&capsule.qid).await.unwrap().hash_match);
  }

  #[tokio::test]
  async fn missing_canonical_key_falls_back_to_rag() {
    let o = orchestrator(vec![json!("guess")], vec![doc("d1", json!("guess"), 0.5)]).await;
    let answer = o.think("q", Some("absent.key")).await.unwrap();
    assert_eq!(answer.source, FusionSource::Rag);
    assert!(answer.core.is_none());
    assert!(!answer.features.core_hit);
  }

  #[tokio::test]
  async fn no_candidates_no_core() {
    let o = orchestrator(vec![json!("only")], vec![]).await;
    let answer = o.think("q", None).await.unwrap();
    assert_eq!(answer.source, FusionSource::None);
    assert_eq!(answer.result, Some(json!("only")));
    assert_eq!(answer.evidence_score, 0.0);
  }

  #[tokio::test]
  async fn non_finite_retrieval_signal_is_not_recorded() {
    let o = orchestrator(vec![json!("x")], vec![doc("d1", json!("x"), f64::NAN)]).await;
    assert!(matches!(o.answer("q", None).await, Err(Error::Store(_))));
    assert_eq!(o.store().count_capsules().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn verify_unknown_capsule() {
    let o = orchestrator(vec![json!(1)], vec![]).await;
    assert!(matches!(o.verify("nope").await, Err(Error::CapsuleNotFound(_))));
  }

  #[tokio::test]
  async fn allowed_output_is_audited() {
    let o = orchestrator(vec![json!(1)], vec![]).await;
    let input: PolicyInput = serde_json::from_value(json!({
      "mode": "internal", "core": {}, "output": { "answer": 1 },
    }))
    .unwrap();
    assert!(o.check_policy(&input).await.unwrap().is_allow());
    let entries = o.store().audit_entries().await.unwrap();
    assert_eq!(entries.last().unwrap().kind, kind::POLICY_ALLOWED);
    assert_eq!(entries.last().unwrap().details["evaluator"], "builtin");
  }

  #[tokio::test]
  async fn feedback_respects_floor() {
    let o = orchestrator(vec![json!(1)], vec![]).await;
    let x = Features { core_hit: true, sim: 1.0, recency: 1.0, provenance: 1.0 };
    for _ in 0..200 {
      let params = o.feedback(&x, false).await;
      assert!(params.beta_core >= 1.0);
    }
  }
}

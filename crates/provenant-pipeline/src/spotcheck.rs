//! Statistical reproducibility checks over the capsule ledger.
//!
//! [`run_spot_check`] replays a seeded random sample and certifies the replay
//! rate with a Wilson interval. [`run_sequential_check`] replays capsules in
//! seeded random order and stops as soon as an SPRT reaches a decision.
//! Both append a `spot_check` entry to the audit ledger.

use rand::{rngs::StdRng, seq::SliceRandom as _, SeedableRng as _};
use serde::Serialize;
use serde_json::json;

use provenant_core::{
  audit::kind,
  replay::{replay, ReplayParams},
  sprt::{Sprt, SprtDecision},
  stats::{SpotCheckConfig, SpotCheckOutcome},
  store::ProvenanceStore,
};

use crate::{Error, Result};

// ─── Sampled check ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpotCheckReport {
  #[serde(flatten)]
  pub outcome:    SpotCheckOutcome,
  pub seed:       u64,
  /// Sampled capsules that failed to replay.
  pub mismatched: Vec<String>,
}

impl SpotCheckReport {
  pub fn passed(&self) -> bool { self.outcome.passed }
}

/// Replay a random sample of the ledger and score it against `criteria`.
pub async fn run_spot_check<S: ProvenanceStore>(
  store: &S,
  criteria: &SpotCheckConfig,
  params: &ReplayParams,
  seed: u64,
) -> Result<SpotCheckReport> {
  let ids = store.capsule_ids().await.map_err(Error::store)?;
  let population = ids.len() as u64;
  let n = criteria.sample_size(population);

  let mut rng = StdRng::seed_from_u64(seed);
  let chosen = rand::seq::index::sample(&mut rng, ids.len(), n as usize);

  let mut matched = 0u64;
  let mut mismatched = Vec::new();
  for index in chosen.iter() {
    let qid = &ids[index];
    if replays(store, qid, params).await? {
      matched += 1;
    } else {
      mismatched.push(qid.clone());
    }
  }

  let report = SpotCheckReport { outcome: criteria.evaluate(population, n, matched), seed, mismatched };
  let o = &report.outcome;

  store
    .append_audit(
      kind::SPOT_CHECK,
      json!({
        "method":     "wilson",
        "population": o.population,
        "sampled":    o.sampled,
        "matched":    o.matched,
        "p_hat":      o.p_hat,
        "ci_lower":   o.ci.lower,
        "ci_upper":   o.ci.upper,
        "passed":     o.passed,
        "seed":       seed,
        "mismatched": report.mismatched,
      }),
      None,
    )
    .await
    .map_err(Error::store)?;

  if o.passed {
    tracing::info!(population, sampled = o.sampled, p_hat = o.p_hat, lower = o.ci.lower, "spot check passed");
  } else {
    tracing::warn!(
      population,
      sampled = o.sampled,
      matched = o.matched,
      lower = o.ci.lower,
      "spot check failed"
    );
  }
  Ok(report)
}

// ─── Sequential check ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequentialReport {
  pub decision:     SprtDecision,
  pub population:   u64,
  pub observations: u64,
  pub llr:          f64,
  pub seed:         u64,
  pub mismatched:   Vec<String>,
}

impl SequentialReport {
  pub fn passed(&self) -> bool { self.decision == SprtDecision::Accept }
}

/// Replay capsules in random order until `sprt` accepts or rejects. Running
/// out of capsules first leaves the decision at `continue`.
pub async fn run_sequential_check<S: ProvenanceStore>(
  store: &S,
  mut sprt: Sprt,
  params: &ReplayParams,
  seed: u64,
) -> Result<SequentialReport> {
  let mut ids = store.capsule_ids().await.map_err(Error::store)?;
  let population = ids.len() as u64;
  ids.shuffle(&mut StdRng::seed_from_u64(seed));

  let mut mismatched = Vec::new();
  for qid in ids {
    let ok = replays(store, &qid, params).await?;
    if !ok {
      mismatched.push(qid);
    }
    if sprt.observe(ok) != SprtDecision::Continue {
      break;
    }
  }

  let report = SequentialReport {
    decision: sprt.decision(),
    population,
    observations: sprt.observations(),
    llr: sprt.llr(),
    seed,
    mismatched,
  };

  store
    .append_audit(
      kind::SPOT_CHECK,
      json!({
        "method":       "sprt",
        "population":   population,
        "observations": report.observations,
        "llr":          report.llr,
        "decision":     report.decision,
        "seed":         seed,
        "mismatched":   report.mismatched,
      }),
      None,
    )
    .await
    .map_err(Error::store)?;

  tracing::info!(
    decision = %report.decision,
    observations = report.observations,
    llr = report.llr,
    "sequential check finished"
  );
  Ok(report)
}

/// Whether the stored capsule `qid` replays. A capsule listed but missing or
/// unreadable is a failure.
async fn replays<S: ProvenanceStore>(store: &S, qid: &str, params: &ReplayParams) -> Result<bool> {
  let capsule = match store.get_capsule(qid).await {
    Ok(Some(capsule)) => capsule,
    Ok(None) => {
      tracing::warn!(qid, "capsule listed but not found");
      return Ok(false);
    }
    Err(e) => {
      tracing::warn!(qid, error = %e, "capsule unreadable");
      return Ok(false);
    }
  };

  let report = replay(&capsule, params)?;
  if !report.hash_match {
    tracing::warn!(
      qid,
      expected = %report.expected_hash,
      actual = %report.recomputed_hash,
      "capsule replay mismatch"
    );
  }
  Ok(report.hash_match)
}

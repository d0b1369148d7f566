//! Audit ledger entries and hash-chain arithmetic.
//!
//! `this_hash = SHA256(prev_hash ∥ canonical_json(details) ∥ created_at)`,
//! where `prev_hash` is the empty string for the genesis entry and
//! `created_at` is the stored timestamp text. Each entry's `prev_hash` equals
//! its predecessor's `this_hash`, so the log is a single non-forking chain.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, digest::sha256_hex};

/// Entry kinds written by the pipeline.
pub mod kind {
  pub const POLICY_ALLOWED: &str = "policy_allowed";
  pub const CORE_CONFLICT_BLOCKED: &str = "core_conflict_blocked";
  pub const FUSION_RESULT: &str = "fusion_result";
  pub const CAPSULE_RECORDED: &str = "capsule_recorded";
  pub const REPLAY_VERIFIED: &str = "replay_verified";
  pub const REPLAY_MISMATCH: &str = "replay_mismatch";
  pub const SPOT_CHECK: &str = "spot_check";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
  /// Monotonic, assigned by the store.
  pub id:         i64,
  pub kind:       String,
  pub details:    serde_json::Value,
  pub prev_hash:  Option<String>,
  pub this_hash:  String,
  /// Exactly the text that was hashed.
  pub created_at: String,
}

/// Hash for a new entry given its predecessor's hash, its canonicalised
/// details, and its timestamp text.
pub fn chain_hash(prev_hash: Option<&str>, details_canonical: &str, created_at: &str) -> String {
  let mut buf =
    String::with_capacity(prev_hash.map_or(0, str::len) + details_canonical.len() + created_at.len());
  buf.push_str(prev_hash.unwrap_or(""));
  buf.push_str(details_canonical);
  buf.push_str(created_at);
  sha256_hex(buf)
}

impl AuditEntry {
  /// Recompute this entry's hash from its own fields.
  pub fn recompute_hash(&self) -> Result<String> {
    let details = crate::digest::canonical_json(&self.details)?;
    Ok(chain_hash(self.prev_hash.as_deref(), &details, &self.created_at))
  }
}

/// Verify linkage and hashes over entries in id order.
///
/// `anchor` is the `this_hash` of the entry preceding `entries[0]`, or `None`
/// when `entries` starts at the genesis entry. Returns the number of entries
/// checked.
pub fn verify_chain(entries: &[AuditEntry], anchor: Option<&str>) -> Result<usize> {
  let mut expected_prev = anchor.map(str::to_owned);
  for entry in entries {
    if entry.prev_hash != expected_prev {
      return Err(Error::ChainBroken {
        id:            entry.id,
        expected_prev,
        actual_prev:   entry.prev_hash.clone(),
      });
    }
    let recomputed = entry.recompute_hash()?;
    if recomputed != entry.this_hash {
      return Err(Error::ChainHashMismatch {
        id:       entry.id,
        expected: entry.this_hash.clone(),
        actual:   recomputed,
      });
    }
    expected_prev = Some(entry.this_hash.clone());
  }
  Ok(entries.len())
}

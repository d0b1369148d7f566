//! Canonical records: the bitemporal ground-truth facts.
//!
//! Each key has a sequence of versions. Transaction time (`tx_from..tx_to`)
//! records when the store asserted a version; valid time
//! (`valid_from..valid_to`) records when the fact held in the world. Both are
//! half-open intervals. Exactly one version per key is *open*
//! (`tx_to == open_end()`); every earlier version is closed and never touched
//! again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp of `9999-12-31T00:00:00Z`, the "+infinity" sentinel used for
/// open `valid_to` / `tx_to` bounds.
pub const OPEN_END_TIMESTAMP: i64 = 253_402_214_400;

/// The far-future sentinel as a [`DateTime`].
pub fn open_end() -> DateTime<Utc> {
  DateTime::from_timestamp(OPEN_END_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One version of a canonical fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
  pub key:         String,
  pub value:       serde_json::Value,
  /// Hash of the evidence bundle this value was asserted from.
  pub bundle_hash: String,
  pub version:     String,
  pub valid_from:  DateTime<Utc>,
  pub valid_to:    DateTime<Utc>,
  /// Store-assigned; never accepted from callers.
  pub tx_from:     DateTime<Utc>,
  pub tx_to:       DateTime<Utc>,
}

impl CanonicalRecord {
  /// Whether this is the currently asserted version of its key.
  pub fn is_open(&self) -> bool { self.tx_to == open_end() }

  /// Whether this version was asserted at `tx_time` and describes `valid_time`.
  pub fn covers(&self, valid_time: DateTime<Utc>, tx_time: DateTime<Utc>) -> bool {
    self.valid_from <= valid_time
      && valid_time < self.valid_to
      && self.tx_from <= tx_time
      && tx_time < self.tx_to
  }
}

// ─── Input ───────────────────────────────────────────────────────────────────

/// Input to [`crate::store::ProvenanceStore::upsert_canonical`].
/// Transaction times are always set by the store.
#[derive(Debug, Clone)]
pub struct NewCanonical {
  pub key:         String,
  pub value:       serde_json::Value,
  pub bundle_hash: String,
  pub version:     String,
  pub valid_from:  DateTime<Utc>,
  /// `None` means open-ended validity.
  pub valid_to:    Option<DateTime<Utc>>,
}

impl NewCanonical {
  /// Convenience constructor valid from now, open-ended.
  pub fn new(
    key: impl Into<String>,
    value: serde_json::Value,
    bundle_hash: impl Into<String>,
    version: impl Into<String>,
  ) -> Self {
    Self {
      key: key.into(),
      value,
      bundle_hash: bundle_hash.into(),
      version: version.into(),
      valid_from: Utc::now(),
      valid_to: None,
    }
  }

  /// The effective `valid_to`, substituting the open sentinel.
  pub fn valid_to_or_open(&self) -> DateTime<Utc> {
    self.valid_to.unwrap_or_else(open_end)
  }
}

//! The `ProvenanceStore` trait.
//!
//! Implemented by storage backends (e.g. `provenant-store-sqlite`). The
//! pipeline depends on this abstraction, not on any concrete backend. A
//! single handle is constructed at startup and passed to every component.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  audit::AuditEntry,
  canonical::{CanonicalRecord, NewCanonical},
  capsule::Capsule,
};

/// Abstraction over the shared transactional store.
///
/// Canonical upserts and audit appends are each one atomic transaction and
/// are serialised against concurrent writers. Capsules are write-once.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait ProvenanceStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Canonical facts ───────────────────────────────────────────────────

  /// Close the open version of `input.key` (if any) and insert a new open
  /// version, atomically. Transaction times are assigned by the store.
  fn upsert_canonical(
    &self,
    input: NewCanonical,
  ) -> impl Future<Output = Result<CanonicalRecord, Self::Error>> + Send + '_;

  /// The currently asserted version of `key`.
  fn get_current<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<CanonicalRecord>, Self::Error>> + Send + 'a;

  /// The version that, as recorded at `tx_time`, was valid at `valid_time`.
  fn get_as_of<'a>(
    &'a self,
    key: &'a str,
    valid_time: DateTime<Utc>,
    tx_time: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<CanonicalRecord>, Self::Error>> + Send + 'a;

  /// Every version of `key`, oldest transaction first.
  fn history<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Vec<CanonicalRecord>, Self::Error>> + Send + 'a;

  // ── Capsules (write-once) ───────────────────────────────────────────

  /// Insert `capsule` keyed by `qid`. Returns `false` (and changes nothing)
  /// when the `qid` already exists.
  fn append_capsule<'a>(
    &'a self,
    capsule: &'a Capsule,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn get_capsule<'a>(
    &'a self,
    qid: &'a str,
  ) -> impl Future<Output = Result<Option<Capsule>, Self::Error>> + Send + 'a;

  fn count_capsules(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// All capsule ids in insertion order.
  fn capsule_ids(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  // ── Audit ledger (append-only hash chain) ───────────────────────────

  /// Append an entry to the chain tail.
  ///
  /// With `prev_hash = None` the current tail is used. An explicit
  /// `prev_hash` must equal the current tail, otherwise the append is
  /// refused rather than forking the chain.
  fn append_audit<'a>(
    &'a self,
    kind: &'a str,
    details: serde_json::Value,
    prev_hash: Option<String>,
  ) -> impl Future<Output = Result<AuditEntry, Self::Error>> + Send + 'a;

  /// All entries in id order.
  fn audit_entries(&self) -> impl Future<Output = Result<Vec<AuditEntry>, Self::Error>> + Send + '_;

  /// Recompute every link and hash; returns the number of entries verified.
  fn verify_audit_chain(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

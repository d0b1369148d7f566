//! Error types for `provenant-core`.
//!
//! Integrity violations always carry both the expected and the observed value;
//! they are surfaced to the caller and never corrected in place.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("replay mismatch for capsule {qid}: expected {expected}, recomputed {actual}")]
  ReplayMismatch {
    qid:      String,
    expected: String,
    actual:   String,
  },

  #[error(
    "audit chain broken at entry {id}: expected prev_hash {expected_prev:?}, found {actual_prev:?}"
  )]
  ChainBroken {
    id:            i64,
    expected_prev: Option<String>,
    actual_prev:   Option<String>,
  },

  #[error("audit entry {id} hash mismatch: expected {expected}, recomputed {actual}")]
  ChainHashMismatch {
    id:       i64,
    expected: String,
    actual:   String,
  },

  /// A float that would not survive JSON serialisation.
  #[error("capsule {qid} carries a non-finite {field}")]
  NonFiniteSignal { qid: String, field: String },

  #[error("invalid SPRT parameters: {0}")]
  InvalidSprtParams(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

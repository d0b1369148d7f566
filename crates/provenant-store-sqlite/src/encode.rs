//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision, so string comparison in SQL is chronological comparison.
//! Structured values are stored as compact JSON.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use provenant_core::{audit::AuditEntry, canonical::CanonicalRecord};

use crate::{Error, Result};

/// `encode_dt(open_end())`; duplicated as a literal in the schema.
pub const OPEN_SENTINEL: &str = "9999-12-31T00:00:00.000000Z";

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

/// `dt` at the precision it is stored with, so values handed back to callers
/// compare equal to what later reads return.
pub fn truncate_dt(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const CANONICAL_COLUMNS: &str =
  "key, value, bundle_hash, version, valid_from, valid_to, tx_from, tx_to";

/// Raw strings read directly from a `canonical` row.
pub struct RawCanonical {
  pub key:         String,
  pub value:       String,
  pub bundle_hash: String,
  pub version:     String,
  pub valid_from:  String,
  pub valid_to:    String,
  pub tx_from:     String,
  pub tx_to:       String,
}

impl RawCanonical {
  /// Map a row selected with [`CANONICAL_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      key:         row.get(0)?,
      value:       row.get(1)?,
      bundle_hash: row.get(2)?,
      version:     row.get(3)?,
      valid_from:  row.get(4)?,
      valid_to:    row.get(5)?,
      tx_from:     row.get(6)?,
      tx_to:       row.get(7)?,
    })
  }

  pub fn into_record(self) -> Result<CanonicalRecord> {
    Ok(CanonicalRecord {
      key:         self.key,
      value:       serde_json::from_str(&self.value)?,
      bundle_hash: self.bundle_hash,
      version:     self.version,
      valid_from:  decode_dt(&self.valid_from)?,
      valid_to:    decode_dt(&self.valid_to)?,
      tx_from:     decode_dt(&self.tx_from)?,
      tx_to:       decode_dt(&self.tx_to)?,
    })
  }
}

/// Raw strings read directly from an `audit_log` row.
pub struct RawAudit {
  pub id:         i64,
  pub kind:       String,
  pub details:    String,
  pub prev_hash:  Option<String>,
  pub this_hash:  String,
  pub created_at: String,
}

impl RawAudit {
  pub fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      id:         self.id,
      kind:       self.kind,
      details:    serde_json::from_str(&self.details)?,
      prev_hash:  self.prev_hash,
      this_hash:  self.this_hash,
      created_at: self.created_at,
    })
  }
}

//! [`SqliteStore`], the SQLite implementation of [`ProvenanceStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use serde_json::Value;

use provenant_core::{
  audit::{chain_hash, verify_chain, AuditEntry},
  canonical::{open_end, CanonicalRecord, NewCanonical},
  capsule::Capsule,
  digest::canonical_json,
  store::ProvenanceStore,
};

use crate::{
  encode::{decode_dt, encode_dt, truncate_dt, RawAudit, RawCanonical, CANONICAL_COLUMNS, OPEN_SENTINEL},
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A provenance store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted and every
/// clone talks to the same database thread.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_canonical(
    &self,
    sql: String,
    params: Vec<String>,
  ) -> Result<Vec<CanonicalRecord>> {
    let raws: Vec<RawCanonical> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawCanonical::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCanonical::into_record).collect()
  }
}

/// Result of the audit append transaction.
enum AppendOutcome {
  Appended(AuditEntry),
  Fork { expected: Option<String>, provided: String },
}

// ─── ProvenanceStore impl ────────────────────────────────────────────────────

impl ProvenanceStore for SqliteStore {
  type Error = Error;

  // ── Canonical facts ───────────────────────────────────────────────────────

  async fn upsert_canonical(&self, input: NewCanonical) -> Result<CanonicalRecord> {
    let valid_from = truncate_dt(input.valid_from);
    let valid_to = truncate_dt(input.valid_to_or_open());
    if valid_to <= valid_from {
      return Err(Error::InvalidValidRange { key: input.key });
    }

    let key_str        = input.key.clone();
    let value_str      = input.value.to_string();
    let bundle_str     = input.bundle_hash.clone();
    let version_str    = input.version.clone();
    let valid_from_str = encode_dt(valid_from);
    let valid_to_str   = encode_dt(valid_to);

    let tx_from_str: String = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<String> = tx
          .query_row(
            "SELECT tx_from FROM canonical WHERE key = ?1 AND tx_to = ?2",
            rusqlite::params![key_str, OPEN_SENTINEL],
            |row| row.get(0),
          )
          .optional()?;

        // Transaction time never runs backwards for a key, even if the wall
        // clock does.
        let now = encode_dt(Utc::now());
        let tx_time = match previous {
          Some(prev) if prev > now => prev,
          _ => now,
        };

        tx.execute(
          "UPDATE canonical SET tx_to = ?1 WHERE key = ?2 AND tx_to = ?3",
          rusqlite::params![tx_time, key_str, OPEN_SENTINEL],
        )?;
        tx.execute(
          "INSERT INTO canonical
             (key, value, bundle_hash, version, valid_from, valid_to, tx_from, tx_to)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            key_str,
            value_str,
            bundle_str,
            version_str,
            valid_from_str,
            valid_to_str,
            tx_time,
            OPEN_SENTINEL,
          ],
        )?;
        tx.commit()?;
        Ok(tx_time)
      })
      .await?;

    let record = CanonicalRecord {
      key:         input.key,
      value:       input.value,
      bundle_hash: input.bundle_hash,
      version:     input.version,
      valid_from,
      valid_to,
      tx_from:     decode_dt(&tx_from_str)?,
      tx_to:       open_end(),
    };
    tracing::debug!(key = %record.key, version = %record.version, "canonical upserted");
    Ok(record)
  }

  async fn get_current(&self, key: &str) -> Result<Option<CanonicalRecord>> {
    let sql = format!("SELECT {CANONICAL_COLUMNS} FROM canonical WHERE key = ?1 AND tx_to = ?2");
    let mut rows = self
      .query_canonical(sql, vec![key.to_owned(), OPEN_SENTINEL.to_owned()])
      .await?;
    Ok(rows.pop())
  }

  async fn get_as_of(
    &self,
    key: &str,
    valid_time: DateTime<Utc>,
    tx_time: DateTime<Utc>,
  ) -> Result<Option<CanonicalRecord>> {
    let sql = format!(
      "SELECT {CANONICAL_COLUMNS} FROM canonical
       WHERE key = ?1
         AND valid_from <= ?2 AND ?2 < valid_to
         AND tx_from <= ?3 AND ?3 < tx_to
       ORDER BY tx_from DESC, row_id DESC
       LIMIT 1"
    );
    let mut rows = self
      .query_canonical(sql, vec![key.to_owned(), encode_dt(valid_time), encode_dt(tx_time)])
      .await?;
    Ok(rows.pop())
  }

  async fn history(&self, key: &str) -> Result<Vec<CanonicalRecord>> {
    let sql = format!(
      "SELECT {CANONICAL_COLUMNS} FROM canonical WHERE key = ?1 ORDER BY tx_from, row_id"
    );
    self.query_canonical(sql, vec![key.to_owned()]).await
  }

  // ── Capsules ──────────────────────────────────────────────────────────────

  async fn append_capsule(&self, capsule: &Capsule) -> Result<bool> {
    capsule.validate()?;
    let qid         = capsule.qid.clone();
    let body        = serde_json::to_string(capsule)?;
    let recorded_at = encode_dt(Utc::now());

    let inserted: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO capsules (qid, capsule, recorded_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![qid, body, recorded_at],
        )?)
      })
      .await?;

    if inserted == 0 {
      tracing::debug!(qid = %capsule.qid, "capsule already recorded; ignoring");
    }
    Ok(inserted == 1)
  }

  async fn get_capsule(&self, qid: &str) -> Result<Option<Capsule>> {
    let qid = qid.to_owned();
    let body: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT capsule FROM capsules WHERE qid = ?1",
            rusqlite::params![qid],
            |row| row.get(0),
          )
          .optional()?)
      })
      .await?;

    Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
  }

  async fn count_capsules(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM capsules", [], |row| row.get(0))?))
      .await?;
    Ok(count.max(0) as u64)
  }

  async fn capsule_ids(&self) -> Result<Vec<String>> {
    let ids = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT qid FROM capsules ORDER BY rowid")?;
        let ids = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
      })
      .await?;
    Ok(ids)
  }

  // ── Audit ledger ──────────────────────────────────────────────────────────

  async fn append_audit(
    &self,
    kind: &str,
    details: Value,
    prev_hash: Option<String>,
  ) -> Result<AuditEntry> {
    let details_text = canonical_json(&details)?;
    let created_at   = encode_dt(Utc::now());
    let kind         = kind.to_owned();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let tail: Option<String> = tx
          .query_row(
            "SELECT this_hash FROM audit_log ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
          )
          .optional()?;

        if let Some(provided) = prev_hash {
          if tail.as_deref() != Some(provided.as_str()) {
            return Ok(AppendOutcome::Fork { expected: tail, provided });
          }
        }

        let this_hash = chain_hash(tail.as_deref(), &details_text, &created_at);
        tx.execute(
          "INSERT INTO audit_log (kind, details, prev_hash, this_hash, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![kind, details_text, tail, this_hash, created_at],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(AppendOutcome::Appended(AuditEntry {
          id,
          kind,
          details,
          prev_hash: tail,
          this_hash,
          created_at,
        }))
      })
      .await?;

    match outcome {
      AppendOutcome::Appended(entry) => {
        tracing::debug!(id = entry.id, kind = %entry.kind, "audit entry appended");
        Ok(entry)
      }
      AppendOutcome::Fork { expected, provided } => {
        tracing::warn!(?expected, %provided, "refusing audit append with stale prev_hash");
        Err(Error::ChainFork { expected, provided })
      }
    }
  }

  async fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
    let raws: Vec<RawAudit> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, kind, details, prev_hash, this_hash, created_at
           FROM audit_log ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawAudit {
              id:         row.get(0)?,
              kind:       row.get(1)?,
              details:    row.get(2)?,
              prev_hash:  row.get(3)?,
              this_hash:  row.get(4)?,
              created_at: row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAudit::into_entry).collect()
  }

  async fn verify_audit_chain(&self) -> Result<usize> {
    let entries = self.audit_entries().await?;
    let verified = verify_chain(&entries, None)?;
    tracing::debug!(verified, "audit chain verified");
    Ok(verified)
  }
}

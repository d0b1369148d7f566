//! SQL schema for the provenant SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
///
/// The literal `'9999-12-31T00:00:00.000000Z'` is the encoded open sentinel
/// ([`crate::encode::OPEN_SENTINEL`]).
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Bitemporal canonical facts. A row is inserted open and closed at most once
-- (tx_to set); closed rows are never modified again.
CREATE TABLE IF NOT EXISTS canonical (
    row_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,   -- JSON
    bundle_hash TEXT NOT NULL,
    version     TEXT NOT NULL,
    valid_from  TEXT NOT NULL,   -- fixed-width RFC 3339 UTC, microseconds
    valid_to    TEXT NOT NULL,
    tx_from     TEXT NOT NULL,
    tx_to       TEXT NOT NULL,
    CHECK (valid_from < valid_to),
    CHECK (tx_from <= tx_to)
);

-- At most one open row per key.
CREATE UNIQUE INDEX IF NOT EXISTS canonical_open_idx
    ON canonical(key) WHERE tx_to = '9999-12-31T00:00:00.000000Z';
CREATE INDEX IF NOT EXISTS canonical_key_tx_idx ON canonical(key, tx_from);

CREATE TRIGGER IF NOT EXISTS canonical_closed_immutable
BEFORE UPDATE ON canonical
WHEN OLD.tx_to != '9999-12-31T00:00:00.000000Z'
BEGIN
    SELECT RAISE(ABORT, 'closed canonical rows are immutable');
END;

CREATE TRIGGER IF NOT EXISTS canonical_no_delete
BEFORE DELETE ON canonical
BEGIN
    SELECT RAISE(ABORT, 'canonical history is append-only');
END;

-- Capsules are write-once: INSERT OR IGNORE, never UPDATE or DELETE.
CREATE TABLE IF NOT EXISTS capsules (
    qid         TEXT PRIMARY KEY,
    capsule     TEXT NOT NULL,   -- JSON
    recorded_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS capsules_no_update
BEFORE UPDATE ON capsules
BEGIN
    SELECT RAISE(ABORT, 'capsules are write-once');
END;

CREATE TRIGGER IF NOT EXISTS capsules_no_delete
BEFORE DELETE ON capsules
BEGIN
    SELECT RAISE(ABORT, 'capsules are write-once');
END;

-- Hash-chained audit log.
CREATE TABLE IF NOT EXISTS audit_log (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    kind       TEXT NOT NULL,
    details    TEXT NOT NULL,    -- canonical JSON, exactly as hashed
    prev_hash  TEXT,             -- NULL only for the genesis entry
    this_hash  TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL     -- exactly as hashed
);

-- No two entries may share a predecessor: the chain cannot fork.
CREATE UNIQUE INDEX IF NOT EXISTS audit_prev_idx ON audit_log(IFNULL(prev_hash, ''));

CREATE TRIGGER IF NOT EXISTS audit_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit log is append-only');
END;

PRAGMA user_version = 1;
";

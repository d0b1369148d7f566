//! Hashing and canonical serialisation shared by capsules and the audit chain.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Result;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
  hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Compact JSON with object keys in lexicographic order, at every depth.
///
/// Relies on `serde_json::Map` being `BTreeMap`-backed, i.e. the
/// `preserve_order` feature must stay disabled for this workspace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  let value = serde_json::to_value(value)?;
  Ok(value.to_string())
}

//! Error type for `provenant-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] provenant_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("valid_to must be after valid_from for key {key:?}")]
  InvalidValidRange { key: String },

  /// An explicit `prev_hash` did not match the chain tail.
  #[error("audit append would fork the chain: tail is {expected:?}, caller supplied {provided}")]
  ChainFork {
    expected: Option<String>,
    provided: String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

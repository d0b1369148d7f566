//! SQLite backend for the provenant store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every call on a [`SqliteStore`] (and
//! its clones) is executed in order on that one connection, and write paths
//! additionally take an `IMMEDIATE` transaction, so canonical upserts and
//! audit appends are serialised even across processes sharing the file.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

//! Core types, pure functions, and trait definitions for the provenant
//! answer-provenance pipeline.
//!
//! This crate is deliberately free of database and runtime dependencies.
//! Everything here is either a plain data type, a deterministic function, or
//! the [`store::ProvenanceStore`] abstraction that backends implement.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod canonical;
pub mod capsule;
pub mod confidence;
pub mod digest;
pub mod error;
pub mod fusion;
pub mod policy;
pub mod replay;
pub mod sprt;
pub mod stats;
pub mod store;

pub use error::{Error, Result};

//! Composition layer for the provenant pipeline.
//!
//! Wires a [`ProvenanceStore`](provenant_core::store::ProvenanceStore), a
//! [`Generator`], a policy evaluator, and the shared confidence model into an
//! [`Orchestrator`], and provides the statistical spot-check runner used by
//! the `spotcheck` binary.
//!
//! # Wiring
//!
//! ```rust,ignore
//! let config = PipelineConfig::load(Some(Path::new("provenant.toml")))?;
//! let store = Arc::new(SqliteStore::open(&config.store_path).await?);
//! let policy = select_evaluator(&config.policy).await;
//! let orchestrator = Orchestrator::new(store, generator, policy, &config);
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod spotcheck;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use generator::{Generation, Generator, RetrievedDoc};
pub use model::SharedModel;
pub use orchestrator::{Answer, Orchestrator};
pub use policy::{select_evaluator, PolicyGate};
pub use spotcheck::{run_spot_check, SpotCheckReport};

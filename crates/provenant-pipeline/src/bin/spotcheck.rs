//! `spotcheck`: certify that recorded capsules replay.
//!
//! Opens the configured store, replays a sample of capsules and prints the
//! report as JSON. Exits 0 only when the check passes, so it can gate a
//! deployment:
//!
//! ```text
//! spotcheck --config provenant.toml && deploy
//! ```

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
};

use anyhow::Context as _;
use clap::Parser;
use provenant_core::{sprt::Sprt, store::ProvenanceStore as _};
use provenant_pipeline::{
  PipelineConfig,
  spotcheck::{run_sequential_check, run_spot_check},
};
use provenant_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Replay a sample of provenance capsules")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "provenant.toml")]
  config: PathBuf,

  /// Override the configured store path.
  #[arg(long)]
  store: Option<PathBuf>,

  /// Override the configured sampling seed.
  #[arg(long)]
  seed: Option<u64>,

  /// Use the sequential probability ratio test instead of a fixed sample.
  #[arg(long)]
  sequential: bool,

  /// Also verify the audit chain before sampling.
  #[arg(long)]
  verify_chain: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  // Logs go to stderr; stdout carries the JSON report.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = PipelineConfig::load(Some(cli.config.as_path()))
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = expand_tilde(cli.store.as_deref().unwrap_or(config.store_path.as_path()));
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  if cli.verify_chain {
    let verified = store
      .verify_audit_chain()
      .await
      .context("audit chain verification failed")?;
    tracing::info!(verified, "audit chain intact");
  }

  let seed = cli
    .seed
    .or(config.spotcheck.seed)
    .unwrap_or_else(rand::random);
  let params = config.replay_params();

  let (passed, report) = if cli.sequential {
    let mut sprt = Sprt::new(config.spotcheck.sprt).context("invalid sprt parameters")?;
    if let Some(horizon) = config.spotcheck.sprt_horizon {
      sprt = sprt.with_horizon(horizon);
    }
    let report = run_sequential_check(&store, sprt, &params, seed).await?;
    (report.passed(), serde_json::to_string_pretty(&report)?)
  } else {
    let report = run_spot_check(&store, &config.spotcheck.criteria(), &params, seed).await?;
    (report.passed(), serde_json::to_string_pretty(&report)?)
  };

  println!("{report}");
  Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/") {
    if let Ok(home) = std::env::var("HOME") {
      return PathBuf::from(home).join(rest);
    }
  }
  path.to_path_buf()
}

//! [`SharedModel`], the confidence model shared across tasks.

use std::sync::Arc;

use tokio::sync::RwLock;

use provenant_core::confidence::{ConfidenceModel, Features, ModelParams};

/// Readers score concurrently; updates take the write lock, so there is only
/// ever one writer and the `β_core` floor holds after every update.
///
/// Cloning is cheap and every clone sees the same model.
#[derive(Debug, Clone, Default)]
pub struct SharedModel {
  inner: Arc<RwLock<ConfidenceModel>>,
}

impl SharedModel {
  pub fn new(model: ConfidenceModel) -> Self { Self { inner: Arc::new(RwLock::new(model)) } }

  pub async fn prob(&self, x: &Features) -> f64 { self.inner.read().await.prob(x) }

  /// One gradient step against label `y`. Returns the updated coefficients.
  pub async fn update(&self, x: &Features, y: bool) -> ModelParams {
    let mut model = self.inner.write().await;
    model.update(x, y);
    tracing::debug!(beta_core = model.params().beta_core, label = y, "confidence model updated");
    model.params()
  }

  pub async fn snapshot(&self) -> ConfidenceModel { self.inner.read().await.clone() }
}

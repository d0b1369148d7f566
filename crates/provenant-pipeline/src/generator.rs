//! The generator seam: whatever model produces candidate answers.
//!
//! The pipeline treats generation as opaque. A generator returns an answer
//! and the documents it retrieved, each with the evidence signals fusion and
//! the confidence model consume.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use provenant_core::{capsule::RagDoc, fusion::Candidate};

/// A retrieved document together with the value it supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
  pub doc:        String,
  pub ver:        String,
  pub value:      Value,
  pub similarity: f64,
  pub recency:    f64,
  pub provenance: f64,
  pub age_days:   f64,
}

impl RetrievedDoc {
  pub fn candidate(&self) -> Candidate {
    Candidate {
      value:      self.value.clone(),
      similarity: self.similarity,
      recency:    self.recency,
      provenance: self.provenance,
    }
  }

  /// The capsule's view of this document.
  pub fn rag_doc(&self) -> RagDoc {
    RagDoc {
      doc:      self.doc.clone(),
      ver:      self.ver.clone(),
      sim:      self.similarity,
      age_days: self.age_days,
    }
  }
}

/// One sample drawn from a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
  pub answer: Value,
  pub docs:   Vec<RetrievedDoc>,
  pub tokens: u32,
}

pub trait Generator: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Draw one sample. Identical `(query, seed)` pairs should yield identical
  /// generations.
  fn generate<'a>(
    &'a self,
    query: &'a str,
    seed: u64,
  ) -> impl Future<Output = Result<Generation, Self::Error>> + Send + 'a;

  /// The prompt actually sent for `query`; its hash is recorded in capsules.
  fn prompt(&self, query: &str) -> String { query.to_owned() }
}

//! Wald's sequential probability ratio test over Bernoulli trials.
//!
//! H0: success rate `p0`; H1: success rate `p1 > p0`. Accepting means the
//! evidence favours H1 at error rates `α` (false accept) and `β` (false
//! reject).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprtParams {
  pub p0:    f64,
  pub p1:    f64,
  pub alpha: f64,
  pub beta:  f64,
}

impl SprtParams {
  fn validate(&self) -> Result<()> {
    let open_unit = |x: f64| x > 0.0 && x < 1.0;
    if !(open_unit(self.p0) && open_unit(self.p1) && self.p0 < self.p1) {
      return Err(Error::InvalidSprtParams(format!(
        "need 0 < p0 < p1 < 1, got p0={} p1={}",
        self.p0, self.p1
      )));
    }
    if !(open_unit(self.alpha) && open_unit(self.beta)) {
      return Err(Error::InvalidSprtParams(format!(
        "need 0 < alpha, beta < 1, got alpha={} beta={}",
        self.alpha, self.beta
      )));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprtDecision {
  Continue,
  Accept,
  Reject,
}

impl fmt::Display for SprtDecision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Continue => write!(f, "continue"),
      Self::Accept => write!(f, "accept"),
      Self::Reject => write!(f, "reject"),
    }
  }
}

/// Running test state. Once `Accept` or `Reject` is reached it is sticky.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprt {
  params:       SprtParams,
  upper:        f64,
  lower:        f64,
  step_success: f64,
  step_failure: f64,
  llr:          f64,
  observations: u64,
  horizon:      Option<u64>,
  decision:     SprtDecision,
}

impl Sprt {
  pub fn new(params: SprtParams) -> Result<Self> {
    params.validate()?;
    Ok(Self {
      params,
      upper: ((1.0 - params.beta) / params.alpha).ln(),
      lower: (params.beta / (1.0 - params.alpha)).ln(),
      step_success: (params.p1 / params.p0).ln(),
      step_failure: ((1.0 - params.p1) / (1.0 - params.p0)).ln(),
      llr: 0.0,
      observations: 0,
      horizon: None,
      decision: SprtDecision::Continue,
    })
  }

  /// Force a decision after `max_observations`: if neither boundary has been
  /// crossed by then, accept when `llr ≥ 0`, otherwise reject.
  pub fn with_horizon(mut self, max_observations: u64) -> Self {
    self.horizon = Some(max_observations);
    self
  }

  pub fn params(&self) -> SprtParams { self.params }

  /// `(A, B)`: accept at `llr ≥ A`, reject at `llr ≤ B`.
  pub fn boundaries(&self) -> (f64, f64) { (self.upper, self.lower) }

  pub fn llr(&self) -> f64 { self.llr }

  pub fn observations(&self) -> u64 { self.observations }

  pub fn decision(&self) -> SprtDecision { self.decision }

  pub fn observe(&mut self, success: bool) -> SprtDecision {
    if self.decision != SprtDecision::Continue {
      return self.decision;
    }
    self.llr += if success { self.step_success } else { self.step_failure };
    self.observations += 1;

    self.decision = if self.llr >= self.upper {
      SprtDecision::Accept
    } else if self.llr <= self.lower {
      SprtDecision::Reject
    } else if self.horizon.is_some_and(|h| self.observations >= h) {
      if self.llr >= 0.0 { SprtDecision::Accept } else { SprtDecision::Reject }
    } else {
      SprtDecision::Continue
    };
    self.decision
  }

  /// Feed trials until a terminal decision or the iterator runs dry.
  pub fn observe_all(&mut self, trials: impl IntoIterator<Item = bool>) -> SprtDecision {
    for success in trials {
      if self.observe(success) != SprtDecision::Continue {
        break;
      }
    }
    self.decision
  }
}

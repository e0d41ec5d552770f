//! Lag-shift ensemble Kalman smoothers over a sliding data-assimilation
//! window (DAW).
//!
//! The window covers `lag` consecutive observation times and advances by
//! `shift` per cycle. When `spin` is set the whole window counts as newly
//! observed (warm-up); otherwise only the trailing `shift` observations
//! are new. Under multiple data assimilation (MDA) every window position
//! is revisited with tempered observation covariances; under single data
//! assimilation the non-classic drivers touch only the new observations.

use crate::obs::ObsOperator;
use crate::transform::TransformOpts;
use da_core::{Error, Result, Stepper};
use ndarray::{Array1, Array3, ArrayView2, ArrayViewMut2, Axis};

mod classic;
mod gauss_newton;
mod single_iteration;

pub use classic::ls_smoother_classic;
pub use gauss_newton::ls_smoother_gauss_newton;
pub use single_iteration::ls_smoother_single_iteration;

/// Per-cycle smoother configuration.
pub struct SmootherCtx<'a, S: Stepper + ?Sized> {
  pub stepper: &'a S,
  pub f_steps: usize,
  pub obs_op: &'a ObsOperator,
  pub state_dim: usize,
  pub state_infl: f64,
  pub param_infl: f64,
  pub param_wlk: f64,
  pub opts: TransformOpts,
  /// window stride; the classic driver reads it from the observation block
  pub shift: usize,
  pub spin: bool,
  pub mda: bool,
  /// rebalancing weights, one per window position (MDA stage 0)
  pub reb_weights: Option<Array1<f64>>,
  /// tempering weights, one per window position (MDA stage 1)
  pub obs_weights: Option<Array1<f64>>,
  /// Gauss-Newton outer-iteration cap
  pub max_iter: usize,
}

impl<'a, S: Stepper + ?Sized> SmootherCtx<'a, S> {
  pub(crate) fn validate_mda(&self, lag: usize) -> Result<()> {
    if !self.mda {
      return Ok(());
    }
    if self.shift == 0 || lag % self.shift != 0 {
      return Err(Error::LagShiftMismatch { lag, shift: self.shift });
    }
    for weights in [&self.reb_weights, &self.obs_weights] {
      match weights {
        Some(w) if w.len() == lag
                   && w.iter().all(|v| v.is_finite() && *v > 0.0) => {}
        _ => return Err(Error::BadMdaWeights),
      }
    }
    Ok(())
  }
}

/// Forecast, filtered, and re-analyzed posterior stacks of one cycle, plus
/// the accumulated kernel iteration count.
pub struct SmootherOutput {
  pub fore: Array3<f64>,
  pub filt: Array3<f64>,
  pub post: Array3<f64>,
  pub iterations: usize,
}

/// Fixed-capacity ring of ensemble snapshots, ordered oldest to newest by
/// an index offset rather than by rotation of the storage.
pub struct PosteriorRing {
  data: Array3<f64>,
  offset: usize,
  len: usize,
}

impl PosteriorRing {
  pub fn new(sys_dim: usize, n_ens: usize, capacity: usize)
             -> PosteriorRing {
    PosteriorRing {
      data: Array3::zeros((sys_dim, n_ens, capacity)),
      offset: 0,
      len: 0,
    }
  }

  pub fn capacity(&self) -> usize { self.data.len_of(Axis(2)) }

  pub fn len(&self) -> usize { self.len }

  pub fn is_empty(&self) -> bool { self.len == 0 }

  fn slot(&self, k: usize) -> usize {
    (self.offset + k) % self.capacity()
  }

  /// Append a snapshot at the newest position. The ring must not be full.
  pub fn push(&mut self, ens: ArrayView2<f64>) {
    assert!(self.len < self.capacity(), "posterior ring overflow");
    let slot = self.slot(self.len);
    self.data.index_axis_mut(Axis(2), slot).assign(&ens);
    self.len += 1;
  }

  /// View of the `k`-th oldest snapshot.
  pub fn get(&self, k: usize) -> ArrayView2<f64> {
    debug_assert!(k < self.len);
    self.data.index_axis(Axis(2), self.slot(k))
  }

  pub fn get_mut(&mut self, k: usize) -> ArrayViewMut2<f64> {
    debug_assert!(k < self.len);
    let slot = self.slot(k);
    self.data.index_axis_mut(Axis(2), slot)
  }

  /// Detach the `k` oldest snapshots, oldest first.
  pub fn pop_front(&mut self, k: usize) -> Array3<f64> {
    debug_assert!(k <= self.len);
    let (rows, cols, _) = self.data.dim();
    let mut out = Array3::zeros((rows, cols, k));
    for i in 0..k {
      out.index_axis_mut(Axis(2), i).assign(&self.get(i));
    }
    self.offset = self.slot(k);
    self.len -= k;
    out
  }
}

/// Uniform MDA tempering weights: each observation is visited `lag /
/// shift` times over its window lifetime, so a per-visit weight of
/// `lag / shift` spreads exactly one unit of information across the
/// visits.
pub fn mda_weights(lag: usize, shift: usize) -> Result<Array1<f64>> {
  if shift == 0 || lag % shift != 0 {
    return Err(Error::LagShiftMismatch { lag, shift });
  }
  Ok(Array1::from_elem(lag, (lag / shift) as f64))
}

/// Rebalancing weights completing each position's partially assimilated
/// information in a single pass: position `l` (oldest first) has
/// `floor((lag - 1 - l) / shift)` completed visits, so its remaining
/// fraction is rebalanced by `lag / (lag - completed * shift)`.
pub fn reb_weights(lag: usize, shift: usize) -> Result<Array1<f64>> {
  if shift == 0 || lag % shift != 0 {
    return Err(Error::LagShiftMismatch { lag, shift });
  }
  let mut weights = Array1::<f64>::zeros(lag);
  for l in 0..lag {
    let completed = (lag - 1 - l) / shift;
    weights[l] = lag as f64 / (lag - completed * shift) as f64;
  }
  Ok(weights)
}

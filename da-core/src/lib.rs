//! Shared seams between the dynamical models, the integrators, and the
//! ensemble analysis drivers.

use ndarray::{ArrayView1, ArrayViewMut1};
use rand::RngCore;

pub mod error;

pub use error::{Error, Result};

/// Right-hand side of a dynamical model, evaluated one state column at a
/// time.
pub trait Dynamics: Send + Sync {
  /// Dimension of the dynamical state (excluding appended parameters).
  fn state_dim(&self) -> usize;

  /// Number of scalar parameters a driver may append to the state vector.
  fn param_dim(&self) -> usize { 0 }

  /// Evaluate `dx/dt` at `(t, x)` into `out`.
  ///
  /// When `params` is nonempty it overrides the model's built-in parameter
  /// values; drivers performing joint state-parameter estimation slice the
  /// trailing rows of each ensemble column into it.
  fn dx_dt(&self, t: f64, x: ArrayView1<f64>, params: ArrayView1<f64>,
           out: ArrayViewMut1<f64>);

  /// Projection applied after every integrator step. The default is the
  /// identity; circle-valued models wrap their phase rows here.
  fn post_step(&self, _x: ArrayViewMut1<f64>) {}
}

/// One-step integrator over a single ensemble column.
///
/// `step` advances `x` in place from `t` to `t + h`. Stochastic steppers
/// draw their noise from `rng` so a caller owning the generator gets a
/// reproducible path; deterministic steppers never touch it.
pub trait Stepper: Send + Sync {
  fn h(&self) -> f64;

  fn step(&self, t: f64, x: ArrayViewMut1<f64>, params: ArrayView1<f64>,
          rng: &mut dyn RngCore);
}

impl<S: Stepper + ?Sized> Stepper for &S {
  fn h(&self) -> f64 { (**self).h() }

  fn step(&self, t: f64, x: ArrayViewMut1<f64>, params: ArrayView1<f64>,
          rng: &mut dyn RngCore) {
    (**self).step(t, x, params, rng)
  }
}

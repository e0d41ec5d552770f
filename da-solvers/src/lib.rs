//! One-step integrators for the twin-experiment drivers.
//!
//! Every stepper advances a single state column in place by a fixed step
//! `h`, per the [`Stepper`] contract. Deterministic schemes ignore the
//! caller's RNG; the Euler--Maruyama scheme consumes one standard-normal
//! draw per state component per step, scaled by `sqrt(h)`, so paths are
//! reproducible from the caller's seed.

use da_core::{Dynamics, Stepper};
use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

/// Classical fourth-order Runge--Kutta.
pub struct Rk4<D> {
  model: D,
  h: f64,
}

impl<D: Dynamics> Rk4<D> {
  pub fn new(model: D, h: f64) -> Rk4<D> {
    Rk4 { model, h }
  }

  pub fn model(&self) -> &D { &self.model }
}

impl<D: Dynamics> Stepper for Rk4<D> {
  fn h(&self) -> f64 { self.h }

  fn step(&self, t: f64, mut x: ArrayViewMut1<f64>, params: ArrayView1<f64>,
          _rng: &mut dyn RngCore) {
    let n = x.len();
    let h = self.h;

    let mut k1 = Array1::<f64>::zeros(n);
    let mut k2 = Array1::<f64>::zeros(n);
    let mut k3 = Array1::<f64>::zeros(n);
    let mut k4 = Array1::<f64>::zeros(n);

    self.model.dx_dt(t, x.view(), params, k1.view_mut());

    let stage = &x + &(&k1 * (h / 2.0));
    self.model.dx_dt(t + h / 2.0, stage.view(), params, k2.view_mut());

    let stage = &x + &(&k2 * (h / 2.0));
    self.model.dx_dt(t + h / 2.0, stage.view(), params, k3.view_mut());

    let stage = &x + &(&k3 * h);
    self.model.dx_dt(t + h, stage.view(), params, k4.view_mut());

    k2 *= 2.0;
    k3 *= 2.0;
    k1 += &k2;
    k1 += &k3;
    k1 += &k4;
    x.scaled_add(h / 6.0, &k1);

    self.model.post_step(x);
  }
}

/// Euler--Maruyama for additive scalar diffusion `dx = f(x) dt + s dW`.
///
/// With `diffusion = 0` this degenerates to the forward Euler scheme and
/// leaves the RNG untouched.
pub struct EulerMaruyama<D> {
  model: D,
  h: f64,
  diffusion: f64,
}

impl<D: Dynamics> EulerMaruyama<D> {
  pub fn new(model: D, h: f64, diffusion: f64) -> EulerMaruyama<D> {
    EulerMaruyama { model, h, diffusion }
  }

  pub fn model(&self) -> &D { &self.model }
}

impl<D: Dynamics> Stepper for EulerMaruyama<D> {
  fn h(&self) -> f64 { self.h }

  fn step(&self, t: f64, mut x: ArrayViewMut1<f64>, params: ArrayView1<f64>,
          rng: &mut dyn RngCore) {
    let n = x.len();
    let h = self.h;

    let mut dx = Array1::<f64>::zeros(n);
    self.model.dx_dt(t, x.view(), params, dx.view_mut());
    x.scaled_add(h, &dx);

    if self.diffusion != 0.0 {
      let scale = self.diffusion * h.sqrt();
      for xi in x.iter_mut() {
        let w: f64 = StandardNormal.sample(&mut *rng);
        *xi += scale * w;
      }
    }

    self.model.post_step(x);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::{array, ArrayView1, ArrayViewMut1};
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  /// dx/dt = -x, exact solution x0 * exp(-t).
  struct Decay;

  impl Dynamics for Decay {
    fn state_dim(&self) -> usize { 1 }

    fn dx_dt(&self, _t: f64, x: ArrayView1<f64>, _params: ArrayView1<f64>,
             mut out: ArrayViewMut1<f64>) {
      out[0] = -x[0];
    }
  }

  #[test]
  fn rk4_matches_exponential_decay() {
    let stepper = Rk4::new(Decay, 0.01);
    let mut rng = StdRng::seed_from_u64(0);
    let mut x = array![1.0];
    let params = Array1::<f64>::zeros(0);

    for k in 0..100 {
      stepper.step(k as f64 * 0.01, x.view_mut(), params.view(), &mut rng);
    }
    assert_abs_diff_eq!(x[0], (-1.0f64).exp(), epsilon = 1e-9);
  }

  #[test]
  fn euler_maruyama_without_diffusion_is_euler() {
    let stepper = EulerMaruyama::new(Decay, 0.1, 0.0);
    let mut rng = StdRng::seed_from_u64(7);
    let mut x = array![2.0];
    let params = Array1::<f64>::zeros(0);

    stepper.step(0.0, x.view_mut(), params.view(), &mut rng);
    assert_abs_diff_eq!(x[0], 2.0 - 0.1 * 2.0, epsilon = 1e-14);
  }

  #[test]
  fn euler_maruyama_paths_are_reproducible() {
    let stepper = EulerMaruyama::new(Decay, 0.05, 0.5);
    let params = Array1::<f64>::zeros(0);

    let mut run = |seed: u64| {
      let mut rng = StdRng::seed_from_u64(seed);
      let mut x = array![1.0];
      for k in 0..50 {
        stepper.step(k as f64 * 0.05, x.view_mut(), params.view(), &mut rng);
      }
      x[0]
    };

    assert_eq!(run(3), run(3));
    assert!(run(3) != run(4));
  }
}

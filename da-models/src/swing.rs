//! Effective-network swing equations for a synchronous generator network,
//! the reduced form used for the 39-bus New England test case:
//!
//!   d delta_i / dt = omega_i
//!   m_i d omega_i / dt = a_i - d_i omega_i
//!                        - sum_j k_ij sin(delta_i - delta_j - gamma_ij)
//!
//! State layout: `[delta_1 .. delta_n, omega_1 .. omega_n]`. Phase rows are
//! circle-valued; `post_step` wraps them back into `[0, 2 pi)` after every
//! integrator step.

use da_core::Dynamics;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct SwingNetwork {
  /// effective net power injections
  a: Array1<f64>,
  /// damping coefficients
  d: Array1<f64>,
  /// inertia constants
  m: Array1<f64>,
  /// coupling strengths k_ij
  k: Array2<f64>,
  /// phase shifts gamma_ij
  gamma: Array2<f64>,
}

impl SwingNetwork {
  pub fn new(a: Array1<f64>, d: Array1<f64>, m: Array1<f64>,
             k: Array2<f64>, gamma: Array2<f64>) -> SwingNetwork {
    let n = a.len();
    assert_eq!(d.len(), n);
    assert_eq!(m.len(), n);
    assert_eq!(k.dim(), (n, n));
    assert_eq!(gamma.dim(), (n, n));
    SwingNetwork { a, d, m, k, gamma }
  }

  pub fn generators(&self) -> usize { self.a.len() }
}

impl Dynamics for SwingNetwork {
  fn state_dim(&self) -> usize { 2 * self.a.len() }

  fn dx_dt(&self, _t: f64, x: ArrayView1<f64>, _params: ArrayView1<f64>,
           mut out: ArrayViewMut1<f64>) {
    let n = self.a.len();
    let (delta, omega) = x.split_at(ndarray::Axis(0), n);

    for i in 0..n {
      out[i] = omega[i];
    }
    for i in 0..n {
      let mut coupling = 0.0;
      for j in 0..n {
        if i == j { continue; }
        coupling += self.k[[i, j]]
          * (delta[i] - delta[j] - self.gamma[[i, j]]).sin();
      }
      out[n + i] = (self.a[i] - self.d[i] * omega[i] - coupling) / self.m[i];
    }
  }

  fn post_step(&self, mut x: ArrayViewMut1<f64>) {
    let n = self.a.len();
    for i in 0..n {
      x[i] = x[i].rem_euclid(2.0 * PI);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use da_core::Stepper;
  use da_solvers::Rk4;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn toy() -> SwingNetwork {
    let n = 3;
    let k = Array2::from_elem((n, n), 1.2);
    let gamma = Array2::<f64>::zeros((n, n));
    SwingNetwork::new(array![0.1, -0.05, -0.05],
                      array![0.2, 0.2, 0.2],
                      array![1.0, 1.0, 1.0],
                      k, gamma)
  }

  #[test]
  fn synchronized_rest_state_stays_at_rest() {
    // equal phases, zero rates, zero injections: pure damping fixed point
    let mut out = Array1::<f64>::zeros(6);
    let x = array![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
    let mut zero_a = toy();
    zero_a.a.fill(0.0);
    zero_a.dx_dt(0.0, x.view(), Array1::<f64>::zeros(0).view(),
                 out.view_mut());
    for v in out.iter() {
      assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-14);
    }
  }

  #[test]
  fn phases_stay_wrapped_under_integration() {
    let net = toy();
    let stepper = Rk4::new(net, 0.01);
    let mut rng = StdRng::seed_from_u64(1);
    let mut x = array![6.2, 0.1, 3.0, 1.5, -0.4, 0.2];
    let params = Array1::<f64>::zeros(0);
    for k in 0..500 {
      stepper.step(k as f64 * 0.01, x.view_mut(), params.view(), &mut rng);
    }
    for i in 0..3 {
      assert!(x[i] >= 0.0 && x[i] < 2.0 * PI);
      assert!(x[i].is_finite());
    }
  }
}

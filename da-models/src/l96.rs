//! The Lorenz-96 model
//!
//!   dx_i/dt = (x_{i+1} - x_{i-2}) x_{i-1} - x_i + F
//!
//! on a cyclic lattice of `dim >= 4` sites, with the forcing `F` exposed as
//! the single estimable parameter.

use da_core::{Dynamics, Stepper};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lorenz96 {
  dim: usize,
  forcing: f64,
}

impl Lorenz96 {
  pub fn new(dim: usize, forcing: f64) -> Lorenz96 {
    assert!(dim >= 4, "lorenz-96 needs at least 4 sites");
    Lorenz96 { dim, forcing }
  }

  /// The standard chaotic configuration, F = 8.
  pub fn standard(dim: usize) -> Lorenz96 {
    Lorenz96::new(dim, 8.0)
  }

  pub fn forcing(&self) -> f64 { self.forcing }

  /// Jacobian of the right-hand side at `x`. Each row has four nonzero
  /// entries from the cyclic advection stencil.
  pub fn jacobian(&self, x: ArrayView1<f64>) -> Array2<f64> {
    let n = self.dim;
    let mut jac = Array2::<f64>::zeros((n, n));
    for i in 0..n {
      let ip1 = (i + 1) % n;
      let im1 = (i + n - 1) % n;
      let im2 = (i + n - 2) % n;
      jac[[i, ip1]] = x[im1];
      jac[[i, im1]] = x[ip1] - x[im2];
      jac[[i, im2]] = -x[im1];
      jac[[i, i]] += -1.0;
    }
    jac
  }
}

impl Dynamics for Lorenz96 {
  fn state_dim(&self) -> usize { self.dim }

  fn param_dim(&self) -> usize { 1 }

  fn dx_dt(&self, _t: f64, x: ArrayView1<f64>, params: ArrayView1<f64>,
           mut out: ArrayViewMut1<f64>) {
    let n = self.dim;
    let f = if params.is_empty() { self.forcing } else { params[0] };
    for i in 0..n {
      let ip1 = (i + 1) % n;
      let im1 = (i + n - 1) % n;
      let im2 = (i + n - 2) % n;
      out[i] = (x[ip1] - x[im2]) * x[im1] - x[i] + f;
    }
  }
}

/// Second-order Taylor stepper for the stochastic Lorenz-96 model
///
///   dx = f(x) dt + s dW
///
/// with scalar additive diffusion `s` and independent Wiener components.
/// The deterministic core is the order-2 Taylor step `x + h f + h^2/2 J f`;
/// the stochastic corrections carry the strong order-1.5 iterated integral
///
///   int_0^h W_s ds = h^{3/2} (xi / 2 + eta / (2 sqrt(3)))
///
/// pushed through the Jacobian, which is the highest-order term the
/// additive-noise expansion admits without mixed Levy areas.
pub struct L96sTaylor {
  model: Lorenz96,
  h: f64,
  diffusion: f64,
}

impl L96sTaylor {
  pub fn new(model: Lorenz96, h: f64, diffusion: f64) -> L96sTaylor {
    L96sTaylor { model, h, diffusion }
  }

  pub fn model(&self) -> &Lorenz96 { &self.model }
}

impl Stepper for L96sTaylor {
  fn h(&self) -> f64 { self.h }

  fn step(&self, t: f64, mut x: ArrayViewMut1<f64>, params: ArrayView1<f64>,
          rng: &mut dyn RngCore) {
    let n = x.len();
    let h = self.h;
    let s = self.diffusion;

    let mut f = Array1::<f64>::zeros(n);
    self.model.dx_dt(t, x.view(), params, f.view_mut());
    let jac = self.model.jacobian(x.view());
    let jf = jac.dot(&f);

    // deterministic order-2 core
    x.scaled_add(h, &f);
    x.scaled_add(h * h / 2.0, &jf);

    if s != 0.0 {
      // Delta W and int W ds, jointly Gaussian with the exact covariance
      let sqrt_h = h.sqrt();
      let mut dw = Array1::<f64>::zeros(n);
      let mut dz = Array1::<f64>::zeros(n);
      for i in 0..n {
        let xi: f64 = StandardNormal.sample(&mut *rng);
        let eta: f64 = StandardNormal.sample(&mut *rng);
        dw[i] = sqrt_h * xi;
        dz[i] = h * sqrt_h * (xi / 2.0 + eta / (2.0 * 3.0f64.sqrt()));
      }
      let jdz = jac.dot(&dz);
      x.scaled_add(s, &dw);
      x.scaled_add(s, &jdz);
    }
  }
}

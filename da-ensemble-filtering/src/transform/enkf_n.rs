//! Finite-size ensemble Kalman filter (EnKF-N).
//!
//! The observation operator is linearized once through the ensemble's
//! observed anomalies; the finite-size cost then self-tunes inflation. The
//! dual form substitutes the SVD of `S` into the cost and minimizes a
//! scalar dual over the inflation variable `zeta` with Brent; the primal
//! form runs Newton (optionally with strong-Wolfe line search) in the
//! weight vector directly.

use crate::analysis::FiniteSizeForm;
use crate::cov::ObsCov;
use crate::linalg;
use crate::obs::ObsOperator;
use crate::optimize::{self, CostModel, WolfeParams};
use crate::sampling;
use crate::transform::{observed_mean_anomalies, Transform, TransformOpts,
                       TransformResult};
use da_core::{Error, Result};
use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;

const ZETA_FLOOR: f64 = 1e-6;
const BRENT_TOL: f64 = 1e-10;
const BRENT_MAX_ITER: usize = 200;

pub fn transform_enkf_n<R: Rng + ?Sized>(ens: ArrayView2<f64>,
                                         y: ArrayView1<f64>, cov: &ObsCov,
                                         obs_op: &ObsOperator,
                                         form: FiniteSizeForm,
                                         opts: &TransformOpts, rng: &mut R)
                                         -> Result<TransformResult> {
  let n_ens = ens.ncols();
  let n_eff = n_ens as f64 + 1.0;
  let eps_n = 1.0 + (n_ens as f64).recip();

  let (y_mean, y_anom) = observed_mean_anomalies(obs_op, ens);
  let s = cov.inv_sqrt_mul(y_anom.view())?;
  let delta = cov.inv_sqrt_vec((&y - &y_mean).view())?;

  let (w, zeta, iterations) = match form {
    FiniteSizeForm::Dual => dual_weights(&s, &delta, n_eff, eps_n)?,
    FiniteSizeForm::Primal { line_search } => {
      primal_weights(&s, &delta, n_eff, eps_n, line_search, opts)?
    }
  };

  // T = (zeta I + S^T S)^{-1/2} through the SVD of S: row-space directions
  // scale by 1/sqrt(zeta + sigma^2), the null space by 1/sqrt(zeta)
  let (_, sigma, v_t) = linalg::svd(s.view())?;
  let mut t = Array2::<f64>::eye(n_ens);
  t -= &v_t.t().dot(&v_t);
  t /= zeta.sqrt();
  let mut scaled_v = v_t.clone();
  for (k, mut row) in scaled_v.outer_iter_mut().enumerate() {
    let coeff = (zeta + sigma[k] * sigma[k]).sqrt().recip();
    row.mapv_inplace(|v| v * coeff);
  }
  t += &v_t.t().dot(&scaled_v);
  let t = linalg::symmetrize(&t);

  if t.iter().any(|v| !v.is_finite()) || w.iter().any(|v| !v.is_finite()) {
    return Err(Error::NonFinite("enkf-n transform"));
  }

  let u = sampling::mean_preserving_orthogonal(rng, n_ens);
  Ok(TransformResult {
    transform: Transform::Triple { t, w, u },
    iterations,
  })
}

/// Brent on the scalar dual cost over `zeta in [floor, n_eff / eps_n]`.
fn dual_weights(s: &Array2<f64>, delta: &Array1<f64>, n_eff: f64,
                eps_n: f64) -> Result<(Array1<f64>, f64, usize)> {
  let (u, sigma, v_t) = linalg::svd(s.view())?;
  let ud = u.t().dot(delta);
  let delta_norm2 = delta.dot(delta);

  let dual = |zeta: f64| -> f64 {
    let mut data = delta_norm2;
    for k in 0..sigma.len() {
      let s2 = sigma[k] * sigma[k];
      data -= ud[k] * ud[k] * s2 / (zeta + s2);
    }
    data + eps_n * zeta + n_eff * (n_eff / zeta).ln() - n_eff
  };

  let upper = n_eff / eps_n;
  let (zeta, _, iters) =
    optimize::brent_min(dual, ZETA_FLOOR, upper, BRENT_TOL, BRENT_MAX_ITER)?;

  // w = V diag(sigma / (zeta + sigma^2)) U^T delta
  let mut coeffs = ud.clone();
  for k in 0..sigma.len() {
    coeffs[k] *= sigma[k] / (zeta + sigma[k] * sigma[k]);
  }
  Ok((v_t.t().dot(&coeffs), zeta, iters))
}

struct PrimalCost<'a> {
  s: &'a Array2<f64>,
  delta: &'a Array1<f64>,
  n_eff: f64,
  eps_n: f64,
}

impl CostModel for PrimalCost<'_> {
  fn eval(&mut self, w: ArrayView1<f64>, grad: &mut Array1<f64>,
          hess: &mut Array2<f64>) -> Result<f64> {
    let n_ens = w.len();
    let zeta = (self.eps_n + w.dot(&w)).recip();

    let mut resid = self.delta.clone();
    resid -= &self.s.dot(&w);

    let mut g = &w * (self.n_eff * zeta);
    g -= &self.s.t().dot(&resid);
    grad.assign(&g);

    // exact curvature of the finite-size prior plus the data Gram term
    let mut h = self.s.t().dot(self.s);
    let rank1 = 2.0 * self.n_eff * zeta * zeta;
    for i in 0..n_ens {
      h[[i, i]] += self.n_eff * zeta;
      for k in 0..n_ens {
        h[[i, k]] -= rank1 * w[i] * w[k];
      }
    }
    hess.assign(&h);

    Ok(0.5 * (self.n_eff * (self.eps_n + w.dot(&w)).ln()
              + resid.dot(&resid)))
  }
}

fn primal_weights(s: &Array2<f64>, delta: &Array1<f64>, n_eff: f64,
                  eps_n: f64, line_search: bool, opts: &TransformOpts)
                  -> Result<(Array1<f64>, f64, usize)> {
  let n_ens = s.ncols();
  let mut model = PrimalCost { s, delta, n_eff, eps_n };
  let mut w = Array1::<f64>::zeros(n_ens);
  let mut grad = Array1::<f64>::zeros(n_ens);
  let mut hess = Array2::<f64>::zeros((n_ens, n_ens));
  let mut iterations = 0;

  for j in 0..opts.j_max {
    model.eval(w.view(), &mut grad, &mut hess)?;
    let direction = newton_direction(&hess, &grad, s, n_eff, eps_n, &w)?;

    let step_norm;
    if line_search {
      if grad.dot(&direction) >= -1e-14 {
        // stationary point: no descent left to search along
        break;
      }
      let alpha = optimize::strong_wolfe(&mut model, w.view(),
                                         direction.view(),
                                         &WolfeParams::default())?;
      w.scaled_add(alpha, &direction);
      step_norm = alpha.abs() * direction.dot(&direction).sqrt();
    } else {
      w += &direction;
      step_norm = direction.dot(&direction).sqrt();
    }
    iterations = j + 1;
    if step_norm < opts.tol {
      break;
    }
  }
  if iterations == opts.j_max {
    warn!("enkf-n primal: iteration cap {} reached", opts.j_max);
  }

  let zeta = n_eff / (eps_n + w.dot(&w));
  Ok((w, zeta, iterations))
}

/// `-H^{-1} g`, falling back to the always-definite Gauss-Newton curvature
/// when the exact finite-size Hessian loses definiteness away from the
/// optimum.
fn newton_direction(hess: &Array2<f64>, grad: &Array1<f64>, s: &Array2<f64>,
                    n_eff: f64, eps_n: f64, w: &Array1<f64>)
                    -> Result<Array1<f64>> {
  match linalg::chol_solve(hess.view(), grad.view()) {
    Ok(mut d) => {
      d.mapv_inplace(|v| -v);
      Ok(d)
    }
    Err(Error::CholeskyFailed) => {
      let n_ens = w.len();
      let zeta = (eps_n + w.dot(w)).recip();
      let mut gn = s.t().dot(s);
      for i in 0..n_ens {
        gn[[i, i]] += n_eff * zeta;
      }
      let mut d = linalg::chol_solve(gn.view(), grad.view())?;
      d.mapv_inplace(|v| -v);
      Ok(d)
    }
    Err(e) => Err(e),
  }
}

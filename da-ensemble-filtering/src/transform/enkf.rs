//! Stochastic (perturbed-observation) ensemble Kalman filter.

use crate::cov::ObsCov;
use crate::linalg;
use crate::obs::ObsOperator;
use crate::sampling;
use crate::transform::Transform;
use da_core::Result;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;

/// Right-transform `Gamma = I + S^T C^{-1} (y 1^T + Xi - Y) / sqrt(n - 1)`
/// with `S` the normalized observed anomalies, `C = S S^T + R`, and `Xi`
/// centered observation perturbations drawn from `N(0, R)`.
pub fn transform_enkf<R: Rng + ?Sized>(ens: ArrayView2<f64>,
                                       y: ArrayView1<f64>, cov: &ObsCov,
                                       obs_op: &ObsOperator, rng: &mut R)
                                       -> Result<Transform> {
  let n_ens = ens.ncols();
  let obs_dim = obs_op.obs_dim();
  let scale = (n_ens as f64 - 1.0).sqrt();

  let perts = sampling::obs_perturbations(rng, cov, obs_dim, n_ens)?;

  let y_ens = obs_op.observe(ens);
  let (_, mut s) = crate::transform::mean_and_anomalies(y_ens.view());
  s /= scale;

  let mut c = s.dot(&s.t());
  c += &cov.matrix(obs_dim);
  let c = linalg::symmetrize(&c);

  // innovations per member: y + xi_j - H(x_j)
  let mut innovations = perts;
  innovations -= &y_ens;
  for mut col in innovations.axis_iter_mut(Axis(1)) {
    col += &y;
  }

  let solved = linalg::chol_solve_multi(c.view(), innovations.view())?;
  let mut gamma = s.t().dot(&solved) / scale;
  gamma += &Array2::eye(n_ens);
  Ok(Transform::RightMultiply(gamma))
}

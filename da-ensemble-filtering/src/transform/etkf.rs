//! Deterministic ensemble transform Kalman filter.

use crate::cov::ObsCov;
use crate::linalg;
use crate::obs::ObsOperator;
use crate::sampling;
use crate::transform::{observed_mean_anomalies, Transform};
use da_core::Result;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

/// Square-root transform from the ensemble-space Hessian
/// `H_w = (n - 1) I + S^T S`: `T = H_w^{-1/2}` and
/// `w = H_w^{-1} S^T delta`, both synthesized from one SVD.
pub fn transform_etkf<R: Rng + ?Sized>(ens: ArrayView2<f64>,
                                       y: ArrayView1<f64>, cov: &ObsCov,
                                       obs_op: &ObsOperator, rng: &mut R)
                                       -> Result<Transform> {
  let n_ens = ens.ncols();

  let (y_mean, y_anom) = observed_mean_anomalies(obs_op, ens);
  let s = cov.inv_sqrt_mul(y_anom.view())?;
  let delta = cov.inv_sqrt_vec((&y - &y_mean).view())?;

  let mut hess = s.t().dot(&s);
  hess += &(Array2::<f64>::eye(n_ens) * (n_ens as f64 - 1.0));
  let hess = linalg::symmetrize(&hess);

  let factors = linalg::sym_factors(hess.view())?;
  let w = factors.inv.dot(&s.t().dot(&delta));
  let u = sampling::mean_preserving_orthogonal(rng, n_ens);

  Ok(Transform::Triple { t: factors.inv_sqrt, w, u })
}

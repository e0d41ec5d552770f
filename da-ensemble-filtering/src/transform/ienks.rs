//! Sequential gradient/Hessian increments for the iterative ensemble
//! Kalman smoother. The Gauss-Newton driver propagates the iterate across
//! the window and accumulates one increment per observation time; the
//! conditioning `T^{-1}` deconditions the observed anomalies back into the
//! optimization coordinates.

use crate::cov::ObsCov;
use crate::obs::ObsOperator;
use crate::transform::observed_mean_anomalies;
use da_core::Result;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Gradient column `S^T delta` and Hessian slab `S^T S` contributed by one
/// observation, with `S = R^{-1/2} (Y - y_mean 1^T) T^{-1}`.
pub fn ienks_increment(ens: ArrayView2<f64>, y: ArrayView1<f64>,
                       cov: &ObsCov, obs_op: &ObsOperator,
                       t_inv: &Array2<f64>)
                       -> Result<(Array1<f64>, Array2<f64>)> {
  let (y_mean, y_anom) = observed_mean_anomalies(obs_op, ens);
  let s = cov.inv_sqrt_mul(y_anom.view())?.dot(t_inv);
  let delta = cov.inv_sqrt_vec((&y - &y_mean).view())?;
  Ok((s.t().dot(&delta), s.t().dot(&s)))
}

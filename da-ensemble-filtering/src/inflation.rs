//! Multiplicative covariance inflation and the parameter random walk.

use ndarray::{Array1, Array2, ArrayViewMut2, Axis};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

fn inflate_rows(mut ens: ArrayViewMut2<f64>, alpha: f64) {
  let n_ens = ens.ncols();
  for mut row in ens.axis_iter_mut(Axis(0)) {
    let mean = row.sum() / n_ens as f64;
    row.mapv_inplace(|v| mean + alpha * (v - mean));
  }
}

/// Inflate the state-row anomalies by `alpha`, leaving the mean and any
/// trailing parameter rows untouched. Exact no-op at `alpha = 1`.
pub fn inflate_state(ens: &mut Array2<f64>, alpha: f64, state_dim: usize) {
  if alpha == 1.0 {
    return;
  }
  inflate_rows(ens.slice_mut(ndarray::s![..state_dim, ..]), alpha);
}

/// Inflate the parameter-row anomalies by `alpha`.
pub fn inflate_param(ens: &mut Array2<f64>, alpha: f64, state_dim: usize) {
  if alpha == 1.0 {
    return;
  }
  inflate_rows(ens.slice_mut(ndarray::s![state_dim.., ..]), alpha);
}

/// Random-walk diffusion of the parameter sub-ensemble. Each parameter row
/// is perturbed by `wlk * |row mean| * N(0, 1)` per member, so the walk
/// scale follows the magnitude of the current estimate.
pub fn param_random_walk<R: Rng + ?Sized>(ens: &mut Array2<f64>, wlk: f64,
                                          state_dim: usize, rng: &mut R) {
  if wlk == 0.0 {
    return;
  }
  let sys_dim = ens.nrows();
  let n_ens = ens.ncols();
  for i in state_dim..sys_dim {
    let mean = ens.row(i).sum() / n_ens as f64;
    let scale = wlk * mean.abs();
    for j in 0..n_ens {
      let xi: f64 = StandardNormal.sample(rng);
      ens[[i, j]] += scale * xi;
    }
  }
}

/// Row means over the ensemble, used by the update and the diagnostics.
pub fn ensemble_mean(ens: &Array2<f64>) -> Array1<f64> {
  ens.sum_axis(Axis(1)) / ens.ncols() as f64
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn unit_inflation_is_bit_identical() {
    let mut ens = array![[1.0, 2.0, 4.0], [0.5, -0.5, 0.25]];
    let orig = ens.clone();
    inflate_state(&mut ens, 1.0, 2);
    inflate_param(&mut ens, 1.0, 1);
    assert_eq!(ens, orig);
  }

  #[test]
  fn inflation_scales_anomalies_and_keeps_the_mean() {
    let mut ens = array![[1.0, 3.0], [10.0, 30.0]];
    inflate_state(&mut ens, 2.0, 1);
    // row 0 inflated about its mean of 2
    assert_abs_diff_eq!(ens[[0, 0]], 0.0, epsilon = 1e-14);
    assert_abs_diff_eq!(ens[[0, 1]], 4.0, epsilon = 1e-14);
    // row 1 is a parameter row here and must be untouched
    assert_abs_diff_eq!(ens[[1, 0]], 10.0, epsilon = 0.0);
    assert_abs_diff_eq!(ens[[1, 1]], 30.0, epsilon = 0.0);
  }

  #[test]
  fn param_walk_only_touches_parameter_rows() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut ens = array![[1.0, 1.0], [8.0, 8.0]];
    param_random_walk(&mut ens, 0.01, 1, &mut rng);
    assert_eq!(ens.row(0), array![1.0, 1.0]);
    assert!(ens[[1, 0]] != 8.0 || ens[[1, 1]] != 8.0);
    // walk scale is proportional to the mean magnitude
    assert_abs_diff_eq!(ens[[1, 0]], 8.0, epsilon = 0.5);
  }
}

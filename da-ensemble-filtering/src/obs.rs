//! Alternating observation operator.
//!
//! Observation of a `p <= state_dim` subset of the state rows, with the
//! retained rows chosen to alternate through the lattice, followed by a
//! componentwise nonlinearity controlled by a scalar `gamma`:
//!
//!   gamma = 1   identity
//!   gamma > 1   x -> (x/2) (1 + |x/10|^(gamma-1))
//!   gamma = 0   x -> 0.05 x^2
//!   gamma < 0   x -> x exp(-gamma x)
//!
//! `gamma` in the open interval (0, 1) is undefined and rejected, as is
//! `p = 0`. The operator is pure and vectorized over ensemble columns.

use da_core::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Row indices (0-based) retained when observing `obs_dim` of `state_dim`
/// components.
pub fn observed_indices(state_dim: usize, obs_dim: usize) -> Result<Vec<usize>> {
  if obs_dim == 0 || obs_dim > state_dim {
    return Err(Error::ObsDimOutOfRange { obs_dim, state_dim });
  }

  if obs_dim == state_dim {
    return Ok((0..state_dim).collect());
  }

  let ratio = obs_dim as f64 / state_dim as f64;
  if ratio > 0.5 {
    // dense head, alternating tail
    let r = state_dim - obs_dim;
    let mut idx: Vec<usize> = (0..state_dim - 2 * r).collect();
    idx.extend((state_dim - 2 * r + 1..state_dim).step_by(2));
    Ok(idx)
  } else {
    // every second row, truncated below half coverage
    Ok((0..state_dim).step_by(2).take(obs_dim).collect())
  }
}

#[derive(Debug, Clone)]
pub struct ObsOperator {
  state_dim: usize,
  obs_dim: usize,
  gamma: f64,
  indices: Vec<usize>,
}

impl ObsOperator {
  pub fn new(state_dim: usize, obs_dim: usize, gamma: f64)
             -> Result<ObsOperator> {
    if gamma > 0.0 && gamma < 1.0 {
      return Err(Error::UndefinedGamma(gamma));
    }
    let indices = observed_indices(state_dim, obs_dim)?;
    Ok(ObsOperator { state_dim, obs_dim, gamma, indices })
  }

  pub fn obs_dim(&self) -> usize { self.obs_dim }

  pub fn gamma(&self) -> f64 { self.gamma }

  fn nonlinearity(&self, x: f64) -> f64 {
    let gamma = self.gamma;
    if gamma == 1.0 {
      x
    } else if gamma > 1.0 {
      (x / 2.0) * (1.0 + (x / 10.0).abs().powf(gamma - 1.0))
    } else if gamma == 0.0 {
      0.05 * x * x
    } else {
      x * (-gamma * x).exp()
    }
  }

  /// Observe a full ensemble. Rows past `state_dim` (parameter samples) are
  /// dropped before the row selection.
  pub fn observe(&self, ens: ArrayView2<f64>) -> Array2<f64> {
    debug_assert!(ens.nrows() >= self.state_dim);
    let n_ens = ens.ncols();
    let mut obs = Array2::<f64>::zeros((self.obs_dim, n_ens));
    for (k, &i) in self.indices.iter().enumerate() {
      for j in 0..n_ens {
        obs[[k, j]] = self.nonlinearity(ens[[i, j]]);
      }
    }
    obs
  }

  /// Observe a single state column (used by the truth-twin generator).
  pub fn observe_state(&self, x: ArrayView1<f64>) -> Array1<f64> {
    let mut obs = Array1::<f64>::zeros(self.obs_dim);
    for (k, &i) in self.indices.iter().enumerate() {
      obs[k] = self.nonlinearity(x[i]);
    }
    obs
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;

  #[test]
  fn index_tables_cover_all_shapes_up_to_40() {
    for state_dim in 1..=40usize {
      for obs_dim in 1..=state_dim {
        let idx = observed_indices(state_dim, obs_dim).unwrap();
        assert_eq!(idx.len(), obs_dim, "d={} p={}", state_dim, obs_dim);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
        assert!(*idx.last().unwrap() < state_dim);
      }
    }
  }

  #[test]
  fn dense_head_alternating_tail_above_half() {
    // 30 of 40: rows 1..20 then 22, 24, .., 40 in 1-based terms
    let idx = observed_indices(40, 30).unwrap();
    let mut expect: Vec<usize> = (0..20).collect();
    expect.extend((21..40).step_by(2));
    assert_eq!(idx, expect);
  }

  #[test]
  fn odd_rows_at_half_and_below() {
    assert_eq!(observed_indices(40, 20).unwrap(),
               (0..40).step_by(2).collect::<Vec<_>>());
    assert_eq!(observed_indices(40, 7).unwrap(),
               vec![0, 2, 4, 6, 8, 10, 12]);
  }

  #[test]
  fn rejects_empty_and_oversized_observations() {
    assert!(observed_indices(40, 0).is_err());
    assert!(observed_indices(10, 11).is_err());
    assert!(ObsOperator::new(40, 40, 0.5).is_err());
  }

  #[test]
  fn identity_observation_returns_state_rows_in_order() {
    let op = ObsOperator::new(4, 4, 1.0).unwrap();
    let ens = Array2::from_shape_fn((6, 3), |(i, j)| (i * 10 + j) as f64);
    let y = op.observe(ens.view());
    assert_eq!(y.dim(), (4, 3));
    for i in 0..4 {
      for j in 0..3 {
        assert_abs_diff_eq!(y[[i, j]], ens[[i, j]], epsilon = 0.0);
      }
    }
  }

  #[test]
  fn nonlinearity_branches() {
    let quad = ObsOperator::new(2, 2, 0.0).unwrap();
    assert_abs_diff_eq!(quad.nonlinearity(3.0), 0.45, epsilon = 1e-12);

    let cubicish = ObsOperator::new(2, 2, 3.0).unwrap();
    assert_abs_diff_eq!(cubicish.nonlinearity(10.0),
                        5.0 * (1.0 + 1.0), epsilon = 1e-12);

    let exp = ObsOperator::new(2, 2, -0.5).unwrap();
    assert_abs_diff_eq!(exp.nonlinearity(2.0), 2.0 * 1.0f64.exp(),
                        epsilon = 1e-12);
  }
}

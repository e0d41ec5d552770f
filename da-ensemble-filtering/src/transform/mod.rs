//! The analysis-transform engine.
//!
//! Every kernel maps a forecast ensemble, an observation, and the
//! observation-error covariance to a right-acting transform: either a
//! single `n_ens x n_ens` matrix (stochastic filter) or the triple
//! `(T, w, U)` applied as
//!
//!   E <- x_mean 1^T + X (w 1^T + sqrt(n_ens - 1) T U)
//!
//! with `X` the unnormalized anomalies. Kernels never mutate the ensemble;
//! [`update_ensemble`] applies the result in place.

use crate::analysis::Analysis;
use crate::cov::ObsCov;
use crate::inflation::ensemble_mean;
use crate::obs::ObsOperator;
use da_core::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;

mod enkf;
mod enkf_n;
mod etkf;
mod ienks;
mod mlef;

pub use ienks::ienks_increment;

#[derive(Debug, Clone)]
pub enum Transform {
  /// Stochastic update `E <- E Gamma`.
  RightMultiply(Array2<f64>),
  /// Square-root update with mean weights and a mean-preserving rotation.
  Triple {
    t: Array2<f64>,
    w: Array1<f64>,
    u: Array2<f64>,
  },
}

/// Knobs for the iterative kernels.
#[derive(Debug, Clone, Copy)]
pub struct TransformOpts {
  /// convergence threshold on the weight increment
  pub tol: f64,
  /// iteration cap for the MLEF / primal Newton loops
  pub j_max: usize,
  /// bundle conditioning scale
  pub epsilon: f64,
}

impl Default for TransformOpts {
  fn default() -> TransformOpts {
    TransformOpts { tol: 1e-3, j_max: 40, epsilon: 1e-4 }
  }
}

/// A transform plus the iteration count its kernel spent. Non-iterative
/// kernels report zero; hitting the cap is reported, not raised.
#[derive(Debug, Clone)]
pub struct TransformResult {
  pub transform: Transform,
  pub iterations: usize,
}

fn validate(ens: ArrayView2<f64>, y: ArrayView1<f64>, cov: &ObsCov,
            obs_op: &ObsOperator) -> Result<()> {
  let n_ens = ens.ncols();
  if n_ens < 2 {
    return Err(Error::EnsembleTooSmall(n_ens));
  }
  debug_assert_eq!(y.len(), obs_op.obs_dim());
  cov.validate(obs_op.obs_dim())
}

/// Compute the analysis transform for a filter-style kernel.
///
/// The IEnKS descriptors are rejected here: their sequential increments are
/// accumulated by the Gauss-Newton smoother driver through
/// [`ienks_increment`] rather than through a single-observation transform.
pub fn transform<'b, R: Rng + ?Sized>(analysis: &Analysis, ens: ArrayView2<f64>,
                                  y: ArrayView1<'b, f64>, cov: &'b ObsCov,
                                  obs_op: &'b ObsOperator, opts: &TransformOpts,
                                  rng: &mut R) -> Result<TransformResult> {
  validate(ens, y, cov, obs_op)?;
  match analysis {
    Analysis::Enkf => {
      let transform = enkf::transform_enkf(ens, y, cov, obs_op, rng)?;
      Ok(TransformResult { transform, iterations: 0 })
    }
    Analysis::Etkf => {
      let transform = etkf::transform_etkf(ens, y, cov, obs_op, rng)?;
      Ok(TransformResult { transform, iterations: 0 })
    }
    Analysis::Mlef { adaptive, line_search, conditioning } => {
      mlef::transform_mlef(ens, y, cov, obs_op, *adaptive, *line_search,
                           *conditioning, opts, rng)
    }
    Analysis::EnkfN(form) => {
      enkf_n::transform_enkf_n(ens, y, cov, obs_op, *form, opts, rng)
    }
    Analysis::Ienks { .. } => {
      Err(Error::UnknownAnalysis(format!("{analysis} is smoother-only")))
    }
  }
}

/// Apply a transform to the ensemble in place.
pub fn update_ensemble(ens: &mut Array2<f64>, transform: &Transform) {
  match transform {
    Transform::RightMultiply(gamma) => {
      let updated = ens.dot(gamma);
      ens.assign(&updated);
    }
    Transform::Triple { t, w, u } => {
      let n_ens = ens.ncols();
      let scale = (n_ens as f64 - 1.0).sqrt();
      let x_mean = ensemble_mean(ens);

      let mut anomalies = ens.clone();
      for mut col in anomalies.axis_iter_mut(Axis(1)) {
        col -= &x_mean;
      }

      // w 1^T + sqrt(n - 1) T U
      let mut weights = t.dot(u) * scale;
      for mut col in weights.axis_iter_mut(Axis(1)) {
        col += w;
      }

      let updated = anomalies.dot(&weights);
      for (j, mut col) in ens.axis_iter_mut(Axis(1)).enumerate() {
        col.assign(&x_mean);
        col += &updated.index_axis(Axis(1), j);
      }
    }
  }
}

/// Ensemble mean and unnormalized anomalies, the shared front half of the
/// deterministic kernels.
pub(crate) fn mean_and_anomalies(ens: ArrayView2<f64>)
                                 -> (Array1<f64>, Array2<f64>) {
  let mean = ens.sum_axis(Axis(1)) / ens.ncols() as f64;
  let mut anomalies = ens.to_owned();
  for mut col in anomalies.axis_iter_mut(Axis(1)) {
    col -= &mean;
  }
  (mean, anomalies)
}

/// Observed ensemble split into its column mean and centered columns.
pub(crate) fn observed_mean_anomalies(obs_op: &ObsOperator,
                                      ens: ArrayView2<f64>)
                                      -> (Array1<f64>, Array2<f64>) {
  let y_ens = obs_op.observe(ens);
  mean_and_anomalies(y_ens.view())
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn triple_update_shifts_the_mean_by_anomaly_weights() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut ens = array![[1.0, 2.0, 3.0], [-1.0, 0.0, 1.0]];
    let n_ens = 3;
    let x_mean = ensemble_mean(&ens);
    let (_, anomalies) = mean_and_anomalies(ens.view());

    let w = array![0.2, -0.1, 0.3];
    let t = Array2::<f64>::eye(n_ens) * 0.5;
    let u = crate::sampling::mean_preserving_orthogonal(&mut rng, n_ens);
    let expected_shift = anomalies.dot(&w);

    update_ensemble(&mut ens, &Transform::Triple { t, w, u });

    let new_mean = ensemble_mean(&ens);
    for i in 0..2 {
      assert_abs_diff_eq!(new_mean[i], x_mean[i] + expected_shift[i],
                          epsilon = 1e-12);
    }
  }

  #[test]
  fn identity_triple_with_identity_rotation_is_a_pure_rescale() {
    let mut ens = array![[0.0, 2.0], [1.0, 3.0]];
    let before = ens.clone();
    let w = Array1::<f64>::zeros(2);
    // with T = I / sqrt(n-1) and U = I the anomalies are reproduced exactly
    let t = Array2::<f64>::eye(2) / (1.0f64).sqrt();
    let u = Array2::<f64>::eye(2);
    update_ensemble(&mut ens, &Transform::Triple { t, w, u });
    for i in 0..2 {
      for j in 0..2 {
        assert_abs_diff_eq!(ens[[i, j]], before[[i, j]], epsilon = 1e-12);
      }
    }
  }

  #[test]
  fn right_multiply_by_identity_is_identity() {
    let mut ens = array![[1.0, 2.0], [3.0, 4.0]];
    let before = ens.clone();
    update_ensemble(&mut ens, &Transform::RightMultiply(Array2::eye(2)));
    assert_eq!(ens, before);
  }

  #[test]
  fn ienks_labels_are_rejected_by_the_filter_dispatch() {
    let mut rng = StdRng::seed_from_u64(0);
    let ens = array![[1.0, 2.0], [0.0, 1.0]];
    let y = array![1.0];
    let op = ObsOperator::new(2, 1, 1.0).unwrap();
    let a: Analysis = "ienks-transform".parse().unwrap();
    let r = transform(&a, ens.view(), y.view(), &ObsCov::uniform(1.0), &op,
                      &TransformOpts::default(), &mut rng);
    assert!(r.is_err());
  }
}

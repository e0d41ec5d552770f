//! Random draws used by the analysis: initial ensembles, observation
//! perturbations, and the mean-preserving random rotation of the
//! deterministic update.

use crate::cov::ObsCov;
use crate::linalg;
use da_core::Result;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Ensemble of `n_ens` columns drawn from `N(mean, sd^2 I)`.
pub fn gaussian_ensemble<R: Rng + ?Sized>(rng: &mut R, mean: ArrayView1<f64>,
                                          sd: f64, n_ens: usize)
                                          -> Array2<f64> {
  let n = mean.len();
  let mut ens = Array2::<f64>::zeros((n, n_ens));
  for j in 0..n_ens {
    for i in 0..n {
      let xi: f64 = StandardNormal.sample(rng);
      ens[[i, j]] = mean[i] + sd * xi;
    }
  }
  ens
}

/// Observation perturbations: `n_ens` draws from `N(0, R)` with the sample
/// mean removed so the perturbed innovations stay unbiased.
pub fn obs_perturbations<R: Rng + ?Sized>(rng: &mut R, cov: &ObsCov,
                                          obs_dim: usize, n_ens: usize)
                                          -> Result<Array2<f64>> {
  let mut white = Array2::<f64>::zeros((obs_dim, n_ens));
  for v in white.iter_mut() {
    *v = StandardNormal.sample(rng);
  }
  let mut perts = cov.sqrt_mul(white.view())?;
  let mean = perts.mean_axis(Axis(1)).unwrap();
  for mut col in perts.axis_iter_mut(Axis(1)) {
    col -= &mean;
  }
  Ok(perts)
}

/// Mean-preserving random orthogonal matrix: `U 1 = 1` and `U^T U = I`.
///
/// A Haar-like `(n-1)`-dimensional rotation is embedded in the orthogonal
/// complement of the mean direction: `U = B diag(1, Q) B^T`, where `Q` is
/// the orthogonal factor of a standard-normal draw and `B` is an orthogonal
/// basis whose first column is `1/sqrt(n)` (a Householder reflection
/// exchanging `e_1` with that direction).
pub fn mean_preserving_orthogonal<R: Rng + ?Sized>(rng: &mut R, n: usize)
                                                   -> Array2<f64> {
  assert!(n >= 2);

  let mut g = Array2::<f64>::zeros((n - 1, n - 1));
  for v in g.iter_mut() {
    *v = StandardNormal.sample(rng);
  }
  let q = linalg::qr_q(g.view());

  // embed as the trailing block of an identity-led block diagonal
  let mut core = Array2::<f64>::eye(n);
  core.slice_mut(ndarray::s![1.., 1..]).assign(&q);

  // Householder reflection taking e_1 to 1/sqrt(n): B = I - 2 w w^T
  let sqrt_n = (n as f64).sqrt();
  let mut w = Array1::<f64>::from_elem(n, -1.0 / sqrt_n);
  w[0] += 1.0;
  let norm = w.dot(&w).sqrt();
  w /= norm;

  let reflect = |m: &Array2<f64>, from_left: bool| -> Array2<f64> {
    if from_left {
      // (I - 2 w w^T) m
      let wt_m = w.dot(m);
      let mut out = m.clone();
      for i in 0..n {
        for j in 0..n {
          out[[i, j]] -= 2.0 * w[i] * wt_m[j];
        }
      }
      out
    } else {
      // m (I - 2 w w^T)
      let m_w = m.dot(&w);
      let mut out = m.clone();
      for i in 0..n {
        for j in 0..n {
          out[[i, j]] -= 2.0 * m_w[i] * w[j];
        }
      }
      out
    }
  };

  let bm = reflect(&core, true);
  reflect(&bm, false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn rotation_preserves_the_ones_vector() {
    let mut rng = StdRng::seed_from_u64(42);
    for n in [2usize, 3, 15, 40] {
      let u = mean_preserving_orthogonal(&mut rng, n);
      let ones = Array1::<f64>::ones(n);
      let rotated = u.dot(&ones);
      for i in 0..n {
        assert_abs_diff_eq!(rotated[i], 1.0, epsilon = 1e-12);
      }
    }
  }

  #[test]
  fn rotation_is_orthogonal() {
    let mut rng = StdRng::seed_from_u64(7);
    for n in [2usize, 5, 21] {
      let u = mean_preserving_orthogonal(&mut rng, n);
      let utu = u.t().dot(&u);
      for i in 0..n {
        for j in 0..n {
          let id = if i == j { 1.0 } else { 0.0 };
          assert_abs_diff_eq!(utu[[i, j]], id, epsilon = 1e-12);
        }
      }
    }
  }

  #[test]
  fn perturbations_are_centered() {
    let mut rng = StdRng::seed_from_u64(0);
    let cov = ObsCov::Diagonal(array![1.0, 4.0, 0.25]);
    let perts = obs_perturbations(&mut rng, &cov, 3, 10).unwrap();
    let mean = perts.mean_axis(Axis(1)).unwrap();
    for i in 0..3 {
      assert_abs_diff_eq!(mean[i], 0.0, epsilon = 1e-13);
    }
  }

  #[test]
  fn gaussian_ensemble_centers_near_the_mean() {
    let mut rng = StdRng::seed_from_u64(11);
    let mean = array![5.0, -3.0];
    let ens = gaussian_ensemble(&mut rng, mean.view(), 0.1, 4000);
    let m = ens.mean_axis(Axis(1)).unwrap();
    assert_abs_diff_eq!(m[0], 5.0, epsilon = 0.02);
    assert_abs_diff_eq!(m[1], -3.0, epsilon = 0.02);
  }
}

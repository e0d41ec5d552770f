//! Observation-error covariance in the three shapes the kernels recognize,
//! with fast-path square roots for the scalar and diagonal forms and an
//! SVD path for the general symmetric form.

use crate::linalg;
use da_core::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

#[derive(Debug, Clone)]
pub enum ObsCov {
  /// `sigma2 * I`; the field is the variance.
  Scalar(f64),
  /// Per-component variances.
  Diagonal(Array1<f64>),
  /// General symmetric positive-definite matrix.
  Symmetric(Array2<f64>),
}

/// Dense `R^(1/2)`, `R^(-1/2)`, `R^(-1)` produced together, per shape in a
/// single pass.
pub struct CovFactors {
  pub sqrt: Array2<f64>,
  pub inv_sqrt: Array2<f64>,
  pub inv: Array2<f64>,
}

impl ObsCov {
  /// Uncorrelated observation noise with standard deviation `sd`.
  pub fn uniform(sd: f64) -> ObsCov {
    ObsCov::Scalar(sd * sd)
  }

  pub fn validate(&self, obs_dim: usize) -> Result<()> {
    match self {
      ObsCov::Scalar(v) => {
        if !v.is_finite() || *v <= 0.0 {
          return Err(Error::NotPositiveDefinite);
        }
      }
      ObsCov::Diagonal(d) => {
        if d.len() != obs_dim || d.iter().any(|v| !v.is_finite() || *v <= 0.0) {
          return Err(Error::NotPositiveDefinite);
        }
      }
      ObsCov::Symmetric(m) => {
        if m.dim() != (obs_dim, obs_dim) {
          return Err(Error::NotPositiveDefinite);
        }
        // positive definiteness via the factorization that the kernels use
        nalgebra::Cholesky::new(linalg::to_dmatrix(m.view()))
          .ok_or(Error::NotPositiveDefinite)?;
      }
    }
    Ok(())
  }

  /// Tempered covariance `R * w` for multiple data assimilation.
  pub fn scaled(&self, w: f64) -> ObsCov {
    match self {
      ObsCov::Scalar(v) => ObsCov::Scalar(v * w),
      ObsCov::Diagonal(d) => ObsCov::Diagonal(d * w),
      ObsCov::Symmetric(m) => ObsCov::Symmetric(m * w),
    }
  }

  pub fn matrix(&self, obs_dim: usize) -> Array2<f64> {
    match self {
      ObsCov::Scalar(v) => Array2::eye(obs_dim) * *v,
      ObsCov::Diagonal(d) => Array2::from_diag(d),
      ObsCov::Symmetric(m) => m.clone(),
    }
  }

  /// All three factors the kernels ask for, in one call.
  pub fn factors(&self, obs_dim: usize) -> Result<CovFactors> {
    match self {
      ObsCov::Scalar(v) => {
        let sd = v.sqrt();
        Ok(CovFactors {
          sqrt: Array2::eye(obs_dim) * sd,
          inv_sqrt: Array2::eye(obs_dim) * sd.recip(),
          inv: Array2::eye(obs_dim) * v.recip(),
        })
      }
      ObsCov::Diagonal(d) => Ok(CovFactors {
        sqrt: Array2::from_diag(&d.mapv(f64::sqrt)),
        inv_sqrt: Array2::from_diag(&d.mapv(|v| v.sqrt().recip())),
        inv: Array2::from_diag(&d.mapv(f64::recip)),
      }),
      ObsCov::Symmetric(m) => {
        let f = linalg::sym_factors(m.view())?;
        Ok(CovFactors { sqrt: f.sqrt, inv_sqrt: f.inv_sqrt, inv: f.inv })
      }
    }
  }

  /// `R^(-1/2) X`, using the elementwise fast path where the shape allows.
  pub fn inv_sqrt_mul(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
    match self {
      ObsCov::Scalar(v) => Ok(&x / v.sqrt()),
      ObsCov::Diagonal(d) => {
        let mut out = x.to_owned();
        for (mut row, v) in out.axis_iter_mut(Axis(0)).zip(d.iter()) {
          row.mapv_inplace(|e| e / v.sqrt());
        }
        Ok(out)
      }
      ObsCov::Symmetric(m) => {
        let f = linalg::sym_factors(m.view())?;
        Ok(f.inv_sqrt.dot(&x))
      }
    }
  }

  /// `R^(-1/2) v`.
  pub fn inv_sqrt_vec(&self, v: ArrayView1<f64>) -> Result<Array1<f64>> {
    let col = v.insert_axis(Axis(1));
    let out = self.inv_sqrt_mul(col)?;
    Ok(out.index_axis(Axis(1), 0).to_owned())
  }

  /// `R^(1/2) X`, the sampling direction.
  pub fn sqrt_mul(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
    match self {
      ObsCov::Scalar(v) => Ok(&x * v.sqrt()),
      ObsCov::Diagonal(d) => {
        let mut out = x.to_owned();
        for (mut row, v) in out.axis_iter_mut(Axis(0)).zip(d.iter()) {
          row.mapv_inplace(|e| e * v.sqrt());
        }
        Ok(out)
      }
      ObsCov::Symmetric(m) => {
        let f = linalg::sym_factors(m.view())?;
        Ok(f.sqrt.dot(&x))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  fn check_roundtrip(cov: &ObsCov, p: usize) {
    let f = cov.factors(p).unwrap();
    let r = cov.matrix(p);
    let eye = f.inv_sqrt.dot(&r).dot(&f.inv_sqrt.t());
    let prod = r.dot(&f.inv);
    let sq = f.sqrt.dot(&f.sqrt.t());
    for i in 0..p {
      for j in 0..p {
        let id = if i == j { 1.0 } else { 0.0 };
        assert_abs_diff_eq!(eye[[i, j]], id, epsilon = 1e-10);
        assert_abs_diff_eq!(prod[[i, j]], id, epsilon = 1e-10);
        assert_abs_diff_eq!(sq[[i, j]], r[[i, j]], epsilon = 1e-10);
      }
    }
  }

  #[test]
  fn factor_roundtrips_for_all_shapes() {
    check_roundtrip(&ObsCov::uniform(1.5), 4);
    check_roundtrip(&ObsCov::Diagonal(array![0.5, 2.0, 1.0]), 3);
    let a = array![[1.2, 0.1, 0.0], [0.3, 0.9, 0.2], [0.0, 0.1, 1.4]];
    check_roundtrip(&ObsCov::Symmetric(linalg::symmetrize(&a.t().dot(&a))), 3);
  }

  #[test]
  fn fast_paths_agree_with_dense_factors() {
    let cov = ObsCov::Diagonal(array![0.25, 4.0]);
    let x = array![[1.0, 2.0], [3.0, -1.0]];
    let fast = cov.inv_sqrt_mul(x.view()).unwrap();
    let dense = cov.factors(2).unwrap().inv_sqrt.dot(&x);
    for i in 0..2 {
      for j in 0..2 {
        assert_abs_diff_eq!(fast[[i, j]], dense[[i, j]], epsilon = 1e-12);
      }
    }
  }

  #[test]
  fn rejects_indefinite_input() {
    assert!(ObsCov::Scalar(0.0).validate(3).is_err());
    assert!(ObsCov::Diagonal(array![1.0, -0.1]).validate(2).is_err());
    let m = array![[1.0, 2.0], [2.0, 1.0]]; // eigenvalues 3, -1
    assert!(ObsCov::Symmetric(m).validate(2).is_err());
  }

  #[test]
  fn scaling_scales_the_variance() {
    let cov = ObsCov::uniform(1.0).scaled(4.0);
    match cov {
      ObsCov::Scalar(v) => assert_abs_diff_eq!(v, 4.0, epsilon = 0.0),
      _ => unreachable!(),
    }
  }
}

//! Copy bridge between the `ndarray` ensemble storage and the `nalgebra`
//! factorizations used by the analysis kernels, plus the symmetric
//! square-root helpers shared by the transform family.
//!
//! Everything here operates on kernel-sized matrices (`n_ens` or `obs_dim`
//! square, a few tens of rows), so plain copies are cheaper than any
//! zero-copy cleverness would be worth.

use da_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
  DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
  Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub fn to_dvector(v: ArrayView1<f64>) -> DVector<f64> {
  DVector::from_fn(v.len(), |i, _| v[i])
}

pub fn from_dvector(v: &DVector<f64>) -> Array1<f64> {
  Array1::from_shape_fn(v.len(), |i| v[i])
}

const SVD_MAX_ITER: usize = 256;

/// Square root, inverse square root, and inverse of a symmetric
/// positive-semidefinite matrix, synthesized from one full SVD and
/// re-symmetrized before returning.
pub struct SymFactors {
  pub sqrt: Array2<f64>,
  pub inv_sqrt: Array2<f64>,
  pub inv: Array2<f64>,
}

/// Factor a symmetric matrix through its SVD `M = U S U^T`.
///
/// Rank deficiency is allowed only in `M` itself being near-singular; the
/// inverse parts blow up smoothly rather than erroring, which is the right
/// behavior for the `(n_ens - 1) I + S^T S` Hessians that are always
/// positive definite.
pub fn sym_factors(m: ArrayView2<f64>) -> Result<SymFactors> {
  debug_assert_eq!(m.nrows(), m.ncols());
  let svd = to_dmatrix(m)
    .try_svd(true, false, f64::EPSILON, SVD_MAX_ITER)
    .ok_or(Error::SvdFailed)?;
  let u = svd.u.ok_or(Error::SvdFailed)?;
  let sigma = svd.singular_values;
  if sigma.iter().any(|s| !s.is_finite()) {
    return Err(Error::NonFinite("singular values"));
  }

  let n = u.nrows();
  let apply = |f: &dyn Fn(f64) -> f64| -> Array2<f64> {
    let mut scaled = u.clone();
    for j in 0..n {
      let s = f(sigma[j]);
      scaled.column_mut(j).scale_mut(s);
    }
    let full = &scaled * u.transpose();
    symmetrize(&from_dmatrix(&full))
  };

  Ok(SymFactors {
    sqrt: apply(&|s| s.sqrt()),
    inv_sqrt: apply(&|s| s.sqrt().recip()),
    inv: apply(&|s| s.recip()),
  })
}

/// Full SVD of a rectangular matrix: `(u, sigma, v_t)`.
pub fn svd(m: ArrayView2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
  let svd = to_dmatrix(m)
    .try_svd(true, true, f64::EPSILON, SVD_MAX_ITER)
    .ok_or(Error::SvdFailed)?;
  let u = svd.u.ok_or(Error::SvdFailed)?;
  let v_t = svd.v_t.ok_or(Error::SvdFailed)?;
  Ok((from_dmatrix(&u),
      Array1::from_shape_fn(svd.singular_values.len(),
                            |i| svd.singular_values[i]),
      from_dmatrix(&v_t)))
}

pub fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
  let mt = m.t();
  let mut out = m.clone();
  out += &mt;
  out *= 0.5;
  out
}

/// Solve `H x = b` for symmetric positive-definite `H`.
pub fn chol_solve(h: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>> {
  let chol = nalgebra::Cholesky::new(to_dmatrix(h))
    .ok_or(Error::CholeskyFailed)?;
  Ok(from_dvector(&chol.solve(&to_dvector(b))))
}

/// Solve `C X = B` column-wise for symmetric positive-definite `C`.
pub fn chol_solve_multi(c: ArrayView2<f64>, b: ArrayView2<f64>)
                        -> Result<Array2<f64>> {
  let chol = nalgebra::Cholesky::new(to_dmatrix(c))
    .ok_or(Error::CholeskyFailed)?;
  Ok(from_dmatrix(&chol.solve(&to_dmatrix(b))))
}

/// Orthogonal factor of the QR decomposition of a square matrix.
pub fn qr_q(m: ArrayView2<f64>) -> Array2<f64> {
  let qr = to_dmatrix(m).qr();
  from_dmatrix(&qr.q())
}

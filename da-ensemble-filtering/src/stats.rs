//! Ensemble-versus-truth diagnostics.

use ndarray::{ArrayView1, ArrayView2};

/// Root-mean-square error of the ensemble mean against a truth column and
/// the ensemble spread (root mean unbiased variance), over the leading
/// `truth.len()` rows.
pub fn analyze_ens(ens: ArrayView2<f64>, truth: ArrayView1<f64>) -> (f64, f64) {
  analyze_rows(ens, truth, 0)
}

/// The same diagnostics over the parameter rows `state_dim..`.
pub fn analyze_ens_param(ens: ArrayView2<f64>, truth: ArrayView1<f64>,
                         state_dim: usize) -> (f64, f64) {
  analyze_rows(ens, truth, state_dim)
}

fn analyze_rows(ens: ArrayView2<f64>, truth: ArrayView1<f64>, offset: usize)
                -> (f64, f64) {
  let d = truth.len();
  let n_ens = ens.ncols();
  debug_assert!(offset + d <= ens.nrows());

  let mut se = 0.0;
  let mut var = 0.0;
  for i in 0..d {
    let row = ens.row(offset + i);
    let mean = row.sum() / n_ens as f64;
    se += (mean - truth[i]).powi(2);
    let dev: f64 = row.iter().map(|v| (v - mean).powi(2)).sum();
    var += dev / (n_ens - 1) as f64;
  }
  ((se / d as f64).sqrt(), (var / d as f64).sqrt())
}

//! Inner-loop optimization routines for the variational kernels: an
//! explicit cost-model seam, a strong-Wolfe line search, and Brent scalar
//! minimization for the finite-size dual cost.

use da_core::{Error, Result};
use log::warn;
use ndarray::{Array1, Array2, ArrayView1};

/// Ensemble-space cost function evaluated at a weight vector. The gradient
/// and (Gauss-Newton) Hessian are written through the output references;
/// the cost is the return value.
pub trait CostModel {
  fn eval(&mut self, w: ArrayView1<f64>, grad: &mut Array1<f64>,
          hess: &mut Array2<f64>) -> Result<f64>;
}

#[derive(Debug, Clone, Copy)]
pub struct WolfeParams {
  /// sufficient-decrease constant
  pub c1: f64,
  /// curvature constant
  pub c2: f64,
  pub alpha_max: f64,
  pub max_iter: usize,
}

impl Default for WolfeParams {
  fn default() -> WolfeParams {
    WolfeParams { c1: 1e-4, c2: 0.9, alpha_max: 8.0, max_iter: 24 }
  }
}

/// Strong-Wolfe line search along `p` from `w0` (Nocedal-Wright bracketing
/// with bisection zoom).
///
/// Returns a step length satisfying both Wolfe conditions when one is
/// found. If the curvature condition cannot be met inside the bracket the
/// best sufficient-decrease step found is returned instead; only a total
/// failure to decrease the cost is an error.
pub fn strong_wolfe<C: CostModel>(model: &mut C, w0: ArrayView1<f64>,
                                  p: ArrayView1<f64>, params: &WolfeParams)
                                  -> Result<f64> {
  let n = w0.len();
  let mut grad = Array1::<f64>::zeros(n);
  let mut hess = Array2::<f64>::zeros((n, n));

  let mut phi = |alpha: f64, grad: &mut Array1<f64>, hess: &mut Array2<f64>|
                 -> Result<(f64, f64)> {
    let w = &w0 + &(&p * alpha);
    let value = model.eval(w.view(), grad, hess)?;
    Ok((value, grad.dot(&p)))
  };

  let (phi0, dphi0) = phi(0.0, &mut grad, &mut hess)?;
  if dphi0 >= 0.0 {
    // not a descent direction; a unit step cannot help
    return Err(Error::LineSearchFailed);
  }

  let mut best: Option<f64> = None;
  let sufficient = |alpha: f64, value: f64| {
    value <= phi0 + params.c1 * alpha * dphi0
  };

  let mut alpha_prev = 0.0;
  let mut phi_prev = phi0;
  let mut alpha = 1.0;

  let mut lo = 0.0;
  let mut hi = 0.0;
  let mut bracketed = false;

  for i in 0..params.max_iter {
    let (value, slope) = phi(alpha, &mut grad, &mut hess)?;

    if !sufficient(alpha, value) || (i > 0 && value >= phi_prev) {
      lo = alpha_prev;
      hi = alpha;
      bracketed = true;
      break;
    }
    best = Some(alpha);
    if slope.abs() <= -params.c2 * dphi0 {
      return Ok(alpha);
    }
    if slope >= 0.0 {
      lo = alpha;
      hi = alpha_prev;
      bracketed = true;
      break;
    }
    alpha_prev = alpha;
    phi_prev = value;
    alpha = (2.0 * alpha).min(params.alpha_max);
    if alpha_prev >= params.alpha_max {
      break;
    }
  }

  if bracketed {
    // bisection zoom
    let mut phi_lo = if lo == 0.0 {
      phi0
    } else {
      phi(lo, &mut grad, &mut hess)?.0
    };
    for _ in 0..params.max_iter {
      let mid = 0.5 * (lo + hi);
      let (value, slope) = phi(mid, &mut grad, &mut hess)?;
      if !sufficient(mid, value) || value >= phi_lo {
        hi = mid;
      } else {
        best = Some(mid);
        if slope.abs() <= -params.c2 * dphi0 {
          return Ok(mid);
        }
        if slope * (hi - lo) >= 0.0 {
          hi = lo;
        }
        lo = mid;
        phi_lo = value;
      }
      if (hi - lo).abs() < 1e-12 {
        break;
      }
    }
  }

  match best {
    Some(alpha) => {
      warn!("line search: curvature condition unmet, taking alpha = {alpha}");
      Ok(alpha)
    }
    None => Err(Error::LineSearchFailed),
  }
}

const GOLDEN: f64 = 0.381_966_011_250_105_2;

/// Brent minimization of a scalar function on `[a, b]` without derivatives,
/// alternating parabolic interpolation and golden-section steps.
pub fn brent_min<F>(mut f: F, a: f64, b: f64, tol: f64, max_iter: usize)
                    -> Result<(f64, f64, usize)>
  where F: FnMut(f64) -> f64,
{
  debug_assert!(a < b);
  let (mut a, mut b) = (a, b);
  let mut x = a + GOLDEN * (b - a);
  let mut w = x;
  let mut v = x;
  let mut fx = f(x);
  let mut fw = fx;
  let mut fv = fx;
  let mut d: f64 = 0.0;
  let mut e: f64 = 0.0;

  for iter in 0..max_iter {
    let xm = 0.5 * (a + b);
    let tol1 = tol * x.abs() + 1e-12;
    let tol2 = 2.0 * tol1;
    if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
      return Ok((x, fx, iter));
    }

    let mut golden = true;
    if e.abs() > tol1 {
      // parabolic fit through x, w, v
      let r = (x - w) * (fx - fv);
      let mut q = (x - v) * (fx - fw);
      let mut p = (x - v) * q - (x - w) * r;
      q = 2.0 * (q - r);
      if q > 0.0 {
        p = -p;
      }
      q = q.abs();
      let e_tmp = e;
      e = d;
      if p.abs() < (0.5 * q * e_tmp).abs() && p > q * (a - x) && p < q * (b - x) {
        d = p / q;
        let u = x + d;
        if u - a < tol2 || b - u < tol2 {
          d = if xm >= x { tol1 } else { -tol1 };
        }
        golden = false;
      }
    }
    if golden {
      e = if x >= xm { a - x } else { b - x };
      d = GOLDEN * e;
    }

    let u = if d.abs() >= tol1 {
      x + d
    } else if d >= 0.0 {
      x + tol1
    } else {
      x - tol1
    };
    let fu = f(u);

    if fu <= fx {
      if u >= x { a = x; } else { b = x; }
      v = w; fv = fw;
      w = x; fw = fx;
      x = u; fx = fu;
    } else {
      if u < x { a = u; } else { b = u; }
      if fu <= fw || w == x {
        v = w; fv = fw;
        w = u; fw = fu;
      } else if fu <= fv || v == x || v == w {
        v = u; fv = fu;
      }
    }
  }

  Err(Error::ScalarMinFailed(max_iter))
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  /// quadratic bowl J(w) = 0.5 (w - c)^T (w - c)
  struct Bowl {
    c: Array1<f64>,
  }

  impl CostModel for Bowl {
    fn eval(&mut self, w: ArrayView1<f64>, grad: &mut Array1<f64>,
            hess: &mut Array2<f64>) -> Result<f64> {
      let d = &w - &self.c;
      grad.assign(&d);
      hess.assign(&Array2::eye(w.len()));
      Ok(0.5 * d.dot(&d))
    }
  }

  #[test]
  fn wolfe_takes_the_full_newton_step_on_a_quadratic() {
    let mut bowl = Bowl { c: array![1.0, -2.0] };
    let w0 = array![0.0, 0.0];
    // Newton direction for the bowl from the origin is exactly c
    let p = array![1.0, -2.0];
    let alpha = strong_wolfe(&mut bowl, w0.view(), p.view(),
                             &WolfeParams::default()).unwrap();
    assert_abs_diff_eq!(alpha, 1.0, epsilon = 1e-9);
  }

  #[test]
  fn wolfe_rejects_ascent_directions() {
    let mut bowl = Bowl { c: array![1.0] };
    let w0 = array![0.0];
    let p = array![-1.0];
    assert!(strong_wolfe(&mut bowl, w0.view(), p.view(),
                         &WolfeParams::default()).is_err());
  }

  #[test]
  fn brent_finds_an_interior_minimum() {
    let f = |x: f64| (x - 0.7).powi(2) + 3.0;
    let (x, fx, iters) = brent_min(f, 0.0, 2.0, 1e-10, 200).unwrap();
    assert_abs_diff_eq!(x, 0.7, epsilon = 1e-6);
    assert_abs_diff_eq!(fx, 3.0, epsilon = 1e-10);
    assert!(iters < 120);
  }

  #[test]
  fn brent_handles_edge_minima() {
    let f = |x: f64| x;
    let (x, _, _) = brent_min(f, 0.0, 1.0, 1e-8, 200).unwrap();
    assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
  }
}

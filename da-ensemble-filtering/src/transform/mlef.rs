//! Maximum-likelihood ensemble filter.
//!
//! The observation operator is relinearized around the running mean
//! estimate each iteration: the probe ensemble `E' = (x_mean + X_0 w) 1^T
//! + X_0 T` is observed, its anomalies are deconditioned by `T^{-1}`, and a
//! Newton step (optionally under strong-Wolfe line search) is taken on the
//! ensemble-space cost. The classical cost penalizes `(n - 1) |w|^2`; the
//! finite-size ("-n") cost replaces it with `n_eff log(eps_n + |w|^2)`,
//! which self-tunes inflation.

use crate::analysis::Conditioning;
use crate::cov::ObsCov;
use crate::linalg;
use crate::obs::ObsOperator;
use crate::optimize::{self, CostModel, WolfeParams};
use crate::sampling;
use crate::transform::{mean_and_anomalies, observed_mean_anomalies,
                       Transform, TransformOpts, TransformResult};
use da_core::Result;
use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;

struct MlefCost<'a, 'b> {
  x_mean: &'a Array1<f64>,
  x0: &'a Array2<f64>,
  t: Array2<f64>,
  t_inv: Array2<f64>,
  obs_op: &'b ObsOperator,
  cov: &'b ObsCov,
  y: ArrayView1<'b, f64>,
  /// `None` for the classical prior, `Some((n_eff, eps_n))` finite-size.
  finite_size: Option<(f64, f64)>,
  n1: f64,
}

impl CostModel for MlefCost<'_, '_> {
  fn eval(&mut self, w: ArrayView1<f64>, grad: &mut Array1<f64>,
          hess: &mut Array2<f64>) -> Result<f64> {
    let n_ens = w.len();

    // probe ensemble at the current mean estimate
    let shifted_mean = self.x_mean + &self.x0.dot(&w);
    let mut probe = self.x0.dot(&self.t);
    for mut col in probe.axis_iter_mut(Axis(1)) {
      col += &shifted_mean;
    }

    let (y_mean, y_anom) = observed_mean_anomalies(self.obs_op, probe.view());
    let s = self.cov.inv_sqrt_mul(y_anom.view())?.dot(&self.t_inv);
    let delta = self.cov.inv_sqrt_vec((&self.y - &y_mean).view())?;

    let w_norm2 = w.dot(&w);
    let (prior_cost, grad_coeff, hess_coeff) = match self.finite_size {
      None => (0.5 * self.n1 * w_norm2, self.n1, self.n1),
      Some((n_eff, eps_n)) => {
        let zeta = (eps_n + w_norm2).recip();
        (0.5 * n_eff * (eps_n + w_norm2).ln(), n_eff * zeta, n_eff - 1.0)
      }
    };

    let mut g = &w * grad_coeff;
    g -= &s.t().dot(&delta);
    grad.assign(&g);

    let mut h = s.t().dot(&s);
    for i in 0..n_ens {
      h[[i, i]] += hess_coeff;
    }
    hess.assign(&h);

    Ok(prior_cost + 0.5 * delta.dot(&delta))
  }
}

pub fn transform_mlef<'b, R: Rng + ?Sized>(ens: ArrayView2<f64>,
                                       y: ArrayView1<'b, f64>, cov: &'b ObsCov,
                                       obs_op: &'b ObsOperator, adaptive: bool,
                                       line_search: bool,
                                       conditioning: Conditioning,
                                       opts: &TransformOpts, rng: &mut R)
                                       -> Result<TransformResult> {
  let n_ens = ens.ncols();
  let n1 = n_ens as f64 - 1.0;
  let n_eff = n_ens as f64 + 1.0;
  let eps_n = 1.0 + (n_ens as f64).recip();
  let finite_size = if adaptive { Some((n_eff, eps_n)) } else { None };

  let (x_mean, x0) = mean_and_anomalies(ens);

  let (mut t, mut t_inv) = match conditioning {
    Conditioning::Bundle => {
      (Array2::<f64>::eye(n_ens) * opts.epsilon,
       Array2::<f64>::eye(n_ens) / opts.epsilon)
    }
    Conditioning::Transform => {
      (Array2::<f64>::eye(n_ens), Array2::<f64>::eye(n_ens))
    }
  };

  let mut w = Array1::<f64>::zeros(n_ens);
  let mut grad = Array1::<f64>::zeros(n_ens);
  let mut hess = Array2::<f64>::zeros((n_ens, n_ens));
  let mut iterations = 0;

  for j in 0..opts.j_max {
    let mut model = MlefCost {
      x_mean: &x_mean,
      x0: &x0,
      t: t.clone(),
      t_inv: t_inv.clone(),
      obs_op,
      cov,
      y,
      finite_size,
      n1,
    };
    model.eval(w.view(), &mut grad, &mut hess)?;

    let step_norm;
    if line_search {
      let mut p = linalg::chol_solve(hess.view(), grad.view())?;
      p.mapv_inplace(|v| -v);
      if grad.dot(&p) >= -1e-14 {
        // stationary point: no descent left to search along
        break;
      }
      let alpha = optimize::strong_wolfe(&mut model, w.view(), p.view(),
                                         &WolfeParams::default())?;
      w.scaled_add(alpha, &p);
      step_norm = alpha.abs() * p.dot(&p).sqrt();
    } else {
      let dw = linalg::chol_solve(hess.view(), grad.view())?;
      w -= &dw;
      step_norm = dw.dot(&dw).sqrt();
    }
    iterations = j + 1;

    if conditioning == Conditioning::Transform {
      let factors = linalg::sym_factors(hess.view())?;
      t = factors.inv_sqrt;
      t_inv = factors.sqrt;
    }
    if step_norm < opts.tol {
      break;
    }
  }
  if iterations == opts.j_max {
    warn!("mlef: iteration cap {} reached", opts.j_max);
  }

  // final curvature at the converged weights, with the final conditioning
  let mut model = MlefCost {
    x_mean: &x_mean,
    x0: &x0,
    t: t.clone(),
    t_inv: t_inv.clone(),
    obs_op,
    cov,
    y,
    finite_size,
    n1,
  };
  model.eval(w.view(), &mut grad, &mut hess)?;

  let t_out = if adaptive {
    // adaptive-inflation factor H* = S^T S + n_eff (zeta I - 2 zeta^2 w w^T)
    let zeta = (eps_n + w.dot(&w)).recip();
    let mut h_star = hess.clone();
    for i in 0..n_ens {
      h_star[[i, i]] += -(n_eff - 1.0) + n_eff * zeta;
    }
    let coeff = 2.0 * n_eff * zeta * zeta;
    for i in 0..n_ens {
      for k in 0..n_ens {
        h_star[[i, k]] -= coeff * w[i] * w[k];
      }
    }
    linalg::sym_factors(h_star.view())?.inv_sqrt
  } else {
    linalg::sym_factors(hess.view())?.inv_sqrt
  };

  let u = sampling::mean_preserving_orthogonal(rng, n_ens);
  Ok(TransformResult {
    transform: Transform::Triple { t: t_out, w, u },
    iterations,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::inflation::ensemble_mean;
  use crate::transform::{etkf::transform_etkf, update_ensemble};
  use approx::assert_abs_diff_eq;
  use ndarray::Array1;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn prior(rng: &mut StdRng, n: usize, n_ens: usize) -> Array2<f64> {
    let mean = Array1::from_shape_fn(n, |i| (i as f64).cos());
    crate::sampling::gaussian_ensemble(rng, mean.view(), 0.8, n_ens)
  }

  #[test]
  fn linear_observations_reproduce_the_etkf_mean() {
    // with gamma = 1 the relinearization is exact after one step, so the
    // converged mlef mean must agree with the etkf analysis mean
    let mut rng = StdRng::seed_from_u64(21);
    let ens = prior(&mut rng, 5, 10);
    let op = ObsOperator::new(5, 5, 1.0).unwrap();
    let cov = ObsCov::uniform(0.7);
    let y = Array1::from_shape_fn(5, |i| i as f64 * 0.3 - 0.2);

    let mut etkf_ens = ens.clone();
    let trans = transform_etkf(ens.view(), y.view(), &cov, &op, &mut rng)
      .unwrap();
    update_ensemble(&mut etkf_ens, &trans);

    for conditioning in [Conditioning::Bundle, Conditioning::Transform] {
      let mut mlef_ens = ens.clone();
      let out = transform_mlef(ens.view(), y.view(), &cov, &op, false, false,
                               conditioning, &TransformOpts::default(),
                               &mut rng).unwrap();
      update_ensemble(&mut mlef_ens, &out.transform);

      let a = ensemble_mean(&etkf_ens);
      let b = ensemble_mean(&mlef_ens);
      for i in 0..5 {
        assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-5);
      }
    }
  }

  #[test]
  fn nonlinear_observations_converge_under_line_search() {
    let mut rng = StdRng::seed_from_u64(22);
    let ens = prior(&mut rng, 6, 14);
    let op = ObsOperator::new(6, 6, 3.0).unwrap();
    let cov = ObsCov::uniform(1.0);
    // synthetic observation of a state near the prior mean
    let mean = ensemble_mean(&ens);
    let y = op.observe_state(mean.view()) + 0.1;

    let out = transform_mlef(ens.view(), y.view(), &cov, &op, false, true,
                             Conditioning::Transform,
                             &TransformOpts::default(), &mut rng).unwrap();
    assert!(out.iterations < TransformOpts::default().j_max);
    match out.transform {
      Transform::Triple { w, .. } => {
        assert!(w.iter().all(|v| v.is_finite()));
      }
      _ => unreachable!(),
    }
  }

  #[test]
  fn finite_size_variant_returns_finite_transforms() {
    let mut rng = StdRng::seed_from_u64(23);
    let ens = prior(&mut rng, 4, 8);
    let op = ObsOperator::new(4, 4, 1.0).unwrap();
    let cov = ObsCov::uniform(1.0);
    let y = Array1::from_elem(4, 0.4);

    let out = transform_mlef(ens.view(), y.view(), &cov, &op, true, false,
                             Conditioning::Bundle, &TransformOpts::default(),
                             &mut rng).unwrap();
    match out.transform {
      Transform::Triple { t, w, u } => {
        assert!(t.iter().all(|v| v.is_finite()));
        assert!(w.iter().all(|v| v.is_finite()));
        assert!(u.iter().all(|v| v.is_finite()));
      }
      _ => unreachable!(),
    }
  }
}

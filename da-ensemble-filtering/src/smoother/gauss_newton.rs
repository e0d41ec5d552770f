//! Iterative ensemble Kalman smoother: Gauss-Newton over the window in
//! ensemble-weight space, with sequential gradient/Hessian accumulation
//! across the observation times.

use crate::analysis::{Analysis, Conditioning};
use crate::cov::ObsCov;
use crate::filter::propagate_ensemble;
use crate::inflation::{inflate_param, inflate_state, param_random_walk};
use crate::linalg;
use crate::sampling;
use crate::smoother::{SmootherCtx, SmootherOutput};
use crate::transform::{ienks_increment, mean_and_anomalies};
use da_core::{Error, Result, Stepper};
use log::warn;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::Rng;

#[derive(Clone, Copy, PartialEq)]
enum Positions {
  /// every window position contributes (spin and MDA passes)
  All,
  /// only the trailing `shift` new observations contribute (SDA)
  Tail,
}

/// One cycle of the Gauss-Newton smoother over the `lag` observations in
/// `obs`, entering with the ensemble at the window start. Returns the
/// forecast/filter/posterior stacks and the outer-iteration total; under
/// MDA the count accumulates across the rebalancing and tempered stages.
pub fn ls_smoother_gauss_newton<S, R>(analysis: &Analysis,
                                      ens: &mut Array2<f64>,
                                      obs: ArrayView2<f64>, cov: &ObsCov,
                                      ctx: &SmootherCtx<S>, rng: &mut R)
                                      -> Result<SmootherOutput>
  where S: Stepper + ?Sized,
        R: Rng,
{
  let (adaptive, conditioning) = match analysis {
    Analysis::Ienks { adaptive, conditioning } => (*adaptive, *conditioning),
    _ => {
      return Err(Error::UnknownAnalysis(
        format!("{analysis} is not a gauss-newton smoother scheme")));
    }
  };

  let (sys_dim, n_ens) = ens.dim();
  if n_ens < 2 {
    return Err(Error::EnsembleTooSmall(n_ens));
  }
  cov.validate(ctx.obs_op.obs_dim())?;
  let lag = obs.ncols();
  let shift = ctx.shift;
  ctx.validate_mda(lag)?;

  let n_slices = if ctx.spin { lag } else { shift };
  let mut fore = Array3::<f64>::zeros((sys_dim, n_ens, n_slices));
  let mut filt = Array3::<f64>::zeros((sys_dim, n_ens, n_slices));
  let mut post = Array3::<f64>::zeros((sys_dim, n_ens, shift));
  let mut iterations = 0;

  if ctx.spin {
    // the forecast diagnostics of the warm-up cycle come from the raw
    // prior propagated across the window
    let mut free = ens.clone();
    for l in 0..lag {
      propagate_ensemble(&mut free, ctx.stepper, ctx.f_steps, ctx.state_dim,
                         rng);
      fore.index_axis_mut(Axis(2), l).assign(&free);
    }
  }

  if ctx.mda {
    let reb = ctx.reb_weights.as_ref().expect("validated").clone();
    let mda = ctx.obs_weights.as_ref().expect("validated").clone();

    // stage 0: rebalancing weights, filter diagnostics
    let (stage0, it0) = gn_solve(ens.view(), obs, cov, Some(reb.view()),
                                 Positions::All, adaptive, conditioning,
                                 ctx, rng)?;
    iterations += it0;
    let mut e = stage0;
    if ctx.spin {
      for l in 0..lag {
        propagate_ensemble(&mut e, ctx.stepper, ctx.f_steps, ctx.state_dim,
                           rng);
        filt.index_axis_mut(Axis(2), l).assign(&e);
      }
    } else {
      for l in 0..lag + shift {
        propagate_ensemble(&mut e, ctx.stepper, ctx.f_steps, ctx.state_dim,
                           rng);
        if l >= lag - shift && l < lag {
          filt.index_axis_mut(Axis(2), l - (lag - shift)).assign(&e);
        }
        if l >= lag {
          fore.index_axis_mut(Axis(2), l - lag).assign(&e);
        }
      }
    }

    // stage 1: tempered weights, advances the posterior
    let (mut stage1, it1) = gn_solve(ens.view(), obs, cov,
                                     Some(mda.view()), Positions::All,
                                     adaptive, conditioning, ctx, rng)?;
    iterations += it1;
    finalize(&mut stage1, sys_dim, ctx, rng);
    let mut e = stage1;
    for s in 0..shift {
      propagate_ensemble(&mut e, ctx.stepper, ctx.f_steps, ctx.state_dim,
                         rng);
      post.index_axis_mut(Axis(2), s).assign(&e);
    }
    ens.assign(&e);
  } else {
    let positions = if ctx.spin { Positions::All } else { Positions::Tail };
    let (mut solved, its) = gn_solve(ens.view(), obs, cov, None, positions,
                                     adaptive, conditioning, ctx, rng)?;
    iterations += its;
    finalize(&mut solved, sys_dim, ctx, rng);

    let mut e = solved;
    if ctx.spin {
      for l in 0..lag {
        propagate_ensemble(&mut e, ctx.stepper, ctx.f_steps, ctx.state_dim,
                           rng);
        if l < shift {
          post.index_axis_mut(Axis(2), l).assign(&e);
        }
        filt.index_axis_mut(Axis(2), l).assign(&e);
        if l + 1 == shift {
          ens.assign(&e);
        }
      }
    } else {
      for l in 0..lag + shift {
        propagate_ensemble(&mut e, ctx.stepper, ctx.f_steps, ctx.state_dim,
                           rng);
        if l < shift {
          post.index_axis_mut(Axis(2), l).assign(&e);
          if l + 1 == shift {
            ens.assign(&e);
          }
        }
        if l >= lag - shift && l < lag {
          filt.index_axis_mut(Axis(2), l - (lag - shift)).assign(&e);
        }
        if l >= lag {
          fore.index_axis_mut(Axis(2), l - lag).assign(&e);
        }
      }
    }
  }

  Ok(SmootherOutput { fore, filt, post, iterations })
}

fn finalize<S, R>(e_post: &mut Array2<f64>, sys_dim: usize,
                  ctx: &SmootherCtx<S>, rng: &mut R)
  where S: Stepper + ?Sized,
        R: Rng,
{
  inflate_state(e_post, ctx.state_infl, ctx.state_dim);
  if sys_dim > ctx.state_dim {
    inflate_param(e_post, ctx.param_infl, ctx.state_dim);
    param_random_walk(e_post, ctx.param_wlk, ctx.state_dim, rng);
  }
}

/// Gauss-Newton minimization of the window cost in weight space; returns
/// the posterior ensemble at the window start and the iteration count.
#[allow(clippy::too_many_arguments)]
fn gn_solve<S, R>(ens: ArrayView2<f64>, obs: ArrayView2<f64>, cov: &ObsCov,
                  weights: Option<ArrayView1<f64>>, positions: Positions,
                  adaptive: bool, conditioning: Conditioning,
                  ctx: &SmootherCtx<S>, rng: &mut R)
                  -> Result<(Array2<f64>, usize)>
  where S: Stepper + ?Sized,
        R: Rng,
{
  let n_ens = ens.ncols();
  let lag = obs.ncols();
  let shift = ctx.shift;
  let n1 = n_ens as f64 - 1.0;
  let n_eff = n_ens as f64 + 1.0;
  let eps_n = 1.0 + (n_ens as f64).recip();

  let (x_mean, x0) = mean_and_anomalies(ens);

  let (mut t, mut t_inv) = match conditioning {
    Conditioning::Bundle => {
      (Array2::<f64>::eye(n_ens) * ctx.opts.epsilon,
       Array2::<f64>::eye(n_ens) / ctx.opts.epsilon)
    }
    Conditioning::Transform => {
      (Array2::<f64>::eye(n_ens), Array2::<f64>::eye(n_ens))
    }
  };

  let mut w = Array1::<f64>::zeros(n_ens);
  let mut hess = Array2::<f64>::eye(n_ens);
  let mut iterations = 0;

  for _ in 0..ctx.max_iter {
    // iterate ensemble at the current weights and conditioning
    let shifted_mean = &x_mean + &x0.dot(&w);
    let mut e = x0.dot(&t);
    for mut col in e.axis_iter_mut(Axis(1)) {
      col += &shifted_mean;
    }

    let mut grad_sum = Array1::<f64>::zeros(n_ens);
    let mut hess_sum = Array2::<f64>::zeros((n_ens, n_ens));
    for l in 0..lag {
      propagate_ensemble(&mut e, ctx.stepper, ctx.f_steps, ctx.state_dim,
                         rng);
      let contributes = match positions {
        Positions::All => true,
        Positions::Tail => l >= lag - shift,
      };
      if !contributes {
        continue;
      }
      let tempered;
      let cov_l = match weights {
        Some(ws) => {
          tempered = cov.scaled(ws[l]);
          &tempered
        }
        None => cov,
      };
      let (g_l, h_l) = ienks_increment(e.view(), obs.column(l), cov_l,
                                       ctx.obs_op, &t_inv)?;
      grad_sum += &g_l;
      hess_sum += &h_l;
    }

    let (mut grad, hess_coeff) = if adaptive {
      let zeta = (eps_n + w.dot(&w)).recip();
      (&w * (n_eff * zeta), n_eff - 1.0)
    } else {
      (&w * n1, n1)
    };
    grad -= &grad_sum;
    hess = hess_sum;
    for i in 0..n_ens {
      hess[[i, i]] += hess_coeff;
    }

    let dw = match conditioning {
      Conditioning::Transform => {
        let factors = linalg::sym_factors(hess.view())?;
        let dw = factors.inv.dot(&grad);
        t = factors.inv_sqrt;
        t_inv = factors.sqrt;
        dw
      }
      Conditioning::Bundle => linalg::chol_solve(hess.view(), grad.view())?,
    };
    w -= &dw;
    iterations += 1;
    if dw.dot(&dw).sqrt() < ctx.opts.tol {
      break;
    }
  }
  if iterations == ctx.max_iter {
    warn!("ienks: outer iteration cap {} reached", ctx.max_iter);
  }

  let t_final = if adaptive {
    let zeta = (eps_n + w.dot(&w)).recip();
    let mut h_star = hess.clone();
    let rank1 = 2.0 * n_eff * zeta * zeta;
    for i in 0..n_ens {
      h_star[[i, i]] += -(n_eff - 1.0) + n_eff * zeta;
      for k in 0..n_ens {
        h_star[[i, k]] -= rank1 * w[i] * w[k];
      }
    }
    linalg::sym_factors(h_star.view())?.inv_sqrt
  } else {
    linalg::sym_factors(hess.view())?.inv_sqrt
  };

  // posterior ensemble at the window start
  let u = sampling::mean_preserving_orthogonal(rng, n_ens);
  let shifted_mean = &x_mean + &x0.dot(&w);
  let mut e_post = x0.dot(&t_final).dot(&u) * n1.sqrt();
  for mut col in e_post.axis_iter_mut(Axis(1)) {
    col += &shifted_mean;
  }
  Ok((e_post, iterations))
}

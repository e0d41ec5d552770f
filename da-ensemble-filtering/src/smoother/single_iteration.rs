//! Single-iteration smoother: one pass over the window per cycle, with the
//! transforms at the new observations applied in parallel to the ensemble
//! at the window start, which is then propagated into the next cycle.

use crate::analysis::Analysis;
use crate::cov::ObsCov;
use crate::filter::propagate_ensemble;
use crate::inflation::{inflate_param, inflate_state, param_random_walk};
use crate::smoother::{SmootherCtx, SmootherOutput};
use crate::transform::{transform, update_ensemble};
use da_core::{Result, Stepper};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;

/// One cycle over the `lag` observations in `obs` (columns oldest to
/// newest), entering with the ensemble at the window start. Under SDA only
/// the trailing `shift` observations (all of them during spin) contribute
/// transforms; under MDA the window is traversed twice, first with the
/// rebalancing weights for the forecast/filter diagnostics, then with the
/// tempering weights to advance the posterior.
pub fn ls_smoother_single_iteration<S, R>(analysis: &Analysis,
                                          ens: &mut Array2<f64>,
                                          obs: ArrayView2<f64>,
                                          cov: &ObsCov,
                                          ctx: &SmootherCtx<S>,
                                          rng: &mut R)
                                          -> Result<SmootherOutput>
  where S: Stepper + ?Sized,
        R: Rng,
{
  let (sys_dim, n_ens) = ens.dim();
  let lag = obs.ncols();
  let shift = ctx.shift;
  ctx.validate_mda(lag)?;

  let n_slices = if ctx.spin { lag } else { shift };
  let mut fore = Array3::<f64>::zeros((sys_dim, n_ens, n_slices));
  let mut filt = Array3::<f64>::zeros((sys_dim, n_ens, n_slices));
  let mut iterations = 0;

  let mut ens_0 = ens.clone();

  if ctx.mda {
    let reb = ctx.reb_weights.as_ref().expect("validated");
    let mda = ctx.obs_weights.as_ref().expect("validated");

    // stage 0: rebalancing pass, diagnostics only
    let mut run = ens_0.clone();
    for l in 0..lag {
      propagate_ensemble(&mut run, ctx.stepper, ctx.f_steps, ctx.state_dim,
                         rng);
      let diagnosed = ctx.spin || l >= lag - shift;
      if diagnosed {
        record(&mut fore, &run, l, lag, shift, ctx.spin);
      }

      let tempered = cov.scaled(reb[l]);
      let result = transform(analysis, run.view(), obs.column(l), &tempered,
                             ctx.obs_op, &ctx.opts, rng)?;
      iterations += result.iterations;
      update_ensemble(&mut run, &result.transform);
      if ctx.spin {
        inflate_state(&mut run, ctx.state_infl, ctx.state_dim);
      }
      if diagnosed {
        record(&mut filt, &run, l, lag, shift, ctx.spin);
      }
    }

    // stage 1: tempered pass, advances the window-start ensemble
    let mut run = ens_0.clone();
    for l in 0..lag {
      propagate_ensemble(&mut run, ctx.stepper, ctx.f_steps, ctx.state_dim,
                         rng);
      let tempered = cov.scaled(mda[l]);
      let result = transform(analysis, run.view(), obs.column(l), &tempered,
                             ctx.obs_op, &ctx.opts, rng)?;
      iterations += result.iterations;
      update_ensemble(&mut run, &result.transform);
      update_ensemble(&mut ens_0, &result.transform);
    }
  } else {
    let mut run = ens_0.clone();
    for l in 0..lag {
      propagate_ensemble(&mut run, ctx.stepper, ctx.f_steps, ctx.state_dim,
                         rng);
      let is_new = ctx.spin || l >= lag - shift;
      if !is_new {
        continue;
      }
      record(&mut fore, &run, l, lag, shift, ctx.spin);

      let result = transform(analysis, run.view(), obs.column(l), cov,
                             ctx.obs_op, &ctx.opts, rng)?;
      iterations += result.iterations;
      update_ensemble(&mut run, &result.transform);
      update_ensemble(&mut ens_0, &result.transform);
      if ctx.spin {
        inflate_state(&mut run, ctx.state_infl, ctx.state_dim);
      }
      record(&mut filt, &run, l, lag, shift, ctx.spin);
    }
  }

  // reset to the re-analyzed window start and advance into the next cycle
  ens.assign(&ens_0);
  inflate_state(ens, ctx.state_infl, ctx.state_dim);
  if sys_dim > ctx.state_dim {
    inflate_param(ens, ctx.param_infl, ctx.state_dim);
    param_random_walk(ens, ctx.param_wlk, ctx.state_dim, rng);
  }

  let mut post = Array3::<f64>::zeros((sys_dim, n_ens, shift));
  for s in 0..shift {
    propagate_ensemble(ens, ctx.stepper, ctx.f_steps, ctx.state_dim, rng);
    post.index_axis_mut(Axis(2), s).assign(ens);
  }

  Ok(SmootherOutput { fore, filt, post, iterations })
}

fn record(stack: &mut Array3<f64>, ens: &Array2<f64>, l: usize, lag: usize,
          shift: usize, spin: bool) {
  let index = if spin {
    l
  } else {
    debug_assert!(l >= lag - shift);
    l - (lag - shift)
  };
  stack.index_axis_mut(Axis(2), index).assign(ens);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::obs::ObsOperator;
  use crate::sampling::gaussian_ensemble;
  use crate::smoother::{mda_weights, reb_weights};
  use crate::transform::TransformOpts;
  use approx::assert_abs_diff_eq;
  use da_models::Lorenz96;
  use da_solvers::Rk4;
  use ndarray::{Array1, Array2};
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn ctx_with<'a>(stepper: &'a Rk4<Lorenz96>, op: &'a ObsOperator,
                  shift: usize, spin: bool, mda: bool, lag: usize)
                  -> SmootherCtx<'a, Rk4<Lorenz96>> {
    SmootherCtx {
      stepper,
      f_steps: 2,
      obs_op: op,
      state_dim: 8,
      state_infl: 1.01,
      param_infl: 1.0,
      param_wlk: 0.0,
      opts: TransformOpts::default(),
      shift,
      spin,
      mda,
      reb_weights: if mda { Some(reb_weights(lag, shift).unwrap()) }
                   else { None },
      obs_weights: if mda { Some(mda_weights(lag, shift).unwrap()) }
                   else { None },
      max_iter: 5,
    }
  }

  #[test]
  fn last_posterior_slice_is_the_returned_ensemble() {
    let dim = 8;
    let stepper = Rk4::new(Lorenz96::standard(dim), 0.01);
    let op = ObsOperator::new(dim, dim, 1.0).unwrap();
    let cov = ObsCov::uniform(1.0);
    let mut rng = StdRng::seed_from_u64(19);

    let mean = Array1::from_shape_fn(dim, |i| (i as f64).sin());
    let mut ens = gaussian_ensemble(&mut rng, mean.view(), 0.5, 7);
    let lag = 4;
    let ctx = ctx_with(&stepper, &op, 2, false, false, lag);
    let obs = Array2::from_shape_fn((dim, lag), |(i, l)| {
      0.2 * l as f64 + 0.1 * i as f64
    });

    let out = ls_smoother_single_iteration(&"etks".parse().unwrap(),
                                           &mut ens, obs.view(), &cov, &ctx,
                                           &mut rng).unwrap();
    assert_eq!(out.fore.len_of(Axis(2)), 2);
    let last = out.post.index_axis(Axis(2), 1);
    for i in 0..dim {
      for j in 0..7 {
        assert_abs_diff_eq!(last[[i, j]], ens[[i, j]], epsilon = 0.0);
      }
    }
  }

  #[test]
  fn spin_records_the_full_window() {
    let dim = 8;
    let stepper = Rk4::new(Lorenz96::standard(dim), 0.01);
    let op = ObsOperator::new(dim, dim, 1.0).unwrap();
    let cov = ObsCov::uniform(1.0);
    let mut rng = StdRng::seed_from_u64(20);

    let mean = Array1::from_shape_fn(dim, |i| (i as f64).cos());
    let mut ens = gaussian_ensemble(&mut rng, mean.view(), 0.5, 7);
    let lag = 4;
    let ctx = ctx_with(&stepper, &op, 2, true, false, lag);
    let obs = Array2::zeros((dim, lag));

    let out = ls_smoother_single_iteration(&"etks".parse().unwrap(),
                                           &mut ens, obs.view(), &cov, &ctx,
                                           &mut rng).unwrap();
    assert_eq!(out.fore.len_of(Axis(2)), lag);
    assert_eq!(out.filt.len_of(Axis(2)), lag);
    assert_eq!(out.post.len_of(Axis(2)), 2);
  }

  #[test]
  fn mda_requires_consistent_weights() {
    let dim = 8;
    let stepper = Rk4::new(Lorenz96::standard(dim), 0.01);
    let op = ObsOperator::new(dim, dim, 1.0).unwrap();
    let cov = ObsCov::uniform(1.0);
    let mut rng = StdRng::seed_from_u64(21);

    let mean = Array1::from_shape_fn(dim, |i| i as f64 * 0.1);
    let mut ens = gaussian_ensemble(&mut rng, mean.view(), 0.5, 6);
    let lag = 4;
    let mut ctx = ctx_with(&stepper, &op, 2, false, true, lag);
    ctx.obs_weights = None;
    let obs = Array2::zeros((dim, lag));

    let out = ls_smoother_single_iteration(&"etks".parse().unwrap(),
                                           &mut ens, obs.view(), &cov, &ctx,
                                           &mut rng);
    assert!(out.is_err());
  }

  #[test]
  fn mda_pass_produces_finite_output() {
    let dim = 8;
    let stepper = Rk4::new(Lorenz96::standard(dim), 0.01);
    let op = ObsOperator::new(dim, dim, 1.0).unwrap();
    let cov = ObsCov::uniform(1.0);
    let mut rng = StdRng::seed_from_u64(22);

    let mean = Array1::from_shape_fn(dim, |i| (i as f64 * 0.3).sin());
    let mut ens = gaussian_ensemble(&mut rng, mean.view(), 0.5, 7);
    let lag = 4;
    let ctx = ctx_with(&stepper, &op, 2, false, true, lag);
    let obs = Array2::from_shape_fn((dim, lag), |(i, l)| {
      0.1 * (i + l) as f64
    });

    let out = ls_smoother_single_iteration(&"etks".parse().unwrap(),
                                           &mut ens, obs.view(), &cov, &ctx,
                                           &mut rng).unwrap();
    assert!(out.post.iter().all(|v| v.is_finite()));
    assert!(ens.iter().all(|v| v.is_finite()));
  }
}

//! Sequential ensemble filter cycle: forecast, analysis transform, update,
//! inflation, and the parameter-estimation extras.

use crate::analysis::Analysis;
use crate::cov::ObsCov;
use crate::inflation::{inflate_param, inflate_state, param_random_walk};
use crate::obs::ObsOperator;
use crate::transform::{transform, update_ensemble, TransformOpts};
use da_core::{Result, Stepper};
use ndarray::{Array2, ArrayView1, Axis};
use rand::Rng;

/// Per-cycle configuration shared by the filter and smoother drivers.
pub struct FilterCtx<'a, S: Stepper + ?Sized> {
  pub stepper: &'a S,
  /// integrator sub-steps between observation times
  pub f_steps: usize,
  pub obs_op: &'a ObsOperator,
  /// dynamical state rows; parameter rows follow
  pub state_dim: usize,
  pub state_infl: f64,
  pub param_infl: f64,
  pub param_wlk: f64,
  pub opts: TransformOpts,
}

/// Forecast and filtered snapshots of one assimilation cycle.
pub struct FilterCycle {
  pub fore: Array2<f64>,
  pub filt: Array2<f64>,
  pub iterations: usize,
}

/// Advance every ensemble column by `f_steps` model steps, merging each
/// column's trailing parameter rows into the step.
pub fn propagate_ensemble<S, R>(ens: &mut Array2<f64>, stepper: &S,
                                f_steps: usize, state_dim: usize,
                                rng: &mut R)
  where S: Stepper + ?Sized,
        R: Rng,
{
  for mut col in ens.axis_iter_mut(Axis(1)) {
    let (mut state, params) = col.split_at(Axis(0), state_dim);
    for _ in 0..f_steps {
      stepper.step(0.0, state.view_mut(), params.view(), rng);
    }
  }
}

/// One forecast-analysis cycle, mutating the ensemble in place.
pub fn ensemble_filter<'a, S, R>(analysis: &Analysis, ens: &mut Array2<f64>,
                             y: ArrayView1<'a, f64>, cov: &'a ObsCov,
                             ctx: &FilterCtx<'a, S>, rng: &mut R)
                             -> Result<FilterCycle>
  where S: Stepper + ?Sized,
        R: Rng,
{
  propagate_ensemble(ens, ctx.stepper, ctx.f_steps, ctx.state_dim, rng);
  let fore = ens.clone();

  let result = transform(analysis, ens.view(), y, cov, ctx.obs_op,
                         &ctx.opts, rng)?;
  update_ensemble(ens, &result.transform);

  inflate_state(ens, ctx.state_infl, ctx.state_dim);
  if ens.nrows() > ctx.state_dim {
    inflate_param(ens, ctx.param_infl, ctx.state_dim);
    param_random_walk(ens, ctx.param_wlk, ctx.state_dim, rng);
  }
  let filt = ens.clone();

  Ok(FilterCycle { fore, filt, iterations: result.iterations })
}

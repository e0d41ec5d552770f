//! Classical lag-shift smoother: every new transform is applied to the
//! earlier posterior snapshots inside the window as soon as it is
//! computed.

use crate::analysis::Analysis;
use crate::cov::ObsCov;
use crate::filter::propagate_ensemble;
use crate::inflation::{inflate_param, inflate_state, param_random_walk};
use crate::smoother::{PosteriorRing, SmootherCtx, SmootherOutput};
use crate::transform::{transform, update_ensemble};
use da_core::{Result, Stepper};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;

/// One cycle over the `shift` new observations in `obs` (columns ordered
/// oldest to newest). The ring carries the posterior snapshots across
/// cycles with capacity `lag + shift`; the returned `post` block holds the
/// snapshots that left the window this cycle, fully re-analyzed.
pub fn ls_smoother_classic<S, R>(analysis: &Analysis, ens: &mut Array2<f64>,
                                 obs: ArrayView2<f64>, cov: &ObsCov,
                                 ctx: &SmootherCtx<S>,
                                 ring: &mut PosteriorRing, rng: &mut R)
                                 -> Result<SmootherOutput>
  where S: Stepper + ?Sized,
        R: Rng,
{
  let (sys_dim, n_ens) = ens.dim();
  let shift = obs.ncols();
  let lag = ring.capacity() - shift;
  let mut iterations = 0;

  let mut fore = Array3::<f64>::zeros((sys_dim, n_ens, shift));
  let mut filt = Array3::<f64>::zeros((sys_dim, n_ens, shift));

  for s in 0..shift {
    propagate_ensemble(ens, ctx.stepper, ctx.f_steps, ctx.state_dim, rng);
    fore.index_axis_mut(Axis(2), s).assign(ens);

    let result = transform(analysis, ens.view(), obs.column(s), cov,
                           ctx.obs_op, &ctx.opts, rng)?;
    iterations += result.iterations;

    update_ensemble(ens, &result.transform);
    inflate_state(ens, ctx.state_infl, ctx.state_dim);
    if sys_dim > ctx.state_dim {
      inflate_param(ens, ctx.param_infl, ctx.state_dim);
      param_random_walk(ens, ctx.param_wlk, ctx.state_dim, rng);
    }
    filt.index_axis_mut(Axis(2), s).assign(ens);

    // re-analyze every earlier snapshot still inside the window, then
    // record the newest posterior
    for k in 0..ring.len() {
      let mut snapshot = ring.get(k).to_owned();
      update_ensemble(&mut snapshot, &result.transform);
      ring.get_mut(k).assign(&snapshot);
    }
    ring.push(ens.view());
  }

  // snapshots older than the lag leave the window, finalized
  let leaving = ring.len().saturating_sub(lag);
  let post = ring.pop_front(leaving);

  Ok(SmootherOutput { fore, filt, post, iterations })
}

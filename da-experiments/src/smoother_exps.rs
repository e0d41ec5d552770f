//! Lag-shift smoother twin experiments. Observations are generated once
//! per experiment (one noisy draw per analysis time) and windows are
//! sliced from that stream, so overlapping windows revisit the same
//! observation values.

use crate::artifact::ResultRecord;
use crate::filter_exps::{derive_seed, trim_iterations, ModelStepper};
use crate::twin::{observe_truth, TimeSeries};
use da_core::{Error, Result};
use da_ensemble_filtering::sampling::gaussian_ensemble;
use da_ensemble_filtering::smoother::{ls_smoother_classic,
                                      ls_smoother_gauss_newton,
                                      ls_smoother_single_iteration,
                                      mda_weights, reb_weights,
                                      PosteriorRing, SmootherCtx};
use da_ensemble_filtering::stats::analyze_ens;
use da_ensemble_filtering::{Analysis, ObsCov, ObsOperator, TransformOpts};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmootherExpConfig {
  pub method: String,
  pub seed: u64,
  /// observation times to assimilate
  pub nanl: usize,
  pub burn: usize,
  pub obs_un: f64,
  pub obs_dim: usize,
  pub gamma: f64,
  pub n_ens: usize,
  pub state_infl: f64,
  pub lag: usize,
  pub shift: usize,
  #[serde(default)]
  pub mda: bool,
}

struct Exp {
  analysis: Analysis,
  truth: Array2<f64>,
  obs: Array2<f64>,
  op: ObsOperator,
  cov: ObsCov,
  rng: StdRng,
  record: ResultRecord,
}

impl Exp {
  fn new(ts: &TimeSeries, cfg: &SmootherExpConfig, experiment: &str)
         -> Result<Exp> {
    if cfg.shift == 0 || cfg.lag < cfg.shift {
      return Err(Error::LagShiftMismatch { lag: cfg.lag, shift: cfg.shift });
    }
    if ts.config.nanl < cfg.nanl + 1 {
      return Err(Error::Artifact(format!(
        "truth series holds {} states, experiment needs {}",
        ts.config.nanl, cfg.nanl + 1)));
    }
    let analysis: Analysis = cfg.method.parse()?;
    let truth = ts.states();
    let op = ObsOperator::new(ts.config.sys_dim, cfg.obs_dim, cfg.gamma)?;
    let cov = ObsCov::uniform(cfg.obs_un);
    let mut rng = StdRng::seed_from_u64(derive_seed(cfg.seed, &cfg.method,
                                                    cfg.gamma, cfg.n_ens,
                                                    cfg.obs_dim));

    // one observation per analysis time, drawn up front; column t holds
    // the observation of truth column t + 1
    let mut obs = Array2::<f64>::zeros((cfg.obs_dim, cfg.nanl));
    for t in 0..cfg.nanl {
      let y = observe_truth(&op, truth.index_axis(Axis(1), t + 1),
                            cfg.obs_un, &mut rng);
      obs.column_mut(t).assign(&y);
    }

    let record = ResultRecord {
      experiment: experiment.to_string(),
      method: cfg.method.clone(),
      seed: cfg.seed,
      obs_un: cfg.obs_un,
      obs_dim: cfg.obs_dim,
      gamma: cfg.gamma,
      n_ens: cfg.n_ens,
      state_infl: cfg.state_infl,
      h: ts.config.h,
      tanl: ts.config.tanl,
      diffusion: ts.config.diffusion,
      nanl: cfg.nanl,
      burn: cfg.burn,
      lag: Some(cfg.lag),
      shift: Some(cfg.shift),
      mda: Some(cfg.mda),
      param_err: None,
      param_wlk: None,
      param_infl: None,
      fore_rmse: Vec::new(),
      fore_spread: Vec::new(),
      filt_rmse: Vec::new(),
      filt_spread: Vec::new(),
      post_rmse: Vec::new(),
      post_spread: Vec::new(),
      param_rmse: Vec::new(),
      param_spread: Vec::new(),
      iterations: Vec::new(),
    };

    Ok(Exp { analysis, truth, obs, op, cov, rng, record })
  }

  fn initial_ensemble(&mut self, n_ens: usize) -> Array2<f64> {
    gaussian_ensemble(&mut self.rng, self.truth.index_axis(Axis(1), 0), 1.0,
                      n_ens)
  }

  /// Score a stack slice against the truth at 1-based observation time
  /// `time`, pushing into the chosen series.
  fn score(&mut self, stack: &Array3<f64>, slice: usize, time: usize,
           kind: Kind) {
    if time > self.record.nanl {
      return;
    }
    let truth_t = self.truth.index_axis(Axis(1), time);
    let (rmse, spread) = analyze_ens(stack.index_axis(Axis(2), slice),
                                     truth_t);
    let (r, s) = match kind {
      Kind::Fore => (&mut self.record.fore_rmse,
                     &mut self.record.fore_spread),
      Kind::Filt => (&mut self.record.filt_rmse,
                     &mut self.record.filt_spread),
      Kind::Post => (&mut self.record.post_rmse,
                     &mut self.record.post_spread),
    };
    r.push(rmse);
    s.push(spread);
  }
}

#[derive(Clone, Copy)]
enum Kind {
  Fore,
  Filt,
  Post,
}

fn ctx_for<'a>(cfg: &SmootherExpConfig, stepper: &'a dyn da_core::Stepper,
               op: &'a ObsOperator, f_steps: usize, state_dim: usize,
               spin: bool) -> SmootherCtx<'a, dyn da_core::Stepper + 'a> {
  SmootherCtx {
    stepper,
    f_steps,
    obs_op: op,
    state_dim,
    state_infl: cfg.state_infl,
    param_infl: 1.0,
    param_wlk: 0.0,
    opts: TransformOpts::default(),
    shift: cfg.shift,
    spin,
    mda: cfg.mda,
    reb_weights: None,
    obs_weights: None,
    max_iter: 5,
  }
}

/// MDA weight vectors for a cycle: unit weights during the warm-up cycle
/// (every observation is new), steady-state tempering afterwards.
fn cycle_weights(cfg: &SmootherExpConfig, spin: bool)
                 -> Result<(Option<Array1<f64>>, Option<Array1<f64>>)> {
  if !cfg.mda {
    return Ok((None, None));
  }
  if spin {
    let ones = Array1::<f64>::ones(cfg.lag);
    return Ok((Some(ones.clone()), Some(ones)));
  }
  Ok((Some(reb_weights(cfg.lag, cfg.shift)?),
      Some(mda_weights(cfg.lag, cfg.shift)?)))
}

/// Classical smoother twin experiment.
pub fn smoother_classic(ts: &TimeSeries, cfg: &SmootherExpConfig)
                        -> Result<ResultRecord> {
  let stepper = ModelStepper::for_series(ts);
  let mut exp = Exp::new(ts, cfg, "smoother_classic")?;
  let sys_dim = ts.config.sys_dim;
  let f_steps = ts.config.f_steps();

  let mut ens = exp.initial_ensemble(cfg.n_ens);
  let mut ring = PosteriorRing::new(sys_dim, cfg.n_ens, cfg.lag + cfg.shift);

  let cycles = cfg.nanl / cfg.shift;
  let mut post_time = 1;
  for c in 0..cycles {
    let first = c * cfg.shift;
    let obs_block = exp.obs.slice(ndarray::s![.., first..first + cfg.shift])
      .to_owned();
    let ctx = ctx_for(cfg, stepper.as_dyn(), &exp.op, f_steps, sys_dim,
                      c == 0);
    let out = ls_smoother_classic(&exp.analysis, &mut ens, obs_block.view(),
                                  &exp.cov, &ctx, &mut ring, &mut exp.rng)?;
    exp.record.iterations.push(out.iterations);

    for s in 0..cfg.shift {
      exp.score(&out.fore, s, first + s + 1, Kind::Fore);
      exp.score(&out.filt, s, first + s + 1, Kind::Filt);
    }
    for s in 0..out.post.len_of(Axis(2)) {
      exp.score(&out.post, s, post_time, Kind::Post);
      post_time += 1;
    }
  }

  trim_iterations(&mut exp.record.iterations);
  Ok(exp.record)
}

/// Single-iteration smoother twin experiment.
pub fn smoother_single_iteration(ts: &TimeSeries, cfg: &SmootherExpConfig)
                                 -> Result<ResultRecord> {
  let stepper = ModelStepper::for_series(ts);
  let mut exp = Exp::new(ts, cfg, "smoother_single_iteration")?;
  let sys_dim = ts.config.sys_dim;
  let f_steps = ts.config.f_steps();

  let mut ens = exp.initial_ensemble(cfg.n_ens);
  if cfg.nanl < cfg.lag {
    return Err(Error::LagShiftMismatch { lag: cfg.lag, shift: cfg.shift });
  }

  let cycles = (cfg.nanl - cfg.lag) / cfg.shift + 1;
  for c in 0..cycles {
    let spin = c == 0;
    let first = c * cfg.shift;
    let obs_block = exp.obs.slice(ndarray::s![.., first..first + cfg.lag])
      .to_owned();
    let (reb, mda) = cycle_weights(cfg, spin)?;
    let mut ctx = ctx_for(cfg, stepper.as_dyn(), &exp.op, f_steps, sys_dim,
                          spin);
    ctx.reb_weights = reb;
    ctx.obs_weights = mda;

    let out = ls_smoother_single_iteration(&exp.analysis, &mut ens,
                                           obs_block.view(), &exp.cov, &ctx,
                                           &mut exp.rng)?;
    exp.record.iterations.push(out.iterations);

    let diag = out.fore.len_of(Axis(2));
    for s in 0..diag {
      // spin covers the whole window, later cycles the trailing shift
      let time = if spin { first + s + 1 }
                 else { first + (cfg.lag - cfg.shift) + s + 1 };
      exp.score(&out.fore, s, time, Kind::Fore);
      exp.score(&out.filt, s, time, Kind::Filt);
    }
    for s in 0..cfg.shift {
      exp.score(&out.post, s, first + s + 1, Kind::Post);
    }
  }

  trim_iterations(&mut exp.record.iterations);
  Ok(exp.record)
}

/// Iterative (Gauss-Newton) smoother twin experiment.
pub fn smoother_gauss_newton(ts: &TimeSeries, cfg: &SmootherExpConfig)
                             -> Result<ResultRecord> {
  let stepper = ModelStepper::for_series(ts);
  let mut exp = Exp::new(ts, cfg, "smoother_gauss_newton")?;
  let sys_dim = ts.config.sys_dim;
  let f_steps = ts.config.f_steps();

  let mut ens = exp.initial_ensemble(cfg.n_ens);
  if cfg.nanl < cfg.lag {
    return Err(Error::LagShiftMismatch { lag: cfg.lag, shift: cfg.shift });
  }

  let cycles = (cfg.nanl - cfg.lag) / cfg.shift + 1;
  for c in 0..cycles {
    let spin = c == 0;
    let first = c * cfg.shift;
    let obs_block = exp.obs.slice(ndarray::s![.., first..first + cfg.lag])
      .to_owned();
    let (reb, mda) = cycle_weights(cfg, spin)?;
    let mut ctx = ctx_for(cfg, stepper.as_dyn(), &exp.op, f_steps, sys_dim,
                          spin);
    ctx.reb_weights = reb;
    ctx.obs_weights = mda;

    let out = ls_smoother_gauss_newton(&exp.analysis, &mut ens,
                                       obs_block.view(), &exp.cov, &ctx,
                                       &mut exp.rng)?;
    exp.record.iterations.push(out.iterations);

    let diag = out.filt.len_of(Axis(2));
    for s in 0..diag {
      let filt_time = if spin { first + s + 1 }
                      else { first + (cfg.lag - cfg.shift) + s + 1 };
      exp.score(&out.filt, s, filt_time, Kind::Filt);
    }
    for s in 0..out.fore.len_of(Axis(2)) {
      // during spin the forecast covers the window; afterwards it is the
      // free run beyond the newest observation
      let fore_time = if spin { first + s + 1 }
                      else { first + cfg.lag + s + 1 };
      exp.score(&out.fore, s, fore_time, Kind::Fore);
    }
    for s in 0..cfg.shift {
      exp.score(&out.post, s, first + s + 1, Kind::Post);
    }
  }

  trim_iterations(&mut exp.record.iterations);
  Ok(exp.record)
}

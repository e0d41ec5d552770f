//! End-to-end twin experiments on the 40-variable Lorenz-96 benchmark.

use da_experiments::artifact::mean_after_burn;
use da_experiments::{filter_param, filter_state, l96_time_series,
                     smoother_classic, smoother_gauss_newton,
                     FilterExpConfig, SmootherExpConfig, TimeSeries,
                     TimeSeriesConfig};

fn truth(nanl: usize, seed: u64) -> TimeSeries {
  l96_time_series(&TimeSeriesConfig {
    sys_dim: 40,
    forcing: 8.0,
    h: 0.01,
    tanl: 0.05,
    spin: 500,
    nanl,
    diffusion: 0.0,
    seed,
  })
}

fn filter_config() -> FilterExpConfig {
  FilterExpConfig {
    method: "etkf".to_string(),
    seed: 0,
    nanl: 100,
    burn: 40,
    obs_un: 1.0,
    obs_dim: 40,
    gamma: 1.0,
    n_ens: 21,
    state_infl: 1.02,
    param_err: 0.0,
    param_wlk: 0.0,
    param_infl: 1.0,
  }
}

#[test]
fn etkf_filter_rmse_beats_observation_noise() {
  let ts = truth(102, 0);
  let cfg = filter_config();
  let rec = filter_state(&ts, &cfg).unwrap();

  assert!(rec.filt_rmse.iter().all(|v| v.is_finite()));
  let rmse = mean_after_burn(&rec.filt_rmse, cfg.burn);
  assert!(rmse < 0.35, "converged filter rmse = {rmse}");
  // the forecast carries more error than the analysis
  let fore = mean_after_burn(&rec.fore_rmse, cfg.burn);
  assert!(fore > rmse);
}

#[test]
fn etks_classic_improves_on_the_filter() {
  let ts = truth(102, 0);
  let cfg = SmootherExpConfig {
    method: "etks".to_string(),
    seed: 0,
    nanl: 100,
    burn: 40,
    obs_un: 1.0,
    obs_dim: 40,
    gamma: 1.0,
    n_ens: 21,
    state_infl: 1.02,
    lag: 10,
    shift: 1,
    mda: false,
  };
  let rec = smoother_classic(&ts, &cfg).unwrap();

  // posterior series covers the times that left the window; compare both
  // series over the same assimilation times past the burn
  let n_post = rec.post_rmse.len();
  let filt = mean_after_burn(&rec.filt_rmse[..n_post], cfg.burn);
  let post = mean_after_burn(&rec.post_rmse, cfg.burn);
  assert!(post.is_finite() && filt.is_finite());
  assert!(post < 0.9 * filt,
          "smoothing gained too little: post = {post}, filt = {filt}");
}

#[test]
fn mlef_line_search_converges_under_cubic_observations() {
  let ts = truth(102, 0);
  let mut cfg = filter_config();
  cfg.method = "mlef-transform-ls".to_string();
  cfg.gamma = 3.0;
  let rec = filter_state(&ts, &cfg).unwrap();

  assert!(rec.filt_rmse.iter().all(|v| v.is_finite()));
  let rmse = mean_after_burn(&rec.filt_rmse, cfg.burn);
  assert!(rmse < 1.0, "rmse = {rmse}");

  let fast = rec.iterations.iter().filter(|&&i| i <= 10).count();
  let frac = fast as f64 / rec.iterations.len() as f64;
  assert!(frac >= 0.9, "only {frac} of cycles converged in 10 iterations");
}

#[test]
fn enkf_n_dual_stays_finite_at_borderline_rank() {
  let ts = truth(102, 0);
  let mut cfg = filter_config();
  cfg.method = "enkf-n-dual".to_string();
  cfg.n_ens = 15;
  cfg.state_infl = 1.0;
  let rec = filter_state(&ts, &cfg).unwrap();

  assert!(rec.filt_rmse.iter().all(|v| v.is_finite()));
  assert!(rec.fore_rmse.iter().all(|v| v.is_finite()));
  assert!(rec.filt_spread.iter().all(|v| v.is_finite()));
  // bounded by the attractor scale even if tracking is marginal
  assert!(rec.filt_rmse.iter().all(|v| *v < 10.0));
}

#[test]
fn ienks_mda_two_stage_iteration_budget() {
  let ts = truth(115, 0);
  let cfg = SmootherExpConfig {
    method: "ienks-transform".to_string(),
    seed: 0,
    nanl: 99,
    burn: 30,
    obs_un: 1.0,
    obs_dim: 40,
    gamma: 1.0,
    n_ens: 21,
    state_infl: 1.02,
    lag: 9,
    shift: 3,
    mda: true,
  };
  let rec = smoother_gauss_newton(&ts, &cfg).unwrap();

  assert!(rec.filt_rmse.iter().all(|v| v.is_finite()));
  assert!(rec.post_rmse.iter().all(|v| v.is_finite()));
  // two optimization stages per cycle, each capped at five iterations
  assert!(rec.iterations.iter().all(|&m| m >= 2 && m <= 10),
          "iterations = {:?}", rec.iterations);
}

#[test]
fn etkf_parameter_estimation_reduces_forcing_error() {
  let ts = truth(1001, 0);
  let cfg = FilterExpConfig {
    method: "etkf".to_string(),
    seed: 0,
    nanl: 1000,
    burn: 100,
    obs_un: 1.0,
    obs_dim: 40,
    gamma: 1.0,
    n_ens: 25,
    state_infl: 1.02,
    param_err: 0.03,
    param_wlk: 0.001,
    param_infl: 1.0,
  };
  let rec = filter_param(&ts, &cfg).unwrap();
  assert_eq!(rec.param_rmse.len(), 1000);
  assert!(rec.param_rmse.iter().all(|v| v.is_finite()));

  // the forcing error decays in moving average across the experiment
  let early: f64 = rec.param_rmse[..200].iter().sum::<f64>() / 200.0;
  let mid: f64 = rec.param_rmse[400..600].iter().sum::<f64>() / 200.0;
  let late: f64 = rec.param_rmse[800..].iter().sum::<f64>() / 200.0;
  assert!(mid < early, "mid = {mid}, early = {early}");
  assert!(late < early, "late = {late}, early = {early}");

  // state tracking survives the joint estimation
  let rmse = mean_after_burn(&rec.filt_rmse, cfg.burn);
  assert!(rmse < 0.5, "state rmse = {rmse}");
}

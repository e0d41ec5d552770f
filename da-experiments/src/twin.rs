//! Truth-twin time series: a long free run of the model recorded at the
//! analysis interval, persisted with its generating configuration.

use da_core::{Error, Result, Stepper};
use da_models::{L96sTaylor, Lorenz96};
use da_solvers::Rk4;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
  pub sys_dim: usize,
  pub forcing: f64,
  /// integrator step
  pub h: f64,
  /// time between recorded analysis states
  pub tanl: f64,
  /// discarded spin-up, in analysis intervals
  pub spin: usize,
  /// recorded analysis states
  pub nanl: usize,
  pub diffusion: f64,
  pub seed: u64,
}

impl TimeSeriesConfig {
  pub fn f_steps(&self) -> usize {
    (self.tanl / self.h).round() as usize
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
  pub config: TimeSeriesConfig,
  /// row-major `nanl x sys_dim`
  data: Vec<f64>,
}

impl TimeSeries {
  /// States as a `sys_dim x nanl` matrix, one column per analysis time.
  pub fn states(&self) -> Array2<f64> {
    let n = self.config.sys_dim;
    let nanl = self.config.nanl;
    Array2::from_shape_fn((n, nanl), |(i, k)| self.data[k * n + i])
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), self)
      .map_err(|e| Error::Artifact(e.to_string()))
  }

  pub fn load(path: &Path) -> Result<TimeSeries> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
      .map_err(|e| Error::Artifact(e.to_string()))
  }
}

/// Free run of Lorenz-96 from a standard-normal initial state: `spin`
/// analysis intervals are discarded, then `nanl` states are recorded at
/// the analysis spacing. A zero diffusion selects the deterministic RK4
/// integration; otherwise the stochastic Taylor stepper is used.
pub fn l96_time_series(config: &TimeSeriesConfig) -> TimeSeries {
  let model = Lorenz96::new(config.sys_dim, config.forcing);
  let rk4;
  let taylor;
  let stepper: &dyn Stepper = if config.diffusion == 0.0 {
    rk4 = Rk4::new(model, config.h);
    &rk4
  } else {
    taylor = L96sTaylor::new(model, config.h, config.diffusion);
    &taylor
  };

  let mut rng = StdRng::seed_from_u64(config.seed);
  let mut x = Array1::<f64>::zeros(config.sys_dim);
  for v in x.iter_mut() {
    *v = StandardNormal.sample(&mut rng);
  }

  let f_steps = config.f_steps();
  let params = Array1::<f64>::zeros(0);
  let mut advance = |x: &mut Array1<f64>, rng: &mut StdRng| {
    for _ in 0..f_steps {
      stepper.step(0.0, x.view_mut(), params.view(), rng);
    }
  };

  for _ in 0..config.spin {
    advance(&mut x, &mut rng);
  }

  let mut data = Vec::with_capacity(config.nanl * config.sys_dim);
  for _ in 0..config.nanl {
    advance(&mut x, &mut rng);
    data.extend(x.iter().copied());
  }

  TimeSeries { config: config.clone(), data }
}

/// Noisy observation of one truth column through the operator, with
/// uncorrelated noise of standard deviation `obs_un`.
pub fn observe_truth(
  op: &da_ensemble_filtering::ObsOperator, truth: ArrayView1<f64>,
  obs_un: f64, rng: &mut StdRng) -> Array1<f64> {
  let mut y = op.observe_state(truth);
  for v in y.iter_mut() {
    let xi: f64 = StandardNormal.sample(rng);
    *v += obs_un * xi;
  }
  y
}

//! Persisted per-configuration results: the diagnostic series plus a full
//! echo of the identifying parameters, with file names that embed them.

use da_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
  // configuration echo
  pub experiment: String,
  pub method: String,
  pub seed: u64,
  pub obs_un: f64,
  pub obs_dim: usize,
  pub gamma: f64,
  pub n_ens: usize,
  pub state_infl: f64,
  pub h: f64,
  pub tanl: f64,
  pub diffusion: f64,
  pub nanl: usize,
  pub burn: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lag: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shift: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mda: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub param_err: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub param_wlk: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub param_infl: Option<f64>,

  // diagnostic series, one entry per assimilation time
  pub fore_rmse: Vec<f64>,
  pub fore_spread: Vec<f64>,
  pub filt_rmse: Vec<f64>,
  pub filt_spread: Vec<f64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub post_rmse: Vec<f64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub post_spread: Vec<f64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub param_rmse: Vec<f64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub param_spread: Vec<f64>,
  /// kernel iteration totals per cycle, iterative schemes only
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub iterations: Vec<usize>,
}

impl ResultRecord {
  /// Artifact name embedding every identifying parameter.
  pub fn file_name(&self) -> String {
    let mut name = format!(
      "{}_{}_l96_seed_{:04}_obsd_{:02}_gamma_{:+.1}_nens_{:03}_infl_{:.2}_h_\
       {:.3}_tanl_{:.2}_diff_{:.3}",
      self.experiment, self.method, self.seed, self.obs_dim, self.gamma,
      self.n_ens, self.state_infl, self.h, self.tanl, self.diffusion);
    if let (Some(lag), Some(shift)) = (self.lag, self.shift) {
      name.push_str(&format!("_lag_{:03}_shift_{:03}_mda_{}", lag, shift,
                             self.mda.unwrap_or(false)));
    }
    if let Some(wlk) = self.param_wlk {
      name.push_str(&format!("_wlk_{:.4}", wlk));
    }
    name.push_str(".json");
    name
  }

  pub fn save(&self, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(self.file_name());
    let file = File::create(&path)?;
    serde_json::to_writer(BufWriter::new(file), self)
      .map_err(|e| Error::Artifact(e.to_string()))?;
    Ok(path)
  }

  pub fn load(path: &Path) -> Result<ResultRecord> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
      .map_err(|e| Error::Artifact(e.to_string()))
  }
}

/// Mean of a diagnostic series past the burn-in index.
pub fn mean_after_burn(series: &[f64], burn: usize) -> f64 {
  let tail = &series[burn.min(series.len())..];
  if tail.is_empty() {
    return f64::NAN;
  }
  tail.iter().sum::<f64>() / tail.len() as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> ResultRecord {
    ResultRecord {
      experiment: "filter_state".to_string(),
      method: "etkf".to_string(),
      seed: 0,
      obs_un: 1.0,
      obs_dim: 40,
      gamma: 1.0,
      n_ens: 21,
      state_infl: 1.02,
      h: 0.01,
      tanl: 0.05,
      diffusion: 0.0,
      nanl: 100,
      burn: 25,
      lag: None,
      shift: None,
      mda: None,
      param_err: None,
      param_wlk: None,
      param_infl: None,
      fore_rmse: vec![0.5, 0.4],
      fore_spread: vec![0.5, 0.4],
      filt_rmse: vec![0.3, 0.2],
      filt_spread: vec![0.3, 0.2],
      post_rmse: vec![],
      post_spread: vec![],
      param_rmse: vec![],
      param_spread: vec![],
      iterations: vec![],
    }
  }

  #[test]
  fn file_name_embeds_the_identifying_parameters() {
    let name = record().file_name();
    assert!(name.contains("etkf"));
    assert!(name.contains("seed_0000"));
    assert!(name.contains("nens_021"));
    assert!(name.contains("infl_1.02"));
    assert!(name.contains("tanl_0.05"));
    assert!(!name.contains("lag"));
  }

  #[test]
  fn save_load_round_trip() {
    let rec = record();
    let dir = std::env::temp_dir();
    let path = rec.save(&dir).unwrap();
    let back = ResultRecord::load(&path).unwrap();
    assert_eq!(back.method, "etkf");
    assert_eq!(back.filt_rmse, rec.filt_rmse);
    std::fs::remove_file(&path).ok();
  }

  #[test]
  fn burn_mean_skips_the_transient() {
    let series = [10.0, 10.0, 1.0, 3.0];
    approx::assert_abs_diff_eq!(mean_after_burn(&series, 2), 2.0,
                                epsilon = 1e-12);
  }
}

//! Parallel sweep over independent experiment configurations. Each
//! configuration owns its ensemble, buffers, and RNG stream; a failing
//! configuration is logged and skipped without disturbing its neighbors.

use crate::artifact::ResultRecord;
use da_core::Result;
use log::error;
use rayon::prelude::*;

/// Run `f` over every configuration in parallel, returning one slot per
/// configuration in input order; failed configurations yield `None`.
pub fn run_sweep<C, F>(configs: &[C], f: F) -> Vec<Option<ResultRecord>>
  where C: Sync,
        F: Fn(&C) -> Result<ResultRecord> + Sync,
{
  configs
    .par_iter()
    .enumerate()
    .map(|(i, cfg)| match f(cfg) {
      Ok(record) => Some(record),
      Err(e) => {
        error!("configuration {i} failed: {e}");
        None
      }
    })
    .collect()
}

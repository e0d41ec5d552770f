//! Twin-experiment drivers for the ensemble analysis benchmarks: truth
//! time-series generation, filter and smoother experiment loops, persisted
//! result artifacts, and an embarrassingly parallel sweep runner.

pub mod artifact;
pub mod filter_exps;
pub mod progress;
pub mod smoother_exps;
pub mod sweep;
pub mod twin;

pub use artifact::ResultRecord;
pub use sweep::run_sweep;
pub use filter_exps::{filter_param, filter_state, FilterExpConfig};
pub use smoother_exps::{smoother_classic, smoother_gauss_newton,
                        smoother_single_iteration, SmootherExpConfig};
pub use twin::{l96_time_series, TimeSeries, TimeSeriesConfig};

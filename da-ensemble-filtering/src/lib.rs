//! Ensemble Kalman analysis core: observation operators, covariance square
//! roots, the transform engine (EnKF/ETKF/MLEF/EnKF-N/IEnKS kernels), the
//! ensemble filter cycle, and the lag-shift smoother drivers built on it.
//!
//! Ensembles are `sys_dim x n_ens` matrices whose columns are members; rows
//! past `state_dim` carry parameter samples when joint state-parameter
//! estimation is active. Every analysis produces a right-acting transform of
//! the ensemble (a single `n_ens x n_ens` matrix for the stochastic filter,
//! or a `(T, w, U)` triple for the deterministic square-root family) which
//! the update step applies in place.

pub mod analysis;
pub mod cov;
pub mod filter;
pub mod inflation;
pub mod linalg;
pub mod obs;
pub mod optimize;
pub mod sampling;
pub mod smoother;
pub mod stats;
pub mod transform;

pub use analysis::{Analysis, Conditioning, FiniteSizeForm};
pub use cov::ObsCov;
pub use filter::{ensemble_filter, FilterCtx, FilterCycle};
pub use obs::ObsOperator;
pub use smoother::{ls_smoother_classic, ls_smoother_gauss_newton,
                   ls_smoother_single_iteration, PosteriorRing, SmootherCtx,
                   SmootherOutput};
pub use transform::{transform, update_ensemble, Transform, TransformOpts};

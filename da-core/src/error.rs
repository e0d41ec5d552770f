use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Workspace-wide error taxonomy. Configuration errors are raised at cycle
/// entry and are fatal to the configuration; numeric errors are raised from
/// the analysis kernels and are fatal to the cycle. Iteration caps are not
/// errors: kernels return their last iterate together with a count.
#[derive(Debug, Error)]
pub enum Error {
  // configuration
  #[error("ensemble must have at least 2 members, got {0}")]
  EnsembleTooSmall(usize),
  #[error("observation dimension {obs_dim} outside 1..={state_dim}")]
  ObsDimOutOfRange { obs_dim: usize, state_dim: usize },
  #[error("observation nonlinearity gamma = {0} is undefined on (0, 1)")]
  UndefinedGamma(f64),
  #[error("lag {lag} must be a positive multiple of shift {shift} under mda")]
  LagShiftMismatch { lag: usize, shift: usize },
  #[error("mda weight vectors must have one positive finite entry per lag")]
  BadMdaWeights,
  #[error("covariance is not positive definite")]
  NotPositiveDefinite,
  #[error("unknown analysis label `{0}`")]
  UnknownAnalysis(String),

  // numeric
  #[error("cholesky factorization failed")]
  CholeskyFailed,
  #[error("svd failed to converge")]
  SvdFailed,
  #[error("scalar minimization failed to converge after {0} iterations")]
  ScalarMinFailed(usize),
  #[error("line search found no point of sufficient decrease")]
  LineSearchFailed,
  #[error("non-finite value produced in {0}")]
  NonFinite(&'static str),

  // i/o
  #[error("i/o: {0}")]
  Io(#[from] std::io::Error),
  #[error("artifact: {0}")]
  Artifact(String),
}

impl Error {
  /// True for errors that indicate a malformed configuration rather than a
  /// numerical failure mid-cycle.
  pub fn is_config(&self) -> bool {
    matches!(self,
             Error::EnsembleTooSmall(_)
             | Error::ObsDimOutOfRange { .. }
             | Error::UndefinedGamma(_)
             | Error::LagShiftMismatch { .. }
             | Error::BadMdaWeights
             | Error::NotPositiveDefinite
             | Error::UnknownAnalysis(_))
  }
}

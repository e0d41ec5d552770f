//! Analysis descriptors.
//!
//! The scheme family, the finite-size ("-n") adaptive-inflation choice, the
//! line-search choice, and the bundle/transform conditioning are orthogonal
//! axes; a descriptor carries them as enumerated fields and a parser maps
//! user-facing labels such as `"etkf"`, `"mlef-n-transform-ls"` or
//! `"ienks-bundle"` onto the variant. Smoother spellings (`enks`, `etks`,
//! `mles`) parse to the same kernels as their filter counterparts.

use da_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Ensemble-space scaling used when relinearizing the observation operator:
/// a small fixed `eps * I` (bundle) or the running inverse square root of
/// the cost Hessian (transform).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditioning {
  Bundle,
  Transform,
}

/// Which minimization of the finite-size cost the EnKF-N kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiniteSizeForm {
  /// Brent on the scalar dual cost in the inflation variable.
  Dual,
  /// Newton in the weight vector, optionally under strong-Wolfe line search.
  Primal { line_search: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
  /// Stochastic (perturbed-observation) ensemble Kalman filter.
  Enkf,
  /// Deterministic ensemble transform Kalman filter.
  Etkf,
  /// Maximum-likelihood ensemble filter, relinearized each iteration.
  Mlef {
    adaptive: bool,
    line_search: bool,
    conditioning: Conditioning,
  },
  /// Finite-size filter without relinearization.
  EnkfN(FiniteSizeForm),
  /// Iterative ensemble Kalman smoother, Gauss-Newton over the window.
  Ienks {
    adaptive: bool,
    conditioning: Conditioning,
  },
}

impl Analysis {
  /// False only for the stochastic filter, whose transform is a plain
  /// right-multiplication rather than a `(T, w, U)` triple.
  pub fn is_deterministic(&self) -> bool {
    !matches!(self, Analysis::Enkf)
  }
}

fn parse_conditioning(tok: &str) -> Option<Conditioning> {
  match tok {
    "bundle" => Some(Conditioning::Bundle),
    "transform" => Some(Conditioning::Transform),
    _ => None,
  }
}

impl FromStr for Analysis {
  type Err = Error;

  fn from_str(label: &str) -> Result<Analysis> {
    let unknown = || Error::UnknownAnalysis(label.to_string());
    let toks: Vec<&str> = label.split('-').collect();

    match toks.as_slice() {
      ["enkf"] | ["enks"] => Ok(Analysis::Enkf),
      ["etkf"] | ["etks"] => Ok(Analysis::Etkf),

      ["enkf" | "enks", "n", rest @ ..] => {
        let form = match rest {
          ["dual"] => FiniteSizeForm::Dual,
          ["primal"] => FiniteSizeForm::Primal { line_search: false },
          ["primal", "ls"] => FiniteSizeForm::Primal { line_search: true },
          _ => return Err(unknown()),
        };
        Ok(Analysis::EnkfN(form))
      }

      ["mlef" | "mles", rest @ ..] => {
        let (adaptive, rest) = match rest {
          ["n", tail @ ..] => (true, tail),
          tail => (false, tail),
        };
        let (conditioning, line_search) = match rest {
          [cond] => (parse_conditioning(cond).ok_or_else(unknown)?, false),
          [cond, "ls"] => (parse_conditioning(cond).ok_or_else(unknown)?, true),
          _ => return Err(unknown()),
        };
        Ok(Analysis::Mlef { adaptive, line_search, conditioning })
      }

      ["ienks", rest @ ..] => {
        let (adaptive, rest) = match rest {
          ["n", tail @ ..] => (true, tail),
          tail => (false, tail),
        };
        let conditioning = match rest {
          [cond] => parse_conditioning(cond).ok_or_else(unknown)?,
          _ => return Err(unknown()),
        };
        Ok(Analysis::Ienks { adaptive, conditioning })
      }

      _ => Err(unknown()),
    }
  }
}

impl fmt::Display for Analysis {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Analysis::Enkf => write!(f, "enkf"),
      Analysis::Etkf => write!(f, "etkf"),
      Analysis::Mlef { adaptive, line_search, conditioning } => {
        write!(f, "mlef")?;
        if *adaptive { write!(f, "-n")?; }
        match conditioning {
          Conditioning::Bundle => write!(f, "-bundle")?,
          Conditioning::Transform => write!(f, "-transform")?,
        }
        if *line_search { write!(f, "-ls")?; }
        Ok(())
      }
      Analysis::EnkfN(FiniteSizeForm::Dual) => write!(f, "enkf-n-dual"),
      Analysis::EnkfN(FiniteSizeForm::Primal { line_search }) => {
        write!(f, "enkf-n-primal")?;
        if *line_search { write!(f, "-ls")?; }
        Ok(())
      }
      Analysis::Ienks { adaptive, conditioning } => {
        write!(f, "ienks")?;
        if *adaptive { write!(f, "-n")?; }
        match conditioning {
          Conditioning::Bundle => write!(f, "-bundle"),
          Conditioning::Transform => write!(f, "-transform"),
        }
      }
    }
  }
}

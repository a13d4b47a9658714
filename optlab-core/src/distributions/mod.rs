//! Return distributions: the `fit`/`sample` contract for unconditional return models.
//!
//! Any type implementing [`ReturnDistribution`] can back a simulation. Three
//! parametric families ship here; the episode bootstrap lives with the
//! conditional selector in the runner crate.

mod laplace;
mod normal;
mod student_t;

pub use laplace::LaplaceReturns;
pub use normal::NormalReturns;
pub use student_t::StudentTReturns;

use rand::distributions::Distribution;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::{MatrixError, PathMatrix};
use crate::rng::rng_from_seed;

/// Default minimum sample size for a parametric fit.
pub const DEFAULT_MIN_SAMPLES: usize = 60;

/// Errors from fitting or sampling a return distribution.
#[derive(Debug, Error, PartialEq)]
pub enum DistributionFitError {
    #[error("insufficient samples for fit (got {got}, need {need})")]
    InsufficientSamples { got: usize, need: usize },

    #[error("insufficient episodes for bootstrap (got {got}, need {need})")]
    InsufficientEpisodes { got: usize, need: usize },

    #[error("insufficient samples for bootstrap (got {got}, need {need})")]
    InsufficientBootstrapSamples { got: usize, need: usize },

    #[error("non-finite return at index {index}")]
    NonFinite { index: usize },

    #[error("invalid {name} parameter: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("{0} distribution sampled before fit")]
    NotFitted(&'static str),

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Fit/sample contract for an unconditional return model.
///
/// Sampling takes `&self` so one fitted model can be shared by every scoring
/// worker; fitting is the only mutation.
pub trait ReturnDistribution: Send + Sync + fmt::Debug {
    /// Family name for provenance ("laplace", "student_t", "normal").
    fn name(&self) -> &'static str;

    /// Minimum number of returns `fit` accepts.
    fn min_samples(&self) -> usize;

    /// Fit parameters to a return sample.
    fn fit(&mut self, returns: &[f64]) -> Result<(), DistributionFitError>;

    fn is_fitted(&self) -> bool;

    /// Draw an `n_paths × n_steps` matrix of log returns.
    ///
    /// Identical `(parameters, seed, n_paths, n_steps)` produce bit-identical
    /// output; `seed = None` draws from OS entropy.
    fn sample(
        &self,
        n_paths: usize,
        n_steps: usize,
        seed: Option<u64>,
    ) -> Result<PathMatrix, DistributionFitError>;

    /// Fitted parameters by name, for logging and provenance.
    fn params(&self) -> BTreeMap<String, f64>;

    /// A fresh, unfitted model of the same family and settings.
    fn unfitted(&self) -> Box<dyn ReturnDistribution>;

    fn boxed_clone(&self) -> Box<dyn ReturnDistribution>;
}

/// Parametric family selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionFamily {
    #[default]
    Laplace,
    StudentT,
    Normal,
}

impl DistributionFamily {
    /// Unfitted model of this family.
    pub fn build(self, min_samples: usize) -> Box<dyn ReturnDistribution> {
        match self {
            DistributionFamily::Laplace => Box::new(LaplaceReturns::new(min_samples)),
            DistributionFamily::StudentT => Box::new(StudentTReturns::new(min_samples)),
            DistributionFamily::Normal => Box::new(NormalReturns::new(min_samples)),
        }
    }
}

/// Reject short or non-finite samples before any fit.
pub fn validate_returns(returns: &[f64], min_samples: usize) -> Result<(), DistributionFitError> {
    if let Some(index) = returns.iter().position(|r| !r.is_finite()) {
        return Err(DistributionFitError::NonFinite { index });
    }
    if returns.len() < min_samples {
        return Err(DistributionFitError::InsufficientSamples {
            got: returns.len(),
            need: min_samples,
        });
    }
    Ok(())
}

/// Fill a matrix with i.i.d. draws from `dist`, row by row.
pub(crate) fn sample_iid<D: Distribution<f64>>(
    dist: &D,
    n_paths: usize,
    n_steps: usize,
    seed: Option<u64>,
) -> Result<PathMatrix, DistributionFitError> {
    let mut matrix = PathMatrix::zeros(n_paths, n_steps)?;
    let mut rng = rng_from_seed(seed);
    for row in matrix.rows_mut() {
        for v in row.iter_mut() {
            *v = dist.sample(&mut rng);
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_short_sample() {
        let err = validate_returns(&[0.01; 10], 60).unwrap_err();
        assert_eq!(err, DistributionFitError::InsufficientSamples { got: 10, need: 60 });
    }

    #[test]
    fn validate_rejects_non_finite() {
        let mut r = vec![0.0; 100];
        r[7] = f64::NAN;
        assert_eq!(
            validate_returns(&r, 60).unwrap_err(),
            DistributionFitError::NonFinite { index: 7 }
        );
    }

    #[test]
    fn family_builds_unfitted_models() {
        for family in [
            DistributionFamily::Laplace,
            DistributionFamily::StudentT,
            DistributionFamily::Normal,
        ] {
            let d = family.build(60);
            assert!(!d.is_fitted());
            assert!(matches!(
                d.sample(1, 1, Some(1)),
                Err(DistributionFitError::NotFitted(_))
            ));
        }
    }

    #[test]
    fn error_messages_are_actionable() {
        let e = DistributionFitError::InsufficientEpisodes { got: 5, need: 30 };
        assert_eq!(e.to_string(), "insufficient episodes for bootstrap (got 5, need 30)");
    }
}

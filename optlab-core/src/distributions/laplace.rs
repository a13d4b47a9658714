//! Laplace (double exponential) returns: location = median, scale = mean absolute deviation.

use statrs::distribution::Laplace;
use std::collections::BTreeMap;

use super::{sample_iid, validate_returns, DistributionFitError, ReturnDistribution};
use crate::domain::PathMatrix;
use crate::stats;

const SCALE_MIN: f64 = 1e-9;
const SCALE_MAX: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct LaplaceReturns {
    min_samples: usize,
    params: Option<(f64, f64)>,
}

impl LaplaceReturns {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples,
            params: None,
        }
    }

    /// Pre-fitted model with explicit parameters.
    pub fn with_params(loc: f64, scale: f64) -> Result<Self, DistributionFitError> {
        check_params(loc, scale)?;
        Ok(Self {
            min_samples: super::DEFAULT_MIN_SAMPLES,
            params: Some((loc, scale)),
        })
    }

    /// Safe default used when no fit is possible: loc 0.0, scale 0.01.
    pub fn fallback() -> Self {
        Self {
            min_samples: super::DEFAULT_MIN_SAMPLES,
            params: Some((0.0, 0.01)),
        }
    }

    pub fn loc(&self) -> Option<f64> {
        self.params.map(|p| p.0)
    }

    pub fn scale(&self) -> Option<f64> {
        self.params.map(|p| p.1)
    }
}

fn check_params(loc: f64, scale: f64) -> Result<(), DistributionFitError> {
    if !loc.is_finite() {
        return Err(DistributionFitError::InvalidParameter { name: "loc", value: loc });
    }
    if !scale.is_finite() || scale <= 0.0 {
        return Err(DistributionFitError::InvalidParameter { name: "scale", value: scale });
    }
    Ok(())
}

impl ReturnDistribution for LaplaceReturns {
    fn name(&self) -> &'static str {
        "laplace"
    }

    fn min_samples(&self) -> usize {
        self.min_samples
    }

    fn fit(&mut self, returns: &[f64]) -> Result<(), DistributionFitError> {
        validate_returns(returns, self.min_samples)?;
        let loc = stats::median(returns);
        let mad = returns.iter().map(|r| (r - loc).abs()).sum::<f64>() / returns.len() as f64;
        let scale = mad.clamp(SCALE_MIN, SCALE_MAX);
        check_params(loc, scale)?;
        self.params = Some((loc, scale));
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    fn sample(
        &self,
        n_paths: usize,
        n_steps: usize,
        seed: Option<u64>,
    ) -> Result<PathMatrix, DistributionFitError> {
        let (loc, scale) = self.params.ok_or(DistributionFitError::NotFitted("laplace"))?;
        let dist = Laplace::new(loc, scale)
            .map_err(|_| DistributionFitError::InvalidParameter { name: "scale", value: scale })?;
        sample_iid(&dist, n_paths, n_steps, seed)
    }

    fn params(&self) -> BTreeMap<String, f64> {
        self.params
            .map(|(loc, scale)| BTreeMap::from([("loc".into(), loc), ("scale".into(), scale)]))
            .unwrap_or_default()
    }

    fn unfitted(&self) -> Box<dyn ReturnDistribution> {
        Box::new(LaplaceReturns::new(self.min_samples))
    }

    fn boxed_clone(&self) -> Box<dyn ReturnDistribution> {
        Box::new(self.clone())
    }
}

//! Gaussian returns.

use statrs::distribution::Normal;
use std::collections::BTreeMap;

use super::{sample_iid, validate_returns, DistributionFitError, ReturnDistribution};
use crate::domain::PathMatrix;
use crate::stats;

#[derive(Debug, Clone)]
pub struct NormalReturns {
    min_samples: usize,
    params: Option<(f64, f64)>,
}

impl NormalReturns {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples,
            params: None,
        }
    }

    pub fn with_params(mean: f64, std: f64) -> Result<Self, DistributionFitError> {
        if !mean.is_finite() {
            return Err(DistributionFitError::InvalidParameter { name: "mean", value: mean });
        }
        if !std.is_finite() || std <= 0.0 {
            return Err(DistributionFitError::InvalidParameter { name: "std", value: std });
        }
        Ok(Self {
            min_samples: super::DEFAULT_MIN_SAMPLES,
            params: Some((mean, std)),
        })
    }
}

impl ReturnDistribution for NormalReturns {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn min_samples(&self) -> usize {
        self.min_samples
    }

    fn fit(&mut self, returns: &[f64]) -> Result<(), DistributionFitError> {
        validate_returns(returns, self.min_samples)?;
        let std = stats::std_dev(returns).max(1e-9);
        self.params = Some((stats::mean(returns), std));
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
        let (mean, std) = self.params.ok_or(DistributionFitError::NotFitted("normal"))?;
        let dist = Normal::new(mean, std)
            .map_err(|_| DistributionFitError::InvalidParameter { name: "std", value: std })?;
        sample_iid(&dist, n_paths, n_steps, seed)
    }

    fn params(&self) -> BTreeMap<String, f64> {
        self.params
            .map(|(m, s)| BTreeMap::from([("mean".into(), m), ("std".into(), s)]))
            .unwrap_or_default()
    }

    fn unfitted(&self) -> Box<dyn ReturnDistribution> {
        Box::new(NormalReturns::new(self.min_samples))
    }

    fn boxed_clone(&self) -> Box<dyn ReturnDistribution> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_mean_near_parameter() {
        let d = NormalReturns::with_params(0.001, 0.01).unwrap();
        let m = d.sample(200, 50, Some(11)).unwrap();
        let mean = stats::mean(m.as_slice());
        assert!((mean - 0.001).abs() < 0.001, "sample mean {mean}");
    }

    #[test]
    fn zero_std_rejected() {
        assert!(NormalReturns::with_params(0.0, 0.0).is_err());
    }
}

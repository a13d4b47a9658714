//! Black-Scholes European pricer with input validation.

use super::{OptionPricer, OptionSpec, PricingError, TRADING_DAYS_PER_YEAR};
use crate::domain::OptionType;
use crate::stats::norm_cdf;

/// Upper bound on accepted annualized volatility.
const MAX_VOLATILITY: f64 = 5.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct BlackScholesPricer;

impl BlackScholesPricer {
    pub fn new() -> Self {
        Self
    }

    /// Closed-form price per share for `years` to expiry.
    pub fn price_years(
        option_type: OptionType,
        spot: f64,
        strike: f64,
        years: f64,
        volatility: f64,
        rate: f64,
    ) -> Result<f64, PricingError> {
        if !(spot.is_finite() && spot > 0.0) {
            return Err(PricingError::NonPositiveSpot(spot));
        }
        if !(strike.is_finite() && strike > 0.0) {
            return Err(PricingError::NonPositiveStrike(strike));
        }
        if !(volatility.is_finite() && volatility > 0.0 && volatility <= MAX_VOLATILITY) {
            return Err(PricingError::InvalidVolatility(volatility));
        }
        if years <= 0.0 {
            return Ok(option_type.intrinsic(spot, strike));
        }

        let sqrt_t = years.sqrt();
        let d1 = ((spot / strike).ln() + (rate + 0.5 * volatility * volatility) * years)
            / (volatility * sqrt_t);
        let d2 = d1 - volatility * sqrt_t;
        let discount = (-rate * years).exp();
        let price = match option_type {
            OptionType::Call => spot * norm_cdf(d1) - strike * discount * norm_cdf(d2),
            OptionType::Put => strike * discount * norm_cdf(-d2) - spot * norm_cdf(-d1),
        };
        if !price.is_finite() {
            return Err(PricingError::NonFinitePrice { spot, strike });
        }
        // Floating error can push deep OTM prices a hair below zero.
        Ok(price.max(0.0))
    }
}

impl OptionPricer for BlackScholesPricer {
    fn name(&self) -> &str {
        "black_scholes"
    }

    fn price_at(&self, spot: f64, spec: &OptionSpec, days_elapsed: f64) -> Result<f64, PricingError> {
        let days_left = (spec.days_to_expiry - days_elapsed).max(0.0);
        Self::price_years(
            spec.option_type,
            spot,
            spec.strike,
            days_left / TRADING_DAYS_PER_YEAR,
            spec.volatility,
            spec.risk_free_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(option_type: OptionType, strike: f64, dte: f64) -> OptionSpec {
        OptionSpec {
            option_type,
            strike,
            days_to_expiry: dte,
            volatility: 0.2,
            risk_free_rate: 0.0,
        }
    }

    #[test]
    fn atm_call_matches_reference() {
        // S=K=100, T=1y, sigma=0.2, r=0 → 7.9656
        let p = BlackScholesPricer::price_years(OptionType::Call, 100.0, 100.0, 1.0, 0.2, 0.0)
            .unwrap();
        assert!((p - 7.9656).abs() < 1e-3, "price {p}");
    }

    #[test]
    fn put_call_parity_zero_rate() {
        let c = BlackScholesPricer::price_years(OptionType::Call, 105.0, 100.0, 0.5, 0.3, 0.0)
            .unwrap();
        let p = BlackScholesPricer::price_years(OptionType::Put, 105.0, 100.0, 0.5, 0.3, 0.0)
            .unwrap();
        assert!((c - p - 5.0).abs() < 1e-9);
    }

    #[test]
    fn expired_is_intrinsic() {
        let pricer = BlackScholesPricer::new();
        let s = spec(OptionType::Put, 100.0, 5.0);
        assert_eq!(pricer.price_at(90.0, &s, 5.0).unwrap(), 10.0);
        assert_eq!(pricer.price_at(90.0, &s, 9.0).unwrap(), 10.0);
    }

    #[test]
    fn invalid_inputs_rejected() {
        let pricer = BlackScholesPricer::new();
        let s = spec(OptionType::Call, 100.0, 20.0);
        assert!(matches!(pricer.price_at(0.0, &s, 0.0), Err(PricingError::NonPositiveSpot(_))));
        assert!(matches!(
            pricer.price_at(100.0, &spec(OptionType::Call, -1.0, 20.0), 0.0),
            Err(PricingError::NonPositiveStrike(_))
        ));
        assert!(matches!(
            pricer.price_at(100.0, &s.with_volatility(6.0), 0.0),
            Err(PricingError::InvalidVolatility(_))
        ));
        assert!(matches!(
            pricer.price_at(100.0, &s.with_volatility(0.0), 0.0),
            Err(PricingError::InvalidVolatility(_))
        ));
    }

    #[test]
    fn series_follows_path() {
        let pricer = BlackScholesPricer::new();
        let s = spec(OptionType::Call, 100.0, 2.0);
        let series = pricer.price(&[100.0, 101.0, 103.0], &s).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[2], 3.0);
        assert!(series[0] > 0.0);
    }
}

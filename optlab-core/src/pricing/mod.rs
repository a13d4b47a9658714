//! Option pricer contract.
//!
//! The scoring engine values legs only through [`OptionPricer`]; the formula
//! behind it is replaceable.

mod black_scholes;

pub use black_scholes::BlackScholesPricer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OptionType;

/// Trading days per year used to convert day counts to year fractions.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Invalid pricing inputs or outputs. Drops the leg's structure, never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("spot must be positive (got {0})")]
    NonPositiveSpot(f64),
    #[error("strike must be positive (got {0})")]
    NonPositiveStrike(f64),
    #[error("volatility must be in (0, 5] (got {0})")]
    InvalidVolatility(f64),
    #[error("non-finite price for strike {strike} at spot {spot}")]
    NonFinitePrice { spot: f64, strike: f64 },
    #[error("unknown strike label '{0}' (expected a number, 'atm' or 'spot')")]
    UnknownStrikeLabel(String),
}

/// Everything a pricer needs about one option besides the spot path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub option_type: OptionType,
    pub strike: f64,
    /// Trading days to expiry at the first point of the priced path.
    pub days_to_expiry: f64,
    /// Annualized volatility.
    pub volatility: f64,
    pub risk_free_rate: f64,
}

impl OptionSpec {
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }
}

/// Price-series contract: `price(path, spec)` values the option at every
/// point of a spot path, one trading day apart.
pub trait OptionPricer: Send + Sync {
    fn name(&self) -> &str;

    /// Per-share price at `spot` after `days_elapsed` trading days.
    fn price_at(&self, spot: f64, spec: &OptionSpec, days_elapsed: f64) -> Result<f64, PricingError>;

    /// Per-share prices along `path`; `path[t]` is observed `t` days after the spec date.
    fn price(&self, path: &[f64], spec: &OptionSpec) -> Result<Vec<f64>, PricingError> {
        path.iter()
            .enumerate()
            .map(|(t, &spot)| self.price_at(spot, spec, t as f64))
            .collect()
    }
}

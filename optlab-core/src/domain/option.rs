//! Option legs: the atomic unit every candidate structure is built from.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::PricingError;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Intrinsic value per share at the given spot.
    pub fn intrinsic(self, spot: f64, strike: f64) -> f64 {
        match self {
            OptionType::Call => (spot - strike).max(0.0),
            OptionType::Put => (strike - spot).max(0.0),
        }
    }
}

/// Direction of a leg. Accepts `long`/`short` on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "long")]
    Buy,
    #[serde(alias = "short")]
    Sell,
}

impl Side {
    /// +1 for long exposure, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Strike as a number or a label resolved against spot ("atm", "spot").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrikeSpec {
    Price(f64),
    Label(String),
}

impl StrikeSpec {
    pub fn resolve(&self, spot: f64) -> Result<f64, PricingError> {
        match self {
            StrikeSpec::Price(k) => Ok(*k),
            StrikeSpec::Label(label) => match label.to_ascii_lowercase().as_str() {
                "atm" | "spot" => Ok(spot),
                _ => Err(PricingError::UnknownStrikeLabel(label.clone())),
            },
        }
    }

    /// Numeric strike, if one was given.
    pub fn value(&self) -> Option<f64> {
        match self {
            StrikeSpec::Price(k) => Some(*k),
            StrikeSpec::Label(_) => None,
        }
    }
}

impl From<f64> for StrikeSpec {
    fn from(k: f64) -> Self {
        StrikeSpec::Price(k)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LegError {
    #[error("leg quantity must be positive")]
    ZeroQuantity,
    #[error("leg premium must be finite and non-negative (got {0})")]
    InvalidPremium(f64),
    #[error("bid {bid} exceeds ask {ask}")]
    CrossedQuote { bid: f64, ask: f64 },
    #[error("vertical legs must be ordered lower < upper (got {lower} / {upper})")]
    Unordered { lower: f64, upper: f64 },
    #[error("vertical legs must share option type and expiry")]
    Mismatched,
    #[error("vertical legs need numeric strikes")]
    UnresolvedStrike,
}

/// A single option leg. Immutable once priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub option_type: OptionType,
    pub strike: StrikeSpec,
    pub expiry: NaiveDate,
    pub side: Side,
    /// Contracts, always positive; direction lives in `side`.
    pub quantity: u32,
    /// Mid premium per share.
    pub premium: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Quote implied volatility (annualized), when the chain carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implied_vol: Option<f64>,
}

impl Leg {
    pub fn new(
        option_type: OptionType,
        strike: impl Into<StrikeSpec>,
        expiry: NaiveDate,
        side: Side,
        quantity: u32,
        premium: f64,
    ) -> Result<Self, LegError> {
        if quantity == 0 {
            return Err(LegError::ZeroQuantity);
        }
        if !premium.is_finite() || premium < 0.0 {
            return Err(LegError::InvalidPremium(premium));
        }
        Ok(Self {
            option_type,
            strike: strike.into(),
            expiry,
            side,
            quantity,
            premium,
            bid: None,
            ask: None,
            implied_vol: None,
        })
    }

    /// Attach a real bid/ask pair.
    pub fn with_quote(mut self, bid: f64, ask: f64) -> Result<Self, LegError> {
        if bid > ask {
            return Err(LegError::CrossedQuote { bid, ask });
        }
        self.bid = Some(bid);
        self.ask = Some(ask);
        Ok(self)
    }

    pub fn with_implied_vol(mut self, iv: Option<f64>) -> Self {
        self.implied_vol = iv;
        self
    }

    /// Signed contract count: positive long, negative short.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity as f64
    }

    pub fn strike_value(&self) -> Option<f64> {
        self.strike.value()
    }
}

/// Two legs of a vertical spread, ordered by strike.
///
/// Construction is the only place vertical legs are materialized, so the
/// `lower < upper` ordering holds for every vertical the funnel emits.
#[derive(Debug, Clone, PartialEq)]
pub struct LegPair {
    lower: Leg,
    upper: Leg,
}

impl LegPair {
    pub fn new(lower: Leg, upper: Leg) -> Result<Self, LegError> {
        let (lo, hi) = match (lower.strike_value(), upper.strike_value()) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => return Err(LegError::UnresolvedStrike),
        };
        if lower.option_type != upper.option_type || lower.expiry != upper.expiry {
            return Err(LegError::Mismatched);
        }
        if lo >= hi {
            return Err(LegError::Unordered {
                lower: lo,
                upper: hi,
            });
        }
        Ok(Self { lower, upper })
    }

    pub fn lower(&self) -> &Leg {
        &self.lower
    }

    pub fn upper(&self) -> &Leg {
        &self.upper
    }

    pub fn into_legs(self) -> Vec<Leg> {
        vec![self.lower, self.upper]
    }
}

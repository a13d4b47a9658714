//! Cheap, non-simulated cost estimates for a leg set.
//!
//! Entry fills shorts at bid (credit) and longs at ask (debit); exit reverses
//! each fill. Legs without a real quote get a synthetic one at
//! mid ± mid·spread_pct/2 where mid is the leg premium.

use thiserror::Error;

use optlab_core::domain::{CostEstimate, Leg, Side, CONTRACT_MULTIPLIER};

use crate::config::CostConfig;

#[derive(Debug, Error, PartialEq)]
pub enum CostError {
    #[error("cannot cost an empty leg set")]
    NoLegs,
    #[error("leg {index} has no numeric strike")]
    UnresolvedStrike { index: usize },
}

/// Bid/ask used for one leg's fills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillQuote {
    pub bid: f64,
    pub ask: f64,
    /// True when derived from the premium rather than a listed quote.
    pub synthetic: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    commission_per_contract: f64,
    spread_pct: f64,
}

impl CostModel {
    pub fn new(config: &CostConfig) -> Self {
        Self {
            commission_per_contract: config.commission_per_contract,
            spread_pct: config.spread_pct,
        }
    }

    pub fn fill_quote(&self, leg: &Leg) -> FillQuote {
        match (leg.bid, leg.ask) {
            (Some(bid), Some(ask)) => FillQuote {
                bid,
                ask,
                synthetic: false,
            },
            _ => {
                let mid = leg.premium;
                let half = mid * self.spread_pct / 2.0;
                FillQuote {
                    bid: (mid - half).max(0.0),
                    ask: mid + half,
                    synthetic: true,
                }
            }
        }
    }

    /// Per-share price this leg opens at.
    pub fn entry_price(&self, leg: &Leg) -> f64 {
        let q = self.fill_quote(leg);
        match leg.side {
            Side::Sell => q.bid,
            Side::Buy => q.ask,
        }
    }

    /// Net opening cash: credits positive, debits negative.
    pub fn entry_cash_flow(&self, legs: &[Leg]) -> f64 {
        legs.iter()
            .map(|leg| {
                let notional = self.entry_price(leg) * f64::from(leg.quantity) * CONTRACT_MULTIPLIER;
                match leg.side {
                    Side::Sell => notional,
                    Side::Buy => -notional,
                }
            })
            .sum()
    }

    /// Cash needed to close at today's quotes: shorts bought at ask, longs sold at bid.
    pub fn exit_cost(&self, legs: &[Leg]) -> f64 {
        legs.iter()
            .map(|leg| {
                let q = self.fill_quote(leg);
                let contracts = f64::from(leg.quantity) * CONTRACT_MULTIPLIER;
                match leg.side {
                    Side::Sell => q.ask * contracts,
                    Side::Buy => -q.bid * contracts,
                }
            })
            .sum()
    }

    /// One-way commission.
    pub fn commission(&self, legs: &[Leg]) -> f64 {
        legs.iter()
            .map(|leg| f64::from(leg.quantity) * self.commission_per_contract)
            .sum()
    }

    /// Expiry payoff of the position in dollars, net of entry cash and round-trip commission.
    pub fn payoff_at_expiry(&self, legs: &[Leg], spot: f64, entry_cash: f64, commission: f64) -> f64 {
        let intrinsic: f64 = legs
            .iter()
            .filter_map(|leg| {
                let strike = leg.strike_value()?;
                Some(leg.signed_quantity() * CONTRACT_MULTIPLIER * leg.option_type.intrinsic(spot, strike))
            })
            .sum();
        intrinsic + entry_cash - 2.0 * commission
    }

    pub fn estimate(&self, legs: &[Leg]) -> Result<CostEstimate, CostError> {
        if legs.is_empty() {
            return Err(CostError::NoLegs);
        }
        let mut strikes = Vec::with_capacity(legs.len());
        for (index, leg) in legs.iter().enumerate() {
            strikes.push(leg.strike_value().ok_or(CostError::UnresolvedStrike { index })?);
        }

        let entry_cash_flow = self.entry_cash_flow(legs);
        let commission = self.commission(legs);

        // Payoffs are piecewise linear with kinks at the strikes, so the
        // extremes sit at a strike, at zero, or in the far right tail.
        let far = strikes.iter().copied().fold(0.0, f64::max) * 10.0;
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for s in strikes.iter().copied().chain([0.0, far]) {
            let v = self.payoff_at_expiry(legs, s, entry_cash_flow, commission);
            lo = lo.min(v);
            hi = hi.max(v);
        }
        let max_loss = lo.min(0.0);

        Ok(CostEstimate {
            entry_cash_flow,
            exit_cost: self.exit_cost(legs),
            commission,
            capital_required: max_loss.abs(),
            max_loss,
            max_profit: hi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use optlab_core::domain::OptionType;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn model() -> CostModel {
        CostModel::new(&CostConfig::default())
    }

    /// Bull put: sell 100P @ 3.00/3.20, buy 95P @ 1.00/1.20.
    fn bull_put() -> Vec<Leg> {
        vec![
            Leg::new(OptionType::Put, 95.0, expiry(), Side::Buy, 1, 1.1)
                .unwrap()
                .with_quote(1.0, 1.2)
                .unwrap(),
            Leg::new(OptionType::Put, 100.0, expiry(), Side::Sell, 1, 3.1)
                .unwrap()
                .with_quote(3.0, 3.2)
                .unwrap(),
        ]
    }

    #[test]
    fn entry_exit_and_commission() {
        let legs = bull_put();
        let m = model();
        assert!((m.entry_cash_flow(&legs) - 180.0).abs() < 1e-9);
        assert!((m.exit_cost(&legs) - 220.0).abs() < 1e-9);
        assert!((m.commission(&legs) - 1.30).abs() < 1e-9);
    }

    #[test]
    fn credit_spread_max_loss_is_width_minus_credit() {
        let est = model().estimate(&bull_put()).unwrap();
        // 5 wide × 100 - 180 credit + 2.60 round-trip commission.
        assert!((est.max_loss - (-322.6)).abs() < 1e-9);
        assert!((est.capital_required - 322.6).abs() < 1e-9);
        assert!((est.max_profit - 177.4).abs() < 1e-9);
    }

    #[test]
    fn synthetic_quote_from_premium() {
        let leg = Leg::new(OptionType::Call, 100.0, expiry(), Side::Buy, 2, 2.0).unwrap();
        let m = model();
        let q = m.fill_quote(&leg);
        assert!(q.synthetic);
        assert!((q.bid - 1.85).abs() < 1e-12);
        assert!((q.ask - 2.15).abs() < 1e-12);
        assert!((m.entry_cash_flow(&[leg]) - (-430.0)).abs() < 1e-9);
    }

    #[test]
    fn empty_legs_rejected() {
        assert_eq!(model().estimate(&[]), Err(CostError::NoLegs));
    }
}

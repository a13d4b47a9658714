//! Mark-to-model valuation of a structure along a spot path.
//!
//! Every leg is bound to an [`OptionSpec`] once; marks and PnL are then pure
//! functions of (spot, days elapsed). Stage 3 quadrature, Stage 4 metrics and
//! the Greeks all value through this type.

use chrono::NaiveDate;

use optlab_core::data::weekdays_between;
use optlab_core::domain::{CandidateStructure, CostEstimate, Leg, Side, CONTRACT_MULTIPLIER};
use optlab_core::pricing::{OptionPricer, OptionSpec, PricingError, TRADING_DAYS_PER_YEAR};

#[derive(Debug, Clone)]
struct BoundLeg {
    spec: OptionSpec,
    signed_contracts: f64,
    side: Side,
}

pub struct StructureValuer<'a> {
    legs: Vec<BoundLeg>,
    pricer: &'a dyn OptionPricer,
    entry_cash_flow: f64,
    commission: f64,
}

/// Annualized volatility implied by a daily vol.
pub fn annualize_daily_vol(daily_vol: f64) -> f64 {
    daily_vol * TRADING_DAYS_PER_YEAR.sqrt()
}

impl<'a> StructureValuer<'a> {
    /// Bind legs to specs as of `as_of`. Legs without a quote IV use `fallback_vol`.
    pub fn new(
        structure: &CandidateStructure,
        cost: &CostEstimate,
        as_of: NaiveDate,
        fallback_vol: f64,
        risk_free_rate: f64,
        pricer: &'a dyn OptionPricer,
    ) -> Result<Self, PricingError> {
        let legs = structure
            .legs
            .iter()
            .map(|leg| bind(leg, as_of, fallback_vol, risk_free_rate))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            legs,
            pricer,
            entry_cash_flow: cost.entry_cash_flow,
            commission: cost.commission,
        })
    }

    /// Trading days until the earliest leg expiry.
    pub fn days_to_expiry(&self) -> f64 {
        self.legs
            .iter()
            .map(|l| l.spec.days_to_expiry)
            .fold(f64::INFINITY, f64::min)
    }

    /// Position value in dollars (long positive, short negative).
    pub fn mark(&self, spot: f64, days_elapsed: f64) -> Result<f64, PricingError> {
        let mut total = 0.0;
        for leg in &self.legs {
            let price = self.pricer.price_at(spot, &leg.spec, days_elapsed)?;
            total += leg.signed_contracts * CONTRACT_MULTIPLIER * price;
        }
        Ok(total)
    }

    /// Position vega in dollars per `vol_point` of volatility, by central
    /// difference on each leg. A leg's bump is capped at half its own vol so
    /// the lower side stays positive.
    pub fn vega(&self, spot: f64, vol_point: f64) -> Result<f64, PricingError> {
        let mut total = 0.0;
        for leg in &self.legs {
            let vol = leg.spec.volatility;
            let h = vol_point.min(0.5 * vol);
            let up = self.pricer.price_at(spot, &leg.spec.with_volatility(vol + h), 0.0)?;
            let down = self.pricer.price_at(spot, &leg.spec.with_volatility(vol - h), 0.0)?;
            total += leg.signed_contracts * CONTRACT_MULTIPLIER * (up - down) / (2.0 * h) * vol_point;
        }
        Ok(total)
    }

    /// Net PnL if closed at `spot` after `days_elapsed`: mark + entry cash - round-trip commission.
    pub fn pnl(&self, spot: f64, days_elapsed: f64) -> Result<f64, PricingError> {
        Ok(self.mark(spot, days_elapsed)? + self.entry_cash_flow - 2.0 * self.commission)
    }

    /// Short legs whose extrinsic value is below `threshold` at `spot` while time remains.
    pub fn early_exercise_candidates(
        &self,
        spot: f64,
        days_elapsed: f64,
        threshold: f64,
    ) -> Result<usize, PricingError> {
        let mut count = 0;
        for leg in self.legs.iter().filter(|l| l.side == Side::Sell) {
            if days_elapsed >= leg.spec.days_to_expiry {
                continue;
            }
            let price = self.pricer.price_at(spot, &leg.spec, days_elapsed)?;
            let extrinsic = price - leg.spec.option_type.intrinsic(spot, leg.spec.strike);
            if extrinsic < threshold {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn bind(leg: &Leg, as_of: NaiveDate, fallback_vol: f64, risk_free_rate: f64) -> Result<BoundLeg, PricingError> {
    let strike = leg.strike_value().ok_or_else(|| PricingError::UnknownStrikeLabel(format!("{:?}", leg.strike)))?;
    Ok(BoundLeg {
        spec: OptionSpec {
            option_type: leg.option_type,
            strike,
            days_to_expiry: f64::from(weekdays_between(as_of, leg.expiry)),
            volatility: leg.implied_vol.unwrap_or(fallback_vol),
            risk_free_rate,
        },
        signed_contracts: leg.signed_quantity(),
        side: leg.side,
    })
}

//! Candidate structures: multi-leg option positions sharing one expiry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::metrics::MetricsReport;
use super::option::Leg;

/// Supported structure families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    BullCallSpread,
    BearCallSpread,
    BullPutSpread,
    BearPutSpread,
    IronCondor,
    Butterfly,
}

impl StructureType {
    pub fn all() -> Vec<StructureType> {
        vec![
            StructureType::BullCallSpread,
            StructureType::BearCallSpread,
            StructureType::BullPutSpread,
            StructureType::BearPutSpread,
            StructureType::IronCondor,
            StructureType::Butterfly,
        ]
    }

    pub fn is_vertical(self) -> bool {
        matches!(
            self,
            StructureType::BullCallSpread
                | StructureType::BearCallSpread
                | StructureType::BullPutSpread
                | StructureType::BearPutSpread
        )
    }

    pub fn leg_count(self) -> usize {
        match self {
            StructureType::IronCondor => 4,
            StructureType::Butterfly => 3,
            _ => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StructureType::BullCallSpread => "bull_call_spread",
            StructureType::BearCallSpread => "bear_call_spread",
            StructureType::BullPutSpread => "bull_put_spread",
            StructureType::BearPutSpread => "bear_put_spread",
            StructureType::IronCondor => "iron_condor",
            StructureType::Butterfly => "butterfly",
        }
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cheap, non-simulated cash-flow estimate attached in Stage 3.
///
/// Sign convention: positive = cash received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Credit (+) or debit (-) at entry fills.
    pub entry_cash_flow: f64,
    /// Cash needed to reverse every fill at today's quotes.
    pub exit_cost: f64,
    /// Commission for one side of the trade.
    pub commission: f64,
    /// Buying power tied up by the position.
    pub capital_required: f64,
    /// Worst expiry PnL (negative or zero), after round-trip commission.
    pub max_loss: f64,
    /// Best expiry PnL, after round-trip commission.
    pub max_profit: f64,
}

/// Analytic (quadrature) estimates used by the Stage 3 filters and Top-K.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyticEstimate {
    pub expected_pnl: f64,
    pub pop_breakeven: f64,
    pub pre_score: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum StructureError {
    #[error("structure has no legs")]
    NoLegs,
    #[error("{structure_type} expects {expected} legs, got {got}")]
    LegCount {
        structure_type: StructureType,
        expected: usize,
        got: usize,
    },
    #[error("all legs must share expiry {expected}, found {found}")]
    MixedExpiry { expected: NaiveDate, found: NaiveDate },
    #[error("vertical strikes must satisfy lower < upper (got {lower} / {upper})")]
    VerticalOrder { lower: f64, upper: f64 },
    #[error("structure width must be between 1 and {max} strike increments (got {0})", max = MAX_WIDTH_STRIKES)]
    WidthOutOfRange(u32),
    #[error("structure legs need numeric strikes")]
    UnresolvedStrike,
}

/// Widest vertical, wing or condor span in strike increments.
pub const MAX_WIDTH_STRIKES: u32 = 3;

/// A candidate option structure moving through the funnel.
///
/// Created in Stage 2; Stage 3 attaches `cost` and `analytic`, Stage 4
/// attaches `metrics`. Never mutated after entering ranked output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStructure {
    pub structure_type: StructureType,
    pub legs: Vec<Leg>,
    pub expiry: NaiveDate,
    /// Width in strike increments (vertical width, condor wing, butterfly wing).
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytic: Option<AnalyticEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsReport>,
}

impl CandidateStructure {
    pub fn new(
        structure_type: StructureType,
        legs: Vec<Leg>,
        width: u32,
    ) -> Result<Self, StructureError> {
        let first = legs.first().ok_or(StructureError::NoLegs)?;
        let expiry = first.expiry;
        if legs.len() != structure_type.leg_count() {
            return Err(StructureError::LegCount {
                structure_type,
                expected: structure_type.leg_count(),
                got: legs.len(),
            });
        }
        if let Some(other) = legs.iter().find(|l| l.expiry != expiry) {
            return Err(StructureError::MixedExpiry {
                expected: expiry,
                found: other.expiry,
            });
        }
        if !(1..=MAX_WIDTH_STRIKES).contains(&width) {
            return Err(StructureError::WidthOutOfRange(width));
        }
        if structure_type.is_vertical() {
            let lower = legs[0].strike_value().ok_or(StructureError::UnresolvedStrike)?;
            let upper = legs[1].strike_value().ok_or(StructureError::UnresolvedStrike)?;
            if lower >= upper {
                return Err(StructureError::VerticalOrder { lower, upper });
            }
        }
        Ok(Self {
            structure_type,
            legs,
            expiry,
            width,
            cost: None,
            analytic: None,
            metrics: None,
        })
    }

    pub fn with_cost(mut self, cost: CostEstimate) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_analytic(mut self, analytic: AnalyticEstimate) -> Self {
        self.analytic = Some(analytic);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsReport) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Stable identity: type, expiry and strikes in leg order.
    pub fn key(&self) -> String {
        let strikes: Vec<String> = self
            .legs
            .iter()
            .map(|l| match l.strike_value() {
                Some(k) => format!("{k}"),
                None => "atm".to_string(),
            })
            .collect();
        format!("{}:{}:{}", self.structure_type, self.expiry, strikes.join("/"))
    }

    /// (lowest, highest) numeric strike across the legs.
    pub fn strike_bounds(&self) -> Option<(f64, f64)> {
        let mut strikes = self.legs.iter().filter_map(Leg::strike_value);
        let first = strikes.next()?;
        Some(strikes.fold((first, first), |(lo, hi), k| (lo.min(k), hi.max(k))))
    }

    /// Mean distance of leg strikes from spot; the Stage 2 truncation key.
    pub fn spot_proximity(&self, spot: f64) -> f64 {
        let strikes: Vec<f64> = self.legs.iter().filter_map(Leg::strike_value).collect();
        if strikes.is_empty() {
            return 0.0;
        }
        strikes.iter().map(|k| (k - spot).abs()).sum::<f64>() / strikes.len() as f64
    }

    pub fn total_contracts(&self) -> u32 {
        self.legs.iter().map(|l| l.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::option::{OptionType, Side};

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn leg(t: OptionType, k: f64, side: Side) -> Leg {
        Leg::new(t, k, expiry(), side, 1, 1.0).unwrap()
    }

    #[test]
    fn vertical_requires_lower_first() {
        let ok = CandidateStructure::new(
            StructureType::BullCallSpread,
            vec![leg(OptionType::Call, 100.0, Side::Buy), leg(OptionType::Call, 105.0, Side::Sell)],
            1,
        );
        assert!(ok.is_ok());

        let bad = CandidateStructure::new(
            StructureType::BullCallSpread,
            vec![leg(OptionType::Call, 105.0, Side::Buy), leg(OptionType::Call, 100.0, Side::Sell)],
            1,
        );
        assert!(matches!(bad, Err(StructureError::VerticalOrder { .. })));
    }

    #[test]
    fn mixed_expiry_rejected() {
        let mut other = leg(OptionType::Call, 105.0, Side::Sell);
        other.expiry = NaiveDate::from_ymd_opt(2024, 4, 19).unwrap();
        let err = CandidateStructure::new(
            StructureType::BullCallSpread,
            vec![leg(OptionType::Call, 100.0, Side::Buy), other],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, StructureError::MixedExpiry { .. }));
    }

    #[test]
    fn leg_count_enforced() {
        let err = CandidateStructure::new(
            StructureType::IronCondor,
            vec![leg(OptionType::Call, 100.0, Side::Buy)],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, StructureError::LegCount { expected: 4, got: 1, .. }));
    }

    #[test]
    fn width_outside_one_to_three_rejected() {
        let legs = || vec![leg(OptionType::Call, 100.0, Side::Buy), leg(OptionType::Call, 105.0, Side::Sell)];
        for width in [0, MAX_WIDTH_STRIKES + 1, 49] {
            let err = CandidateStructure::new(StructureType::BullCallSpread, legs(), width).unwrap_err();
            assert_eq!(err, StructureError::WidthOutOfRange(width));
        }
        assert!(CandidateStructure::new(StructureType::BullCallSpread, legs(), MAX_WIDTH_STRIKES).is_ok());
    }

    #[test]
    fn key_and_bounds() {
        let s = CandidateStructure::new(
            StructureType::BearPutSpread,
            vec![leg(OptionType::Put, 95.0, Side::Sell), leg(OptionType::Put, 100.0, Side::Buy)],
            1,
        )
        .unwrap();
        assert_eq!(s.key(), "bear_put_spread:2024-03-15:95/100");
        assert_eq!(s.strike_bounds(), Some((95.0, 100.0)));
        assert!((s.spot_proximity(100.0) - 2.5).abs() < 1e-12);
    }
}

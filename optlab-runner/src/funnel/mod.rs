//! CandidateFunnel: Stages 0–3, analytic only.
//!
//! Narrows a chain to a bounded survivor set:
//! - Stage 0: expiries inside the DTE window
//! - Stage 1: per-strike moneyness / volume / spread predicates
//! - Stage 2: vertical, iron condor and butterfly enumeration under a cap
//! - Stage 3: cost + analytic estimates, hard filters, Top-K per type
//!
//! Empty stages are soft failures: the outcome carries no survivors and
//! diagnostics explain which stage emptied and what to relax.

pub mod expiries;
pub mod filters;
pub mod strikes;
pub mod structures;

use thiserror::Error;
use tracing::{info, warn};

use optlab_core::data::OptionChain;
use optlab_core::domain::{
    CandidateStructure, Diagnostics, STAGE_EXPIRIES, STAGE_STRIKES, STAGE_STRUCTURES, STAGE_SURVIVORS,
};
use optlab_core::pricing::OptionPricer;

use crate::config::{OptimizerConfig, RegimeParams};
use crate::cost_model::CostModel;
use crate::valuation::annualize_daily_vol;

pub use expiries::select_expiries;
pub use filters::{
    analytic_estimate, apply_filters, hard_filters, resolve_k, terminal_nodes, top_k_per_type, AnalyticContext,
    HardFilter, PRICING_ERROR,
};
pub use strikes::{default_predicates, filter_strikes, StrikeBook, StrikeKey, StrikePredicate};
pub use structures::{generate_structures, truncate_by_proximity, GenerationOutcome, LegFactory};

#[derive(Debug, Error, PartialEq)]
pub enum FunnelError {
    #[error("chain spot must be positive and finite, got {0}")]
    InvalidSpot(f64),
    #[error("trade horizon must be at least one day")]
    ZeroHorizon,
}

#[derive(Debug, Clone)]
pub struct FunnelOutcome {
    pub survivors: Vec<CandidateStructure>,
    pub diagnostics: Diagnostics,
}

pub struct CandidateFunnel<'a> {
    config: &'a OptimizerConfig,
    pricer: &'a dyn OptionPricer,
    cost_model: CostModel,
    predicates: Vec<Box<dyn StrikePredicate>>,
    filters: Vec<Box<dyn HardFilter>>,
}

impl<'a> CandidateFunnel<'a> {
    pub fn new(config: &'a OptimizerConfig, pricer: &'a dyn OptionPricer) -> Self {
        Self {
            config,
            pricer,
            cost_model: CostModel::new(&config.costs),
            predicates: default_predicates(&config.funnel),
            filters: hard_filters(&config.filters),
        }
    }

    pub fn run(&self, chain: &OptionChain, regime: &RegimeParams, horizon: usize) -> Result<FunnelOutcome, FunnelError> {
        if !(chain.spot.is_finite() && chain.spot > 0.0) {
            return Err(FunnelError::InvalidSpot(chain.spot));
        }
        if horizon == 0 {
            return Err(FunnelError::ZeroHorizon);
        }
        let fc = &self.config.funnel;
        let mut diagnostics = Diagnostics::new();

        // Stage 0
        let expiries = select_expiries(&chain.expiries(), chain.as_of, fc);
        diagnostics.record_stage(STAGE_EXPIRIES, expiries.len());
        info!(symbol = %chain.symbol, expiries = expiries.len(), "stage 0 complete");
        if expiries.is_empty() {
            diagnostics.hint(format!(
                "No expiries with DTE in [{}, {}]; widen funnel.dte_min / funnel.dte_max",
                fc.dte_min, fc.dte_max
            ));
            return Ok(empty(diagnostics));
        }
        if expiries.len() < fc.min_expiries {
            diagnostics.hint(format!(
                "Only {} expiries in the DTE window (wanted at least {})",
                expiries.len(),
                fc.min_expiries
            ));
        }

        // Stage 1
        let books: Vec<StrikeBook<'_>> = expiries
            .iter()
            .map(|&expiry| {
                let kept = filter_strikes(chain.quotes_for(expiry), chain.spot, &self.predicates);
                StrikeBook::new(expiry, chain.strike_ladder(expiry), &kept)
            })
            .collect();
        let strike_count: usize = books.iter().map(StrikeBook::len).sum();
        diagnostics.record_stage(STAGE_STRIKES, strike_count);
        info!(strikes = strike_count, "stage 1 complete");
        if strike_count == 0 {
            diagnostics.hint(
                "No strikes passed the moneyness/volume/spread filters; relax funnel.min_volume, \
                 funnel.max_spread_pct or the moneyness window",
            );
            return Ok(empty(diagnostics));
        }

        // Stage 2
        let fallback_vol = annualize_daily_vol(regime.daily_vol);
        let leg_factory = LegFactory {
            as_of: chain.as_of,
            spot: chain.spot,
            fallback_vol,
            risk_free_rate: self.config.mc.risk_free_rate,
            pricer: self.pricer,
        };
        let generated = generate_structures(&books, fc, &leg_factory);
        for failure in &generated.failures {
            diagnostics.warn_pricer(failure.clone());
        }
        diagnostics.record_rejections(PRICING_ERROR, generated.failures.len());
        if generated.truncated > 0 {
            diagnostics.hint(format!(
                "Stage 2 produced {} structures; kept the {} nearest to spot (funnel.max_structures)",
                generated.generated, fc.max_structures
            ));
        }
        let structures = generated.structures;
        diagnostics.record_stage(STAGE_STRUCTURES, structures.len());
        info!(structures = structures.len(), truncated = generated.truncated, "stage 2 complete");
        if structures.is_empty() {
            diagnostics.hint("No structures could be built from the surviving strikes; raise funnel.max_width_strikes or add structure types");
            return Ok(empty(diagnostics));
        }

        // Stage 3
        let ctx = AnalyticContext {
            as_of: chain.as_of,
            spot: chain.spot,
            regime,
            horizon,
            fallback_vol,
            risk_free_rate: self.config.mc.risk_free_rate,
            account_capital: self.config.filters.max_capital,
            pricer: self.pricer,
        };
        let pool_size = structures.len();
        let mut costed = Vec::with_capacity(pool_size);
        let mut pricing_failures = 0usize;
        for s in structures {
            match self.estimate(s, &ctx) {
                Ok(s) => costed.push(s),
                Err(message) => {
                    pricing_failures += 1;
                    diagnostics.warn_pricer(message);
                }
            }
        }
        if pricing_failures > 0 {
            warn!(dropped = pricing_failures, "structures dropped by pricing errors");
            diagnostics.record_rejections(PRICING_ERROR, pricing_failures);
        }

        let costed_count = costed.len();
        let (filtered, rejections) = apply_filters(costed, &self.filters);
        for (name, count) in &rejections {
            diagnostics.record_rejections(name, *count);
        }

        let types_present = {
            let mut t: Vec<_> = filtered.iter().map(|s| s.structure_type).collect();
            t.sort();
            t.dedup();
            t.len()
        };
        let k = resolve_k(fc, types_present);
        let survivors = top_k_per_type(filtered, k);
        diagnostics.record_stage(STAGE_SURVIVORS, survivors.len());
        info!(costed = costed_count, survivors = survivors.len(), k, "stage 3 complete");

        if survivors.is_empty() {
            for f in &self.filters {
                if costed_count > 0 && rejections.get(f.name()).copied() == Some(costed_count) {
                    diagnostics.hint(format!(
                        "All {costed_count} structures rejected by {} filter ({}); relax that threshold",
                        f.label(),
                        f.name()
                    ));
                }
            }
            diagnostics.hint("Stage 3 hard filters eliminated all candidates - consider relaxing constraints");
        } else if survivors.len() < fc.survivor_band_min {
            diagnostics.hint(format!(
                "{} survivors is below the target band [{}, {}]",
                survivors.len(),
                fc.survivor_band_min,
                fc.survivor_band_max
            ));
        }

        Ok(FunnelOutcome {
            survivors,
            diagnostics,
        })
    }

    /// Attach cost and analytic estimates; errors come back as a warning line.
    fn estimate(&self, s: CandidateStructure, ctx: &AnalyticContext<'_>) -> Result<CandidateStructure, String> {
        let cost = self
            .cost_model
            .estimate(&s.legs)
            .map_err(|e| format!("{}: {e}", s.key()))?;
        let analytic = analytic_estimate(&s, &cost, ctx).map_err(|e| format!("{}: {e}", s.key()))?;
        Ok(s.with_cost(cost).with_analytic(analytic))
    }
}

fn empty(diagnostics: Diagnostics) -> FunnelOutcome {
    FunnelOutcome {
        survivors: Vec::new(),
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use optlab_core::data::{MarketDataProvider, SyntheticProvider};
    use optlab_core::pricing::BlackScholesPricer;

    fn chain() -> OptionChain {
        SyntheticProvider::new(11)
            .fetch_chain("SPY", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .unwrap()
    }

    fn neutral() -> RegimeParams {
        RegimeParams::new(0.0, 0.01, 0.0, 1.0)
    }

    #[test]
    fn stage_counts_are_recorded_and_monotone_in_band() {
        let mut config = OptimizerConfig::default();
        config.filters.min_epnl = -1e9;
        config.filters.min_pop_breakeven = 0.0;
        config.filters.max_loss_pct = 1.0;
        let pricer = BlackScholesPricer::new();
        let out = CandidateFunnel::new(&config, &pricer).run(&chain(), &neutral(), 10).unwrap();

        let d = &out.diagnostics;
        assert!(d.stage_count(STAGE_EXPIRIES).unwrap() >= 3);
        assert!(d.stage_count(STAGE_STRUCTURES).unwrap() >= d.stage_count(STAGE_SURVIVORS).unwrap());
        assert!(!out.survivors.is_empty());
        assert!(out.survivors.len() <= config.funnel.survivor_band_max);
        assert!(out.survivors.iter().all(|s| s.cost.is_some() && s.analytic.is_some()));
    }

    #[test]
    fn impossible_filter_yields_hints_not_error() {
        let mut config = OptimizerConfig::default();
        config.filters.min_epnl = 1e9;
        let pricer = BlackScholesPricer::new();
        let out = CandidateFunnel::new(&config, &pricer).run(&chain(), &neutral(), 10).unwrap();
        assert!(out.survivors.is_empty());
        assert_eq!(out.diagnostics.stage_count(STAGE_SURVIVORS), Some(0));
        assert!(out
            .diagnostics
            .hints
            .iter()
            .any(|h| h.contains("Stage 3 hard filters eliminated all candidates")));
        assert!(out.diagnostics.hints.iter().any(|h| h.contains("E[PnL] filter")));
    }

    #[test]
    fn empty_dte_window_is_soft() {
        let mut config = OptimizerConfig::default();
        config.funnel.dte_min = 300;
        config.funnel.dte_max = 400;
        let pricer = BlackScholesPricer::new();
        let out = CandidateFunnel::new(&config, &pricer).run(&chain(), &neutral(), 10).unwrap();
        assert!(out.survivors.is_empty());
        assert_eq!(out.diagnostics.stage_count(STAGE_EXPIRIES), Some(0));
        assert!(out.diagnostics.stage_count(STAGE_STRIKES).is_none());
    }

    #[test]
    fn rejects_bad_inputs() {
        let config = OptimizerConfig::default();
        let pricer = BlackScholesPricer::new();
        let mut c = chain();
        let funnel = CandidateFunnel::new(&config, &pricer);
        assert_eq!(funnel.run(&c, &neutral(), 0).unwrap_err(), FunnelError::ZeroHorizon);
        c.spot = 0.0;
        assert!(matches!(funnel.run(&c, &neutral(), 5), Err(FunnelError::InvalidSpot(_))));
    }
}

//! Stage 3: analytic estimates, hard filters, Top-K per structure type.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use optlab_core::domain::{AnalyticEstimate, CandidateStructure, CostEstimate, StructureType};
use optlab_core::pricing::{OptionPricer, PricingError};
use optlab_core::stats::norm_quantile;

use crate::config::{FilterConfig, FunnelConfig, RegimeParams};
use crate::valuation::StructureValuer;

pub const CAPITAL_FILTER: &str = "capital_filter";
pub const MAXLOSS_FILTER: &str = "maxloss_filter";
pub const EPNL_FILTER: &str = "epnl_filter";
pub const POP_FILTER: &str = "pop_filter";
pub const PRICING_ERROR: &str = "pricing_error";

/// Quadrature points for the terminal distribution.
pub const QUADRATURE_POINTS: usize = 64;

// ─── Hard filters ───────────────────────────────────────────────────

/// A pure predicate over one costed structure. Filters never look at other
/// structures, so any application order yields the same survivors.
pub trait HardFilter: Send + Sync {
    fn name(&self) -> &'static str;
    /// Label used in remediation hints.
    fn label(&self) -> &'static str;
    fn passes(&self, structure: &CandidateStructure) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct CapitalFilter {
    pub max_capital: f64,
}

impl HardFilter for CapitalFilter {
    fn name(&self) -> &'static str {
        CAPITAL_FILTER
    }
    fn label(&self) -> &'static str {
        "Capital"
    }
    fn passes(&self, s: &CandidateStructure) -> bool {
        s.cost.is_some_and(|c| c.capital_required <= self.max_capital)
    }
}

/// |max_loss| within `max_loss_pct` of account capital.
#[derive(Debug, Clone, Copy)]
pub struct MaxLossFilter {
    pub max_loss_pct: f64,
    pub account_capital: f64,
}

impl HardFilter for MaxLossFilter {
    fn name(&self) -> &'static str {
        MAXLOSS_FILTER
    }
    fn label(&self) -> &'static str {
        "MaxLoss"
    }
    fn passes(&self, s: &CandidateStructure) -> bool {
        s.cost
            .is_some_and(|c| c.max_loss.abs() <= self.max_loss_pct * self.account_capital)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EpnlFilter {
    pub min_epnl: f64,
}

impl HardFilter for EpnlFilter {
    fn name(&self) -> &'static str {
        EPNL_FILTER
    }
    fn label(&self) -> &'static str {
        "E[PnL]"
    }
    fn passes(&self, s: &CandidateStructure) -> bool {
        s.analytic.is_some_and(|a| a.expected_pnl >= self.min_epnl)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PopFilter {
    pub min_pop: f64,
}

impl HardFilter for PopFilter {
    fn name(&self) -> &'static str {
        POP_FILTER
    }
    fn label(&self) -> &'static str {
        "POP"
    }
    fn passes(&self, s: &CandidateStructure) -> bool {
        s.analytic.is_some_and(|a| a.pop_breakeven >= self.min_pop)
    }
}

pub fn hard_filters(config: &FilterConfig) -> Vec<Box<dyn HardFilter>> {
    vec![
        Box::new(CapitalFilter {
            max_capital: config.max_capital,
        }),
        Box::new(MaxLossFilter {
            max_loss_pct: config.max_loss_pct,
            account_capital: config.max_capital,
        }),
        Box::new(EpnlFilter {
            min_epnl: config.min_epnl,
        }),
        Box::new(PopFilter {
            min_pop: config.min_pop_breakeven,
        }),
    ]
}

/// Survivors of every filter, plus per-filter rejection counts. A structure
/// failing several filters counts once under each.
pub fn apply_filters(
    pool: Vec<CandidateStructure>,
    filters: &[Box<dyn HardFilter>],
) -> (Vec<CandidateStructure>, BTreeMap<&'static str, usize>) {
    let mut rejections: BTreeMap<&'static str, usize> = filters.iter().map(|f| (f.name(), 0)).collect();
    let survivors = pool
        .into_iter()
        .filter(|s| {
            let mut ok = true;
            for f in filters {
                if !f.passes(s) {
                    *rejections.entry(f.name()).or_insert(0) += 1;
                    ok = false;
                }
            }
            ok
        })
        .collect();
    (survivors, rejections)
}

// ─── Analytic estimate ──────────────────────────────────────────────

/// Everything the quadrature needs besides the structure.
pub struct AnalyticContext<'a> {
    pub as_of: NaiveDate,
    pub spot: f64,
    pub regime: &'a RegimeParams,
    /// Trade horizon in trading days.
    pub horizon: usize,
    pub fallback_vol: f64,
    pub risk_free_rate: f64,
    pub account_capital: f64,
    pub pricer: &'a dyn OptionPricer,
}

/// Equiprobable lognormal nodes of the spot after `horizon` days.
pub fn terminal_nodes(spot: f64, regime: &RegimeParams, horizon: usize) -> Vec<f64> {
    let h = horizon as f64;
    let mu = regime.mean_daily_return * h;
    let sigma = regime.daily_vol * h.sqrt();
    (0..QUADRATURE_POINTS)
        .map(|i| {
            let p = (i as f64 + 0.5) / QUADRATURE_POINTS as f64;
            spot * (mu + sigma * norm_quantile(p)).exp()
        })
        .collect()
}

/// E[PnL] and P(PnL > 0) at the horizon, plus the cheap pre-score
/// `pop · E[PnL]/capital − 0.5 · |max_loss| / account_capital`.
pub fn analytic_estimate(
    structure: &CandidateStructure,
    cost: &CostEstimate,
    ctx: &AnalyticContext<'_>,
) -> Result<AnalyticEstimate, PricingError> {
    let valuer = StructureValuer::new(
        structure,
        cost,
        ctx.as_of,
        ctx.fallback_vol,
        ctx.risk_free_rate,
        ctx.pricer,
    )?;
    let h = ctx.horizon as f64;
    let nodes = terminal_nodes(ctx.spot, ctx.regime, ctx.horizon);
    let mut sum = 0.0;
    let mut wins = 0usize;
    for s in &nodes {
        let pnl = valuer.pnl(*s, h)?;
        sum += pnl;
        if pnl > 0.0 {
            wins += 1;
        }
    }
    let n = nodes.len() as f64;
    let expected_pnl = sum / n;
    let pop_breakeven = wins as f64 / n;
    let capital = cost.capital_required.max(1.0);
    let pre_score = pop_breakeven * expected_pnl / capital - 0.5 * cost.max_loss.abs() / ctx.account_capital;
    Ok(AnalyticEstimate {
        expected_pnl,
        pop_breakeven,
        pre_score,
    })
}

// ─── Top-K ──────────────────────────────────────────────────────────

/// Fixed K, or the survivor band's upper bound split across present types.
pub fn resolve_k(config: &FunnelConfig, types_present: usize) -> usize {
    config
        .top_k_per_type
        .unwrap_or_else(|| (config.survivor_band_max / types_present.max(1)).max(1))
}

fn pre_score(s: &CandidateStructure) -> f64 {
    s.analytic.map_or(f64::NEG_INFINITY, |a| a.pre_score)
}

/// Best `k` per structure type by pre-score (ties by key), grouped by type.
pub fn top_k_per_type(survivors: Vec<CandidateStructure>, k: usize) -> Vec<CandidateStructure> {
    let mut groups: BTreeMap<StructureType, Vec<CandidateStructure>> = BTreeMap::new();
    for s in survivors {
        groups.entry(s.structure_type).or_default().push(s);
    }
    groups
        .into_values()
        .flat_map(|mut group| {
            group.sort_by(|a, b| {
                pre_score(b)
                    .total_cmp(&pre_score(a))
                    .then_with(|| a.key().cmp(&b.key()))
            });
            group.truncate(k);
            group
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use optlab_core::domain::{Leg, OptionType, Side};

    fn structure(cost: CostEstimate, epnl: f64, pop: f64, lower: f64) -> CandidateStructure {
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let legs = vec![
            Leg::new(OptionType::Put, lower, expiry, Side::Buy, 1, 1.0).unwrap(),
            Leg::new(OptionType::Put, lower + 5.0, expiry, Side::Sell, 1, 2.0).unwrap(),
        ];
        CandidateStructure::new(StructureType::BullPutSpread, legs, 1)
            .unwrap()
            .with_cost(cost)
            .with_analytic(AnalyticEstimate {
                expected_pnl: epnl,
                pop_breakeven: pop,
                pre_score: pop * epnl / cost.capital_required,
            })
    }

    fn cost(max_loss: f64) -> CostEstimate {
        CostEstimate {
            entry_cash_flow: 100.0,
            exit_cost: 120.0,
            commission: 1.3,
            capital_required: max_loss.abs(),
            max_loss,
            max_profit: 100.0,
        }
    }

    #[test]
    fn rejections_counted_per_filter() {
        let pool = vec![
            structure(cost(-400.0), 600.0, 0.7, 90.0),
            structure(cost(-900.0), 600.0, 0.7, 91.0),
            structure(cost(-900.0), 100.0, 0.5, 92.0),
        ];
        let (kept, rej) = apply_filters(pool, &hard_filters(&FilterConfig::default()));
        assert_eq!(kept.len(), 1);
        assert_eq!(rej[MAXLOSS_FILTER], 2);
        assert_eq!(rej[EPNL_FILTER], 1);
        assert_eq!(rej[POP_FILTER], 1);
        assert_eq!(rej[CAPITAL_FILTER], 0);
    }

    #[test]
    fn nodes_are_sorted_around_drifted_spot() {
        let regime = RegimeParams::new(0.0, 0.01, 0.0, 1.0);
        let nodes = terminal_nodes(100.0, &regime, 9);
        assert_eq!(nodes.len(), QUADRATURE_POINTS);
        assert!(nodes.windows(2).all(|w| w[0] < w[1]));
        let median = (nodes[31] * nodes[32]).sqrt();
        assert!((median - 100.0).abs() < 0.5);
    }

    #[test]
    fn top_k_keeps_best_per_type() {
        let pool: Vec<_> = (0..6)
            .map(|i| structure(cost(-100.0), 100.0 * (i + 1) as f64, 0.7, 80.0 + i as f64))
            .collect();
        let kept = top_k_per_type(pool, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].analytic.unwrap().expected_pnl, 600.0);
        assert_eq!(kept[1].analytic.unwrap().expected_pnl, 500.0);
    }

    #[test]
    fn k_derived_from_band() {
        let cfg = FunnelConfig::default();
        assert_eq!(resolve_k(&cfg, 4), 50);
        assert_eq!(resolve_k(&cfg, 0), 200);
        let fixed = FunnelConfig {
            top_k_per_type: Some(7),
            ..FunnelConfig::default()
        };
        assert_eq!(resolve_k(&fixed, 4), 7);
    }
}

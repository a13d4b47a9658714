//! MetricsEngine: simulated price paths → `MetricsReport`.
//!
//! Evaluation is split into `accumulate` (per block of paths) and `finish`
//! (population statistics), so chunked path generation reduces each block
//! as it is produced. `evaluate` does both for a single in-memory matrix.

use thiserror::Error;

use optlab_core::domain::{CostEstimate, MetricsReport, PathMatrix, VarMethod};
use optlab_core::pricing::{PricingError, TRADING_DAYS_PER_YEAR};
use optlab_core::stats;

use crate::config::McConfig;
use crate::valuation::StructureValuer;

/// Non-positive spots are valued at this price.
pub const SPOT_EPSILON: f64 = 1e-9;

/// Bankruptcy above this fraction of paths is fatal for the evaluation.
pub const MAX_BANKRUPTCY_RATE: f64 = 0.5;

/// Short-leg extrinsic value, per share, below which early exercise is counted.
pub const EARLY_EXERCISE_THRESHOLD: f64 = 0.01;

const CI_Z: f64 = 1.96;
const SPOT_BUMP: f64 = 0.01;
const VOL_BUMP: f64 = 0.01;

#[derive(Debug, Error, PartialEq)]
#[error("{bankrupt} of {paths} paths reached a non-positive spot (rate {rate:.3} exceeds 0.5)")]
pub struct BankruptcyError {
    pub bankrupt: usize,
    pub paths: usize,
    pub rate: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("no simulated paths to evaluate")]
    NoPaths,
    #[error("path block has {got} steps, expected {expected}")]
    HorizonMismatch { got: usize, expected: usize },
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Bankruptcy(#[from] BankruptcyError),
}

// ─── Pure statistics ────────────────────────────────────────────────

/// Largest drop of `equity` below its running peak, as a non-positive fraction.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &e in equity {
        peak = peak.max(e);
        if peak > 0.0 {
            worst = worst.min((e - peak) / peak);
        }
    }
    worst
}

/// Sharpe and Sortino of `returns` over `risk_free` per period. Zero dispersion gives 0.
pub fn sharpe_sortino(returns: &[f64], risk_free: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free).collect();
    let m = stats::mean(&excess);
    let sd = stats::std_dev(&excess);
    let downside = (excess.iter().map(|e| e.min(0.0).powi(2)).sum::<f64>() / excess.len() as f64).sqrt();
    let ratio = |d: f64| if d > 1e-12 { m / d } else { 0.0 };
    (ratio(sd), ratio(downside))
}

/// VaR and CVaR of a PnL sample at `alpha`, both in PnL units (losses negative).
pub fn value_at_risk(pnl: &[f64], alpha: f64, method: VarMethod) -> (f64, f64) {
    if pnl.is_empty() {
        return (0.0, 0.0);
    }
    match method {
        VarMethod::Historical => {
            let sorted = stats::sorted_copy(pnl);
            let var = stats::percentile_sorted(&sorted, alpha * 100.0);
            let tail: Vec<f64> = sorted.iter().copied().take_while(|&p| p <= var).collect();
            let cvar = if tail.is_empty() { var } else { stats::mean(&tail) };
            (var, cvar)
        }
        VarMethod::Parametric | VarMethod::ParametricShrinkage => {
            let mu = stats::mean(pnl);
            let mut sigma = stats::std_dev(pnl);
            if method == VarMethod::ParametricShrinkage {
                sigma = (0.9 * sigma.powi(2) + 0.1 * mu.powi(2)).sqrt();
            }
            let z = stats::norm_quantile(alpha);
            let density = (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt();
            (mu + z * sigma, mu - sigma * density / alpha)
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSettings {
    pub profit_target: Option<f64>,
    pub var_alpha: f64,
    pub var_method: VarMethod,
    /// Annual rate.
    pub risk_free_rate: f64,
    pub drawdown_sample_paths: usize,
}

impl MetricsSettings {
    pub fn from_mc(mc: &McConfig) -> Self {
        Self {
            profit_target: Some(mc.profit_target),
            var_alpha: mc.var_alpha,
            var_method: mc.var_method,
            risk_free_rate: mc.risk_free_rate,
            drawdown_sample_paths: mc.drawdown_sample_paths,
        }
    }
}

/// Per-path outputs gathered across one or more path blocks.
#[derive(Debug, Clone, Default)]
pub struct PathOutcomes {
    horizon: usize,
    pnl: Vec<f64>,
    bankrupt: usize,
    early_exercise: usize,
    drawdowns: Vec<f64>,
}

impl PathOutcomes {
    pub fn len(&self) -> usize {
        self.pnl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pnl.is_empty()
    }

    pub fn pnl(&self) -> &[f64] {
        &self.pnl
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsEngine {
    settings: MetricsSettings,
}

impl MetricsEngine {
    pub fn new(settings: MetricsSettings) -> Self {
        Self { settings }
    }

    /// Value every path in `prices` at its horizon. `first_path` is the index
    /// of the block's first row in the whole draw.
    pub fn accumulate(
        &self,
        valuer: &StructureValuer<'_>,
        cost: &CostEstimate,
        prices: &PathMatrix,
        first_path: usize,
        outcomes: &mut PathOutcomes,
    ) -> Result<(), MetricsError> {
        let horizon = prices.n_steps();
        if outcomes.horizon == 0 {
            outcomes.horizon = horizon;
        } else if outcomes.horizon != horizon {
            return Err(MetricsError::HorizonMismatch {
                got: horizon,
                expected: outcomes.horizon,
            });
        }
        let days = horizon as f64;
        let capital = cost.capital_required.max(1.0);

        for (i, row) in prices.rows().enumerate() {
            if row.iter().any(|&s| !(s > 0.0)) {
                outcomes.bankrupt += 1;
            }
            let terminal = row[horizon - 1].max(SPOT_EPSILON);
            outcomes.pnl.push(valuer.pnl(terminal, days)?);
            outcomes.early_exercise += valuer.early_exercise_candidates(terminal, days, EARLY_EXERCISE_THRESHOLD)?;

            if first_path + i < self.settings.drawdown_sample_paths {
                let mut equity = Vec::with_capacity(horizon + 1);
                equity.push(capital);
                for (t, &s) in row.iter().enumerate() {
                    equity.push(capital + valuer.pnl(s.max(SPOT_EPSILON), (t + 1) as f64)?);
                }
                outcomes.drawdowns.push(max_drawdown(&equity));
            }
        }
        Ok(())
    }

    /// Population statistics, with `greeks` computed once at t0.
    pub fn finish(
        &self,
        outcomes: PathOutcomes,
        greeks: &Greeks,
        cost: &CostEstimate,
    ) -> Result<MetricsReport, MetricsError> {
        let n = outcomes.pnl.len();
        if n == 0 {
            return Err(MetricsError::NoPaths);
        }
        let bankruptcy_rate = outcomes.bankrupt as f64 / n as f64;
        if bankruptcy_rate > MAX_BANKRUPTCY_RATE {
            return Err(BankruptcyError {
                bankrupt: outcomes.bankrupt,
                paths: n,
                rate: bankruptcy_rate,
            }
            .into());
        }

        let pnl = &outcomes.pnl;
        let nf = n as f64;
        let expected_pnl = stats::mean(pnl);
        let epnl_half = CI_Z * stats::std_dev(pnl) / nf.sqrt();
        let pop_breakeven = pnl.iter().filter(|&&p| p > 0.0).count() as f64 / nf;
        let pop_half = CI_Z * (pop_breakeven * (1.0 - pop_breakeven) / nf).sqrt();
        let pop_target = self
            .settings
            .profit_target
            .map(|target| pnl.iter().filter(|&&p| p >= target).count() as f64 / nf);

        let capital = cost.capital_required.max(1.0);
        let (var, cvar) = value_at_risk(pnl, self.settings.var_alpha, self.settings.var_method);
        let returns: Vec<f64> = pnl.iter().map(|p| p / capital).collect();
        let rf_horizon = self.settings.risk_free_rate / TRADING_DAYS_PER_YEAR * outcomes.horizon as f64;
        let (sharpe, sortino) = sharpe_sortino(&returns, rf_horizon);

        Ok(MetricsReport {
            expected_pnl,
            median_pnl: stats::median(pnl),
            ci_epnl: [expected_pnl - epnl_half, expected_pnl + epnl_half],
            epnl_ci_half_width: epnl_half,
            pop_breakeven,
            pop_target,
            pop_ci_half_width: pop_half,
            roc: expected_pnl / capital,
            max_loss: cost.max_loss,
            var,
            cvar,
            var_alpha: self.settings.var_alpha,
            var_method: self.settings.var_method,
            delta: greeks.delta,
            theta: greeks.theta,
            gamma: greeks.gamma,
            vega: greeks.vega,
            max_drawdown: stats::median(&outcomes.drawdowns),
            sharpe,
            sortino,
            bankruptcy_rate,
            path_count: n,
            early_exercise_events: outcomes.early_exercise,
        })
    }

    pub fn evaluate(
        &self,
        valuer: &StructureValuer<'_>,
        cost: &CostEstimate,
        prices: &PathMatrix,
        spot: f64,
    ) -> Result<MetricsReport, MetricsError> {
        let greeks = Greeks::at(valuer, spot)?;
        let mut outcomes = PathOutcomes::default();
        self.accumulate(valuer, cost, prices, 0, &mut outcomes)?;
        self.finish(outcomes, &greeks, cost)
    }
}

/// Position Greeks in dollars: delta per $1 of spot, gamma per $1², vega per
/// vol point, theta per trading day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta: f64,
}

impl Greeks {
    pub fn at(valuer: &StructureValuer<'_>, spot: f64) -> Result<Self, PricingError> {
        let h = spot * SPOT_BUMP;
        let base = valuer.mark(spot, 0.0)?;
        let up = valuer.mark(spot + h, 0.0)?;
        let down = valuer.mark(spot - h, 0.0)?;
        let tomorrow = valuer.mark(spot, 1.0)?;
        Ok(Self {
            delta: (up - down) / (2.0 * h),
            gamma: (up - 2.0 * base + down) / (h * h),
            vega: valuer.vega(spot, VOL_BUMP)?,
            theta: tomorrow - base,
        })
    }
}

//! Strategy comparison on simulated paths.
//!
//! A moving-average stock strategy and a momentum long call trade the same
//! paths. A position is taken at each close and held over the next step, so
//! step `t` earns the signal from `t - 1`. The stock leg trades
//! [`STOCK_SHARES`] shares and the option leg one contract.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use optlab_core::distributions::DistributionFitError;
use optlab_core::domain::{OptionType, VarMethod, CONTRACT_MULTIPLIER};
use optlab_core::pricing::{OptionPricer, OptionSpec, PricingError, TRADING_DAYS_PER_YEAR};
use optlab_core::resources::{select_storage_policy, ResourceLimitError};
use optlab_core::stats;

use crate::conditional::SelectedSampler;
use crate::config::OptimizerConfig;
use crate::metrics::{max_drawdown, sharpe_sortino, value_at_risk, BankruptcyError, MAX_BANKRUPTCY_RATE, SPOT_EPSILON};
use crate::optimize::{regime_model, ErrorKind, OptimizeError, Optimizer};
use crate::paths::{PathError, PricePathGenerator};

/// Shares traded by the stock leg, one contract's worth.
pub const STOCK_SHARES: f64 = CONTRACT_MULTIPLIER;
/// One trading year of steps.
pub const MAX_COMPARE_STEPS: usize = 252;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
    #[error(transparent)]
    Sampling(#[from] DistributionFitError),
    #[error(transparent)]
    Resource(#[from] ResourceLimitError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Bankruptcy(#[from] BankruptcyError),
}

impl CompareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompareError::InvalidParameter { .. } | CompareError::Sampling(_) | CompareError::Resource(_) => {
                ErrorKind::Validation
            }
            CompareError::Path(_) | CompareError::Pricing(_) | CompareError::Bankruptcy(_) => ErrorKind::Runtime,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> CompareError {
    CompareError::InvalidParameter {
        field,
        reason: reason.into(),
    }
}

// ─── Strategies ─────────────────────────────────────────────────────

/// Dual moving-average crossover: long while the short trailing mean is
/// above the long one, short otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBasic {
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for StockBasic {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
        }
    }
}

impl StockBasic {
    /// Windows used on `len` closes. A long window not above the short one
    /// is moved five past it; both are capped at `len`.
    pub fn effective_windows(&self, len: usize) -> (usize, usize) {
        let short = self.short_window.max(1);
        let long = if self.long_window <= short { short + 5 } else { self.long_window };
        let cap = len.max(1);
        (short.min(cap), long.min(cap))
    }

    /// +1 long or -1 short at each close.
    pub fn signals(&self, closes: &[f64]) -> Vec<i8> {
        let (short, long) = self.effective_windows(closes.len());
        let fast = trailing_means(closes, short);
        let slow = trailing_means(closes, long);
        fast.iter().zip(&slow).map(|(f, s)| if f > s { 1 } else { -1 }).collect()
    }
}

/// Momentum long call: hold one call after an up or flat close, stay flat
/// after a down close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallBasic;

impl CallBasic {
    /// 1 holding or 0 flat at each close; the first close counts as flat-to-up.
    pub fn signals(&self, closes: &[f64]) -> Vec<i8> {
        closes
            .iter()
            .enumerate()
            .map(|(t, &c)| if t == 0 || c >= closes[t - 1] { 1 } else { 0 })
            .collect()
    }
}

/// Mean of the last `window` values at each index (fewer at the start).
fn trailing_means(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (t, &v) in values.iter().enumerate() {
        sum += v;
        if t >= window {
            sum -= values[t - window];
        }
        out.push(sum / (t + 1).min(window) as f64);
    }
    out
}

/// Dollar PnL per step of holding `signals[t - 1] × scale` units of `marks`.
pub fn step_pnl(signals: &[i8], marks: &[f64], scale: f64) -> Vec<f64> {
    marks
        .windows(2)
        .zip(signals)
        .map(|(w, &s)| f64::from(s) * (w[1] - w[0]) * scale)
        .collect()
}

// ─── Request / report ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub regime: String,
    pub spot: f64,
    pub n_paths: usize,
    pub n_steps: usize,
    /// Call strike; at the money when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<f64>,
    /// Trading days to the call's expiry at entry.
    pub maturity_days: u32,
    pub implied_vol: f64,
    #[serde(default)]
    pub stock: StockBasic,
}

impl CompareRequest {
    pub fn new(regime: impl Into<String>, spot: f64) -> Self {
        Self {
            regime: regime.into(),
            spot,
            n_paths: 1000,
            n_steps: 60,
            strike: None,
            maturity_days: 30,
            implied_vol: 0.2,
            stock: StockBasic::default(),
        }
    }

    pub fn validate(&self) -> Result<(), CompareError> {
        if !(self.spot.is_finite() && self.spot > 0.0) {
            return Err(invalid("spot", format!("must be positive and finite, got {}", self.spot)));
        }
        if self.n_paths == 0 {
            return Err(invalid("n_paths", "must be positive"));
        }
        if !(1..=MAX_COMPARE_STEPS).contains(&self.n_steps) {
            return Err(invalid("n_steps", format!("must be in 1..={MAX_COMPARE_STEPS}, got {}", self.n_steps)));
        }
        if let Some(k) = self.strike {
            if !(k.is_finite() && k > 0.0) {
                return Err(invalid("strike", format!("must be positive and finite, got {k}")));
            }
        }
        if self.maturity_days == 0 {
            return Err(invalid("maturity_days", "must be at least one trading day"));
        }
        if !(self.implied_vol > 0.0 && self.implied_vol <= 5.0) {
            return Err(invalid("implied_vol", format!("must be in (0, 5], got {}", self.implied_vol)));
        }
        if self.stock.short_window == 0 || self.stock.long_window == 0 {
            return Err(invalid("stock", "moving-average windows must be positive"));
        }
        Ok(())
    }
}

/// Distribution of one strategy's outcome over the simulated paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub strategy: String,
    /// Capital that returns, drawdowns and ratios are measured against.
    pub capital: f64,
    pub mean_pnl: f64,
    pub median_pnl: f64,
    /// Median over the sampled equity curves, non-positive fraction.
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub var: f64,
    pub cvar: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareReport {
    pub regime: String,
    pub sampler: String,
    pub n_paths: usize,
    pub n_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub var_alpha: f64,
    pub var_method: VarMethod,
    /// Per-share call price at entry.
    pub call_premium: f64,
    pub bankruptcy_rate: f64,
    pub stock: StrategyMetrics,
    pub option: StrategyMetrics,
    /// Both legs held together.
    pub combined: StrategyMetrics,
    pub runtime_seconds: f64,
}

// ─── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LegOutcomes {
    pnl: Vec<f64>,
    drawdowns: Vec<f64>,
}

impl LegOutcomes {
    fn push(&mut self, steps: &[f64], capital: f64, keep_curve: bool) {
        self.pnl.push(steps.iter().sum());
        if keep_curve {
            let mut equity = Vec::with_capacity(steps.len() + 1);
            let mut value = capital;
            equity.push(value);
            for s in steps {
                value += s;
                equity.push(value);
            }
            self.drawdowns.push(max_drawdown(&equity));
        }
    }

    fn summarize(&self, strategy: &str, capital: f64, alpha: f64, method: VarMethod, rf_horizon: f64) -> StrategyMetrics {
        let (var, cvar) = value_at_risk(&self.pnl, alpha, method);
        let returns: Vec<f64> = self.pnl.iter().map(|p| p / capital).collect();
        let (sharpe, sortino) = sharpe_sortino(&returns, rf_horizon);
        StrategyMetrics {
            strategy: strategy.to_string(),
            capital,
            mean_pnl: stats::mean(&self.pnl),
            median_pnl: stats::median(&self.pnl),
            max_drawdown: stats::median(&self.drawdowns),
            sharpe,
            sortino,
            var,
            cvar,
        }
    }
}

/// Run both strategies over `request.n_paths` paths drawn from `sampler`.
///
/// Seeding, VaR settings, drawdown sampling and the memory budget come from
/// `config`.
pub fn run_compare(
    request: &CompareRequest,
    sampler: &SelectedSampler,
    pricer: &dyn OptionPricer,
    config: &OptimizerConfig,
) -> Result<CompareReport, CompareError> {
    request.validate()?;
    let started = Instant::now();
    let mc = &config.mc;
    let storage = select_storage_policy(request.n_paths, request.n_steps, config.runtime.memory_budget_gb)?;
    debug!(?storage, paths = request.n_paths, steps = request.n_steps, "compare storage selected");

    let call = OptionSpec {
        option_type: OptionType::Call,
        strike: request.strike.unwrap_or(request.spot),
        days_to_expiry: f64::from(request.maturity_days),
        volatility: request.implied_vol,
        risk_free_rate: mc.risk_free_rate,
    };
    let call_premium = pricer.price_at(request.spot, &call, 0.0)?;
    let stock_capital = request.spot * STOCK_SHARES;
    let option_capital = (call_premium * CONTRACT_MULTIPLIER).max(1.0);

    let mut stock = LegOutcomes::default();
    let mut option = LegOutcomes::default();
    let mut combined = LegOutcomes::default();
    let mut bankrupt = 0usize;
    let mut closes = Vec::with_capacity(request.n_steps + 1);

    PricePathGenerator::new(sampler).generate_with_policy::<CompareError, _>(
        storage,
        request.spot,
        request.n_steps,
        request.n_paths,
        mc.seed,
        |first_path, prices| {
            for (offset, row) in prices.rows().enumerate() {
                if row.iter().any(|&s| s <= 0.0) {
                    bankrupt += 1;
                }
                closes.clear();
                closes.push(request.spot);
                closes.extend(row.iter().map(|&s| s.max(SPOT_EPSILON)));

                let stock_steps = step_pnl(&request.stock.signals(&closes), &closes, STOCK_SHARES);
                let marks = pricer.price(&closes, &call)?;
                let option_steps = step_pnl(&CallBasic.signals(&closes), &marks, CONTRACT_MULTIPLIER);
                let both: Vec<f64> = stock_steps.iter().zip(&option_steps).map(|(a, b)| a + b).collect();

                let keep_curve = first_path + offset < mc.drawdown_sample_paths;
                stock.push(&stock_steps, stock_capital, keep_curve);
                option.push(&option_steps, option_capital, keep_curve);
                combined.push(&both, stock_capital + option_capital, keep_curve);
            }
            Ok(())
        },
    )?;

    let bankruptcy_rate = bankrupt as f64 / request.n_paths as f64;
    if bankruptcy_rate > MAX_BANKRUPTCY_RATE {
        return Err(BankruptcyError {
            bankrupt,
            paths: request.n_paths,
            rate: bankruptcy_rate,
        }
        .into());
    }

    let rf_horizon = mc.risk_free_rate / TRADING_DAYS_PER_YEAR * request.n_steps as f64;
    let summarize = |leg: &LegOutcomes, name: &str, capital: f64| {
        leg.summarize(name, capital, mc.var_alpha, mc.var_method, rf_horizon)
    };
    let report = CompareReport {
        regime: request.regime.clone(),
        sampler: sampler.name().to_string(),
        n_paths: request.n_paths,
        n_steps: request.n_steps,
        seed: mc.seed,
        var_alpha: mc.var_alpha,
        var_method: mc.var_method,
        call_premium,
        bankruptcy_rate,
        stock: summarize(&stock, "stock_basic", stock_capital),
        option: summarize(&option, "call_basic", option_capital),
        combined: summarize(&combined, "combined", stock_capital + option_capital),
        runtime_seconds: started.elapsed().as_secs_f64(),
    };
    info!(
        regime = %report.regime,
        sampler = %report.sampler,
        stock_mean = report.stock.mean_pnl,
        option_mean = report.option.mean_pnl,
        "compare complete"
    );
    Ok(report)
}

impl<'a> Optimizer<'a> {
    /// Compare both strategies on paths drawn from the regime's unconditional model.
    pub fn compare(&self, request: &CompareRequest) -> Result<CompareReport, OptimizeError> {
        let sampler = self.regime_sampler(&request.regime)?;
        Ok(run_compare(request, &sampler, self.pricer(), self.config())?)
    }

    pub(crate) fn regime_sampler(&self, regime: &str) -> Result<SelectedSampler, OptimizeError> {
        let params = *self
            .config()
            .regime(regime)
            .ok_or_else(|| OptimizeError::UnknownRegime(regime.to_string()))?;
        let model = regime_model(&params).map_err(CompareError::from)?;
        Ok(SelectedSampler::Fitted(model))
    }
}

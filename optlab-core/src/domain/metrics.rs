//! Risk/reward report produced once per (structure, path_count) evaluation.

use serde::{Deserialize, Serialize};

/// How VaR is estimated from a PnL sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    /// Empirical alpha-percentile.
    #[default]
    Historical,
    /// mean + z(alpha) · std.
    Parametric,
    /// Parametric with std shrunk toward the mean: sqrt(0.9·σ² + 0.1·μ²).
    ParametricShrinkage,
}

/// Monte Carlo metrics for one structure. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    #[serde(rename = "E_PnL")]
    pub expected_pnl: f64,
    #[serde(rename = "median_PnL")]
    pub median_pnl: f64,
    /// 95% confidence interval of E[PnL] as `[low, high]`.
    #[serde(rename = "CI_epnl")]
    pub ci_epnl: [f64; 2],
    pub epnl_ci_half_width: f64,
    /// Probability that horizon PnL is above zero.
    #[serde(rename = "POP_0")]
    pub pop_breakeven: f64,
    /// Probability that horizon PnL reaches the configured profit target.
    #[serde(rename = "POP_target", default, skip_serializing_if = "Option::is_none")]
    pub pop_target: Option<f64>,
    pub pop_ci_half_width: f64,
    #[serde(rename = "ROC")]
    pub roc: f64,
    /// Analytic worst-case loss of the trade (negative or zero).
    #[serde(rename = "MaxLoss_trade")]
    pub max_loss: f64,
    #[serde(rename = "VaR_5")]
    pub var: f64,
    #[serde(rename = "CVaR_5")]
    pub cvar: f64,
    pub var_alpha: f64,
    pub var_method: VarMethod,
    #[serde(rename = "Delta")]
    pub delta: f64,
    #[serde(rename = "Theta")]
    pub theta: f64,
    #[serde(rename = "Gamma")]
    pub gamma: f64,
    #[serde(rename = "Vega")]
    pub vega: f64,
    /// Median per-path drawdown of the equity path, as a negative fraction.
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub bankruptcy_rate: f64,
    pub path_count: usize,
    pub early_exercise_events: usize,
}

//! Parameter sweep over the compared strategies.
//!
//! Each point of the cross product of stock windows and call strikes runs on
//! the same seeded paths. A failed point stays in the report with its error;
//! successful points are ranked by a weighted objective over the
//! rank-normalized metrics of the combined position.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use optlab_core::pricing::OptionPricer;
use optlab_core::resources::select_storage_policy;

use crate::compare::{run_compare, CompareError, CompareRequest, StockBasic, StrategyMetrics};
use crate::conditional::SelectedSampler;
use crate::config::OptimizerConfig;
use crate::optimize::{OptimizeError, Optimizer};
use crate::pool::WorkerPool;
use crate::scoring::rank_normalize;

pub const MAX_GRID_POINTS: usize = 256;

/// Objective weights over the combined position's metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveWeights {
    pub mean_pnl: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub cvar: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            mean_pnl: 0.3,
            sharpe: 0.3,
            max_drawdown: 0.2,
            cvar: 0.2,
        }
    }
}

impl ObjectiveWeights {
    fn as_array(&self) -> [f64; 4] {
        [self.mean_pnl, self.sharpe, self.max_drawdown, self.cvar]
    }

    pub fn validate(&self) -> Result<(), CompareError> {
        let w = self.as_array();
        if w.iter().any(|x| !(x.is_finite() && *x >= 0.0)) || w.iter().sum::<f64>() <= 0.0 {
            return Err(CompareError::InvalidParameter {
                field: "weights",
                reason: format!("need finite non-negative weights with a positive sum, got {w:?}"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRequest {
    pub base: CompareRequest,
    /// Empty keeps the base value; same for the other axes.
    #[serde(default)]
    pub short_windows: Vec<usize>,
    #[serde(default)]
    pub long_windows: Vec<usize>,
    #[serde(default)]
    pub strikes: Vec<f64>,
    #[serde(default)]
    pub weights: ObjectiveWeights,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub stock: StockBasic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike: Option<f64>,
}

/// Every (short, long, strike) combination in axis order.
pub fn expand_grid(request: &GridRequest) -> Vec<GridPoint> {
    let base = &request.base;
    let shorts = axis(&request.short_windows, base.stock.short_window);
    let longs = axis(&request.long_windows, base.stock.long_window);
    let strikes: Vec<Option<f64>> = if request.strikes.is_empty() {
        vec![base.strike]
    } else {
        request.strikes.iter().copied().map(Some).collect()
    };

    let mut points = Vec::with_capacity(shorts.len() * longs.len() * strikes.len());
    for &short_window in &shorts {
        for &long_window in &longs {
            for &strike in &strikes {
                points.push(GridPoint {
                    stock: StockBasic {
                        short_window,
                        long_window,
                    },
                    strike,
                });
            }
        }
    }
    points
}

fn axis(values: &[usize], base: usize) -> Vec<usize> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridEntry {
    /// Position in expansion order.
    pub index: usize,
    pub point: GridPoint,
    pub status: GridStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_score: Option<f64>,
    /// Ranks of mean PnL, Sharpe, max drawdown and CVaR, each in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_metrics: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StrategyMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GridEntry {
    pub fn success(index: usize, point: GridPoint, metrics: StrategyMetrics) -> Self {
        Self {
            index,
            point,
            status: GridStatus::Success,
            objective_score: None,
            normalized_metrics: None,
            metrics: Some(metrics),
            error: None,
        }
    }

    pub fn failed(index: usize, point: GridPoint, error: String) -> Self {
        Self {
            index,
            point,
            status: GridStatus::Failed,
            objective_score: None,
            normalized_metrics: None,
            metrics: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GridReport {
    /// Best objective first; failures last in expansion order.
    pub entries: Vec<GridEntry>,
    pub points: usize,
    pub failed: usize,
    pub runtime_seconds: f64,
}

/// Rank successful entries on each metric (all higher-is-better), attach the
/// weighted objective and sort best first.
pub fn score_entries(entries: &mut [GridEntry], weights: &ObjectiveWeights) {
    let scored: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.metrics.is_some())
        .map(|(i, _)| i)
        .collect();
    let column = |f: fn(&StrategyMetrics) -> f64| -> Vec<f64> {
        scored
            .iter()
            .filter_map(|&i| entries[i].metrics.as_ref().map(f))
            .collect()
    };
    let ranks = [
        rank_normalize(&column(|m| m.mean_pnl), true),
        rank_normalize(&column(|m| m.sharpe), true),
        rank_normalize(&column(|m| m.max_drawdown), true),
        rank_normalize(&column(|m| m.cvar), true),
    ];

    let w = weights.as_array();
    for (row, &i) in scored.iter().enumerate() {
        let normalized = [ranks[0][row], ranks[1][row], ranks[2][row], ranks[3][row]];
        let objective = normalized.iter().zip(&w).map(|(r, w)| r * w).sum();
        entries[i].normalized_metrics = Some(normalized);
        entries[i].objective_score = Some(objective);
    }

    entries.sort_by(|a, b| match (a.objective_score, b.objective_score) {
        (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| a.index.cmp(&b.index)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.index.cmp(&b.index),
    });
}

/// Run every grid point on `pool`. The memory budget in `config` is shared by
/// the points that run at once.
pub fn run_grid(
    request: &GridRequest,
    sampler: &SelectedSampler,
    pricer: &dyn OptionPricer,
    config: &OptimizerConfig,
    pool: &WorkerPool,
) -> Result<GridReport, CompareError> {
    let started = Instant::now();
    request.base.validate()?;
    request.weights.validate()?;
    let points = expand_grid(request);
    if points.len() > MAX_GRID_POINTS {
        return Err(CompareError::InvalidParameter {
            field: "grid",
            reason: format!("{} points exceed the {MAX_GRID_POINTS}-point limit", points.len()),
        });
    }

    let concurrent = pool.workers().min(points.len()).max(1);
    select_storage_policy(
        request.base.n_paths.saturating_mul(concurrent),
        request.base.n_steps,
        config.runtime.memory_budget_gb,
    )?;
    let mut per_point = config.clone();
    per_point.runtime.memory_budget_gb /= concurrent as f64;

    let results = pool.run_isolated(&points, |point| {
        let compare = CompareRequest {
            strike: point.strike,
            stock: point.stock,
            ..request.base.clone()
        };
        run_compare(&compare, sampler, pricer, &per_point)
    });

    let mut entries: Vec<GridEntry> = points
        .iter()
        .zip(results)
        .enumerate()
        .map(|(index, (&point, result))| match result {
            Ok(report) => GridEntry::success(index, point, report.combined),
            Err(e) => {
                warn!(index, error = %e, "grid point failed");
                GridEntry::failed(index, point, e.to_string())
            }
        })
        .collect();
    let failed = entries.iter().filter(|e| e.status == GridStatus::Failed).count();
    score_entries(&mut entries, &request.weights);

    info!(points = points.len(), failed, workers = concurrent, "grid complete");
    Ok(GridReport {
        entries,
        points: points.len(),
        failed,
        runtime_seconds: started.elapsed().as_secs_f64(),
    })
}

impl<'a> Optimizer<'a> {
    /// Sweep the grid on the optimizer's worker pool with the regime's
    /// unconditional model.
    pub fn grid(&self, request: &GridRequest) -> Result<GridReport, OptimizeError> {
        let sampler = self.regime_sampler(&request.base.regime)?;
        Ok(run_grid(request, &sampler, self.pricer(), self.config(), self.pool())?)
    }
}

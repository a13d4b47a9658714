//! ScoringEngine: Stage 4.
//!
//! Each survivor is simulated under the adaptive controller with its own
//! derived seed, then the scored population is ranked by a composite of
//! rank-normalized sub-scores:
//!
//! ```text
//! score = w_pop·POP_0 + w_roc·r(ROC) + w_theta·r(Theta)
//!       − w_tail·r(|CVaR|/capital) − w_delta·r(|Delta|) − w_gamma·r(|Gamma|) − w_vega·r(|Vega|)
//! ```
//!
//! `r(·)` maps a column to [0, 1] by average rank, so the composite is
//! invariant to rescaling any metric.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use optlab_core::domain::{AdaptivePathsRecord, CandidateStructure, CostEstimate, MetricsReport, RunId};
use optlab_core::pricing::{OptionPricer, PricingError};
use optlab_core::resources::StoragePolicy;
use optlab_core::rng::RngHierarchy;

use crate::adaptive::{AdaptiveCiSettings, AdaptiveError, AdaptivePathController, AdaptiveRun};
use crate::conditional::SelectedSampler;
use crate::config::{OptimizerConfig, ScoringWeights};
use crate::metrics::{Greeks, MetricsEngine, MetricsError, MetricsSettings, PathOutcomes};
use crate::paths::{PathError, PricePathGenerator};
use crate::pool::WorkerPool;
use crate::valuation::StructureValuer;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("survivor {key} has no cost estimate")]
    MissingCost { key: String },
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    Adaptive(#[from] AdaptiveError),
}

// ─── Rank normalization ─────────────────────────────────────────────

/// Rank-normalize values to [0.0, 1.0].
///
/// Ties get the average rank. If `higher_is_better` is false the ranks are
/// inverted. Non-finite values always land on the worst rank, whichever the
/// direction. Single-element vectors return [0.5].
pub fn rank_normalize(values: &[f64], higher_is_better: bool) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0.5];
    }

    // Map to "goodness" so the worst value sorts first; NaN and both
    // infinities collapse onto -inf there.
    let goodness = |v: f64| match (v.is_finite(), higher_is_better) {
        (false, _) => f64::NEG_INFINITY,
        (true, true) => v,
        (true, false) => -v,
    };
    let mut indexed: Vec<(usize, f64)> = values.iter().map(|&v| goodness(v)).enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut ranks = vec![0.0_f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && tied(indexed[j].1, indexed[i].1) {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for idx in &indexed[i..j] {
            ranks[idx.0] = avg_rank;
        }
        i = j;
    }

    let max_rank = n as f64;
    ranks.iter().map(|r| (r - 1.0) / (max_rank - 1.0)).collect()
}

fn tied(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() < 1e-15
}

// ─── Composite ──────────────────────────────────────────────────────

/// Weighted components of a composite score. Penalties are stored negative,
/// so the fields sum to the score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreDecomposition {
    pub pop: f64,
    pub roc: f64,
    pub theta: f64,
    pub tail_penalty: f64,
    pub delta_penalty: f64,
    pub gamma_penalty: f64,
    pub vega_penalty: f64,
}

impl ScoreDecomposition {
    pub fn total(&self) -> f64 {
        self.pop
            + self.roc
            + self.theta
            + self.tail_penalty
            + self.delta_penalty
            + self.gamma_penalty
            + self.vega_penalty
    }
}

fn column<F: Fn(usize, &MetricsReport) -> f64>(reports: &[&MetricsReport], f: F) -> Vec<f64> {
    reports.iter().enumerate().map(|(i, r)| f(i, r)).collect()
}

/// Composite score per report. `capitals[i]` scales report `i`'s tail risk.
pub fn composite_scores(reports: &[&MetricsReport], capitals: &[f64], weights: &ScoringWeights) -> Vec<ScoreDecomposition> {
    let capital = |i: usize| capitals.get(i).copied().unwrap_or(1.0).max(1.0);
    let roc = rank_normalize(&column(reports, |_, r| r.roc), true);
    let theta = rank_normalize(&column(reports, |_, r| r.theta), true);
    // Penalty columns rank lower-is-better; the penalty is the shortfall
    // from the best rank, so a non-finite exposure takes the full weight.
    let shortfall = |col: Vec<f64>| -> Vec<f64> { rank_normalize(&col, false).into_iter().map(|g| 1.0 - g).collect() };
    let tail = shortfall(column(reports, |i, r| r.cvar.abs() / capital(i)));
    let delta = shortfall(column(reports, |_, r| r.delta.abs()));
    let gamma = shortfall(column(reports, |_, r| r.gamma.abs()));
    let vega = shortfall(column(reports, |_, r| r.vega.abs()));

    reports
        .iter()
        .enumerate()
        .map(|(i, r)| ScoreDecomposition {
            pop: weights.w_pop * r.pop_breakeven,
            roc: weights.w_roc * roc[i],
            theta: weights.w_theta * theta[i],
            tail_penalty: -weights.w_tail * tail[i],
            delta_penalty: -weights.w_delta * delta[i],
            gamma_penalty: -weights.w_gamma * gamma[i],
            vega_penalty: -weights.w_vega * vega[i],
        })
        .collect()
}

// ─── Scored candidates ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    /// Survivor with `cost` and `metrics` attached.
    pub structure: CandidateStructure,
    pub score: f64,
    pub decomposition: ScoreDecomposition,
    pub adaptive: AdaptivePathsRecord,
}

impl ScoredCandidate {
    fn expected_pnl(&self) -> f64 {
        self.structure.metrics.as_ref().map_or(f64::NEG_INFINITY, |m| m.expected_pnl)
    }

    fn capital(&self) -> f64 {
        self.structure.cost.as_ref().map_or(f64::INFINITY, |c| c.capital_required)
    }
}

/// Score descending, then E[PnL] descending, then capital ascending, then key.
pub fn rank_candidates(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.expected_pnl().total_cmp(&a.expected_pnl()))
            .then_with(|| a.capital().total_cmp(&b.capital()))
            .then_with(|| a.structure.key().cmp(&b.structure.key()))
    });
}

/// Run-level adaptive record: the largest final path count wins.
pub fn aggregate_adaptive(records: &[AdaptivePathsRecord]) -> Option<AdaptivePathsRecord> {
    let largest = records.iter().max_by_key(|r| r.final_paths)?;
    Some(AdaptivePathsRecord {
        initial: largest.initial,
        doubled: records.iter().any(|r| r.doubled),
        final_paths: largest.final_paths,
        reason: largest.reason,
    })
}

// ─── Engine ─────────────────────────────────────────────────────────

/// Everything a survivor's simulation shares with its siblings.
pub struct ScoringContext<'a> {
    pub sampler: &'a SelectedSampler,
    pub pricer: &'a dyn OptionPricer,
    pub spot: f64,
    pub as_of: NaiveDate,
    pub horizon: usize,
    /// Annualized vol for legs without a quoted IV.
    pub fallback_vol: f64,
    pub risk_free_rate: f64,
    pub storage: StoragePolicy,
    pub run_id: RunId,
    /// `None` draws every survivor from OS entropy.
    pub rng: Option<RngHierarchy>,
}

#[derive(Debug, Clone)]
pub struct ScoringOutcome {
    pub ranked: Vec<ScoredCandidate>,
    /// (structure key, error) for each survivor dropped during simulation.
    pub dropped: Vec<(String, String)>,
    pub adaptive: Option<AdaptivePathsRecord>,
}

pub struct ScoringEngine<'a> {
    weights: ScoringWeights,
    settings: AdaptiveCiSettings,
    controller: AdaptivePathController,
    metrics: MetricsEngine,
    ctx: ScoringContext<'a>,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(config: &OptimizerConfig, ctx: ScoringContext<'a>) -> Result<Self, AdaptiveError> {
        let settings = AdaptiveCiSettings::from_mc(&config.mc)?;
        Ok(Self {
            weights: config.scoring,
            settings,
            controller: AdaptivePathController::new(settings),
            metrics: MetricsEngine::new(MetricsSettings::from_mc(&config.mc)),
            ctx,
        })
    }

    /// Seed for one adaptive iteration of one structure.
    pub fn seed_for(&self, key: &str, iteration: u64) -> Option<u64> {
        self.ctx
            .rng
            .as_ref()
            .map(|h| h.sub_seed(&self.ctx.run_id, key, iteration))
    }

    /// Simulate one structure under the adaptive controller.
    pub fn evaluate(&self, structure: &CandidateStructure) -> Result<AdaptiveRun, ScoringError> {
        let key = structure.key();
        let cost = structure
            .cost
            .ok_or_else(|| ScoringError::MissingCost { key: key.clone() })?;
        let valuer = StructureValuer::new(
            structure,
            &cost,
            self.ctx.as_of,
            self.ctx.fallback_vol,
            self.ctx.risk_free_rate,
            self.ctx.pricer,
        )?;
        // Greeks depend on the t0 marks only, not on the simulated paths.
        let greeks = Greeks::at(&valuer, self.ctx.spot)?;
        let generator = PricePathGenerator::new(self.ctx.sampler);
        self.controller.run(|paths, iteration| {
            self.simulate(&generator, &valuer, &greeks, &cost, paths, self.seed_for(&key, iteration))
        })
    }

    fn simulate(
        &self,
        generator: &PricePathGenerator<'_>,
        valuer: &StructureValuer<'_>,
        greeks: &Greeks,
        cost: &CostEstimate,
        n_paths: usize,
        seed: Option<u64>,
    ) -> Result<MetricsReport, ScoringError> {
        let mut outcomes = PathOutcomes::default();
        generator.generate_with_policy::<ScoringError, _>(
            self.ctx.storage,
            self.ctx.spot,
            self.ctx.horizon,
            n_paths,
            seed,
            |first_path, prices| {
                self.metrics
                    .accumulate(valuer, cost, &prices, first_path, &mut outcomes)
                    .map_err(ScoringError::from)
            },
        )?;
        Ok(self.metrics.finish(outcomes, greeks, cost)?)
    }

    /// Score every survivor on `pool`, drop failures, rank the rest.
    pub fn score_all(&self, survivors: Vec<CandidateStructure>, pool: &WorkerPool) -> ScoringOutcome {
        let results = pool.run_isolated(&survivors, |s| self.evaluate(s));

        let mut evaluated = Vec::new();
        let mut dropped = Vec::new();
        for (structure, result) in survivors.into_iter().zip(results) {
            match result {
                Ok(run) => evaluated.push((structure, run)),
                Err(e) => {
                    warn!(structure = %structure.key(), error = %e, "survivor dropped from ranking");
                    dropped.push((structure.key(), e.to_string()));
                }
            }
        }

        let reports: Vec<&MetricsReport> = evaluated.iter().map(|(_, run)| &run.report).collect();
        let capitals: Vec<f64> = evaluated
            .iter()
            .map(|(s, _)| s.cost.as_ref().map_or(1.0, |c| c.capital_required))
            .collect();
        let decompositions = composite_scores(&reports, &capitals, &self.weights);

        let mut records = Vec::with_capacity(evaluated.len());
        let mut ranked: Vec<ScoredCandidate> = evaluated
            .into_iter()
            .zip(decompositions)
            .map(|((structure, run), decomposition)| {
                let adaptive = run.record(self.settings.baseline_paths);
                records.push(adaptive.clone());
                ScoredCandidate {
                    structure: structure.with_metrics(run.report),
                    score: decomposition.total(),
                    decomposition,
                    adaptive,
                }
            })
            .collect();
        rank_candidates(&mut ranked);

        info!(scored = ranked.len(), dropped = dropped.len(), workers = pool.workers(), "Stage 4 complete");
        ScoringOutcome {
            ranked,
            dropped,
            adaptive: aggregate_adaptive(&records),
        }
    }
}

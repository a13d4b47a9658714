//! `optimize_strategy` and `retest` orchestration.
//!
//! A full sweep runs resource guard → chain fetch → funnel (Stages 0–3) →
//! unconditional model → conditional selection → Stage 4 scoring. A retest
//! rebuilds a prior Top-10 from its payload and repeats only Stage 4.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use optlab_core::data::{Bar, DataSourceError, FallbackChain, OptionChain};
use optlab_core::distributions::{
    DistributionFitError, LaplaceReturns, NormalReturns, ReturnDistribution, StudentTReturns,
};
use optlab_core::domain::{
    CandidateStructure, Diagnostics, Leg, MetricsReport, OptionType, RunId, Side, StructureType, STAGE_SCORED,
};
use optlab_core::pricing::{BlackScholesPricer, OptionPricer};
use optlab_core::resources::{select_storage_policy, ResourceLimitError, StoragePolicy};
use optlab_core::rng::RngHierarchy;
use optlab_core::selectors::{EpisodeSelector, GapVolumeSelector};
use optlab_core::stats::log_returns;

use crate::adaptive::AdaptiveError;
use crate::compare::CompareError;
use crate::conditional::{conditioned_returns, ConditionalSelection, ConditionalSelector, SelectionSummary};
use crate::config::{ConfigError, OptimizerConfig, PricerKind, RegimeParams, UnconditionalSource};
use crate::cost_model::CostModel;
use crate::funnel::{CandidateFunnel, FunnelError};
use crate::pool::{PoolError, WorkerPool};
use crate::scoring::{ScoreDecomposition, ScoredCandidate, ScoringContext, ScoringEngine};
use crate::valuation::annualize_daily_vol;

/// Ranked candidates returned per request.
pub const TOP_N: usize = 10;
pub const MAX_HORIZON: usize = 30;
pub const MAX_TICKER_LEN: usize = 10;
/// Calendar days of history used for episodes and history fits.
pub const HISTORY_LOOKBACK_DAYS: i64 = 1826;

// ─── Errors ─────────────────────────────────────────────────────────

/// Error classes surfaced to callers; the CLI maps them to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    DataUnavailable,
    Runtime,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Validation => 1,
            ErrorKind::DataUnavailable => 2,
            ErrorKind::Runtime => 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("invalid {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },

    #[error("unknown regime '{0}'; define it under [regimes.{0}] or with --override")]
    UnknownRegime(String),

    #[error("option chain for {symbol} as of {as_of} has no quotes")]
    NoChainData { symbol: String, as_of: NaiveDate },

    #[error("invalid retest payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataSourceError),

    #[error(transparent)]
    Funnel(#[from] FunnelError),

    #[error(transparent)]
    Resource(#[from] ResourceLimitError),

    #[error(transparent)]
    Adaptive(#[from] AdaptiveError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Compare(#[from] CompareError),
}

impl OptimizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimizeError::InvalidRequest { .. }
            | OptimizeError::UnknownRegime(_)
            | OptimizeError::Payload(_)
            | OptimizeError::Config(_)
            | OptimizeError::Resource(_)
            | OptimizeError::Adaptive(_)
            | OptimizeError::Funnel(FunnelError::ZeroHorizon) => ErrorKind::Validation,
            OptimizeError::NoChainData { .. }
            | OptimizeError::Data(_)
            | OptimizeError::Funnel(FunnelError::InvalidSpot(_)) => ErrorKind::DataUnavailable,
            OptimizeError::Pool(_) => ErrorKind::Runtime,
            OptimizeError::Compare(e) => e.kind(),
        }
    }
}

// ─── Request / response ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub ticker: String,
    pub regime: String,
    /// Trade horizon in trading days.
    pub horizon: usize,
    pub as_of: NaiveDate,
    /// Seed label for the run id; defaults to `ticker:regime:horizon:as_of`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
}

impl OptimizeRequest {
    pub fn new(ticker: impl Into<String>, regime: impl Into<String>, horizon: usize, as_of: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            regime: regime.into(),
            horizon,
            as_of,
            run_label: None,
        }
    }

    pub fn validate(&self) -> Result<(), OptimizeError> {
        validate_ticker(&self.ticker)?;
        validate_horizon(self.horizon)
    }

    fn run_id(&self) -> RunId {
        let label = self.run_label.clone().unwrap_or_else(|| {
            format!("{}:{}:{}:{}", self.ticker.to_uppercase(), self.regime, self.horizon, self.as_of)
        });
        RunId::from_label(&label)
    }
}

pub fn validate_ticker(ticker: &str) -> Result<(), OptimizeError> {
    let invalid = |reason: &str| OptimizeError::InvalidRequest {
        field: "ticker",
        reason: reason.to_string(),
    };
    if ticker.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if ticker.len() > MAX_TICKER_LEN {
        return Err(invalid("must be at most 10 characters"));
    }
    if !ticker.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return Err(invalid("may contain only letters, digits, '.' and '-'"));
    }
    Ok(())
}

pub fn validate_horizon(horizon: usize) -> Result<(), OptimizeError> {
    if !(1..=MAX_HORIZON).contains(&horizon) {
        return Err(OptimizeError::InvalidRequest {
            field: "horizon",
            reason: format!("must be between 1 and {MAX_HORIZON} trading days, got {horizon}"),
        });
    }
    Ok(())
}

/// A leg as reported: entry fill plus the quote it was filled against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLeg {
    pub side: Side,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub quantity: u32,
    pub fill_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Mid premium the leg was valued at.
    pub premium: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implied_vol: Option<f64>,
}

impl PricedLeg {
    fn from_leg(leg: &Leg, cost_model: &CostModel) -> Option<Self> {
        Some(Self {
            side: leg.side,
            option_type: leg.option_type,
            strike: leg.strike_value()?,
            expiry: leg.expiry,
            quantity: leg.quantity,
            fill_price: cost_model.entry_price(leg),
            bid: leg.bid,
            ask: leg.ask,
            premium: leg.premium,
            implied_vol: leg.implied_vol,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub structure_type: StructureType,
    pub width: u32,
    pub legs: Vec<PricedLeg>,
    pub metrics: MetricsReport,
    pub score: f64,
    pub score_decomposition: ScoreDecomposition,
}

impl RankedCandidate {
    fn from_scored(candidate: &ScoredCandidate, cost_model: &CostModel) -> Option<Self> {
        let s = &candidate.structure;
        Some(Self {
            structure_type: s.structure_type,
            width: s.width,
            legs: s
                .legs
                .iter()
                .map(|l| PricedLeg::from_leg(l, cost_model))
                .collect::<Option<Vec<_>>>()?,
            metrics: s.metrics.clone()?,
            score: candidate.score,
            score_decomposition: candidate.decomposition,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub symbol: String,
    pub regime: String,
    pub horizon: usize,
    pub as_of: NaiveDate,
    pub run_id: String,
    pub top10: Vec<RankedCandidate>,
    pub diagnostics: Diagnostics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<SelectionSummary>,
    pub runtime_seconds: f64,
}

impl OptimizeResponse {
    pub fn best_score(&self) -> Option<f64> {
        self.top10.first().map(|c| c.score)
    }
}

// ─── Unconditional model ────────────────────────────────────────────

/// Student-t for fat-tailed regimes, Normal otherwise. Skew is not modelled.
pub fn regime_model(regime: &RegimeParams) -> Result<Box<dyn ReturnDistribution>, DistributionFitError> {
    if regime.kurtosis_excess > 0.0 {
        Ok(Box::new(StudentTReturns::from_moments(
            regime.mean_daily_return,
            regime.daily_vol,
            regime.kurtosis_excess,
        )?))
    } else {
        Ok(Box::new(NormalReturns::with_params(regime.mean_daily_return, regime.daily_vol)?))
    }
}

// ─── Optimizer ──────────────────────────────────────────────────────

/// Runs requests against one configuration and data chain.
pub struct Optimizer<'a> {
    config: &'a OptimizerConfig,
    data: &'a FallbackChain,
    pricer: Box<dyn OptionPricer>,
    pool: WorkerPool,
}

impl<'a> Optimizer<'a> {
    pub fn new(config: &'a OptimizerConfig, data: &'a FallbackChain) -> Result<Self, OptimizeError> {
        config.validate()?;
        let pricer: Box<dyn OptionPricer> = match config.runtime.pricer {
            PricerKind::BlackScholes => Box::new(BlackScholesPricer::new()),
            PricerKind::Quantlib => {
                return Err(ConfigError::Conflict("runtime.pricer = quantlib is not supported".into()).into())
            }
        };
        let pool = WorkerPool::new(config.runtime.max_workers)?;
        info!(workers = pool.workers(), pricer = pricer.name(), "optimizer ready");
        Ok(Self {
            config,
            data,
            pricer,
            pool,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        self.config
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub(crate) fn pricer(&self) -> &dyn OptionPricer {
        self.pricer.as_ref()
    }

    pub fn optimize_strategy(&self, request: &OptimizeRequest) -> Result<OptimizeResponse, OptimizeError> {
        self.optimize_on(request, &self.pool)
    }

    /// Full sweep, scoring on `pool`.
    pub(crate) fn optimize_on(&self, request: &OptimizeRequest, pool: &WorkerPool) -> Result<OptimizeResponse, OptimizeError> {
        let started = Instant::now();
        let (regime, storage) = self.prepare(&request.ticker, &request.regime, request.horizon)?;
        let symbol = request.ticker.to_uppercase();

        let chain = self.fetch_chain(&symbol, request.as_of)?;
        let funnel = CandidateFunnel::new(self.config, self.pricer.as_ref());
        let outcome = funnel.run(&chain, &regime, request.horizon)?;
        let mut diagnostics = outcome.diagnostics;

        if outcome.survivors.is_empty() {
            diagnostics.record_stage(STAGE_SCORED, 0);
            info!(symbol = %symbol, "no survivors; returning diagnostics only");
            return Ok(OptimizeResponse {
                symbol,
                regime: request.regime.clone(),
                horizon: request.horizon,
                as_of: request.as_of,
                run_id: request.run_id().to_string(),
                top10: Vec::new(),
                diagnostics,
                conditional: None,
                runtime_seconds: started.elapsed().as_secs_f64(),
            });
        }

        let run_id = request.run_id();
        let (top10, conditional) = self.score_stage(
            &symbol,
            &chain,
            &regime,
            request.horizon,
            storage,
            run_id,
            outcome.survivors,
            pool,
            &mut diagnostics,
        )?;

        Ok(OptimizeResponse {
            symbol,
            regime: request.regime.clone(),
            horizon: request.horizon,
            as_of: request.as_of,
            run_id: run_id.to_string(),
            top10,
            diagnostics,
            conditional: Some(conditional),
            runtime_seconds: started.elapsed().as_secs_f64(),
        })
    }

    /// Re-score a previous Top-10 against a fresh chain, skipping Stages 0–3.
    pub fn retest(&self, previous: &OptimizeResponse, as_of: NaiveDate) -> Result<OptimizeResponse, OptimizeError> {
        let started = Instant::now();
        if previous.top10.is_empty() {
            return Err(OptimizeError::Payload("top10 is empty".into()));
        }
        let (regime, storage) = self.prepare(&previous.symbol, &previous.regime, previous.horizon)?;
        let symbol = previous.symbol.to_uppercase();
        let chain = self.fetch_chain(&symbol, as_of)?;
        let cost_model = CostModel::new(&self.config.costs);
        let mut diagnostics = Diagnostics::new();

        let mut structures = Vec::with_capacity(previous.top10.len());
        for candidate in &previous.top10 {
            match rebuild(candidate, &chain, &cost_model, &mut diagnostics) {
                Ok(s) => structures.push(s),
                Err(reason) => {
                    warn!(structure = %candidate.structure_type, reason = %reason, "retest candidate skipped");
                    diagnostics.hint(format!("Skipped a {} from the payload: {reason}", candidate.structure_type));
                }
            }
        }
        if structures.is_empty() {
            return Err(OptimizeError::Payload("no payload candidate could be rebuilt".into()));
        }

        let run_id = RunId::from_label(&format!("{}:retest:{}:{}", previous.run_id, symbol, as_of));
        let (top10, conditional) = self.score_stage(
            &symbol,
            &chain,
            &regime,
            previous.horizon,
            storage,
            run_id,
            structures,
            &self.pool,
            &mut diagnostics,
        )?;

        Ok(OptimizeResponse {
            symbol,
            regime: previous.regime.clone(),
            horizon: previous.horizon,
            as_of,
            run_id: run_id.to_string(),
            top10,
            diagnostics,
            conditional: Some(conditional),
            runtime_seconds: started.elapsed().as_secs_f64(),
        })
    }

    // ─── Pipeline pieces ────────────────────────────────────────────

    /// Validation and the resource guard: everything that must fail before any fetch.
    fn prepare(&self, ticker: &str, regime: &str, horizon: usize) -> Result<(RegimeParams, StoragePolicy), OptimizeError> {
        validate_ticker(ticker)?;
        validate_horizon(horizon)?;
        let params = *self
            .config
            .regime(regime)
            .ok_or_else(|| OptimizeError::UnknownRegime(regime.to_string()))?;
        let storage = select_storage_policy(self.config.mc.max_paths, horizon, self.config.runtime.memory_budget_gb)?;
        Ok((params, storage))
    }

    fn fetch_chain(&self, symbol: &str, as_of: NaiveDate) -> Result<OptionChain, OptimizeError> {
        let fetched = self.data.fetch_chain(symbol, as_of)?;
        info!(symbol, provider = %fetched.provider, quotes = fetched.value.quotes.len(), "chain fetched");
        if fetched.value.quotes.is_empty() {
            return Err(OptimizeError::NoChainData {
                symbol: symbol.to_string(),
                as_of,
            });
        }
        Ok(fetched.value)
    }

    fn fetch_history(&self, symbol: &str, as_of: NaiveDate) -> Option<Vec<Bar>> {
        match self.data.fetch_history(symbol, as_of - Duration::days(HISTORY_LOOKBACK_DAYS), as_of) {
            Ok(fetched) => Some(fetched.value),
            Err(e) => {
                warn!(symbol, error = %e, "history unavailable; conditioning disabled");
                None
            }
        }
    }

    /// Unconditional model per `mc.unconditional_source`, falling back to Laplace(0, 0.01).
    fn unconditional_model(
        &self,
        regime: &RegimeParams,
        bars: Option<&[Bar]>,
        diagnostics: &mut Diagnostics,
    ) -> Box<dyn ReturnDistribution> {
        let built = match self.config.mc.unconditional_source {
            UnconditionalSource::Regime => regime_model(regime),
            UnconditionalSource::History => {
                let closes: Vec<f64> = bars.unwrap_or_default().iter().map(|b| b.close).collect();
                let mut model = self.config.mc.distribution.build(self.config.conditional.min_samples);
                model.fit(&log_returns(&closes)).map(|_| model)
            }
        };
        built.unwrap_or_else(|e| {
            warn!(error = %e, "unconditional fit failed; using Laplace fallback");
            diagnostics.hint(format!("Unconditional fit failed ({e}); used Laplace(0, 0.01)"));
            Box::new(LaplaceReturns::fallback())
        })
    }

    fn select_sampler(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        regime: &RegimeParams,
        horizon: usize,
        diagnostics: &mut Diagnostics,
    ) -> ConditionalSelection {
        let bars = self.fetch_history(symbol, as_of);
        let unconditional = self.unconditional_model(regime, bars.as_deref(), diagnostics);

        let selector = GapVolumeSelector {
            horizon,
            ..GapVolumeSelector::default()
        };
        let episodes = match bars.as_deref() {
            Some(bars) => match selector.current_state(bars) {
                Some(target) => conditioned_returns(
                    bars,
                    &selector.select(symbol, bars),
                    &target,
                    self.config.conditional.distance_threshold,
                    horizon,
                ),
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        let selection = ConditionalSelector::new(&self.config.conditional).select(episodes, unconditional.as_ref(), horizon);
        info!(
            symbol,
            method = %selection.method,
            sampler = selection.sampler.name(),
            episodes = selection.episode_count,
            "conditional selection"
        );
        selection
    }

    #[allow(clippy::too_many_arguments)]
    fn score_stage(
        &self,
        symbol: &str,
        chain: &OptionChain,
        regime: &RegimeParams,
        horizon: usize,
        storage: StoragePolicy,
        run_id: RunId,
        survivors: Vec<CandidateStructure>,
        pool: &WorkerPool,
        diagnostics: &mut Diagnostics,
    ) -> Result<(Vec<RankedCandidate>, SelectionSummary), OptimizeError> {
        let selection = self.select_sampler(symbol, chain.as_of, regime, horizon, diagnostics);
        let submitted = survivors.len();

        let ctx = ScoringContext {
            sampler: &selection.sampler,
            pricer: self.pricer.as_ref(),
            spot: chain.spot,
            as_of: chain.as_of,
            horizon,
            fallback_vol: annualize_daily_vol(regime.daily_vol),
            risk_free_rate: self.config.mc.risk_free_rate,
            storage,
            run_id,
            rng: self.config.mc.seed.map(RngHierarchy::new),
        };
        let engine = ScoringEngine::new(self.config, ctx)?;
        let outcome = engine.score_all(survivors, pool);

        diagnostics.record_stage(STAGE_SCORED, outcome.ranked.len());
        diagnostics.adaptive_paths = outcome.adaptive;
        if !outcome.dropped.is_empty() {
            diagnostics.hint(format!(
                "{} of {submitted} survivors failed Monte Carlo evaluation and were dropped",
                outcome.dropped.len()
            ));
        }
        if outcome.ranked.is_empty() {
            diagnostics.hint("Stage 4 scored no candidates; check pricer warnings and mc settings");
        }

        let cost_model = CostModel::new(&self.config.costs);
        let top10 = outcome
            .ranked
            .iter()
            .take(TOP_N)
            .filter_map(|c| RankedCandidate::from_scored(c, &cost_model))
            .collect();
        Ok((top10, selection.summary()))
    }
}

/// Rebuild a payload candidate with quotes refreshed from `chain`.
fn rebuild(
    candidate: &RankedCandidate,
    chain: &OptionChain,
    cost_model: &CostModel,
    diagnostics: &mut Diagnostics,
) -> Result<CandidateStructure, String> {
    let mut legs = Vec::with_capacity(candidate.legs.len());
    for stored in &candidate.legs {
        let leg = match chain.find(stored.expiry, stored.option_type, stored.strike) {
            Some(quote) => {
                let premium = quote.mid().unwrap_or(stored.premium);
                let leg = Leg::new(stored.option_type, stored.strike, stored.expiry, stored.side, stored.quantity, premium)
                    .map_err(|e| e.to_string())?
                    .with_implied_vol(quote.implied_vol.or(stored.implied_vol));
                match (quote.bid, quote.ask) {
                    (Some(bid), Some(ask)) => leg.with_quote(bid, ask).map_err(|e| e.to_string())?,
                    _ => leg,
                }
            }
            None => {
                diagnostics.warn_pricer(format!(
                    "no current quote for {} {:?} {}; kept stored premium {:.2}",
                    stored.expiry, stored.option_type, stored.strike, stored.premium
                ));
                Leg::new(stored.option_type, stored.strike, stored.expiry, stored.side, stored.quantity, stored.premium)
                    .map_err(|e| e.to_string())?
                    .with_implied_vol(stored.implied_vol)
            }
        };
        legs.push(leg);
    }
    let cost = cost_model.estimate(&legs).map_err(|e| e.to_string())?;
    CandidateStructure::new(candidate.structure_type, legs, candidate.width)
        .map(|s| s.with_cost(cost))
        .map_err(|e| e.to_string())
}

/// One-shot sweep with a fresh optimizer.
pub fn optimize_strategy(
    request: &OptimizeRequest,
    config: &OptimizerConfig,
    data: &FallbackChain,
) -> Result<OptimizeResponse, OptimizeError> {
    Optimizer::new(config, data)?.optimize_strategy(request)
}

/// One-shot retest with a fresh optimizer.
pub fn retest(
    previous: &OptimizeResponse,
    as_of: NaiveDate,
    config: &OptimizerConfig,
    data: &FallbackChain,
) -> Result<OptimizeResponse, OptimizeError> {
    Optimizer::new(config, data)?.retest(previous, as_of)
}

//! OptLab Runner: candidate funnel, conditional Monte Carlo and adaptive scoring.
//!
//! This crate builds on `optlab-core` to provide:
//! - Layered configuration (defaults, file, env, CLI) with validation
//! - Cost model and the Stage 0–3 candidate funnel
//! - Conditional sampler selection (bootstrap → refit → unconditional)
//! - Price path generation, adaptive path control, metrics and Stage 4 scoring
//! - Bounded worker pool, `optimize_strategy` / `retest` orchestration, screening
//! - Stock versus long-call strategy comparison and its parameter grid

pub mod adaptive;
pub mod compare;
pub mod conditional;
pub mod config;
pub mod cost_model;
pub mod funnel;
pub mod grid;
pub mod metrics;
pub mod optimize;
pub mod paths;
pub mod pool;
pub mod scoring;
pub mod screen;
pub mod valuation;

pub use adaptive::{AdaptiveCiSettings, AdaptiveError, AdaptivePathController, AdaptiveRun, AdaptiveStep};
pub use compare::{run_compare, CallBasic, CompareError, CompareReport, CompareRequest, StockBasic, StrategyMetrics};
pub use conditional::{
    conditioned_returns, ConditionalSelection, ConditionalSelector, EpisodeBootstrap, SelectedSampler,
    SelectionMethod, SelectionSummary,
};
pub use config::{ConfigError, ConfigLayers, OptimizerConfig, RegimeParams};
pub use cost_model::{CostError, CostModel, FillQuote};
pub use funnel::{CandidateFunnel, FunnelError, FunnelOutcome};
pub use grid::{expand_grid, run_grid, GridEntry, GridReport, GridRequest, GridStatus, ObjectiveWeights};
pub use metrics::{BankruptcyError, Greeks, MetricsEngine, MetricsError, MetricsSettings, PathOutcomes};
pub use optimize::{
    optimize_strategy, regime_model, retest, ErrorKind, OptimizeError, OptimizeRequest, OptimizeResponse,
    Optimizer, PricedLeg, RankedCandidate,
};
pub use paths::{PathError, PricePathGenerator};
pub use pool::{clamp_workers, PoolError, WorkerPool};
pub use scoring::{
    composite_scores, rank_candidates, rank_normalize, ScoreDecomposition, ScoredCandidate, ScoringContext,
    ScoringEngine, ScoringError, ScoringOutcome,
};
pub use screen::{ScreenFailure, ScreenReport, ScreenRequest};
pub use valuation::StructureValuer;

//! Stage 4 integration: sampler selection, path generation, adaptive control
//! and ranking working together on hand-built survivors.

use chrono::NaiveDate;

use optlab_core::distributions::NormalReturns;
use optlab_core::domain::{AdaptiveDecision, CandidateStructure, Leg, OptionType, RunId, Side, StructureType};
use optlab_core::pricing::BlackScholesPricer;
use optlab_core::resources::StoragePolicy;
use optlab_core::rng::RngHierarchy;
use optlab_runner::config::{ConditionalConfig, McConfig};
use optlab_runner::{
    ConditionalSelector, CostModel, MetricsError, OptimizerConfig, PricePathGenerator, ScoringContext,
    ScoringEngine, ScoringError, SelectedSampler, SelectionMethod, WorkerPool,
};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 29).unwrap()
}

fn put(strike: f64, side: Side, mid: f64) -> Leg {
    Leg::new(OptionType::Put, strike, expiry(), side, 1, mid)
        .unwrap()
        .with_quote(mid * 0.97, mid * 1.03)
        .unwrap()
        .with_implied_vol(Some(0.2))
}

/// Costed bull put spread `lower`/`lower + 5`.
fn bull_put(lower: f64, long_mid: f64, short_mid: f64) -> CandidateStructure {
    let legs = vec![put(lower, Side::Buy, long_mid), put(lower + 5.0, Side::Sell, short_mid)];
    let cost = CostModel::new(&Default::default()).estimate(&legs).unwrap();
    CandidateStructure::new(StructureType::BullPutSpread, legs, 1)
        .unwrap()
        .with_cost(cost)
}

fn normal_sampler() -> SelectedSampler {
    SelectedSampler::Fitted(Box::new(NormalReturns::with_params(0.0005, 0.01).unwrap()))
}

fn config(mc: McConfig) -> OptimizerConfig {
    OptimizerConfig {
        mc,
        ..OptimizerConfig::default()
    }
}

fn fast_mc(epnl_ci_target: f64, pop_ci_target: f64) -> McConfig {
    McConfig {
        num_paths: 200,
        max_paths: 800,
        epnl_ci_target,
        pop_ci_target,
        drawdown_sample_paths: 20,
        ..McConfig::default()
    }
}

fn context<'a>(sampler: &'a SelectedSampler, pricer: &'a BlackScholesPricer, seed: Option<u64>) -> ScoringContext<'a> {
    ScoringContext {
        sampler,
        pricer,
        spot: 100.0,
        as_of: as_of(),
        horizon: 10,
        fallback_vol: 0.2,
        risk_free_rate: 0.0,
        storage: StoragePolicy::InMemory,
        run_id: RunId::from_label("SPY:neutral:10:2024-03-01"),
        rng: seed.map(RngHierarchy::new),
    }
}

#[test]
fn unreachable_targets_double_to_the_cap() {
    let sampler = normal_sampler();
    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(1e-9, 1e-9));
    let engine = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(42))).unwrap();

    let run = engine.evaluate(&bull_put(95.0, 0.6, 1.9)).unwrap();
    let paths: Vec<usize> = run.history.iter().map(|s| s.paths).collect();
    assert_eq!(paths, vec![200, 400, 800]);
    assert_eq!(run.decision(), AdaptiveDecision::CapReached);
    assert_eq!(run.report.path_count, 800);

    let record = run.record(200);
    assert!(record.doubled);
    assert_eq!(record.final_paths, 800);
}

#[test]
fn sub_one_point_implied_vols_still_score() {
    let sampler = normal_sampler();
    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(1e9, 0.99));
    let engine = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(42))).unwrap();

    let mut structure = bull_put(95.0, 0.6, 1.9);
    for leg in &mut structure.legs {
        leg.implied_vol = Some(0.008);
    }
    let run = engine.evaluate(&structure).unwrap();
    assert!(run.report.vega.is_finite());
    assert!(run.report.delta.is_finite());
    assert_eq!(run.report.path_count, 200);
}

#[test]
fn loose_targets_stop_at_baseline() {
    let sampler = normal_sampler();
    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(1e9, 0.99));
    let engine = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(42))).unwrap();

    let run = engine.evaluate(&bull_put(95.0, 0.6, 1.9)).unwrap();
    assert_eq!(run.history.len(), 1);
    assert_eq!(run.decision(), AdaptiveDecision::ThresholdMet);
    assert!(!run.record(200).doubled);
}

#[test]
fn seeded_evaluation_is_reproducible() {
    let sampler = normal_sampler();
    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(1e-9, 1e-9));
    let structure = bull_put(95.0, 0.6, 1.9);

    let a = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(7)))
        .unwrap()
        .evaluate(&structure)
        .unwrap();
    let b = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(7)))
        .unwrap()
        .evaluate(&structure)
        .unwrap();
    assert_eq!(a.report, b.report);

    let other = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(8)))
        .unwrap()
        .evaluate(&structure)
        .unwrap();
    assert_ne!(a.report.expected_pnl, other.report.expected_pnl);
}

#[test]
fn parallel_and_sequential_scoring_agree() {
    let sampler = normal_sampler();
    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(50.0, 0.05));
    let engine = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(42))).unwrap();
    let survivors = vec![
        bull_put(90.0, 0.2, 0.6),
        bull_put(93.0, 0.4, 1.1),
        bull_put(95.0, 0.6, 1.9),
        bull_put(97.0, 1.1, 2.8),
    ];

    let sequential = engine.score_all(survivors.clone(), &WorkerPool::sequential());
    let parallel = engine.score_all(survivors, &WorkerPool::with_available(4, 4).unwrap());

    assert_eq!(sequential.ranked.len(), 4);
    let keys = |o: &optlab_runner::ScoringOutcome| -> Vec<(String, f64)> {
        o.ranked.iter().map(|c| (c.structure.key(), c.score)).collect()
    };
    assert_eq!(keys(&sequential), keys(&parallel));
    assert!(sequential.ranked.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(sequential.adaptive, parallel.adaptive);
}

#[test]
fn bankrupt_survivor_is_dropped_not_fatal() {
    // exp(-800) underflows to zero, so every path reaches a non-positive spot.
    let sampler = SelectedSampler::Bootstrap(optlab_runner::EpisodeBootstrap::new(vec![vec![-800.0; 12]]));
    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(50.0, 0.05));
    let engine = ScoringEngine::new(&cfg, context(&sampler, &pricer, Some(42))).unwrap();
    let structure = bull_put(95.0, 0.6, 1.9);

    match engine.evaluate(&structure) {
        Err(ScoringError::Metrics(MetricsError::Bankruptcy(b))) => {
            assert_eq!(b.paths, 200);
            assert_eq!(b.rate, 1.0);
        }
        other => panic!("expected bankruptcy, got {other:?}"),
    }

    let outcome = engine.score_all(vec![structure], &WorkerPool::sequential());
    assert!(outcome.ranked.is_empty());
    assert_eq!(outcome.dropped.len(), 1);
    assert!(outcome.dropped[0].1.contains("non-positive spot"));
    assert!(outcome.adaptive.is_none());
}

#[test]
fn bootstrap_selection_feeds_the_engine() {
    let episodes: Vec<Vec<f64>> = (0..30)
        .map(|i| (0..12).map(|t| 0.002 * ((i + t) % 5) as f64 - 0.004).collect())
        .collect();
    let selection = ConditionalSelector::new(&ConditionalConfig::default()).select(
        episodes,
        &NormalReturns::with_params(0.0, 0.01).unwrap(),
        10,
    );
    assert_eq!(selection.method, SelectionMethod::Bootstrap);
    assert_eq!(selection.episode_count, 30);

    let pricer = BlackScholesPricer::new();
    let cfg = config(fast_mc(50.0, 0.05));
    let engine = ScoringEngine::new(&cfg, context(&selection.sampler, &pricer, Some(42))).unwrap();
    let run = engine.evaluate(&bull_put(95.0, 0.6, 1.9)).unwrap();
    assert!(run.report.path_count >= 200);
    assert_eq!(run.report.bankruptcy_rate, 0.0);
}

#[test]
fn unmatched_state_falls_back_to_unconditional() {
    let selection = ConditionalSelector::new(&ConditionalConfig::default()).select(
        Vec::new(),
        &NormalReturns::with_params(0.0, 0.01).unwrap(),
        10,
    );
    assert_eq!(selection.method, SelectionMethod::Unconditional);
    assert_eq!(selection.episode_count, 0);

    let summary = selection.summary();
    assert_eq!(summary.sampler, "normal");
    assert!(summary.fallback_reason.is_some());
}

#[test]
fn chunked_generation_is_reproducible_and_complete() {
    let sampler = normal_sampler();
    let generator = PricePathGenerator::new(&sampler);
    let policy = StoragePolicy::Chunked { block_paths: 64 };

    let collect = || {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        generator
            .generate_with_policy::<optlab_runner::PathError, _>(policy, 100.0, 10, 300, Some(3), |offset, block| {
                assert_eq!(offset, rows.len());
                rows.extend(block.rows().map(<[f64]>::to_vec));
                Ok(())
            })
            .unwrap();
        rows
    };
    let a = collect();
    assert_eq!(a.len(), 300);
    assert!(a.iter().all(|r| r.len() == 10 && r.iter().all(|&s| s > 0.0)));
    assert_eq!(a, collect());
}

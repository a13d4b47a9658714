//! Property tests for core invariants.
//!
//! Uses proptest to verify:
//! 1. Seed hierarchy: sub-seeds are pure functions of their inputs
//! 2. Sampling: identical seeds give bit-identical matrices, all finite
//! 3. Pricing: Black-Scholes respects put-call parity and price bounds
//! 4. Statistics: percentiles are monotone in p and bounded by the sample
//! 5. Resources: a smaller simulation never gets a stricter storage policy

use proptest::prelude::*;

use optlab_core::distributions::{LaplaceReturns, NormalReturns, ReturnDistribution, StudentTReturns};
use optlab_core::domain::{Leg, OptionType, RunId, Side};
use optlab_core::pricing::BlackScholesPricer;
use optlab_core::resources::{select_storage_policy, StoragePolicy};
use optlab_core::rng::{derive_block_seed, RngHierarchy};
use optlab_core::stats::{percentile_sorted, sorted_copy};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_returns() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.08..0.08_f64, 80..200)
}

fn arb_task() -> impl Strategy<Value = String> {
    "[a-z_]{1,12}(:[0-9]{1,3}){0,2}"
}

// ── 1. Seed hierarchy ────────────────────────────────────────────────

proptest! {
    #[test]
    fn sub_seeds_are_pure(master in any::<u64>(), task in arb_task(), iteration in 0u64..64) {
        let run = RunId::from_label("SPY:neutral:10:2024-03-01");
        let a = RngHierarchy::new(master);
        let b = RngHierarchy::new(master);
        prop_assert_eq!(a.sub_seed(&run, &task, iteration), b.sub_seed(&run, &task, iteration));
        prop_assert_ne!(a.sub_seed(&run, &task, iteration), a.sub_seed(&run, &task, iteration + 1));
    }

    #[test]
    fn block_seeds_differ_per_block(parent in any::<u64>(), block in 0u64..1000) {
        prop_assert_eq!(derive_block_seed(parent, block), derive_block_seed(parent, block));
        prop_assert_ne!(derive_block_seed(parent, block), derive_block_seed(parent, block + 1));
    }
}

// ── 2. Sampling determinism ──────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fitted_families_sample_deterministically(
        returns in arb_returns(),
        seed in any::<u64>(),
        n_paths in 1usize..40,
        n_steps in 1usize..15,
    ) {
        let models: Vec<Box<dyn ReturnDistribution>> = vec![
            Box::new(LaplaceReturns::new(60)),
            Box::new(StudentTReturns::new(60)),
            Box::new(NormalReturns::new(60)),
        ];
        for mut model in models {
            if model.fit(&returns).is_err() {
                // Degenerate samples are allowed to fail the fit; they must not sample.
                prop_assert!(!model.is_fitted());
                continue;
            }
            let a = model.sample(n_paths, n_steps, Some(seed)).unwrap();
            let b = model.sample(n_paths, n_steps, Some(seed)).unwrap();
            prop_assert_eq!(a.n_paths(), n_paths);
            prop_assert_eq!(a.n_steps(), n_steps);
            prop_assert!(a.as_slice().iter().all(|r| r.is_finite()));
            prop_assert_eq!(a, b);
        }
    }
}

// ── 3. Pricing ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn put_call_parity_holds(
        spot in 20.0..300.0_f64,
        moneyness in 0.7..1.3_f64,
        years in 0.01..1.0_f64,
        vol in 0.05..1.0_f64,
        rate in 0.0..0.08_f64,
    ) {
        let strike = spot * moneyness;
        let call = BlackScholesPricer::price_years(OptionType::Call, spot, strike, years, vol, rate).unwrap();
        let put = BlackScholesPricer::price_years(OptionType::Put, spot, strike, years, vol, rate).unwrap();
        let forward = spot - strike * (-rate * years).exp();
        prop_assert!((call - put - forward).abs() < 1e-6 * spot.max(strike));
        prop_assert!(call >= forward.max(0.0) - 1e-9 && call <= spot + 1e-9);
        prop_assert!(put >= 0.0);
    }

    #[test]
    fn crossed_quotes_are_rejected(bid in 0.01..20.0_f64, gap in 0.001..5.0_f64) {
        let leg = Leg::new(OptionType::Put, 100.0, chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(), Side::Buy, 1, bid)
            .unwrap();
        prop_assert!(leg.clone().with_quote(bid + gap, bid).is_err());
        prop_assert!(leg.with_quote(bid, bid + gap).is_ok());
    }
}

// ── 4. Statistics ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn percentiles_are_monotone_and_bounded(
        values in prop::collection::vec(-1000.0..1000.0_f64, 1..100),
        p in 0.0..100.0_f64,
        q in 0.0..100.0_f64,
    ) {
        let sorted = sorted_copy(&values);
        let (lo, hi) = if p <= q { (p, q) } else { (q, p) };
        let a = percentile_sorted(&sorted, lo);
        let b = percentile_sorted(&sorted, hi);
        prop_assert!(a <= b + 1e-9);
        prop_assert!(a >= sorted[0] - 1e-9);
        prop_assert!(b <= sorted[sorted.len() - 1] + 1e-9);
    }
}

// ── 5. Resources ─────────────────────────────────────────────────────

fn strictness(policy: &Result<StoragePolicy, impl std::fmt::Debug>) -> u8 {
    match policy {
        Ok(StoragePolicy::InMemory) => 0,
        Ok(StoragePolicy::Chunked { .. }) => 1,
        Err(_) => 2,
    }
}

proptest! {
    #[test]
    fn smaller_simulations_never_get_stricter(
        paths in 1usize..50_000_000,
        shrink in 1usize..100,
        steps in 1usize..31,
        budget in 0.1..8.0_f64,
    ) {
        let big = select_storage_policy(paths, steps, budget);
        let small = select_storage_policy((paths / shrink).max(1), steps, budget);
        prop_assert!(strictness(&small) <= strictness(&big));
        if let Ok(StoragePolicy::Chunked { block_paths }) = big {
            prop_assert!(block_paths >= 1 && block_paths <= paths);
        }
    }
}

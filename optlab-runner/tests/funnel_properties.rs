//! Property tests for funnel invariants.
//!
//! Uses proptest to verify:
//! 1. Stage 1 monotonicity: a stricter threshold keeps a subset
//! 2. Stage 1 order independence: predicate order never changes survivors
//! 3. Stage 3 commutation: capital and POP filters commute
//! 4. Stage 2 vertical shape: lower strike first, width inside the limit
//! 5. Top-K: at most K per type, nothing excluded outranks a kept structure

use chrono::NaiveDate;
use proptest::prelude::*;
use std::collections::BTreeSet;

use optlab_core::data::OptionQuote;
use optlab_core::domain::{
    AnalyticEstimate, CandidateStructure, CostEstimate, Leg, OptionType, Side, StructureType,
};
use optlab_core::pricing::BlackScholesPricer;
use optlab_runner::config::FunnelConfig;
use optlab_runner::funnel::filters::{CapitalFilter, PopFilter};
use optlab_runner::funnel::strikes::{MaxSpread, MinVolume, MoneynessWindow};
use optlab_runner::funnel::{
    apply_filters, filter_strikes, generate_structures, top_k_per_type, HardFilter, LegFactory, StrikeBook,
    StrikePredicate,
};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 29).unwrap()
}

fn factory(pricer: &BlackScholesPricer) -> LegFactory<'_> {
    LegFactory {
        as_of: as_of(),
        spot: 100.0,
        fallback_vol: 0.2,
        risk_free_rate: 0.0,
        pricer,
    }
}

fn ladder_quotes(strikes: &[f64]) -> Vec<OptionQuote> {
    strikes
        .iter()
        .flat_map(|&k| {
            [OptionType::Call, OptionType::Put].map(|t| OptionQuote {
                expiry: expiry(),
                option_type: t,
                strike: k,
                bid: Some(1.0),
                ask: Some(1.1),
                volume: 100,
                open_interest: 0,
                implied_vol: Some(0.2),
            })
        })
        .collect()
}

fn vertical_config(max_width: u32) -> FunnelConfig {
    FunnelConfig {
        structure_types: vec![
            StructureType::BullCallSpread,
            StructureType::BearCallSpread,
            StructureType::BullPutSpread,
            StructureType::BearPutSpread,
        ],
        max_width_strikes: max_width,
        ..FunnelConfig::default()
    }
}

/// Bull put spread at `lower`/`lower + 5` carrying the given capital, POP and pre-score.
fn scored_structure(lower: f64, capital: f64, pop: f64, pre_score: f64) -> CandidateStructure {
    let legs = vec![
        Leg::new(OptionType::Put, lower, expiry(), Side::Buy, 1, 1.0).unwrap(),
        Leg::new(OptionType::Put, lower + 5.0, expiry(), Side::Sell, 1, 2.0).unwrap(),
    ];
    CandidateStructure::new(StructureType::BullPutSpread, legs, 1)
        .unwrap()
        .with_cost(CostEstimate {
            entry_cash_flow: 100.0,
            exit_cost: 110.0,
            commission: 1.3,
            capital_required: capital,
            max_loss: -capital,
            max_profit: 100.0,
        })
        .with_analytic(AnalyticEstimate {
            expected_pnl: 50.0,
            pop_breakeven: pop,
            pre_score,
        })
}

fn keys(structures: &[CandidateStructure]) -> Vec<String> {
    structures.iter().map(CandidateStructure::key).collect()
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Quotes tagged by index through `open_interest` so survivor sets compare cheaply.
fn arb_quotes() -> impl Strategy<Value = Vec<OptionQuote>> {
    prop::collection::vec((60.0..140.0_f64, 0u64..200, 0.05..5.0_f64, 0.0..0.6_f64), 1..60).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (strike, volume, bid, width))| OptionQuote {
                expiry: expiry(),
                option_type: if i % 2 == 0 { OptionType::Call } else { OptionType::Put },
                strike,
                bid: Some(bid),
                ask: Some(bid * (1.0 + width)),
                volume,
                open_interest: i as u64,
                implied_vol: Some(0.2),
            })
            .collect()
    })
}

fn survivor_ids(quotes: &[OptionQuote], predicates: &[Box<dyn StrikePredicate>]) -> BTreeSet<u64> {
    filter_strikes(quotes, 100.0, predicates)
        .into_iter()
        .map(|q| q.open_interest)
        .collect()
}

fn predicates(m_min: f64, m_max: f64, volume: u64, spread: f64) -> Vec<Box<dyn StrikePredicate>> {
    vec![
        Box::new(MoneynessWindow { min: m_min, max: m_max }),
        Box::new(MinVolume(volume)),
        Box::new(MaxSpread(spread)),
    ]
}

// ── 1–2. Stage 1 ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn stricter_thresholds_keep_a_subset(
        quotes in arb_quotes(),
        m_min in 0.7..1.0_f64,
        m_max in 1.0..1.3_f64,
        volume in 0u64..100,
        spread in 0.05..0.5_f64,
        tighten in (0.0..0.1_f64, 0.0..0.1_f64, 0u64..50, 0.0..0.05_f64),
    ) {
        let loose = survivor_ids(&quotes, &predicates(m_min, m_max, volume, spread));
        let strict = survivor_ids(
            &quotes,
            &predicates(m_min + tighten.0, m_max - tighten.1, volume + tighten.2, spread - tighten.3),
        );
        prop_assert!(strict.is_subset(&loose));
    }

    #[test]
    fn predicate_order_is_irrelevant(
        quotes in arb_quotes(),
        volume in 0u64..100,
        spread in 0.05..0.5_f64,
    ) {
        let forward = predicates(0.9, 1.1, volume, spread);
        let mut reversed = predicates(0.9, 1.1, volume, spread);
        reversed.reverse();
        prop_assert_eq!(survivor_ids(&quotes, &forward), survivor_ids(&quotes, &reversed));
    }
}

// ── 3. Stage 3 filter commutation ────────────────────────────────────

proptest! {
    #[test]
    fn capital_and_pop_filters_commute(
        specs in prop::collection::vec((100.0..3000.0_f64, 0.0..1.0_f64), 1..40),
        max_capital in 100.0..3000.0_f64,
        min_pop in 0.0..1.0_f64,
    ) {
        let pool: Vec<CandidateStructure> = specs
            .iter()
            .enumerate()
            .map(|(i, &(capital, pop))| scored_structure(50.0 + i as f64, capital, pop, 0.0))
            .collect();
        let capital: Vec<Box<dyn HardFilter>> = vec![Box::new(CapitalFilter { max_capital })];
        let pop: Vec<Box<dyn HardFilter>> = vec![Box::new(PopFilter { min_pop })];

        let (after_capital, _) = apply_filters(pool.clone(), &capital);
        let (capital_then_pop, _) = apply_filters(after_capital, &pop);
        let (after_pop, _) = apply_filters(pool.clone(), &pop);
        let (pop_then_capital, _) = apply_filters(after_pop, &capital);

        prop_assert_eq!(keys(&capital_then_pop), keys(&pop_then_capital));

        let both: Vec<Box<dyn HardFilter>> = vec![
            Box::new(PopFilter { min_pop }),
            Box::new(CapitalFilter { max_capital }),
        ];
        let (together, _) = apply_filters(pool, &both);
        prop_assert_eq!(keys(&together), keys(&capital_then_pop));
    }
}

// ── 4. Stage 2 vertical shape ────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn verticals_are_ordered_and_width_bounded(n_strikes in 2usize..25, max_width in 1u32..=3) {
        let strikes: Vec<f64> = (0..n_strikes).map(|i| 88.0 + i as f64).collect();
        let quotes = ladder_quotes(&strikes);
        let refs: Vec<&OptionQuote> = quotes.iter().collect();
        let book = StrikeBook::new(expiry(), strikes, &refs);
        let pricer = BlackScholesPricer::new();
        let out = generate_structures(&[book], &vertical_config(max_width), &factory(&pricer));

        let per_type: usize = (1..=max_width as usize).map(|w| n_strikes.saturating_sub(w)).sum();
        prop_assert_eq!(out.generated, 4 * per_type);
        prop_assert_eq!(out.truncated, 0);
        for s in &out.structures {
            let lower = s.legs[0].strike_value().unwrap();
            let upper = s.legs[1].strike_value().unwrap();
            prop_assert!(lower < upper);
            prop_assert!(s.width >= 1 && s.width <= max_width);
        }
    }
}

// ── 5. Top-K ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn top_k_never_excludes_a_better_structure(
        scores in prop::collection::vec(-10.0..10.0_f64, 1..40),
        k in 1usize..8,
    ) {
        let pool: Vec<CandidateStructure> = scores
            .iter()
            .enumerate()
            .map(|(i, &pre)| scored_structure(50.0 + i as f64, 500.0, 0.7, pre))
            .collect();
        let kept = top_k_per_type(pool.clone(), k);
        prop_assert!(kept.len() <= k);
        prop_assert_eq!(kept.len(), k.min(pool.len()));

        let kept_keys: BTreeSet<String> = kept.iter().map(CandidateStructure::key).collect();
        let min_kept = kept
            .iter()
            .map(|s| s.analytic.unwrap().pre_score)
            .fold(f64::INFINITY, f64::min);
        for s in pool.iter().filter(|s| !kept_keys.contains(&s.key())) {
            prop_assert!(s.analytic.unwrap().pre_score <= min_kept);
        }
    }
}

// ── Fixed scenarios ──────────────────────────────────────────────────

/// 50-strike ladders on `n` weekly expiries starting a week after `as_of`.
fn weekly_ladders(n: u32) -> (Vec<f64>, Vec<NaiveDate>, Vec<OptionQuote>) {
    let strikes: Vec<f64> = (0..50).map(|i| 75.0 + i as f64).collect();
    let expiries: Vec<NaiveDate> = (1..=n).map(|w| as_of() + chrono::Duration::weeks(i64::from(w))).collect();
    let quotes = expiries
        .iter()
        .flat_map(|&e| {
            ladder_quotes(&strikes).into_iter().map(move |q| OptionQuote { expiry: e, ..q })
        })
        .collect();
    (strikes, expiries, quotes)
}

#[test]
fn twenty_five_expiries_of_fifty_strikes_give_4900_verticals_without_truncation() {
    let (strikes, expiries, quotes) = weekly_ladders(25);
    let refs: Vec<&OptionQuote> = quotes.iter().collect();
    let books: Vec<StrikeBook<'_>> = expiries
        .iter()
        .map(|&e| StrikeBook::new(e, strikes.clone(), &refs))
        .collect();
    let pricer = BlackScholesPricer::new();
    // 4 types x 25 expiries x 49 adjacent pairs.
    let out = generate_structures(&books, &vertical_config(1), &factory(&pricer));

    assert_eq!(out.generated, 4900);
    assert_eq!(out.truncated, 0);
    assert_eq!(out.structures.len(), 4900);
    assert!(out.failures.is_empty());
    assert!(out.structures.iter().all(|s| s.width == 1));
}

#[test]
fn over_cap_generation_truncates_to_the_cap() {
    let (strikes, expiries, quotes) = weekly_ladders(25);
    let refs: Vec<&OptionQuote> = quotes.iter().collect();
    let books: Vec<StrikeBook<'_>> = expiries
        .iter()
        .map(|&e| StrikeBook::new(e, strikes.clone(), &refs))
        .collect();
    let pricer = BlackScholesPricer::new();
    let mut cfg = vertical_config(1);
    cfg.max_structures = 1000;
    let out = generate_structures(&books, &cfg, &factory(&pricer));

    assert_eq!(out.generated, 4900);
    assert_eq!(out.structures.len(), 1000);
    assert_eq!(out.truncated, 3900);
}

#[test]
fn widest_generated_structure_stays_at_three_strikes() {
    let (strikes, expiries, quotes) = weekly_ladders(1);
    let refs: Vec<&OptionQuote> = quotes.iter().collect();
    let book = StrikeBook::new(expiries[0], strikes, &refs);
    let pricer = BlackScholesPricer::new();
    let mut cfg = vertical_config(3);
    cfg.structure_types.extend([StructureType::IronCondor, StructureType::Butterfly]);
    let out = generate_structures(&[book], &cfg, &factory(&pricer));

    assert!(!out.structures.is_empty());
    assert!(out.structures.iter().all(|s| (1..=3).contains(&s.width)));
}

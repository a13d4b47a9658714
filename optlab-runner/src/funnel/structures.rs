//! Stage 2: structure enumeration over Stage 1 strike books.
//!
//! Enumeration order is deterministic: expiry ascending, then structure type
//! in configured order, then ladder index. Truncation to the configured cap
//! keeps the structures closest to spot and preserves that order.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use optlab_core::data::{weekdays_between, OptionQuote};
use optlab_core::domain::{
    CandidateStructure, Leg, LegError, LegPair, OptionType, Side, StructureError, StructureType,
};
use optlab_core::pricing::{OptionPricer, OptionSpec, PricingError};

use super::strikes::StrikeBook;
use crate::config::FunnelConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Leg(#[from] LegError),
    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// Builds legs from quotes. Premium is the quote mid, or the model price when
/// the quote has no two-sided market.
pub struct LegFactory<'a> {
    pub as_of: NaiveDate,
    pub spot: f64,
    pub fallback_vol: f64,
    pub risk_free_rate: f64,
    pub pricer: &'a dyn OptionPricer,
}

impl LegFactory<'_> {
    pub fn leg(&self, quote: &OptionQuote, side: Side, quantity: u32) -> Result<Leg, GenerationError> {
        let premium = match quote.mid() {
            Some(mid) => mid,
            None => {
                let spec = OptionSpec {
                    option_type: quote.option_type,
                    strike: quote.strike,
                    days_to_expiry: f64::from(weekdays_between(self.as_of, quote.expiry)),
                    volatility: quote.implied_vol.unwrap_or(self.fallback_vol),
                    risk_free_rate: self.risk_free_rate,
                };
                self.pricer.price_at(self.spot, &spec, 0.0)?
            }
        };
        let mut leg = Leg::new(quote.option_type, quote.strike, quote.expiry, side, quantity, premium)?
            .with_implied_vol(quote.implied_vol);
        if let (Some(bid), Some(ask)) = (quote.bid, quote.ask) {
            leg = leg.with_quote(bid, ask)?;
        }
        Ok(leg)
    }
}

#[derive(Debug, Default)]
pub struct GenerationOutcome {
    pub structures: Vec<CandidateStructure>,
    /// Structures enumerated before truncation.
    pub generated: usize,
    pub truncated: usize,
    /// One message per dropped structure.
    pub failures: Vec<String>,
}

pub fn generate_structures(
    books: &[StrikeBook<'_>],
    config: &FunnelConfig,
    legs: &LegFactory<'_>,
) -> GenerationOutcome {
    let mut out = GenerationOutcome::default();
    let max_w = config.max_width_strikes as usize;

    for book in books {
        for &structure_type in &config.structure_types {
            let mut push = |built: Result<CandidateStructure, GenerationError>| match built {
                Ok(s) => out.structures.push(s),
                Err(e) => out
                    .failures
                    .push(format!("{structure_type} {}: {e}", book.expiry)),
            };
            match structure_type {
                StructureType::BullCallSpread
                | StructureType::BearCallSpread
                | StructureType::BullPutSpread
                | StructureType::BearPutSpread => {
                    for_each_vertical(book, structure_type, max_w, legs, &mut push);
                }
                StructureType::IronCondor => for_each_condor(book, max_w, legs, &mut push),
                StructureType::Butterfly => for_each_butterfly(book, max_w, legs, &mut push),
            }
        }
    }

    out.generated = out.structures.len();
    if out.generated > config.max_structures {
        out.structures = truncate_by_proximity(std::mem::take(&mut out.structures), legs.spot, config.max_structures);
        out.truncated = out.generated - out.structures.len();
        info!(
            generated = out.generated,
            kept = out.structures.len(),
            "structure count over cap, truncated by spot proximity"
        );
    }
    out
}

/// (type, lower side, upper side) for each vertical family.
fn vertical_shape(structure_type: StructureType) -> Option<(OptionType, Side, Side)> {
    match structure_type {
        StructureType::BullCallSpread => Some((OptionType::Call, Side::Buy, Side::Sell)),
        StructureType::BearCallSpread => Some((OptionType::Call, Side::Sell, Side::Buy)),
        StructureType::BullPutSpread => Some((OptionType::Put, Side::Buy, Side::Sell)),
        StructureType::BearPutSpread => Some((OptionType::Put, Side::Sell, Side::Buy)),
        _ => None,
    }
}

fn for_each_vertical(
    book: &StrikeBook<'_>,
    structure_type: StructureType,
    max_w: usize,
    legs: &LegFactory<'_>,
    emit: &mut impl FnMut(Result<CandidateStructure, GenerationError>),
) {
    let Some((option_type, lower_side, upper_side)) = vertical_shape(structure_type) else {
        return;
    };
    let n = book.ladder.len();
    for i in 0..n {
        let Some(lower_q) = book.quote(option_type, i) else { continue };
        for j in (i + 1)..n.min(i + max_w + 1) {
            let Some(upper_q) = book.quote(option_type, j) else { continue };
            emit(build_vertical(structure_type, (lower_q, lower_side), (upper_q, upper_side), j - i, legs));
        }
    }
}

/// Short put below spot, short call above spot, equal wings.
fn for_each_condor(
    book: &StrikeBook<'_>,
    max_w: usize,
    legs: &LegFactory<'_>,
    emit: &mut impl FnMut(Result<CandidateStructure, GenerationError>),
) {
    let n = book.ladder.len();
    for p in 0..n {
        if book.ladder[p] >= legs.spot {
            break;
        }
        let Some(short_put) = book.quote(OptionType::Put, p) else { continue };
        for c in (p + 1)..n {
            if book.ladder[c] <= legs.spot {
                continue;
            }
            let Some(short_call) = book.quote(OptionType::Call, c) else { continue };
            for w in 1..=max_w {
                if w > p || c + w >= n {
                    break;
                }
                let (Some(long_put), Some(long_call)) =
                    (book.quote(OptionType::Put, p - w), book.quote(OptionType::Call, c + w))
                else {
                    continue;
                };
                let plan = [
                    (long_put, Side::Buy, 1),
                    (short_put, Side::Sell, 1),
                    (short_call, Side::Sell, 1),
                    (long_call, Side::Buy, 1),
                ];
                emit(build(StructureType::IronCondor, &plan, w, legs));
            }
        }
    }
}

/// Long 1 / short 2 / long 1 calls at i, i+w, i+2w.
fn for_each_butterfly(
    book: &StrikeBook<'_>,
    max_w: usize,
    legs: &LegFactory<'_>,
    emit: &mut impl FnMut(Result<CandidateStructure, GenerationError>),
) {
    let n = book.ladder.len();
    for i in 0..n {
        let Some(low) = book.quote(OptionType::Call, i) else { continue };
        for w in 1..=max_w {
            if i + 2 * w >= n {
                break;
            }
            let (Some(body), Some(high)) = (book.quote(OptionType::Call, i + w), book.quote(OptionType::Call, i + 2 * w))
            else {
                continue;
            };
            let plan = [(low, Side::Buy, 1), (body, Side::Sell, 2), (high, Side::Buy, 1)];
            emit(build(StructureType::Butterfly, &plan, w, legs));
        }
    }
}

fn build_vertical(
    structure_type: StructureType,
    lower: (&OptionQuote, Side),
    upper: (&OptionQuote, Side),
    width: usize,
    legs: &LegFactory<'_>,
) -> Result<CandidateStructure, GenerationError> {
    let pair = LegPair::new(legs.leg(lower.0, lower.1, 1)?, legs.leg(upper.0, upper.1, 1)?)?;
    Ok(CandidateStructure::new(structure_type, pair.into_legs(), width as u32)?)
}

fn build(
    structure_type: StructureType,
    plan: &[(&OptionQuote, Side, u32)],
    width: usize,
    legs: &LegFactory<'_>,
) -> Result<CandidateStructure, GenerationError> {
    let built = plan
        .iter()
        .map(|&(quote, side, qty)| legs.leg(quote, side, qty))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CandidateStructure::new(structure_type, built, width as u32)?)
}

/// Keep the `cap` structures nearest to spot (ties by enumeration index),
/// returned in their original enumeration order.
pub fn truncate_by_proximity(structures: Vec<CandidateStructure>, spot: f64, cap: usize) -> Vec<CandidateStructure> {
    if structures.len() <= cap {
        return structures;
    }
    let mut ranked: Vec<(f64, usize)> = structures
        .iter()
        .enumerate()
        .map(|(i, s)| (s.spot_proximity(spot), i))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut keep: Vec<usize> = ranked.into_iter().take(cap).map(|(_, i)| i).collect();
    keep.sort_unstable();

    let mut keep_iter = keep.into_iter().peekable();
    structures
        .into_iter()
        .enumerate()
        .filter_map(|(i, s)| {
            if keep_iter.peek() == Some(&i) {
                keep_iter.next();
                Some(s)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use optlab_core::pricing::BlackScholesPricer;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 29).unwrap()
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

    fn factory(pricer: &BlackScholesPricer) -> LegFactory<'_> {
        LegFactory {
            as_of: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            spot: 100.0,
            fallback_vol: 0.2,
            risk_free_rate: 0.0,
            pricer,
        }
    }

    fn config(types: Vec<StructureType>, max_width: u32) -> FunnelConfig {
        FunnelConfig {
            structure_types: types,
            max_width_strikes: max_width,
            ..FunnelConfig::default()
        }
    }

    #[test]
    fn verticals_respect_width_and_order() {
        let strikes: Vec<f64> = (0..10).map(|i| 95.0 + i as f64).collect();
        let quotes = ladder_quotes(&strikes);
        let refs: Vec<&OptionQuote> = quotes.iter().collect();
        let book = StrikeBook::new(expiry(), strikes, &refs);
        let pricer = BlackScholesPricer::new();
        let cfg = config(vec![StructureType::BullCallSpread, StructureType::BearPutSpread], 3);
        let out = generate_structures(&[book], &cfg, &factory(&pricer));

        // Pairs with width 1..=3 on a 10-strike ladder: 9 + 8 + 7.
        assert_eq!(out.generated, 2 * 24);
        for s in &out.structures {
            assert!((1..=3).contains(&s.width));
            assert!(s.legs[0].strike_value().unwrap() < s.legs[1].strike_value().unwrap());
        }
        let bear_put = out
            .structures
            .iter()
            .find(|s| s.structure_type == StructureType::BearPutSpread)
            .unwrap();
        assert_eq!(bear_put.legs[0].side, Side::Sell);
        assert_eq!(bear_put.legs[1].side, Side::Buy);
    }

    #[test]
    fn condors_straddle_spot_and_butterflies_balance() {
        let strikes: Vec<f64> = (0..9).map(|i| 96.0 + i as f64).collect();
        let quotes = ladder_quotes(&strikes);
        let refs: Vec<&OptionQuote> = quotes.iter().collect();
        let book = StrikeBook::new(expiry(), strikes, &refs);
        let pricer = BlackScholesPricer::new();
        let cfg = config(vec![StructureType::IronCondor, StructureType::Butterfly], 2);
        let out = generate_structures(&[book], &cfg, &factory(&pricer));
        assert!(out.failures.is_empty());

        for s in &out.structures {
            match s.structure_type {
                StructureType::IronCondor => {
                    let k: Vec<f64> = s.legs.iter().map(|l| l.strike_value().unwrap()).collect();
                    assert!(k[1] < 100.0 && k[2] > 100.0);
                    assert!((k[1] - k[0] - (k[3] - k[2])).abs() < 1e-9);
                }
                StructureType::Butterfly => {
                    assert_eq!(s.legs[1].quantity, 2);
                    assert_eq!(s.total_contracts(), 4);
                }
                other => panic!("unexpected {other}"),
            }
        }
        assert!(out.structures.iter().any(|s| s.structure_type == StructureType::IronCondor));
        // 9 strikes, wings 1..=2: (9-2) + (9-4).
        assert_eq!(
            out.structures.iter().filter(|s| s.structure_type == StructureType::Butterfly).count(),
            12
        );
    }

    #[test]
    fn missing_two_sided_quote_uses_model_price() {
        let mut quotes = ladder_quotes(&[100.0, 101.0]);
        for q in &mut quotes {
            q.bid = None;
            q.ask = None;
        }
        let refs: Vec<&OptionQuote> = quotes.iter().collect();
        let book = StrikeBook::new(expiry(), vec![100.0, 101.0], &refs);
        let pricer = BlackScholesPricer::new();
        let cfg = config(vec![StructureType::BullCallSpread], 1);
        let out = generate_structures(&[book], &cfg, &factory(&pricer));
        assert_eq!(out.structures.len(), 1);
        let lower = &out.structures[0].legs[0];
        assert!(lower.premium > 1.0 && lower.bid.is_none());
    }

    #[test]
    fn truncation_keeps_nearest_in_enumeration_order() {
        let strikes: Vec<f64> = (0..20).map(|i| 90.0 + i as f64).collect();
        let quotes = ladder_quotes(&strikes);
        let refs: Vec<&OptionQuote> = quotes.iter().collect();
        let book = StrikeBook::new(expiry(), strikes, &refs);
        let pricer = BlackScholesPricer::new();
        let mut cfg = config(vec![StructureType::BullCallSpread], 1);
        cfg.max_structures = 4;
        let out = generate_structures(&[book], &cfg, &factory(&pricer));
        assert_eq!(out.generated, 19);
        assert_eq!(out.truncated, 15);
        let lowers: Vec<f64> = out.structures.iter().map(|s| s.legs[0].strike_value().unwrap()).collect();
        assert_eq!(lowers, vec![98.0, 99.0, 100.0, 101.0]);
    }
}

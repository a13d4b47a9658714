//! Stage 1: per-strike predicates.
//!
//! Each predicate looks only at one quote's own attributes, so the surviving
//! set does not depend on the order predicates are applied in, and a stricter
//! threshold always keeps a subset of what a looser one keeps.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use optlab_core::data::OptionQuote;
use optlab_core::domain::OptionType;

use crate::config::FunnelConfig;

/// Identity of a listed strike: (expiry, type, strike in cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StrikeKey {
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike_cents: i64,
}

impl StrikeKey {
    pub fn of(quote: &OptionQuote) -> Self {
        Self {
            expiry: quote.expiry,
            option_type: quote.option_type,
            strike_cents: strike_cents(quote.strike),
        }
    }
}

pub fn strike_cents(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

pub trait StrikePredicate: Send + Sync {
    fn name(&self) -> &'static str;
    fn accepts(&self, quote: &OptionQuote, spot: f64) -> bool;
}

/// strike / spot inside `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct MoneynessWindow {
    pub min: f64,
    pub max: f64,
}

impl StrikePredicate for MoneynessWindow {
    fn name(&self) -> &'static str {
        "moneyness"
    }

    fn accepts(&self, quote: &OptionQuote, spot: f64) -> bool {
        if spot <= 0.0 {
            return false;
        }
        let m = quote.strike / spot;
        m >= self.min && m <= self.max
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MinVolume(pub u64);

impl StrikePredicate for MinVolume {
    fn name(&self) -> &'static str {
        "min_volume"
    }

    fn accepts(&self, quote: &OptionQuote, _spot: f64) -> bool {
        quote.volume >= self.0
    }
}

/// Relative bid/ask spread at most the limit. A quote without both sides passes.
#[derive(Debug, Clone, Copy)]
pub struct MaxSpread(pub f64);

impl StrikePredicate for MaxSpread {
    fn name(&self) -> &'static str {
        "max_spread"
    }

    fn accepts(&self, quote: &OptionQuote, _spot: f64) -> bool {
        match quote.spread_pct() {
            Some(s) => s <= self.0,
            None => quote.bid.is_none() || quote.ask.is_none(),
        }
    }
}

pub fn default_predicates(config: &FunnelConfig) -> Vec<Box<dyn StrikePredicate>> {
    vec![
        Box::new(MoneynessWindow {
            min: config.moneyness_min,
            max: config.moneyness_max,
        }),
        Box::new(MinVolume(config.min_volume)),
        Box::new(MaxSpread(config.max_spread_pct)),
    ]
}

/// Quotes passing every predicate, in input order.
pub fn filter_strikes<'q>(
    quotes: impl IntoIterator<Item = &'q OptionQuote>,
    spot: f64,
    predicates: &[Box<dyn StrikePredicate>],
) -> Vec<&'q OptionQuote> {
    quotes
        .into_iter()
        .filter(|q| predicates.iter().all(|p| p.accepts(q, spot)))
        .collect()
}

/// Surviving quotes of one expiry, indexed for structure generation.
#[derive(Debug, Clone)]
pub struct StrikeBook<'q> {
    pub expiry: NaiveDate,
    /// Full listed ladder for the expiry; widths count steps on it.
    pub ladder: Vec<f64>,
    pub calls: BTreeMap<i64, &'q OptionQuote>,
    pub puts: BTreeMap<i64, &'q OptionQuote>,
}

impl<'q> StrikeBook<'q> {
    pub fn new(expiry: NaiveDate, ladder: Vec<f64>, survivors: &[&'q OptionQuote]) -> Self {
        let mut calls = BTreeMap::new();
        let mut puts = BTreeMap::new();
        for q in survivors.iter().filter(|q| q.expiry == expiry) {
            let book = match q.option_type {
                OptionType::Call => &mut calls,
                OptionType::Put => &mut puts,
            };
            book.insert(strike_cents(q.strike), *q);
        }
        Self {
            expiry,
            ladder,
            calls,
            puts,
        }
    }

    pub fn quote(&self, option_type: OptionType, ladder_index: usize) -> Option<&'q OptionQuote> {
        let strike = *self.ladder.get(ladder_index)?;
        let side = match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        };
        side.get(&strike_cents(strike)).copied()
    }

    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

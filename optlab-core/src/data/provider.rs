//! Data provider trait and structured error types.
//!
//! The MarketDataProvider trait abstracts over data sources (CSV import,
//! synthetic generation, any live feed a caller plugs in) so the funnel can be
//! driven and tested without network access.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OptionType;

/// Daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One listed option quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub open_interest: u64,
    #[serde(default)]
    pub implied_vol: Option<f64>,
}

impl OptionQuote {
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// (ask - bid) / mid; `None` when either side is missing or mid is zero.
    pub fn spread_pct(&self) -> Option<f64> {
        let (b, a) = (self.bid?, self.ask?);
        let mid = (b + a) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((a - b) / mid)
    }
}

/// Option chain snapshot for one underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub spot: f64,
    pub quotes: Vec<OptionQuote>,
}

impl OptionChain {
    /// Distinct expiries, ascending.
    pub fn expiries(&self) -> Vec<NaiveDate> {
        let mut out: Vec<NaiveDate> = self.quotes.iter().map(|q| q.expiry).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Distinct strikes listed for an expiry, ascending.
    pub fn strike_ladder(&self, expiry: NaiveDate) -> Vec<f64> {
        let mut out: Vec<f64> = self
            .quotes
            .iter()
            .filter(|q| q.expiry == expiry)
            .map(|q| q.strike)
            .collect();
        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        out
    }

    pub fn quotes_for(&self, expiry: NaiveDate) -> impl Iterator<Item = &OptionQuote> {
        self.quotes.iter().filter(move |q| q.expiry == expiry)
    }

    pub fn find(&self, expiry: NaiveDate, option_type: OptionType, strike: f64) -> Option<&OptionQuote> {
        self.quotes.iter().find(|q| {
            q.expiry == expiry && q.option_type == option_type && (q.strike - strike).abs() < 1e-9
        })
    }

    /// Calendar days from `as_of` to `expiry`.
    pub fn days_to_expiry(&self, expiry: NaiveDate) -> i64 {
        (expiry - self.as_of).num_days()
    }
}

/// Trading days (Mon–Fri) in `(from, to]`. Zero when `to <= from`.
pub fn weekdays_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = from;
    while day < to {
        day = day.succ_opt().unwrap_or(to);
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            count += 1;
        }
    }
    count
}

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("provider '{provider}' blocked (circuit breaker open)")]
    CircuitBreakerOpen { provider: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no data providers configured")]
    NoProviders,

    #[error("all providers failed for {symbol}: {last}")]
    Exhausted { symbol: String, last: String },
}

impl DataSourceError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataSourceError::NetworkUnreachable(_) | DataSourceError::RateLimited { .. }
        )
    }
}

/// Trait for market data providers.
///
/// Implementations handle the specifics of fetching data from a particular
/// source. Retry and fallback sit above this trait in [`super::FallbackChain`].
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Daily OHLCV bars for a symbol over `[start, end]`.
    fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataSourceError>;

    /// Option chain snapshot as of a date.
    fn fetch_chain(&self, symbol: &str, as_of: NaiveDate) -> Result<OptionChain, DataSourceError>;

    /// Whether the provider currently accepts requests.
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn quote(expiry: NaiveDate, strike: f64, bid: Option<f64>, ask: Option<f64>) -> OptionQuote {
        OptionQuote {
            expiry,
            option_type: OptionType::Call,
            strike,
            bid,
            ask,
            volume: 10,
            open_interest: 100,
            implied_vol: None,
        }
    }

    #[test]
    fn weekdays_skip_weekends() {
        // Fri 2024-03-01 → Fri 2024-03-08: Mon..Fri = 5
        assert_eq!(weekdays_between(d(2024, 3, 1), d(2024, 3, 8)), 5);
        assert_eq!(weekdays_between(d(2024, 3, 8), d(2024, 3, 1)), 0);
    }

    #[test]
    fn spread_pct_needs_both_sides() {
        let e = d(2024, 3, 15);
        assert!((quote(e, 100.0, Some(0.9), Some(1.1)).spread_pct().unwrap() - 0.2).abs() < 1e-12);
        assert!(quote(e, 100.0, None, Some(1.1)).spread_pct().is_none());
    }

    #[test]
    fn chain_ladder_and_expiries_sorted() {
        let e1 = d(2024, 3, 15);
        let e2 = d(2024, 3, 22);
        let chain = OptionChain {
            symbol: "SPY".into(),
            as_of: d(2024, 3, 1),
            spot: 100.0,
            quotes: vec![
                quote(e2, 105.0, None, None),
                quote(e1, 110.0, None, None),
                quote(e1, 100.0, None, None),
                quote(e1, 100.0, None, None),
            ],
        };
        assert_eq!(chain.expiries(), vec![e1, e2]);
        assert_eq!(chain.strike_ladder(e1), vec![100.0, 110.0]);
        assert_eq!(chain.days_to_expiry(e1), 14);
        assert!(chain.find(e2, OptionType::Call, 105.0).is_some());
        assert!(chain.find(e2, OptionType::Put, 105.0).is_none());
    }
}

//! Deterministic synthetic market data.
//!
//! Generates a GBM daily history with occasional gap-and-volume shocks and a
//! Black-Scholes priced chain around the last close. Same seed and symbol
//! always give the same data, which makes it the offline default for runs
//! and tests.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::Rng;
use statrs::distribution::Normal;

use super::provider::{
    weekdays_between, Bar, DataSourceError, MarketDataProvider, OptionChain, OptionQuote,
};
use crate::domain::OptionType;
use crate::pricing::{BlackScholesPricer, TRADING_DAYS_PER_YEAR};
use crate::rng::rng_from_seed;

/// Lookback used to derive the chain's spot.
const SPOT_LOOKBACK_DAYS: i64 = 365;

/// Every series starts here, so overlapping windows see the same bars.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 3).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    seed: u64,
    /// Opening price on the first generated day.
    pub initial_price: f64,
    /// Annualized drift.
    pub drift: f64,
    /// Annualized volatility; also the ATM implied vol of the chain.
    pub volatility: f64,
    pub risk_free_rate: f64,
    /// Per-day probability of a gap shock.
    pub shock_probability: f64,
    pub expiries: usize,
    /// Strikes listed on each side of ATM.
    pub strikes_per_side: i32,
    /// Half-spread as a fraction of mid.
    pub half_spread: f64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            initial_price: 100.0,
            drift: 0.08,
            volatility: 0.20,
            risk_free_rate: 0.04,
            shock_probability: 0.04,
            expiries: 8,
            strikes_per_side: 15,
            half_spread: 0.03,
        }
    }

    fn symbol_seed(&self, symbol: &str, tag: &str) -> u64 {
        let mut h = blake3::Hasher::new();
        h.update(&self.seed.to_le_bytes());
        h.update(symbol.to_uppercase().as_bytes());
        h.update(tag.as_bytes());
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&h.finalize().as_bytes()[..8]);
        u64::from_le_bytes(buf)
    }

    fn strike_step(spot: f64) -> f64 {
        match spot {
            s if s < 50.0 => 0.5,
            s if s < 200.0 => 1.0,
            s if s < 500.0 => 2.5,
            _ => 5.0,
        }
    }

    /// Volatility smile in log-moneyness with a mild put skew.
    fn smile(&self, spot: f64, strike: f64) -> f64 {
        let m = (strike / spot).ln();
        (self.volatility + 0.5 * m * m - 0.1 * m).clamp(0.05, 2.0)
    }

    fn friday_expiries(&self, as_of: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(self.expiries);
        let mut day = as_of + Duration::days(1);
        while out.len() < self.expiries {
            if day.weekday() == Weekday::Fri {
                out.push(day);
            }
            day += Duration::days(1);
        }
        out
    }
}

impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataSourceError> {
        if end < start {
            return Err(DataSourceError::Validation(format!(
                "history window ends before it starts ({start} > {end})"
            )));
        }
        let normal = Normal::new(0.0, 1.0).map_err(|e| DataSourceError::Validation(e.to_string()))?;
        let mut rng = rng_from_seed(Some(self.symbol_seed(symbol, "history")));

        let dt = 1.0 / TRADING_DAYS_PER_YEAR;
        let step_mu = (self.drift - 0.5 * self.volatility * self.volatility) * dt;
        let step_sigma = self.volatility * dt.sqrt();

        let mut bars = Vec::new();
        let mut prev_close = self.initial_price;
        let mut day = start.min(epoch());
        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                let shocked = rng.gen_bool(self.shock_probability);
                let gap = if shocked {
                    let size = rng.gen_range(0.035..0.06);
                    if rng.gen_bool(0.5) { size } else { -size }
                } else {
                    0.0
                };
                let open = prev_close * (1.0 + gap);
                let z: f64 = rng.sample(normal);
                let close = open * (step_mu + step_sigma * z).exp();
                let wiggle = rng.gen_range(0.0..0.5) * step_sigma;
                let high = open.max(close) * (1.0 + wiggle);
                let low = open.min(close) * (1.0 - wiggle);
                let base_volume: u64 = rng.gen_range(800_000..1_200_000);
                let volume = if shocked { base_volume * 4 } else { base_volume };
                if day >= start {
                    bars.push(Bar {
                        date: day,
                        open,
                        high,
                        low,
                        close,
                        volume,
                    });
                }
                prev_close = close;
            }
            day += Duration::days(1);
        }
        Ok(bars)
    }

    fn fetch_chain(&self, symbol: &str, as_of: NaiveDate) -> Result<OptionChain, DataSourceError> {
        let history = self.fetch_history(symbol, as_of - Duration::days(SPOT_LOOKBACK_DAYS), as_of)?;
        let spot = history.last().map(|b| b.close).unwrap_or(self.initial_price);
        let step = Self::strike_step(spot);
        let atm = (spot / step).round() * step;
        let mut rng = rng_from_seed(Some(self.symbol_seed(symbol, "chain")));

        let mut quotes = Vec::new();
        for expiry in self.friday_expiries(as_of) {
            let years = f64::from(weekdays_between(as_of, expiry)) / TRADING_DAYS_PER_YEAR;
            for k in -self.strikes_per_side..=self.strikes_per_side {
                let strike = atm + f64::from(k) * step;
                if strike <= 0.0 {
                    continue;
                }
                let iv = self.smile(spot, strike);
                for option_type in [OptionType::Call, OptionType::Put] {
                    let mid = BlackScholesPricer::price_years(
                        option_type,
                        spot,
                        strike,
                        years,
                        iv,
                        self.risk_free_rate,
                    )
                    .map_err(|e| DataSourceError::Validation(e.to_string()))?;
                    let bid = (mid * (1.0 - self.half_spread)).max(0.0);
                    let ask = (mid * (1.0 + self.half_spread)).max(0.01);
                    let base = 600.0 / (1.0 + f64::from(k.unsigned_abs()));
                    let volume = (base * rng.gen_range(0.6..1.4)) as u64;
                    quotes.push(OptionQuote {
                        expiry,
                        option_type,
                        strike,
                        bid: Some(bid),
                        ask: Some(ask),
                        volume,
                        open_interest: volume * 10,
                        implied_vol: Some(iv),
                    });
                }
            }
        }

        Ok(OptionChain {
            symbol: symbol.to_uppercase(),
            as_of,
            spot,
            quotes,
        })
    }
}

//! CSV-backed market data.
//!
//! Layout under the data directory:
//! - `<SYMBOL>.csv` with columns `date,open,high,low,close,volume`
//! - `<SYMBOL>_chain.csv` with columns
//!   `expiry,option_type,strike,bid,ask,volume,open_interest,implied_vol`
//!
//! Empty bid/ask/implied_vol cells deserialize to `None`.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use super::provider::{Bar, DataSourceError, MarketDataProvider, OptionChain, OptionQuote};

#[derive(Debug, Clone)]
pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn history_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol.to_uppercase()))
    }

    pub fn chain_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}_chain.csv", symbol.to_uppercase()))
    }

    fn read_rows<T: serde::de::DeserializeOwned>(
        path: &Path,
        symbol: &str,
    ) -> Result<Vec<T>, DataSourceError> {
        if !path.exists() {
            return Err(DataSourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let parse_err = |e: csv::Error| DataSourceError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(parse_err)?;
        reader
            .deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(parse_err)
    }
}

impl MarketDataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataSourceError> {
        let mut bars: Vec<Bar> = Self::read_rows(&self.history_path(symbol), symbol)?;
        bars.retain(|b| b.date >= start && b.date <= end);
        bars.sort_by_key(|b| b.date);
        if let Some(bad) = bars.iter().find(|b| !(b.close.is_finite() && b.close > 0.0)) {
            return Err(DataSourceError::Validation(format!(
                "{symbol}: non-positive close on {}",
                bad.date
            )));
        }
        Ok(bars)
    }

    fn fetch_chain(&self, symbol: &str, as_of: NaiveDate) -> Result<OptionChain, DataSourceError> {
        let history: Vec<Bar> = Self::read_rows(&self.history_path(symbol), symbol)?;
        let spot = history
            .iter()
            .filter(|b| b.date <= as_of)
            .max_by_key(|b| b.date)
            .map(|b| b.close)
            .ok_or_else(|| {
                DataSourceError::Validation(format!("{symbol}: no closing price on or before {as_of}"))
            })?;

        let mut quotes: Vec<OptionQuote> = Self::read_rows(&self.chain_path(symbol), symbol)?;
        quotes.retain(|q| q.expiry > as_of && q.strike > 0.0);

        Ok(OptionChain {
            symbol: symbol.to_uppercase(),
            as_of,
            spot,
            quotes,
        })
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OptionType;
    use std::fs;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("SPY.csv"),
            "date,open,high,low,close,volume\n\
             2024-01-02,100,101,99,100.5,1000\n\
             2024-01-03,100.5,102,100,101.0,1200\n\
             2024-01-04,101,103,100,102.0,900\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("SPY_chain.csv"),
            "expiry,option_type,strike,bid,ask,volume,open_interest,implied_vol\n\
             2024-01-19,call,100,2.0,2.2,50,500,0.2\n\
             2024-01-19,put,100,1.0,,20,100,\n\
             2024-01-03,call,100,1.0,1.1,5,10,0.2\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn reads_history_within_window() {
        let dir = fixture();
        let p = CsvProvider::new(dir.path());
        let bars = p.fetch_history("spy", d(2024, 1, 3), d(2024, 1, 4)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
    }

    #[test]
    fn chain_spot_is_last_close_before_as_of() {
        let dir = fixture();
        let p = CsvProvider::new(dir.path());
        let chain = p.fetch_chain("SPY", d(2024, 1, 3)).unwrap();
        assert_eq!(chain.spot, 101.0);
        // Expired row dropped.
        assert_eq!(chain.quotes.len(), 2);
        let put = chain.find(d(2024, 1, 19), OptionType::Put, 100.0).unwrap();
        assert_eq!(put.ask, None);
        assert_eq!(put.implied_vol, None);
    }

    #[test]
    fn missing_file_is_symbol_not_found() {
        let dir = fixture();
        let p = CsvProvider::new(dir.path());
        assert!(matches!(
            p.fetch_history("QQQ", d(2024, 1, 1), d(2024, 2, 1)),
            Err(DataSourceError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn malformed_row_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("BAD.csv"), "date,open,high,low,close,volume\nnope,1,1,1,1,1\n").unwrap();
        let p = CsvProvider::new(dir.path());
        assert!(matches!(
            p.fetch_history("BAD", d(2024, 1, 1), d(2024, 2, 1)),
            Err(DataSourceError::Parse { .. })
        ));
    }
}

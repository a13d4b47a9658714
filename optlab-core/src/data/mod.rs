//! Market data: OHLCV history and option chains behind a provider contract.

pub mod circuit_breaker;
pub mod csv_provider;
pub mod fallback;
pub mod provider;
pub mod synthetic;

pub use circuit_breaker::CircuitBreaker;
pub use csv_provider::CsvProvider;
pub use fallback::{FallbackChain, Fetched, RetryPolicy};
pub use provider::{
    weekdays_between, Bar, DataSourceError, MarketDataProvider, OptionChain, OptionQuote,
};
pub use synthetic::SyntheticProvider;

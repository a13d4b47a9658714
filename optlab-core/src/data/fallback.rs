//! Primary/fallback provider chain with retry and backoff.
//!
//! Providers are tried in order. Each provider gets up to `max_attempts`
//! tries for retryable errors, with exponentially growing delays; a provider
//! whose breaker is open is skipped. The last error surfaces only when every
//! provider has failed.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::provider::{Bar, DataSourceError, MarketDataProvider, OptionChain};

/// Retry schedule applied per provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor.max(0.0))
    }
}

/// A value plus the name of the provider that served it.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub provider: String,
}

struct Link {
    provider: Arc<dyn MarketDataProvider>,
    breaker: CircuitBreaker,
}

pub struct FallbackChain {
    links: Vec<Link>,
    retry: RetryPolicy,
}

impl FallbackChain {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            links: Vec::new(),
            retry,
        }
    }

    /// Append a provider; earlier providers take precedence.
    pub fn with_provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.links.push(Link {
            provider,
            breaker: CircuitBreaker::default_provider(),
        });
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.links.iter().map(|l| l.provider.name().to_string()).collect()
    }

    pub fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Fetched<Vec<Bar>>, DataSourceError> {
        self.first_success(symbol, |p| p.fetch_history(symbol, start, end))
    }

    pub fn fetch_chain(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<Fetched<OptionChain>, DataSourceError> {
        self.first_success(symbol, |p| p.fetch_chain(symbol, as_of))
    }

    fn first_success<T>(
        &self,
        symbol: &str,
        op: impl Fn(&dyn MarketDataProvider) -> Result<T, DataSourceError>,
    ) -> Result<Fetched<T>, DataSourceError> {
        if self.links.is_empty() {
            return Err(DataSourceError::NoProviders);
        }

        let mut last: Option<DataSourceError> = None;
        for link in &self.links {
            let name = link.provider.name();
            if !link.breaker.is_allowed() || !link.provider.is_available() {
                debug!(provider = name, symbol, "provider unavailable, skipping");
                last = Some(DataSourceError::CircuitBreakerOpen {
                    provider: name.to_string(),
                });
                continue;
            }

            for attempt in 1..=self.retry.max_attempts.max(1) {
                match op(link.provider.as_ref()) {
                    Ok(value) => {
                        link.breaker.record_success();
                        return Ok(Fetched {
                            value,
                            provider: name.to_string(),
                        });
                    }
                    Err(e) => {
                        link.breaker.record_failure();
                        let retry = e.is_retryable() && attempt < self.retry.max_attempts;
                        warn!(provider = name, symbol, attempt, error = %e, retry, "data fetch failed");
                        last = Some(e);
                        if !retry {
                            break;
                        }
                        std::thread::sleep(self.retry.delay_for(attempt));
                    }
                }
            }
        }

        Err(DataSourceError::Exhausted {
            symbol: symbol.to_string(),
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

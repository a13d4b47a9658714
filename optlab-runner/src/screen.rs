//! Multi-symbol screening.
//!
//! One full sweep per symbol on the worker pool; each symbol scores its own
//! survivors inline so the pool is not oversubscribed. Per-symbol failures
//! are collected, never propagated.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use crate::optimize::{validate_ticker, ErrorKind, OptimizeError, OptimizeRequest, OptimizeResponse, Optimizer};
use crate::pool::WorkerPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRequest {
    pub symbols: Vec<String>,
    pub regime: String,
    pub horizon: usize,
    pub as_of: NaiveDate,
    /// Keep only the best N symbols by top score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenFailure {
    pub symbol: String,
    pub kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenReport {
    /// Best symbol first; symbols with no ranked candidates sort last.
    pub results: Vec<OptimizeResponse>,
    pub failures: Vec<ScreenFailure>,
    pub runtime_seconds: f64,
}

impl<'a> Optimizer<'a> {
    pub fn screen(&self, request: &ScreenRequest) -> Result<ScreenReport, OptimizeError> {
        let started = Instant::now();
        if request.symbols.is_empty() {
            return Err(OptimizeError::InvalidRequest {
                field: "symbols",
                reason: "at least one symbol is required".into(),
            });
        }
        for symbol in &request.symbols {
            validate_ticker(symbol)?;
        }

        let inline = WorkerPool::sequential();
        let results = self.pool().run_isolated(&request.symbols, |symbol| {
            let req = OptimizeRequest::new(symbol.clone(), request.regime.clone(), request.horizon, request.as_of);
            self.optimize_on(&req, &inline)
        });

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for (symbol, result) in request.symbols.iter().zip(results) {
            match result {
                Ok(r) => responses.push(r),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "symbol screen failed");
                    failures.push(ScreenFailure {
                        symbol: symbol.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        rank_responses(&mut responses);
        if let Some(n) = request.top_n {
            responses.truncate(n);
        }
        info!(kept = responses.len(), failed = failures.len(), "screen complete");
        Ok(ScreenReport {
            results: responses,
            failures,
            runtime_seconds: started.elapsed().as_secs_f64(),
        })
    }
}

/// Best score descending; symbols without candidates last, then by symbol.
pub fn rank_responses(responses: &mut [OptimizeResponse]) {
    responses.sort_by(|a, b| match (a.best_score(), b.best_score()) {
        (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| a.symbol.cmp(&b.symbol)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.symbol.cmp(&b.symbol),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use optlab_core::domain::Diagnostics;

    fn response(symbol: &str, top10: Vec<crate::optimize::RankedCandidate>) -> OptimizeResponse {
        OptimizeResponse {
            symbol: symbol.into(),
            regime: "neutral".into(),
            horizon: 10,
            as_of: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            run_id: "x".into(),
            top10,
            diagnostics: Diagnostics::new(),
            conditional: None,
            runtime_seconds: 0.0,
        }
    }

    #[test]
    fn empty_responses_sort_last() {
        let mut v = vec![response("ZZZ", vec![]), response("AAA", vec![])];
        rank_responses(&mut v);
        assert_eq!(v[0].symbol, "AAA");
        assert_eq!(v[1].symbol, "ZZZ");
    }
}

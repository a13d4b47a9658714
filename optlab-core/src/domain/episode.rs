//! Candidate episodes: fixed-horizon historical windows anchored at state-matching events.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EpisodeError {
    #[error("episode horizon must be positive")]
    ZeroHorizon,
    #[error("episode feature '{0}' is not finite")]
    NonFiniteFeature(String),
    #[error("episode symbol must not be empty")]
    EmptySymbol,
}

/// One historical episode produced by a selector. Consumed read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEpisode {
    pub symbol: String,
    /// Anchor bar date.
    pub start: NaiveDate,
    /// Episode length in bars.
    pub horizon: usize,
    pub state_features: BTreeMap<String, f64>,
    pub selector_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl CandidateEpisode {
    pub fn new(
        symbol: impl Into<String>,
        start: NaiveDate,
        horizon: usize,
        state_features: BTreeMap<String, f64>,
        selector_name: impl Into<String>,
        score: Option<f64>,
    ) -> Result<Self, EpisodeError> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(EpisodeError::EmptySymbol);
        }
        if horizon == 0 {
            return Err(EpisodeError::ZeroHorizon);
        }
        if let Some((name, _)) = state_features.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EpisodeError::NonFiniteFeature(name.clone()));
        }
        Ok(Self {
            symbol,
            start,
            horizon,
            state_features,
            selector_name: selector_name.into(),
            score,
        })
    }

    /// Euclidean distance over the target's keys; a key missing here counts as 0.0.
    pub fn distance_to(&self, target: &BTreeMap<String, f64>) -> f64 {
        target
            .iter()
            .map(|(k, t)| {
                let v = self.state_features.get(k).copied().unwrap_or(0.0);
                (v - t).powi(2)
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Episodes whose state lies within `threshold` of `target`.
pub fn filter_by_state<'a>(
    episodes: &'a [CandidateEpisode],
    target: &BTreeMap<String, f64>,
    threshold: f64,
) -> Vec<&'a CandidateEpisode> {
    episodes
        .iter()
        .filter(|e| e.distance_to(target) <= threshold)
        .collect()
}

//! Episode selectors: turn a bar history into state-anchored candidate episodes.
//!
//! A selector is anything that can `select` episodes from bars and `score` a
//! feature vector. The conditional sampler only consumes the episodes.

use std::collections::BTreeMap;

use tracing::debug;

use crate::data::Bar;
use crate::domain::CandidateEpisode;
use crate::stats::{mean, population_std};

pub const FEATURE_GAP: &str = "gap";
pub const FEATURE_VOLUME_Z: &str = "volume_z";

pub trait EpisodeSelector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Episodes with a complete forward horizon, best score first.
    fn select(&self, symbol: &str, bars: &[Bar]) -> Vec<CandidateEpisode>;

    fn score(&self, features: &BTreeMap<String, f64>) -> f64;

    /// State features at `index`, or `None` when there is not enough lookback.
    fn features_at(&self, bars: &[Bar], index: usize) -> Option<BTreeMap<String, f64>>;

    /// State features of the most recent bar.
    fn current_state(&self, bars: &[Bar]) -> Option<BTreeMap<String, f64>> {
        bars.len().checked_sub(1).and_then(|i| self.features_at(bars, i))
    }
}

/// Flags bars that gap away from the prior close on abnormal volume.
#[derive(Debug, Clone)]
pub struct GapVolumeSelector {
    /// Minimum |open / prev_close - 1|.
    pub gap_min: f64,
    /// Minimum volume z-score against the trailing window.
    pub volume_z_min: f64,
    pub volume_window: usize,
    /// Forward bars per episode.
    pub horizon: usize,
}

impl Default for GapVolumeSelector {
    fn default() -> Self {
        Self {
            gap_min: 0.03,
            volume_z_min: 1.5,
            volume_window: 20,
            horizon: 10,
        }
    }
}

impl EpisodeSelector for GapVolumeSelector {
    fn name(&self) -> &'static str {
        "gap_volume"
    }

    fn select(&self, symbol: &str, bars: &[Bar]) -> Vec<CandidateEpisode> {
        let mut episodes: Vec<CandidateEpisode> = (self.volume_window..bars.len())
            .filter(|&i| i + self.horizon < bars.len())
            .filter_map(|i| {
                let features = self.features_at(bars, i)?;
                let gap = features.get(FEATURE_GAP).copied().unwrap_or(0.0);
                let vz = features.get(FEATURE_VOLUME_Z).copied().unwrap_or(0.0);
                if gap.abs() < self.gap_min || vz < self.volume_z_min {
                    return None;
                }
                let score = self.score(&features);
                CandidateEpisode::new(symbol, bars[i].date, self.horizon, features, self.name(), Some(score)).ok()
            })
            .collect();

        episodes.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .partial_cmp(&a.score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.start.cmp(&b.start))
        });
        debug!(selector = self.name(), symbol, episodes = episodes.len(), "episodes selected");
        episodes
    }

    fn score(&self, features: &BTreeMap<String, f64>) -> f64 {
        let gap = features.get(FEATURE_GAP).copied().unwrap_or(0.0);
        let vz = features.get(FEATURE_VOLUME_Z).copied().unwrap_or(0.0);
        gap.abs() + vz.max(0.0)
    }

    fn features_at(&self, bars: &[Bar], index: usize) -> Option<BTreeMap<String, f64>> {
        if index == 0 || index < self.volume_window || index >= bars.len() {
            return None;
        }
        let prev_close = bars[index - 1].close;
        if prev_close <= 0.0 {
            return None;
        }
        let gap = bars[index].open / prev_close - 1.0;

        let window: Vec<f64> = bars[index - self.volume_window..index]
            .iter()
            .map(|b| b.volume as f64)
            .collect();
        let sd = population_std(&window);
        let volume_z = if sd > 0.0 {
            (bars[index].volume as f64 - mean(&window)) / sd
        } else {
            0.0
        };

        let features = BTreeMap::from([
            (FEATURE_GAP.to_string(), gap),
            (FEATURE_VOLUME_Z.to_string(), volume_z),
        ]);
        features.values().all(|v| v.is_finite()).then_some(features)
    }
}

/// Log returns of closes starting at the episode's anchor bar, at most `steps` long.
pub fn episode_returns(bars: &[Bar], episode: &CandidateEpisode, steps: usize) -> Vec<f64> {
    let Some(anchor) = bars.iter().position(|b| b.date == episode.start) else {
        return Vec::new();
    };
    let end = (anchor + steps).min(bars.len().saturating_sub(1));
    bars[anchor..=end]
        .windows(2)
        .filter(|w| w[0].close > 0.0 && w[1].close > 0.0)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars_with_shock(n: usize, shock_at: usize) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut close = 100.0;
        (0..n)
            .map(|i| {
                let shocked = i == shock_at;
                let open = if shocked { close * 1.05 } else { close };
                close = open * (1.0 + 0.001 * ((i % 3) as f64 - 1.0));
                Bar {
                    date: start + Duration::days(i as i64),
                    open,
                    high: open.max(close) + 0.5,
                    low: open.min(close) - 0.5,
                    close,
                    volume: if shocked { 5_000 } else { 1_000 + (i as u64 % 5) * 10 },
                }
            })
            .collect()
    }

    #[test]
    fn finds_gap_on_volume() {
        let bars = bars_with_shock(60, 30);
        let sel = GapVolumeSelector::default();
        let eps = sel.select("SPY", &bars);
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].start, bars[30].date);
        assert_eq!(eps[0].selector_name, "gap_volume");
        assert!(eps[0].score.unwrap() > 0.05);
    }

    #[test]
    fn incomplete_forward_horizon_is_skipped() {
        let bars = bars_with_shock(60, 55);
        let sel = GapVolumeSelector::default();
        assert!(sel.select("SPY", &bars).is_empty());
    }

    #[test]
    fn no_lookback_no_features() {
        let bars = bars_with_shock(10, 5);
        let sel = GapVolumeSelector::default();
        assert!(sel.features_at(&bars, 5).is_none());
        assert!(sel.current_state(&bars).is_none());
    }

    #[test]
    fn episode_returns_are_truncated() {
        let bars = bars_with_shock(60, 30);
        let sel = GapVolumeSelector::default();
        let ep = &sel.select("SPY", &bars)[0];
        let r = episode_returns(&bars, ep, 5);
        assert_eq!(r.len(), 5);
        let expected = (bars[31].close / bars[30].close).ln();
        assert!((r[0] - expected).abs() < 1e-12);
    }
}

//! Conditional return selection: episode bootstrap → parametric refit →
//! unconditional fallback.
//!
//! The cascade is an ordered decision procedure. Each step either produces a
//! sampler or a reason it could not, and the final [`ConditionalSelection`]
//! records which method won plus the last failure on the way there, so the
//! provenance of every run's risk numbers is inspectable.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use optlab_core::data::Bar;
use optlab_core::distributions::{validate_returns, DistributionFitError, ReturnDistribution};
use optlab_core::domain::{filter_by_state, CandidateEpisode, PathMatrix};
use optlab_core::rng::rng_from_seed;
use optlab_core::selectors::episode_returns;

use crate::config::ConditionalConfig;

/// Which cascade step produced the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    Bootstrap,
    ParametricRefit,
    Unconditional,
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectionMethod::Bootstrap => "bootstrap",
            SelectionMethod::ParametricRefit => "parametric_refit",
            SelectionMethod::Unconditional => "unconditional",
        })
    }
}

// ─── Episode bootstrap ──────────────────────────────────────────────

/// Resamples whole episodes; each simulated path is one episode, windowed or tiled.
#[derive(Debug, Clone)]
pub struct EpisodeBootstrap {
    episodes: Vec<Vec<f64>>,
}

impl EpisodeBootstrap {
    /// Empty episodes are discarded.
    pub fn new(episodes: Vec<Vec<f64>>) -> Self {
        Self {
            episodes: episodes.into_iter().filter(|e| !e.is_empty()).collect(),
        }
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn total_samples(&self) -> usize {
        self.episodes.iter().map(Vec::len).sum()
    }

    /// `n_paths × n_steps` log returns. A longer episode contributes a
    /// uniformly random contiguous window; a shorter one is repeated.
    pub fn sample(&self, n_paths: usize, n_steps: usize, seed: Option<u64>) -> Result<PathMatrix, DistributionFitError> {
        if self.episodes.is_empty() {
            return Err(DistributionFitError::InsufficientEpisodes { got: 0, need: 1 });
        }
        let mut matrix = PathMatrix::zeros(n_paths, n_steps)?;
        let mut rng = rng_from_seed(seed);
        for row in matrix.rows_mut() {
            let ep = &self.episodes[rng.gen_range(0..self.episodes.len())];
            if ep.len() >= n_steps {
                let start = rng.gen_range(0..=ep.len() - n_steps);
                row.copy_from_slice(&ep[start..start + n_steps]);
            } else {
                for (t, v) in row.iter_mut().enumerate() {
                    *v = ep[t % ep.len()];
                }
            }
        }
        Ok(matrix)
    }
}

// ─── Selection ──────────────────────────────────────────────────────

/// The sampler a selection owns.
#[derive(Debug)]
pub enum SelectedSampler {
    Bootstrap(EpisodeBootstrap),
    Fitted(Box<dyn ReturnDistribution>),
}

impl SelectedSampler {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedSampler::Bootstrap(_) => "episode_bootstrap",
            SelectedSampler::Fitted(d) => d.name(),
        }
    }

    pub fn sample(&self, n_paths: usize, n_steps: usize, seed: Option<u64>) -> Result<PathMatrix, DistributionFitError> {
        match self {
            SelectedSampler::Bootstrap(b) => b.sample(n_paths, n_steps, seed),
            SelectedSampler::Fitted(d) => d.sample(n_paths, n_steps, seed),
        }
    }

    pub fn params(&self) -> BTreeMap<String, f64> {
        match self {
            SelectedSampler::Bootstrap(b) => BTreeMap::from([
                ("episodes".to_string(), b.episode_count() as f64),
                ("samples".to_string(), b.total_samples() as f64),
            ]),
            SelectedSampler::Fitted(d) => d.params(),
        }
    }
}

/// Result of the cascade for one simulation request.
#[derive(Debug)]
pub struct ConditionalSelection {
    pub sampler: SelectedSampler,
    pub method: SelectionMethod,
    /// Last failure before the winning step; `None` when bootstrap won outright.
    pub fallback_reason: Option<String>,
    pub episode_count: usize,
}

/// Serializable provenance of a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub method: SelectionMethod,
    pub sampler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub episode_count: usize,
    pub params: BTreeMap<String, f64>,
}

impl ConditionalSelection {
    pub fn summary(&self) -> SelectionSummary {
        SelectionSummary {
            method: self.method,
            sampler: self.sampler.name().to_string(),
            fallback_reason: self.fallback_reason.clone(),
            episode_count: self.episode_count,
            params: self.sampler.params(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConditionalSelector {
    min_episodes: usize,
    min_samples: usize,
}

impl ConditionalSelector {
    pub fn new(config: &ConditionalConfig) -> Self {
        Self {
            min_episodes: config.min_episodes,
            min_samples: config.min_samples,
        }
    }

    /// Run the cascade over already state-matched episode returns.
    pub fn select(
        &self,
        episodes: Vec<Vec<f64>>,
        unconditional: &dyn ReturnDistribution,
        horizon_steps: usize,
    ) -> ConditionalSelection {
        let bootstrap = EpisodeBootstrap::new(episodes);
        let episode_count = bootstrap.episode_count();
        let need = self.min_samples.max(horizon_steps);

        // 1. Episode bootstrap
        let bootstrap_failure = if episode_count < self.min_episodes {
            DistributionFitError::InsufficientEpisodes {
                got: episode_count,
                need: self.min_episodes,
            }
        } else if bootstrap.total_samples() < need {
            DistributionFitError::InsufficientBootstrapSamples {
                got: bootstrap.total_samples(),
                need,
            }
        } else {
            debug!(episodes = episode_count, samples = bootstrap.total_samples(), "episode bootstrap selected");
            return ConditionalSelection {
                sampler: SelectedSampler::Bootstrap(bootstrap),
                method: SelectionMethod::Bootstrap,
                fallback_reason: None,
                episode_count,
            };
        };

        // 2. Parametric refit on the pooled conditioned sample
        let reason = if episode_count == 0 {
            "no episodes matched the requested state".to_string()
        } else {
            let pooled: Vec<f64> = bootstrap.episodes.concat();
            let mut refit = unconditional.unfitted();
            match validate_returns(&pooled, need).and_then(|_| refit.fit(&pooled)) {
                Ok(()) => {
                    debug!(family = refit.name(), samples = pooled.len(), "parametric refit selected");
                    return ConditionalSelection {
                        sampler: SelectedSampler::Fitted(refit),
                        method: SelectionMethod::ParametricRefit,
                        fallback_reason: Some(format!("bootstrap skipped: {bootstrap_failure}")),
                        episode_count,
                    };
                }
                Err(e) => format!("parametric refit failed: {e}"),
            }
        };

        // 3. Unconditional
        warn!(episodes = episode_count, reason = %reason, "using unconditional distribution");
        ConditionalSelection {
            sampler: SelectedSampler::Fitted(unconditional.boxed_clone()),
            method: SelectionMethod::Unconditional,
            fallback_reason: Some(reason),
            episode_count,
        }
    }
}

/// Return sequences of the episodes within `threshold` of `target`, each spanning
/// the longer of `steps` and the episode horizon.
pub fn conditioned_returns(
    bars: &[Bar],
    episodes: &[CandidateEpisode],
    target: &BTreeMap<String, f64>,
    threshold: f64,
    steps: usize,
) -> Vec<Vec<f64>> {
    filter_by_state(episodes, target, threshold)
        .into_iter()
        .map(|ep| episode_returns(bars, ep, steps.max(ep.horizon)))
        .filter(|r| !r.is_empty())
        .collect()
}

//! AdaptivePathController: doubles the path count until both CI half-widths
//! are within target or the cap is reached.
//!
//! The loop is sequential by construction: each decision reads the previous
//! evaluation's half-widths.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use optlab_core::domain::{AdaptiveDecision, AdaptivePathsRecord, MetricsReport};

use crate::config::McConfig;

#[derive(Debug, Error, PartialEq)]
pub enum AdaptiveError {
    #[error("baseline_paths must be positive")]
    ZeroBaseline,
    #[error("max_paths ({max}) is below baseline_paths ({baseline})")]
    CapBelowBaseline { baseline: usize, max: usize },
    #[error("CI target {name} must be positive and finite, got {value}")]
    InvalidTarget { name: &'static str, value: f64 },
}

/// Path budget and CI targets. Fixed for the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveCiSettings {
    pub baseline_paths: usize,
    pub max_paths: usize,
    /// Target half-width of the E[PnL] interval, in dollars.
    pub epnl_ci_target: f64,
    /// Target half-width of the POP interval, as a probability.
    pub pop_ci_target: f64,
}

impl Default for AdaptiveCiSettings {
    fn default() -> Self {
        Self {
            baseline_paths: 5_000,
            max_paths: 20_000,
            epnl_ci_target: 100.0,
            pop_ci_target: 0.03,
        }
    }
}

impl AdaptiveCiSettings {
    pub fn new(
        baseline_paths: usize,
        max_paths: usize,
        epnl_ci_target: f64,
        pop_ci_target: f64,
    ) -> Result<Self, AdaptiveError> {
        if baseline_paths == 0 {
            return Err(AdaptiveError::ZeroBaseline);
        }
        if max_paths < baseline_paths {
            return Err(AdaptiveError::CapBelowBaseline {
                baseline: baseline_paths,
                max: max_paths,
            });
        }
        for (name, value) in [("epnl_ci_target", epnl_ci_target), ("pop_ci_target", pop_ci_target)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(AdaptiveError::InvalidTarget { name, value });
            }
        }
        Ok(Self {
            baseline_paths,
            max_paths,
            epnl_ci_target,
            pop_ci_target,
        })
    }

    pub fn from_mc(mc: &McConfig) -> Result<Self, AdaptiveError> {
        Self::new(mc.num_paths, mc.max_paths, mc.epnl_ci_target, mc.pop_ci_target)
    }

    /// Upper bound on evaluations: one baseline run plus one per doubling.
    pub fn max_evaluations(&self) -> usize {
        let mut paths = self.baseline_paths;
        let mut evaluations = 1;
        while paths < self.max_paths {
            paths = paths.saturating_mul(2).min(self.max_paths);
            evaluations += 1;
        }
        evaluations
    }
}

/// One evaluation in the adaptive loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveStep {
    pub iteration: u64,
    pub paths: usize,
    pub epnl_half_width: f64,
    pub pop_half_width: f64,
    pub decision: AdaptiveDecision,
}

/// Final report plus the path history that produced it.
#[derive(Debug, Clone)]
pub struct AdaptiveRun {
    pub report: MetricsReport,
    pub history: Vec<AdaptiveStep>,
}

impl AdaptiveRun {
    pub fn decision(&self) -> AdaptiveDecision {
        self.history.last().map_or(AdaptiveDecision::ThresholdMet, |s| s.decision)
    }

    pub fn final_paths(&self) -> usize {
        self.report.path_count
    }

    pub fn record(&self, baseline: usize) -> AdaptivePathsRecord {
        AdaptivePathsRecord {
            initial: baseline,
            doubled: self.history.len() > 1,
            final_paths: self.final_paths(),
            reason: self.decision(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptivePathController {
    settings: AdaptiveCiSettings,
}

impl AdaptivePathController {
    pub fn new(settings: AdaptiveCiSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AdaptiveCiSettings {
        &self.settings
    }

    /// Decide the next step given the current batch's half-widths.
    ///
    /// Returns the decision and, on `Continue`, the next path count.
    pub fn decide(&self, current_paths: usize, epnl_half_width: f64, pop_half_width: f64) -> (AdaptiveDecision, Option<usize>) {
        let exceeded = !(epnl_half_width <= self.settings.epnl_ci_target)
            || !(pop_half_width <= self.settings.pop_ci_target);
        if !exceeded {
            return (AdaptiveDecision::ThresholdMet, None);
        }
        let next = current_paths.saturating_mul(2).min(self.settings.max_paths);
        if next <= current_paths {
            (AdaptiveDecision::CapReached, None)
        } else {
            (AdaptiveDecision::Continue, Some(next))
        }
    }

    /// Run `evaluate(paths, iteration)` until the thresholds are met or the cap is hit.
    pub fn run<E, F>(&self, mut evaluate: F) -> Result<AdaptiveRun, E>
    where
        F: FnMut(usize, u64) -> Result<MetricsReport, E>,
    {
        let mut paths = self.settings.baseline_paths;
        let mut history = Vec::new();
        let mut iteration = 0u64;
        loop {
            let report = evaluate(paths, iteration)?;
            let (decision, next) = self.decide(paths, report.epnl_ci_half_width, report.pop_ci_half_width);
            debug!(
                iteration,
                paths,
                epnl_half_width = report.epnl_ci_half_width,
                pop_half_width = report.pop_ci_half_width,
                ?decision,
                "adaptive step"
            );
            history.push(AdaptiveStep {
                iteration,
                paths,
                epnl_half_width: report.epnl_ci_half_width,
                pop_half_width: report.pop_ci_half_width,
                decision,
            });
            match next {
                Some(n) => {
                    paths = n;
                    iteration += 1;
                }
                None => return Ok(AdaptiveRun { report, history }),
            }
        }
    }
}

// A `Continue` always strictly increases `paths` toward `max_paths`, so the
// loop above performs at most `max_evaluations()` evaluations.

#[cfg(test)]
mod tests {
    use super::*;
    use optlab_core::domain::VarMethod;

    fn report(paths: usize, epnl_hw: f64, pop_hw: f64) -> MetricsReport {
        MetricsReport {
            expected_pnl: 0.0,
            median_pnl: 0.0,
            ci_epnl: [-epnl_hw, epnl_hw],
            epnl_ci_half_width: epnl_hw,
            pop_breakeven: 0.5,
            pop_target: None,
            pop_ci_half_width: pop_hw,
            roc: 0.0,
            max_loss: 0.0,
            var: 0.0,
            cvar: 0.0,
            var_alpha: 0.05,
            var_method: VarMethod::Historical,
            delta: 0.0,
            theta: 0.0,
            gamma: 0.0,
            vega: 0.0,
            max_drawdown: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
            bankruptcy_rate: 0.0,
            path_count: paths,
            early_exercise_events: 0,
        }
    }

    #[test]
    fn persistent_wide_intervals_double_to_cap() {
        let c = AdaptivePathController::new(AdaptiveCiSettings::default());
        let mut seen = Vec::new();
        let run = c
            .run::<(), _>(|paths, _| {
                seen.push(paths);
                Ok(report(paths, 500.0, 0.2))
            })
            .unwrap();
        assert_eq!(seen, vec![5_000, 10_000, 20_000]);
        let decisions: Vec<_> = run.history.iter().map(|s| s.decision).collect();
        assert_eq!(
            decisions,
            vec![AdaptiveDecision::Continue, AdaptiveDecision::Continue, AdaptiveDecision::CapReached]
        );
        let rec = run.record(5_000);
        assert!(rec.doubled);
        assert_eq!(rec.final_paths, 20_000);
        assert_eq!(rec.reason, AdaptiveDecision::CapReached);
    }

    #[test]
    fn tight_intervals_stop_at_baseline() {
        let c = AdaptivePathController::new(AdaptiveCiSettings::default());
        let run = c.run::<(), _>(|paths, _| Ok(report(paths, 10.0, 0.01))).unwrap();
        assert_eq!(run.history.len(), 1);
        assert_eq!(run.decision(), AdaptiveDecision::ThresholdMet);
        assert!(!run.record(5_000).doubled);
    }

    #[test]
    fn one_exceeded_target_is_enough_to_double() {
        let c = AdaptivePathController::new(AdaptiveCiSettings::default());
        assert_eq!(c.decide(5_000, 10.0, 0.05), (AdaptiveDecision::Continue, Some(10_000)));
        assert_eq!(c.decide(5_000, 150.0, 0.01), (AdaptiveDecision::Continue, Some(10_000)));
        assert_eq!(c.decide(20_000, 150.0, 0.01), (AdaptiveDecision::CapReached, None));
    }

    #[test]
    fn nan_half_width_never_counts_as_met() {
        let c = AdaptivePathController::new(AdaptiveCiSettings::default());
        assert_eq!(c.decide(5_000, f64::NAN, 0.01).0, AdaptiveDecision::Continue);
    }

    #[test]
    fn non_power_of_two_cap_is_clamped() {
        let s = AdaptiveCiSettings::new(5_000, 15_000, 100.0, 0.03).unwrap();
        assert_eq!(s.max_evaluations(), 3);
        let c = AdaptivePathController::new(s);
        assert_eq!(c.decide(10_000, 500.0, 0.5), (AdaptiveDecision::Continue, Some(15_000)));
        assert_eq!(c.decide(15_000, 500.0, 0.5), (AdaptiveDecision::CapReached, None));
    }

    #[test]
    fn evaluation_errors_propagate() {
        let c = AdaptivePathController::new(AdaptiveCiSettings::default());
        let err = c.run(|paths, _| if paths > 5_000 { Err("boom") } else { Ok(report(paths, 500.0, 0.5)) });
        assert_eq!(err.unwrap_err(), "boom");
    }

    #[test]
    fn invalid_settings_rejected() {
        assert_eq!(AdaptiveCiSettings::new(0, 10, 1.0, 0.1), Err(AdaptiveError::ZeroBaseline));
        assert_eq!(
            AdaptiveCiSettings::new(10, 5, 1.0, 0.1),
            Err(AdaptiveError::CapBelowBaseline { baseline: 10, max: 5 })
        );
        assert!(matches!(
            AdaptiveCiSettings::new(10, 20, 0.0, 0.1),
            Err(AdaptiveError::InvalidTarget { name: "epnl_ci_target", .. })
        ));
    }
}

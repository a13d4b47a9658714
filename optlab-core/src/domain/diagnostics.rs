//! Run diagnostics: stage counts, rejections, warnings, remediation hints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE_EXPIRIES: &str = "Stage 0 (expiries)";
pub const STAGE_STRIKES: &str = "Stage 1 (strikes)";
pub const STAGE_STRUCTURES: &str = "Stage 2 (structures)";
pub const STAGE_SURVIVORS: &str = "Stage 3 (survivors)";
pub const STAGE_SCORED: &str = "Stage 4 (MC scored)";

/// Maximum distinct pricer warnings retained per run.
const MAX_PRICER_WARNINGS: usize = 50;

/// Outcome of one adaptive path-count decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveDecision {
    /// Doubled, more headroom available.
    Continue,
    /// Would double but already at the cap.
    CapReached,
    /// Confidence intervals are within target.
    ThresholdMet,
}

/// Adaptive path history reported in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePathsRecord {
    pub initial: usize,
    pub doubled: bool,
    #[serde(rename = "final")]
    pub final_paths: usize,
    pub reason: AdaptiveDecision,
}

/// Funnel and scoring diagnostics.
///
/// `stage_counts` is keyed by the stage names above; their lexicographic
/// order is the stage order, so the map serializes in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub stage_counts: BTreeMap<String, usize>,
    pub rejection_breakdown: BTreeMap<String, usize>,
    pub pricer_warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_paths: Option<AdaptivePathsRecord>,
    pub hints: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage(&mut self, stage: &str, surviving: usize) {
        self.stage_counts.insert(stage.to_string(), surviving);
    }

    pub fn stage_count(&self, stage: &str) -> Option<usize> {
        self.stage_counts.get(stage).copied()
    }

    pub fn record_rejections(&mut self, filter: &str, count: usize) {
        *self.rejection_breakdown.entry(filter.to_string()).or_insert(0) += count;
    }

    /// Record a pricer warning; duplicates are kept once.
    pub fn warn_pricer(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.pricer_warnings.len() < MAX_PRICER_WARNINGS && !self.pricer_warnings.contains(&message)
        {
            self.pricer_warnings.push(message);
        }
    }

    pub fn hint(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.hints.contains(&message) {
            self.hints.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_counts_serialize_in_stage_order() {
        let mut d = Diagnostics::new();
        d.record_stage(STAGE_SCORED, 5);
        d.record_stage(STAGE_EXPIRIES, 4);
        d.record_stage(STAGE_SURVIVORS, 12);
        d.record_stage(STAGE_STRIKES, 40);
        d.record_stage(STAGE_STRUCTURES, 900);
        let keys: Vec<&String> = d.stage_counts.keys().collect();
        assert_eq!(
            keys,
            vec![STAGE_EXPIRIES, STAGE_STRIKES, STAGE_STRUCTURES, STAGE_SURVIVORS, STAGE_SCORED]
        );
    }

    #[test]
    fn warnings_are_deduplicated() {
        let mut d = Diagnostics::new();
        d.warn_pricer("bad vol");
        d.warn_pricer("bad vol");
        assert_eq!(d.pricer_warnings.len(), 1);
    }

    #[test]
    fn rejections_accumulate() {
        let mut d = Diagnostics::new();
        d.record_rejections("capital_filter", 3);
        d.record_rejections("capital_filter", 2);
        assert_eq!(d.rejection_breakdown["capital_filter"], 5);
    }

    #[test]
    fn adaptive_record_uses_final_key() {
        let rec = AdaptivePathsRecord {
            initial: 5000,
            doubled: true,
            final_paths: 20000,
            reason: AdaptiveDecision::CapReached,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["final"], 20000);
        assert_eq!(json["reason"], "cap_reached");
    }
}

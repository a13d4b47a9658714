//! Stage 0: expiry selection by DTE window.

use chrono::NaiveDate;

use crate::config::FunnelConfig;

/// Expiries with calendar DTE inside `[dte_min, dte_max]`, earliest first,
/// at most `max_expiries`. Empty when nothing qualifies.
pub fn select_expiries(available: &[NaiveDate], as_of: NaiveDate, config: &FunnelConfig) -> Vec<NaiveDate> {
    let mut eligible: Vec<NaiveDate> = available
        .iter()
        .copied()
        .filter(|e| {
            let dte = (*e - as_of).num_days();
            dte >= config.dte_min && dte <= config.dte_max
        })
        .collect();
    eligible.sort();
    eligible.dedup();
    eligible.truncate(config.max_expiries);
    eligible
}

//! Memory footprint estimate and storage policy for path simulation.
//!
//! Checked before Stage 4 so an oversized request aborts before any path is drawn.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Price matrix, return matrix and PnL scratch.
const BUFFERS: f64 = 3.0;
const BYTES_PER_VALUE: f64 = 8.0;
const IN_MEMORY_FRACTION: f64 = 0.25;
const CHUNKED_FRACTION: f64 = 0.80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePolicy {
    InMemory,
    /// Generate and reduce paths in blocks of `block_paths`.
    Chunked { block_paths: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum ResourceLimitError {
    #[error(
        "simulation needs ~{estimate_gb:.2} GB for {n_paths} paths x {n_steps} steps, \
         over the {budget_gb:.2} GB budget; reduce mc.max_paths or the horizon"
    )]
    OverBudget {
        estimate_gb: f64,
        budget_gb: f64,
        n_paths: usize,
        n_steps: usize,
    },
    #[error("memory budget must be positive, got {0}")]
    InvalidBudget(f64),
}

pub fn estimate_footprint_gb(n_paths: usize, n_steps: usize) -> f64 {
    BYTES_PER_VALUE * n_paths as f64 * n_steps as f64 * BUFFERS / 1024f64.powi(3)
}

pub fn select_storage_policy(
    n_paths: usize,
    n_steps: usize,
    budget_gb: f64,
) -> Result<StoragePolicy, ResourceLimitError> {
    if !(budget_gb.is_finite() && budget_gb > 0.0) {
        return Err(ResourceLimitError::InvalidBudget(budget_gb));
    }
    let estimate_gb = estimate_footprint_gb(n_paths, n_steps);
    if estimate_gb <= IN_MEMORY_FRACTION * budget_gb {
        return Ok(StoragePolicy::InMemory);
    }
    if estimate_gb <= CHUNKED_FRACTION * budget_gb {
        // Size blocks so one block fits the in-memory share.
        let per_path_gb = estimate_footprint_gb(1, n_steps.max(1));
        let block_paths = ((IN_MEMORY_FRACTION * budget_gb / per_path_gb) as usize).clamp(1, n_paths.max(1));
        return Ok(StoragePolicy::Chunked { block_paths });
    }
    Err(ResourceLimitError::OverBudget {
        estimate_gb,
        budget_gb,
        n_paths,
        n_steps,
    })
}

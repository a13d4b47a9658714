//! Deterministic RNG hierarchy.
//!
//! A master seed generates deterministic sub-seeds for each `(run_id, task, iteration)`
//! tuple. Sub-seeds are derived via BLAKE3 hashing, independently of thread scheduling
//! order, so scoring results are identical regardless of worker count.

use crate::domain::RunId;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Deterministic RNG hierarchy.
///
/// The master seed is expanded into per-(task, iteration) sub-seeds. A task is
/// any stable string key: a structure key for Stage 4 scoring, a symbol for
/// screening, a chunk label for chunked path generation.
#[derive(Debug, Clone)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    /// Derive a deterministic sub-seed for a specific (run_id, task, iteration).
    ///
    /// Calling `sub_seed(run, "a", 0)` then `sub_seed(run, "b", 0)` produces the
    /// same results as calling them in reverse order.
    pub fn sub_seed(&self, run_id: &RunId, task: &str, iteration: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(run_id.as_bytes());
        hasher.update(&(task.len() as u64).to_le_bytes());
        hasher.update(task.as_bytes());
        hasher.update(&iteration.to_le_bytes());
        seed_from_hash(hasher.finalize())
    }
}

/// Derive a child seed from a parent seed and a block index.
///
/// Used when one logical draw is split into blocks; the parent seed alone
/// determines every block.
pub fn derive_block_seed(parent: u64, block: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&parent.to_le_bytes());
    hasher.update(b"block");
    hasher.update(&block.to_le_bytes());
    seed_from_hash(hasher.finalize())
}

/// Build an RNG from an optional seed. `None` is an explicit request for
/// OS entropy and never touches any seeded sibling.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

fn seed_from_hash(hash: blake3::Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

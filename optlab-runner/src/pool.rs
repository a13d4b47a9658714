//! Bounded worker pool for independent scoring and screening tasks.
//!
//! Tasks share nothing mutable; each returns its own `Result`, so one
//! failure never aborts its siblings. With a single worker the tasks run
//! inline on the calling thread.

use rayon::prelude::*;
use thiserror::Error;

/// Upper bound on workers regardless of configuration or core count.
pub const HARD_WORKER_CAP: usize = 6;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// `min(configured, available cores, HARD_WORKER_CAP)`, at least 1.
pub fn clamp_workers(configured: usize, available: usize) -> usize {
    configured.min(available).min(HARD_WORKER_CAP).max(1)
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

pub struct WorkerPool {
    workers: usize,
    thread_pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(configured: usize) -> Result<Self, PoolError> {
        Self::with_available(configured, available_cores())
    }

    /// Pool sized against an explicit core count.
    pub fn with_available(configured: usize, available: usize) -> Result<Self, PoolError> {
        let workers = clamp_workers(configured, available);
        let thread_pool = if workers > 1 {
            Some(rayon::ThreadPoolBuilder::new().num_threads(workers).build()?)
        } else {
            None
        };
        Ok(Self { workers, thread_pool })
    }

    pub fn sequential() -> Self {
        Self {
            workers: 1,
            thread_pool: None,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` over every item. Results come back in input order.
    pub fn run_isolated<T, R, E, F>(&self, items: &[T], task: F) -> Vec<Result<R, E>>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&T) -> Result<R, E> + Sync,
    {
        match &self.thread_pool {
            Some(tp) => tp.install(|| items.par_iter().map(&task).collect()),
            None => items.iter().map(&task).collect(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers).finish()
    }
}

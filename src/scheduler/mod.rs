//! Work-stealing scheduler
//!
//! Turns one (range, body) pair into leaf invocations spread over every
//! worker context, without a central work queue. The root task goes to the
//! calling worker's own deque (nested calls) or to the pool injector
//! (external callers, who then block on the invocation latch).

pub(crate) mod join;
pub(crate) mod task;
pub mod work_stealer;

pub use work_stealer::StealStats;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::pool::manifest::Manifest;
use crate::pool::WorkerPool;
use crate::range::Range;
use task::{Invocation, JobRef, Task, Work};

/// Scheduler statistics, accumulated over the pool's lifetime.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Algorithm calls started.
    pub invocations: AtomicUsize,
    /// Tasks taken off a deque and executed.
    pub tasks_executed: AtomicUsize,
    /// Ranges split in two.
    pub splits: AtomicUsize,
    /// Leaf body invocations attempted.
    pub leaves: AtomicUsize,
    /// Tasks skipped because their invocation had already failed.
    pub tasks_skipped: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_leaf(&self) {
        self.leaves.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.tasks_skipped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the pool's scheduler and steal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub invocations: usize,
    pub tasks_executed: usize,
    pub splits: usize,
    pub leaves: usize,
    pub tasks_skipped: usize,
    pub steal_successes: usize,
    pub steal_failures: usize,
    pub victims_probed: usize,
}

impl StatsSnapshot {
    pub(crate) fn capture(
        scheduler: &SchedulerStats,
        steals: &StealStats,
    ) -> Self {
        Self {
            invocations: scheduler.invocations.load(Ordering::Relaxed),
            tasks_executed: scheduler.tasks_executed.load(Ordering::Relaxed),
            splits: scheduler.splits.load(Ordering::Relaxed),
            leaves: scheduler.leaves.load(Ordering::Relaxed),
            tasks_skipped: scheduler.tasks_skipped.load(Ordering::Relaxed),
            steal_successes: steals.steal_successes.load(Ordering::Relaxed),
            steal_failures: steals.steal_failures.load(Ordering::Relaxed),
            victims_probed: steals.victims_probed.load(Ordering::Relaxed),
        }
    }
}

/// Run a task tree over `range` on `pool` and wait for it to join.
pub(crate) fn run<W: Work>(
    pool: &WorkerPool,
    manifest: Arc<Manifest>,
    range: Range,
    work: W,
) -> Result<W::Output> {
    let invocation = Arc::new(Invocation::new(work, manifest, pool.size()));
    pool.scheduler_stats().record_invocation();
    debug!(%range, workers = pool.size(), "invocation started");

    let mut root: Option<JobRef> = Some(Box::new(Task::root(range, Arc::clone(&invocation))));
    let nested = pool.with_local_worker(|worker| {
        if let Some(job) = root.take() {
            worker.push(job);
        }
        worker.wait_until(invocation.latch());
    });
    if nested.is_none() {
        if let Some(job) = root.take() {
            pool.inject(job);
        }
        invocation.latch().wait();
    }

    let result = invocation.finish(range);
    debug!(%range, ok = result.is_ok(), "invocation finished");
    result
}

#[cfg(test)]
mod tests;

//! Work stealing for load balancing across worker contexts.
//!
//! An idle worker probes randomly chosen victims and takes the oldest task
//! from the FIFO end of their deques, the end the owner does not touch. When
//! the random probes all come back empty a round-robin sweep over every other
//! worker follows, so a queued task is never missed by an idle thief.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::deque::{Steal, Stealer};
use rand::Rng;
use tracing::trace;

use super::task::JobRef;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of steal rounds that found nothing.
    pub steal_failures: AtomicUsize,
    /// Total number of victims probed.
    pub victims_probed: AtomicUsize,
}

impl StealStats {
    /// Record a successful steal.
    #[inline]
    pub fn record_success(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed steal round.
    #[inline]
    pub fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_probe(&self) {
        self.victims_probed.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of steal rounds that returned a task.
    pub fn success_rate(&self) -> f64 {
        let successes = self.steal_successes.load(Ordering::Relaxed);
        let total = successes + self.steal_failures.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        successes as f64 / total as f64
    }
}

/// Steal one task for worker `thief` from the other workers' deques.
pub(crate) fn steal_task(
    thief: usize,
    stealers: &[Stealer<JobRef>],
    max_attempts: usize,
    stats: &StealStats,
) -> Option<JobRef> {
    let num_workers = stealers.len();
    if num_workers <= 1 {
        return None;
    }

    let mut rng = rand::rng();
    for _ in 0..max_attempts.min(num_workers * 2) {
        let victim = rng.random_range(0..num_workers);
        if victim == thief {
            continue;
        }
        if let Some(task) = steal_from(&stealers[victim], stats) {
            stats.record_success();
            return Some(task);
        }
    }

    for offset in 1..num_workers {
        let victim = (thief + offset) % num_workers;
        if let Some(task) = steal_from(&stealers[victim], stats) {
            stats.record_success();
            return Some(task);
        }
    }

    stats.record_failure();
    trace!(thief, "steal round found nothing");
    None
}

/// Steal from a specific victim, retrying while the deque reports contention.
fn steal_from(
    victim: &Stealer<JobRef>,
    stats: &StealStats,
) -> Option<JobRef> {
    stats.record_probe();
    loop {
        match victim.steal() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

//! Worker threads
//!
//! Each pool thread owns one [`WorkerThread`]: its deque (LIFO for the owner,
//! FIFO for thieves), its [`WorkerContext`], and the set of manifests it has
//! already replayed. The thread-local slot lets nested algorithm calls made
//! from inside a body find the worker they are running on.

use std::cell::{OnceCell, RefCell};
use std::collections::HashSet;
use std::sync::Arc;

use crossbeam::channel::Sender;
use crossbeam::deque::{Steal, Worker};
use crossbeam::utils::Backoff;
use tracing::trace;

use super::context::{ContextId, WorkerContext};
use super::manifest::Manifest;
use super::Registry;
use crate::error::{Error, Result};
use crate::scheduler::join::Latch;
use crate::scheduler::task::JobRef;
use crate::scheduler::work_stealer::steal_task;
use crate::scheduler::SchedulerStats;

thread_local! {
    static WORKER: OnceCell<WorkerThread> = OnceCell::new();
}

/// Bootstrap report sent by each worker to the thread building the pool.
pub(crate) struct Acknowledgement {
    pub(crate) index: usize,
    pub(crate) result: Result<ContextId>,
}

pub(crate) struct WorkerThread {
    index: usize,
    deque: Worker<JobRef>,
    registry: Arc<Registry>,
    context: RefCell<WorkerContext>,
    applied: RefCell<HashSet<u64>>,
}

impl WorkerThread {
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(crate) fn scheduler_stats(&self) -> &SchedulerStats {
        &self.registry.scheduler_stats
    }

    #[inline]
    pub(crate) fn belongs_to(
        &self,
        registry: &Arc<Registry>,
    ) -> bool {
        Arc::ptr_eq(&self.registry, registry)
    }

    /// Push onto the owner's end of the local deque.
    pub(crate) fn push(
        &self,
        job: JobRef,
    ) {
        self.deque.push(job);
        self.registry.sleep.wake_one();
    }

    /// Replay `manifest` on this context unless it already was.
    pub(crate) fn ensure_manifest(
        &self,
        manifest: &Manifest,
    ) -> Result<()> {
        if self.applied.borrow().contains(&manifest.id()) {
            return Ok(());
        }
        {
            let mut context = self.context.try_borrow_mut().map_err(|_| {
                Error::bootstrap(
                    format!("worker {}", self.index),
                    "worker context is borrowed by the running body",
                )
            })?;
            context.bootstrap(manifest)?;
        }
        self.applied.borrow_mut().insert(manifest.id());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn replayed_manifests(&self) -> usize {
        self.applied.borrow().len()
    }

    /// Own deque first, then the injector, then other workers.
    fn find_work(&self) -> Option<JobRef> {
        self.deque
            .pop()
            .or_else(|| self.take_injected())
            .or_else(|| {
                steal_task(
                    self.index,
                    &self.registry.stealers,
                    self.registry.steal_attempts,
                    &self.registry.steal_stats,
                )
            })
    }

    fn take_injected(&self) -> Option<JobRef> {
        loop {
            match self.registry.injector.steal_batch_and_pop(&self.deque) {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Keep executing work until `latch` is set. Used by nested calls, so the
    /// waiting worker never idles while its subtree is still pending.
    pub(crate) fn wait_until(
        &self,
        latch: &Latch,
    ) {
        let backoff = Backoff::new();
        while !latch.is_set() {
            match self.find_work() {
                Some(job) => {
                    job.execute(self);
                    backoff.reset();
                }
                None => backoff.snooze(),
            }
        }
    }

    fn main_loop(&self) {
        let backoff = Backoff::new();
        while !self.registry.is_terminated() {
            let epoch = self.registry.sleep.epoch();
            if let Some(job) = self.find_work() {
                job.execute(self);
                backoff.reset();
                continue;
            }
            if backoff.is_completed() {
                self.registry.sleep.park(epoch, self.registry.idle_timeout);
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        trace!(worker = self.index, "worker exiting");
    }
}

/// Entry point of a pool thread.
pub(crate) fn worker_main(
    index: usize,
    deque: Worker<JobRef>,
    registry: Arc<Registry>,
    manifest: Arc<Manifest>,
    ack: Sender<Acknowledgement>,
) {
    let mut context = WorkerContext::new(index);
    if let Err(err) = context.bootstrap(&manifest) {
        let _ = ack.send(Acknowledgement {
            index,
            result: Err(err),
        });
        return;
    }

    let id = context.id();
    let thread = WorkerThread {
        index,
        deque,
        registry,
        context: RefCell::new(context),
        applied: RefCell::new(HashSet::from([manifest.id()])),
    };
    let _ = ack.send(Acknowledgement {
        index,
        result: Ok(id),
    });
    drop(ack);

    WORKER.with(move |slot| {
        let worker = slot.get_or_init(move || thread);
        worker.main_loop();
    });
}

/// Run `f` with the pool worker hosting the calling thread, if any.
pub(crate) fn with_current<R>(f: impl FnOnce(&WorkerThread) -> R) -> Option<R> {
    WORKER
        .try_with(|slot| slot.get().map(f))
        .ok()
        .flatten()
}

/// Run `f` with the [`WorkerContext`] of the calling pool thread.
///
/// Returns `None` off the pool, or when the context is already borrowed
/// further up the stack (for example by a capability loader).
pub fn with_worker_context<R>(f: impl FnOnce(&mut WorkerContext) -> R) -> Option<R> {
    with_current(|worker| {
        let mut context = worker.context.try_borrow_mut().ok()?;
        Some(f(&mut context))
    })
    .flatten()
}

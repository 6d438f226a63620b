//! Worker pool
//!
//! One process-wide pool of worker threads, created by the first
//! [`Context`](crate::Context) and reused by every later one. Each worker
//! hosts a [`WorkerContext`] bootstrapped from the creating manifest before
//! the pool is handed out; later manifests are replayed lazily, the first
//! time one of their leaves lands on a worker.

pub mod context;
pub mod manifest;
pub(crate) mod worker;

pub use context::{current_context_id, ContextId, WorkerContext};
pub use manifest::{register_capability, CapabilityRegistry, Loader, Manifest, CAPABILITIES};
pub use worker::with_worker_context;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel;
use crossbeam::deque::{Injector, Stealer, Worker};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::ContextConfig;
use crate::error::{Error, Result};
use crate::scheduler::task::JobRef;
use crate::scheduler::{SchedulerStats, StatsSnapshot, StealStats};
use worker::{Acknowledgement, WorkerThread};

static POOL: OnceCell<WorkerPool> = OnceCell::new();

/// Worker threads spawned by this process, across all pools.
static SPAWNED_WORKERS: AtomicUsize = AtomicUsize::new(0);

/// Number of worker threads this process has spawned so far.
pub fn spawned_workers() -> usize {
    SPAWNED_WORKERS.load(Ordering::Relaxed)
}

/// Idle workers park here between steal rounds.
///
/// A worker reads `epoch` before its last search for work and parks only if
/// no job was published since. Sleepers register before re-checking the
/// epoch and wakers bump the epoch before checking for sleepers, so one of
/// the two always sees the other.
#[derive(Debug, Default)]
struct Sleep {
    lock: Mutex<()>,
    condvar: Condvar,
    sleepers: AtomicUsize,
    epoch: AtomicUsize,
}

impl Sleep {
    #[inline]
    fn epoch(&self) -> usize {
        self.epoch.load(Ordering::SeqCst)
    }

    fn park(
        &self,
        epoch: usize,
        timeout: Duration,
    ) {
        let mut guard = self.lock.lock();
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.condvar.wait_for(&mut guard, timeout);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake_one(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        // Sleepers hold `lock` from registration until they wait.
        let _guard = self.lock.lock();
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

/// State shared by every worker of one pool.
pub(crate) struct Registry {
    stealers: Vec<Stealer<JobRef>>,
    injector: Injector<JobRef>,
    sleep: Sleep,
    terminated: AtomicBool,
    idle_timeout: Duration,
    steal_attempts: usize,
    scheduler_stats: SchedulerStats,
    steal_stats: StealStats,
}

impl Registry {
    #[inline]
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.sleep.wake_all();
    }
}

/// Fixed-size set of worker threads, one [`WorkerContext`] each.
pub struct WorkerPool {
    registry: Arc<Registry>,
    contexts: Vec<ContextId>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("contexts", &self.contexts)
            .finish()
    }
}

impl WorkerPool {
    /// The process-wide pool, built from `config` and `manifest` on first use.
    ///
    /// A failed build leaves the slot empty, so a later call may retry.
    pub(crate) fn global(
        config: &ContextConfig,
        manifest: &Arc<Manifest>,
    ) -> Result<&'static WorkerPool> {
        POOL.get_or_try_init(|| Self::build(config, Arc::clone(manifest)))
    }

    /// Spawn `config.worker_count()` workers and wait until every one of
    /// them has bootstrapped `manifest`.
    pub(crate) fn build(
        config: &ContextConfig,
        manifest: Arc<Manifest>,
    ) -> Result<Self> {
        let size = config.worker_count();
        let deques: Vec<Worker<JobRef>> = (0..size).map(|_| Worker::new_lifo()).collect();
        let registry = Arc::new(Registry {
            stealers: deques.iter().map(Worker::stealer).collect(),
            injector: Injector::new(),
            sleep: Sleep::default(),
            terminated: AtomicBool::new(false),
            idle_timeout: config.idle_timeout(),
            steal_attempts: config.steal_attempts.max(1),
            scheduler_stats: SchedulerStats::default(),
            steal_stats: StealStats::default(),
        });

        let (ack_tx, ack_rx) = channel::unbounded::<Acknowledgement>();
        let mut threads = Vec::with_capacity(size);
        for (index, deque) in deques.into_iter().enumerate() {
            let registry_ref = Arc::clone(&registry);
            let manifest = Arc::clone(&manifest);
            let ack = ack_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("isotask-worker-{}", index))
                .stack_size(config.stack_size)
                .spawn(move || worker::worker_main(index, deque, registry_ref, manifest, ack));
            match spawned {
                Ok(handle) => {
                    SPAWNED_WORKERS.fetch_add(1, Ordering::Relaxed);
                    threads.push(handle);
                }
                Err(err) => {
                    Self::abort(&registry, threads);
                    return Err(Error::bootstrap(
                        format!("worker {}", index),
                        format!("cannot spawn thread: {}", err),
                    ));
                }
            }
        }
        drop(ack_tx);

        let mut contexts = vec![ContextId::NEUTRAL; size];
        let mut failure: Option<Error> = None;
        for _ in 0..size {
            match ack_rx.recv() {
                Ok(Acknowledgement {
                    index,
                    result: Ok(id),
                }) => contexts[index] = id,
                Ok(Acknowledgement {
                    index,
                    result: Err(err),
                }) => {
                    warn!(worker = index, error = %err, "worker bootstrap failed");
                    failure.get_or_insert(err);
                }
                Err(_) => {
                    failure.get_or_insert_with(|| {
                        Error::bootstrap("pool", "worker exited before acknowledging bootstrap")
                    });
                    break;
                }
            }
        }
        if let Some(err) = failure {
            Self::abort(&registry, threads);
            return Err(err);
        }

        info!(workers = size, manifest = manifest.id(), "worker pool ready");
        Ok(Self {
            registry,
            contexts,
            threads: Mutex::new(threads),
        })
    }

    fn abort(
        registry: &Registry,
        threads: Vec<JoinHandle<()>>,
    ) {
        registry.terminate();
        for handle in threads {
            let _ = handle.join();
        }
    }

    /// Number of worker contexts.
    #[inline]
    pub fn size(&self) -> usize {
        self.contexts.len()
    }

    /// Context ids of the workers, by worker index.
    pub fn context_ids(&self) -> &[ContextId] {
        &self.contexts
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::capture(&self.registry.scheduler_stats, &self.registry.steal_stats)
    }

    #[inline]
    pub(crate) fn scheduler_stats(&self) -> &SchedulerStats {
        &self.registry.scheduler_stats
    }

    /// Hand a job to the pool from a thread outside it.
    pub(crate) fn inject(
        &self,
        job: JobRef,
    ) {
        self.registry.injector.push(job);
        self.registry.sleep.wake_all();
    }

    /// Run `f` on the calling worker if it belongs to this pool.
    pub(crate) fn with_local_worker<R>(
        &self,
        f: impl FnOnce(&WorkerThread) -> R,
    ) -> Option<R> {
        worker::with_current(|worker| {
            if worker.belongs_to(&self.registry) {
                Some(f(worker))
            } else {
                None
            }
        })
        .flatten()
    }

    /// Stop and join every worker. Queued work is abandoned.
    pub(crate) fn shutdown(&self) {
        self.registry.terminate();
        let threads = std::mem::take(&mut *self.threads.lock());
        debug!(workers = threads.len(), "worker pool shutting down");
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Task definitions for the scheduler.
//!
//! A [`Task`] owns one range of a task tree and a link to the join node it
//! reports to. All tasks of one `parallel_for` / `parallel_reduce` call share
//! an [`Invocation`], which holds the body, the per-worker localized copies
//! of its state, the first recorded error, and the completion latch.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::join::{JoinLink, JoinNode, Latch, Side};
use crate::error::Error;
use crate::pool::manifest::Manifest;
use crate::pool::worker::WorkerThread;
use crate::range::Range;

/// Type-erased unit of work held in the deques.
pub(crate) trait Job: Send {
    fn execute(
        self: Box<Self>,
        worker: &WorkerThread,
    );
}

pub(crate) type JobRef = Box<dyn Job>;

/// What a task tree computes: a leaf function and a pairwise merge.
///
/// `parallel_for` bodies produce `()`; reduce bodies produce their partials.
pub(crate) trait Work: Send + Sync + 'static {
    /// Per-worker copy of the body's bound state.
    type Local: Send + 'static;
    type Output: Send + 'static;

    fn localize(&self) -> Self::Local;

    fn leaf(
        &self,
        local: &mut Self::Local,
        range: Range,
    ) -> anyhow::Result<Self::Output>;

    fn join(
        &self,
        left: Self::Output,
        right: Option<Self::Output>,
    ) -> anyhow::Result<Self::Output>;
}

/// State shared by every task of one algorithm call.
pub(crate) struct Invocation<W: Work> {
    work: W,
    manifest: Arc<Manifest>,
    /// Indexed by worker; created on the worker's first leaf.
    locals: Vec<Mutex<Option<W::Local>>>,
    failed: AtomicBool,
    error: Mutex<Option<Error>>,
    outcome: Mutex<Option<W::Output>>,
    latch: Latch,
}

impl<W: Work> Invocation<W> {
    pub(crate) fn new(
        work: W,
        manifest: Arc<Manifest>,
        workers: usize,
    ) -> Self {
        Self {
            work,
            manifest,
            locals: (0..workers).map(|_| Mutex::new(None)).collect(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            outcome: Mutex::new(None),
            latch: Latch::new(),
        }
    }

    #[inline]
    pub(crate) fn latch(&self) -> &Latch {
        &self.latch
    }

    #[inline]
    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Record a failure; the first error wins, later ones are logged.
    fn fail(
        &self,
        err: Error,
    ) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            warn!(error = %err, "task tree failed");
            *slot = Some(err);
        } else {
            trace!(error = %err, "additional task failure ignored");
        }
        self.failed.store(true, Ordering::Release);
    }

    /// Run the body on a leaf with this worker's localized state.
    fn run_leaf(
        &self,
        worker: &WorkerThread,
        range: Range,
    ) -> Option<W::Output> {
        if let Err(err) = worker.ensure_manifest(&self.manifest) {
            self.fail(err);
            return None;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            // A nested call on this worker may re-enter while the slot is held;
            // that leaf gets a fresh local.
            match self.locals.get(worker.index()).and_then(|slot| slot.try_lock()) {
                Some(mut slot) => {
                    let local = slot.get_or_insert_with(|| self.work.localize());
                    self.work.leaf(local, range)
                }
                None => {
                    let mut local = self.work.localize();
                    self.work.leaf(&mut local, range)
                }
            }
        }));

        match flatten(outcome) {
            Ok(output) => Some(output),
            Err(source) => {
                self.fail(Error::BodyInvocation { range, source });
                None
            }
        }
    }

    /// Merge two sibling partials covering `range`.
    fn join(
        &self,
        range: Range,
        left: W::Output,
        right: Option<W::Output>,
    ) -> Option<W::Output> {
        if self.is_failed() {
            return None;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.work.join(left, right)));
        match flatten(outcome) {
            Ok(output) => Some(output),
            Err(source) => {
                self.fail(Error::BodyInvocation { range, source });
                None
            }
        }
    }

    /// Report a finished subtree, merging upward while this task completes nodes.
    fn deliver(
        &self,
        mut partial: Option<W::Output>,
        mut link: Option<JoinLink<W::Output>>,
    ) {
        while let Some(JoinLink { node, side }) = link {
            let Some((left, right)) = node.arrive(side, partial) else {
                return;
            };
            partial = match (left, right) {
                (Some(left), Some(right)) => self.join(node.range(), left, Some(right)),
                _ => None,
            };
            link = node.parent();
        }
        *self.outcome.lock() = partial;
        self.latch.set();
    }

    /// Final result once the latch is set.
    pub(crate) fn finish(
        &self,
        range: Range,
    ) -> crate::Result<W::Output> {
        if let Some(err) = self.error.lock().take() {
            return Err(err);
        }
        self.outcome.lock().take().ok_or_else(|| Error::BodyInvocation {
            range,
            source: anyhow::anyhow!("task tree completed without a result"),
        })
    }
}

/// A range of a task tree plus the join node it reports to.
pub(crate) struct Task<W: Work> {
    range: Range,
    invocation: Arc<Invocation<W>>,
    parent: Option<JoinLink<W::Output>>,
}

impl<W: Work> Task<W> {
    /// The root task of an invocation.
    pub(crate) fn root(
        range: Range,
        invocation: Arc<Invocation<W>>,
    ) -> Self {
        Self {
            range,
            invocation,
            parent: None,
        }
    }
}

impl<W: Work> Job for Task<W> {
    fn execute(
        self: Box<Self>,
        worker: &WorkerThread,
    ) {
        let Task {
            mut range,
            invocation,
            mut parent,
        } = *self;
        let stats = worker.scheduler_stats();
        stats.record_executed();

        // Depth-first: keep the left half, expose the right half to thieves.
        loop {
            if invocation.is_failed() {
                stats.record_skipped();
                invocation.deliver(None, parent);
                return;
            }
            if !range.is_divisible() {
                break;
            }
            let (left, right) = match range.split() {
                Ok(halves) => halves,
                Err(err) => {
                    invocation.fail(err);
                    invocation.deliver(None, parent);
                    return;
                }
            };
            stats.record_split();
            let node = Arc::new(JoinNode::new(range, parent.take()));
            worker.push(Box::new(Task {
                range: right,
                invocation: Arc::clone(&invocation),
                parent: Some(JoinLink::new(Arc::clone(&node), Side::Right)),
            }));
            range = left;
            parent = Some(JoinLink::new(node, Side::Left));
        }

        stats.record_leaf();
        let mut partial = invocation.run_leaf(worker, range);
        if parent.is_none() {
            // Single-leaf tree: the joiner sees the lone partial once.
            partial = partial.and_then(|output| invocation.join(range, output, None));
        }
        invocation.deliver(partial, parent);
    }
}

fn flatten<T>(outcome: std::thread::Result<anyhow::Result<T>>) -> anyhow::Result<T> {
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

//! Join nodes and completion latches
//!
//! Every split creates a [`JoinNode`] with a completion counter of two. Each
//! child reports exactly once (with its partial result, or `None` when it was
//! skipped or failed); the child that brings the counter to zero merges both
//! partials and reports to the node's own parent. The root's report sets the
//! invocation's [`Latch`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::range::Range;

/// Which half of a split a child covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// Interior node of a task tree.
#[derive(Debug)]
pub(crate) struct JoinNode<R> {
    /// Range before the split.
    range: Range,
    pending: AtomicUsize,
    partials: Mutex<[Option<R>; 2]>,
    parent: Option<JoinLink<R>>,
}

impl<R> JoinNode<R> {
    pub(crate) fn new(
        range: Range,
        parent: Option<JoinLink<R>>,
    ) -> Self {
        Self {
            range,
            pending: AtomicUsize::new(2),
            partials: Mutex::new([None, None]),
            parent,
        }
    }

    #[inline]
    pub(crate) fn range(&self) -> Range {
        self.range
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<JoinLink<R>> {
        self.parent.clone()
    }

    /// Record one child's partial. Returns both partials (left, right) to the
    /// child that completes the node, `None` to the first arrival.
    pub(crate) fn arrive(
        &self,
        side: Side,
        partial: Option<R>,
    ) -> Option<(Option<R>, Option<R>)> {
        {
            let mut partials = self.partials.lock();
            partials[side as usize] = partial;
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }
        let mut partials = self.partials.lock();
        let right = partials[Side::Right as usize].take();
        let left = partials[Side::Left as usize].take();
        Some((left, right))
    }
}

/// Edge from a task to the join node it reports to.
#[derive(Debug)]
pub(crate) struct JoinLink<R> {
    pub(crate) node: Arc<JoinNode<R>>,
    pub(crate) side: Side,
}

impl<R> JoinLink<R> {
    pub(crate) fn new(
        node: Arc<JoinNode<R>>,
        side: Side,
    ) -> Self {
        Self { node, side }
    }
}

impl<R> Clone for JoinLink<R> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            side: self.side,
        }
    }
}

/// One-shot completion signal the root caller blocks on.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    set: AtomicBool,
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check, used by workers that keep working while they wait.
    #[inline]
    pub(crate) fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self) {
        let mut done = self.mutex.lock();
        *done = true;
        self.set.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Block until [`set`](Self::set) has been called.
    pub(crate) fn wait(&self) {
        let mut done = self.mutex.lock();
        while !*done {
            self.condvar.wait(&mut done);
        }
    }
}

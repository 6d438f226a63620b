//! Bodies: what runs on each leaf range
//!
//! A body is one master value supplied by the caller. Each worker that runs
//! part of a task tree gets its own localized copy of the body's state the
//! first time it executes a leaf of that call; the copy is dropped when the
//! call finishes and is never visible to the caller or to other workers.
//!
//! Bodies are cheap handles: the constructors below wrap the caller's
//! container, callables, and objects in `Arc`s, so cloning a body into a
//! task tree never copies the data it is bound to.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::container::{ConcurrentArray, ConcurrentHash};
use crate::range::Range;
use crate::scheduler::task::Work;

/// A `parallel_for` body.
pub trait Body: Clone + Send + Sync + 'static {
    /// Per-worker copy of the bound state.
    type Local: Send + 'static;

    /// Produce a fresh per-worker copy of the bound state.
    fn localize(&self) -> Self::Local;

    /// Run one leaf.
    fn invoke(
        &self,
        local: &mut Self::Local,
        range: Range,
    ) -> anyhow::Result<()>;
}

/// A `parallel_reduce` body.
///
/// `join` must be associative. The left operand always covers the lower
/// indices, so it need not be commutative. A tree with a single leaf calls
/// `join(partial, None)` exactly once, which must act as identity.
pub trait ReduceBody: Clone + Send + Sync + 'static {
    type Output: Send + 'static;

    fn map(
        &self,
        range: Range,
    ) -> anyhow::Result<Self::Output>;

    fn join(
        &self,
        left: Self::Output,
        right: Option<Self::Output>,
    ) -> anyhow::Result<Self::Output>;

    /// Called before the task tree starts.
    fn reset(&self) {}

    /// Called with the final value of a successful reduction.
    fn finish(
        &self,
        _output: &Self::Output,
    ) {
    }
}

pub(crate) struct ForWork<B>(pub(crate) B);

impl<B: Body> Work for ForWork<B> {
    type Local = B::Local;
    type Output = ();

    fn localize(&self) -> Self::Local {
        self.0.localize()
    }

    fn leaf(
        &self,
        local: &mut Self::Local,
        range: Range,
    ) -> anyhow::Result<()> {
        self.0.invoke(local, range)
    }

    fn join(
        &self,
        _left: (),
        _right: Option<()>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct ReduceWork<B>(pub(crate) B);

impl<B: ReduceBody> Work for ReduceWork<B> {
    type Local = ();
    type Output = B::Output;

    fn localize(&self) {}

    fn leaf(
        &self,
        _local: &mut (),
        range: Range,
    ) -> anyhow::Result<B::Output> {
        self.0.map(range)
    }

    fn join(
        &self,
        left: B::Output,
        right: Option<B::Output>,
    ) -> anyhow::Result<B::Output> {
        self.0.join(left, right)
    }
}

/// Body calling `func(range, &container)` on every leaf.
pub struct ContainerFunc<C, F> {
    container: Arc<C>,
    func: Arc<F>,
}

impl<C, F> Clone for ContainerFunc<C, F> {
    fn clone(&self) -> Self {
        Self {
            container: Arc::clone(&self.container),
            func: Arc::clone(&self.func),
        }
    }
}

impl<C: fmt::Debug, F> fmt::Debug for ContainerFunc<C, F> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContainerFunc")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl<C, F> ContainerFunc<C, F> {
    pub fn container(&self) -> &Arc<C> {
        &self.container
    }
}

impl<C, F> Body for ContainerFunc<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(Range, &C) -> anyhow::Result<()> + Send + Sync + 'static,
{
    type Local = ();

    fn localize(&self) {}

    fn invoke(
        &self,
        _local: &mut (),
        range: Range,
    ) -> anyhow::Result<()> {
        (self.func)(range, &self.container)
    }
}

/// Body over a [`ConcurrentArray`].
pub fn for_int_array_func<F>(
    container: Arc<ConcurrentArray>,
    func: F,
) -> ContainerFunc<ConcurrentArray, F>
where
    F: Fn(Range, &ConcurrentArray) -> anyhow::Result<()> + Send + Sync + 'static,
{
    ContainerFunc {
        container,
        func: Arc::new(func),
    }
}

/// Body over a [`ConcurrentHash`].
pub fn for_int_hash_func<F>(
    container: Arc<ConcurrentHash>,
    func: F,
) -> ContainerFunc<ConcurrentHash, F>
where
    F: Fn(Range, &ConcurrentHash) -> anyhow::Result<()> + Send + Sync + 'static,
{
    ContainerFunc {
        container,
        func: Arc::new(func),
    }
}

/// Body calling `method(&mut copy, range)` on a per-worker copy of `object`.
///
/// The caller's object is never mutated.
pub struct BoundMethod<T, M> {
    object: Arc<T>,
    method: Arc<M>,
}

impl<T, M> Clone for BoundMethod<T, M> {
    fn clone(&self) -> Self {
        Self {
            object: Arc::clone(&self.object),
            method: Arc::clone(&self.method),
        }
    }
}

impl<T: fmt::Debug, M> fmt::Debug for BoundMethod<T, M> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BoundMethod")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

impl<T, M> BoundMethod<T, M> {
    /// The master object the per-worker copies are cloned from.
    pub fn object(&self) -> &T {
        &self.object
    }
}

impl<T, M> Body for BoundMethod<T, M>
where
    T: Clone + Send + Sync + 'static,
    M: Fn(&mut T, Range) -> anyhow::Result<()> + Send + Sync + 'static,
{
    type Local = T;

    fn localize(&self) -> T {
        T::clone(&self.object)
    }

    fn invoke(
        &self,
        local: &mut T,
        range: Range,
    ) -> anyhow::Result<()> {
        (self.method)(local, range)
    }
}

/// Bind `method` (typically `Type::method`) to `object`.
pub fn for_int_method<T, M>(
    object: T,
    method: M,
) -> BoundMethod<T, M>
where
    T: Clone + Send + Sync + 'static,
    M: Fn(&mut T, Range) -> anyhow::Result<()> + Send + Sync + 'static,
{
    BoundMethod {
        object: Arc::new(object),
        method: Arc::new(method),
    }
}

/// Reduce body mapping leaves with `map(&container, range)` and merging
/// partials with `reduce(left, right)`.
pub struct ContainerReducer<C, R, M, J> {
    container: Arc<C>,
    map: Arc<M>,
    reduce: Arc<J>,
    result: Arc<Mutex<Option<R>>>,
}

impl<C, R, M, J> Clone for ContainerReducer<C, R, M, J> {
    fn clone(&self) -> Self {
        Self {
            container: Arc::clone(&self.container),
            map: Arc::clone(&self.map),
            reduce: Arc::clone(&self.reduce),
            result: Arc::clone(&self.result),
        }
    }
}

impl<C, R: fmt::Debug, M, J> fmt::Debug for ContainerReducer<C, R, M, J> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContainerReducer")
            .field("result", &*self.result.lock())
            .finish_non_exhaustive()
    }
}

impl<C, R: Clone, M, J> ContainerReducer<C, R, M, J> {
    /// Final value of the last successful reduction run with this body.
    pub fn result(&self) -> Option<R> {
        self.result.lock().clone()
    }

    pub fn container(&self) -> &Arc<C> {
        &self.container
    }
}

impl<C, R, M, J> ReduceBody for ContainerReducer<C, R, M, J>
where
    C: Send + Sync + 'static,
    R: Clone + Send + 'static,
    M: Fn(&C, Range) -> anyhow::Result<R> + Send + Sync + 'static,
    J: Fn(R, Option<R>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    type Output = R;

    fn map(
        &self,
        range: Range,
    ) -> anyhow::Result<R> {
        (self.map)(&self.container, range)
    }

    fn join(
        &self,
        left: R,
        right: Option<R>,
    ) -> anyhow::Result<R> {
        (self.reduce)(left, right)
    }

    fn reset(&self) {
        *self.result.lock() = None;
    }

    fn finish(
        &self,
        output: &R,
    ) {
        *self.result.lock() = Some(output.clone());
    }
}

/// Reduce body over a [`ConcurrentArray`].
pub fn reduce_int_array_func<R, M, J>(
    container: Arc<ConcurrentArray>,
    map: M,
    reduce: J,
) -> ContainerReducer<ConcurrentArray, R, M, J>
where
    R: Clone + Send + 'static,
    M: Fn(&ConcurrentArray, Range) -> anyhow::Result<R> + Send + Sync + 'static,
    J: Fn(R, Option<R>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    ContainerReducer {
        container,
        map: Arc::new(map),
        reduce: Arc::new(reduce),
        result: Arc::new(Mutex::new(None)),
    }
}

/// Reduce body over a [`ConcurrentHash`].
pub fn reduce_int_hash_func<R, M, J>(
    container: Arc<ConcurrentHash>,
    map: M,
    reduce: J,
) -> ContainerReducer<ConcurrentHash, R, M, J>
where
    R: Clone + Send + 'static,
    M: Fn(&ConcurrentHash, Range) -> anyhow::Result<R> + Send + Sync + 'static,
    J: Fn(R, Option<R>) -> anyhow::Result<R> + Send + Sync + 'static,
{
    ContainerReducer {
        container,
        map: Arc::new(map),
        reduce: Arc::new(reduce),
        result: Arc::new(Mutex::new(None)),
    }
}

//! 调度器单元测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::*;
use crate::body::{Body, ForWork, ReduceBody, ReduceWork};
use crate::config::ContextConfig;
use crate::error::Error;

static POOL: Lazy<WorkerPool> = Lazy::new(|| {
    WorkerPool::build(&ContextConfig::default().with_workers(4), empty_manifest())
        .expect("test pool should start")
});

fn empty_manifest() -> Arc<Manifest> {
    Arc::new(Manifest::new(Vec::new(), Vec::new(), Vec::new()))
}

fn run_for<B: Body>(
    range: Range,
    body: &B,
) -> Result<()> {
    run(&POOL, empty_manifest(), range, ForWork(body.clone()))
}

fn run_reduce<B: ReduceBody>(
    range: Range,
    body: &B,
) -> Result<B::Output> {
    run(&POOL, empty_manifest(), range, ReduceWork(body.clone()))
}

/// Counts visits per index; optionally fails on one index.
#[derive(Clone)]
struct Visit {
    hits: Arc<Vec<AtomicUsize>>,
    localized: Arc<AtomicUsize>,
    fail_at: Option<i64>,
    panic_at: Option<i64>,
}

impl Visit {
    fn new(len: usize) -> Self {
        Self {
            hits: Arc::new((0..len).map(|_| AtomicUsize::new(0)).collect()),
            localized: Arc::new(AtomicUsize::new(0)),
            fail_at: None,
            panic_at: None,
        }
    }

    fn hits(&self) -> Vec<usize> {
        self.hits.iter().map(|h| h.load(Ordering::SeqCst)).collect()
    }
}

impl Body for Visit {
    type Local = usize;

    fn localize(&self) -> usize {
        self.localized.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn invoke(
        &self,
        local: &mut usize,
        range: Range,
    ) -> anyhow::Result<()> {
        for i in range.indices() {
            if Some(i) == self.fail_at {
                anyhow::bail!("bad index {}", i);
            }
            if Some(i) == self.panic_at {
                panic!("boom at {}", i);
            }
            self.hits[i as usize].fetch_add(1, Ordering::SeqCst);
            *local += 1;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct Sum {
    lone_joins: Arc<AtomicUsize>,
}

impl ReduceBody for Sum {
    type Output = i64;

    fn map(
        &self,
        range: Range,
    ) -> anyhow::Result<i64> {
        Ok(range.indices().sum())
    }

    fn join(
        &self,
        left: i64,
        right: Option<i64>,
    ) -> anyhow::Result<i64> {
        if right.is_none() {
            self.lone_joins.fetch_add(1, Ordering::SeqCst);
        }
        Ok(left + right.unwrap_or(0))
    }
}

fn sum_body() -> Sum {
    Sum {
        lone_joins: Arc::new(AtomicUsize::new(0)),
    }
}

#[test]
fn test_every_index_visited_once() {
    for grain in [1, 3, 7, 64, 1000] {
        let body = Visit::new(1000);
        run_for(Range::new(0, 1000, grain).unwrap(), &body).unwrap();
        assert!(body.hits().iter().all(|&n| n == 1), "grain {}", grain);
    }
}

#[test]
fn test_localize_at_most_once_per_worker() {
    let body = Visit::new(4096);
    run_for(Range::new(0, 4096, 8).unwrap(), &body).unwrap();
    let localized = body.localized.load(Ordering::SeqCst);
    assert!(localized >= 1);
    assert!(localized <= POOL.size());
}

#[test]
fn test_reduce_sum() {
    for grain in [5, 23] {
        let body = sum_body();
        let total = run_reduce(Range::new(1, 101, grain).unwrap(), &body).unwrap();
        assert_eq!(total, 5050);
        assert_eq!(body.lone_joins.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn test_single_leaf_joins_with_none() {
    let body = sum_body();
    let total = run_reduce(Range::new(0, 10, 10).unwrap(), &body).unwrap();
    assert_eq!(total, 45);
    assert_eq!(body.lone_joins.load(Ordering::SeqCst), 1);
}

#[test]
fn test_leaf_error_reaches_caller() {
    let mut body = Visit::new(1000);
    body.fail_at = Some(517);
    let err = run_for(Range::new(0, 1000, 10).unwrap(), &body).unwrap_err();
    match err {
        Error::BodyInvocation { range, source } => {
            assert!(range.indices().contains(&517));
            assert!(source.to_string().contains("bad index 517"));
            // indices before the failing one in its leaf were written
            let hits = body.hits();
            assert!(hits[range.begin() as usize..517].iter().all(|&n| n == 1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(body.hits().iter().all(|&n| n <= 1));

    // the pool is still usable
    let body = Visit::new(100);
    run_for(Range::new(0, 100, 10).unwrap(), &body).unwrap();
    assert!(body.hits().iter().all(|&n| n == 1));
}

#[test]
fn test_leaf_panic_becomes_error() {
    let mut body = Visit::new(200);
    body.panic_at = Some(42);
    let err = run_for(Range::new(0, 200, 10).unwrap(), &body).unwrap_err();
    assert!(err.is_body_failure());
    assert!(err.to_string().contains("boom at 42"));
}

#[derive(Clone)]
struct Nested {
    total: Arc<AtomicUsize>,
}

impl Body for Nested {
    type Local = ();

    fn localize(&self) {}

    fn invoke(
        &self,
        _local: &mut (),
        range: Range,
    ) -> anyhow::Result<()> {
        for _ in range.indices() {
            let inner = sum_body();
            let value = run_reduce(Range::new(0, 100, 10)?, &inner)?;
            self.total.fetch_add(value as usize, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn test_nested_calls_complete() {
    let body = Nested {
        total: Arc::new(AtomicUsize::new(0)),
    };
    run_for(Range::new(0, 16, 2).unwrap(), &body).unwrap();
    assert_eq!(body.total.load(Ordering::SeqCst), 16 * 4950);
}

#[test]
fn test_empty_range_runs_one_leaf() {
    let body = sum_body();
    assert_eq!(run_reduce(Range::new(5, 5, 1).unwrap(), &body).unwrap(), 0);
}

#[test]
fn test_stats_advance() {
    let before = POOL.stats();
    let body = Visit::new(256);
    run_for(Range::new(0, 256, 4).unwrap(), &body).unwrap();
    let after = POOL.stats();
    assert!(after.invocations > before.invocations);
    assert!(after.leaves >= before.leaves + 64);
    assert!(after.splits >= before.splits + 63);
}

/// Carries the covered bounds so a join can be picked out by position.
#[derive(Clone)]
struct Spans {
    fail_join_at: Option<i64>,
    panic_join_at: Option<i64>,
}

impl ReduceBody for Spans {
    type Output = (i64, i64, i64);

    fn map(
        &self,
        range: Range,
    ) -> anyhow::Result<(i64, i64, i64)> {
        Ok((range.begin(), range.end(), range.indices().sum()))
    }

    fn join(
        &self,
        left: (i64, i64, i64),
        right: Option<(i64, i64, i64)>,
    ) -> anyhow::Result<(i64, i64, i64)> {
        let Some(right) = right else {
            return Ok(left);
        };
        if Some(left.1) == self.fail_join_at {
            anyhow::bail!("refusing to merge at {}", left.1);
        }
        if Some(left.1) == self.panic_join_at {
            panic!("merge blew up at {}", left.1);
        }
        assert_eq!(left.1, right.0);
        Ok((left.0, right.1, left.2 + right.2))
    }
}

#[test]
fn test_failing_join_becomes_body_error() {
    let body = Spans {
        fail_join_at: Some(50),
        panic_join_at: None,
    };
    let err = run_reduce(Range::new(0, 100, 10).unwrap(), &body).unwrap_err();
    assert!(err.is_body_failure());
    match err {
        Error::BodyInvocation { range, source } => {
            assert_eq!((range.begin(), range.end()), (0, 100));
            assert!(source.to_string().contains("refusing to merge at 50"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_panicking_join_becomes_body_error() {
    let body = Spans {
        fail_join_at: None,
        panic_join_at: Some(25),
    };
    let err = run_reduce(Range::new(0, 100, 10).unwrap(), &body).unwrap_err();
    assert!(err.is_body_failure());
    assert!(err.to_string().contains("merge blew up at 25"));

    // the pool survives a panicking join
    let body = Spans {
        fail_join_at: None,
        panic_join_at: None,
    };
    assert_eq!(run_reduce(Range::new(0, 100, 10).unwrap(), &body).unwrap(), (0, 100, 4950));
}

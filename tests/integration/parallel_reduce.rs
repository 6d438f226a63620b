//! parallel_reduce 集成测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use isotask::{reduce_int_array_func, reduce_int_hash_func, ConcurrentArray, ConcurrentHash, Range};

use crate::shared_context;

fn sum_body(data: Arc<ConcurrentArray>) -> impl isotask::ReduceBody<Output = i64> {
    reduce_int_array_func(
        data,
        |array, range| {
            let mut sum = 0;
            for i in range.indices() {
                sum += array.get_as::<i64>(i as usize)?.unwrap_or(0);
            }
            Ok(sum)
        },
        |left, right: Option<i64>| Ok(left + right.unwrap_or(0)),
    )
}

#[test]
fn test_sum_one_to_hundred() {
    let context = shared_context();
    let data = Arc::new(ConcurrentArray::from_values(1..=100i64).unwrap());
    for grain in [5, 23] {
        let body = sum_body(Arc::clone(&data));
        let total = context
            .parallel_reduce(Range::new(0, 100, grain).unwrap(), &body)
            .unwrap();
        assert_eq!(total, 5050, "grain {}", grain);
    }
}

#[test]
fn test_result_stored_on_body() {
    let context = shared_context();
    let data = Arc::new(ConcurrentArray::from_values(0..64i64).unwrap());
    let body = reduce_int_array_func(
        data,
        |array, range| {
            let mut max = i64::MIN;
            for i in range.indices() {
                max = max.max(array.get_as::<i64>(i as usize)?.unwrap_or(i64::MIN));
            }
            Ok(max)
        },
        |left: i64, right: Option<i64>| Ok(right.map_or(left, |r| left.max(r))),
    );
    assert_eq!(body.result(), None);
    context.parallel_reduce(Range::new(0, 64, 4).unwrap(), &body).unwrap();
    assert_eq!(body.result(), Some(63));
}

#[test]
fn test_left_operand_covers_lower_indices() {
    let context = shared_context();
    let body = reduce_int_array_func(
        Arc::new(ConcurrentArray::new()),
        |_, range| Ok(range.indices().collect::<Vec<i64>>()),
        |mut left: Vec<i64>, right: Option<Vec<i64>>| {
            left.extend(right.unwrap_or_default());
            Ok(left)
        },
    );
    let order = context.parallel_reduce(Range::new(0, 500, 3).unwrap(), &body).unwrap();
    assert_eq!(order, (0..500).collect::<Vec<_>>());
}

#[test]
fn test_single_leaf_identity() {
    let context = shared_context();
    let lone = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lone);
    let body = reduce_int_array_func(
        Arc::new(ConcurrentArray::new()),
        |_, range| Ok(range.indices().sum::<i64>()),
        move |left: i64, right: Option<i64>| {
            if right.is_none() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(left + right.unwrap_or(0))
        },
    );
    assert_eq!(context.parallel_reduce(Range::new(0, 8, 8).unwrap(), &body).unwrap(), 28);
    assert_eq!(lone.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_reduce_leaves_no_result() {
    let context = shared_context();
    let fail = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&fail);
    let body = reduce_int_array_func(
        Arc::new(ConcurrentArray::new()),
        move |_, range| {
            if flag.load(Ordering::SeqCst) == 1 && range.indices().contains(&50) {
                anyhow::bail!("cannot map {}", range);
            }
            Ok(range.len())
        },
        |left: u64, right: Option<u64>| Ok(left + right.unwrap_or(0)),
    );

    assert_eq!(context.parallel_reduce(Range::new(0, 100, 10).unwrap(), &body).unwrap(), 100);
    assert_eq!(body.result(), Some(100));

    fail.store(1, Ordering::SeqCst);
    let err = context
        .parallel_reduce(Range::new(0, 100, 10).unwrap(), &body)
        .unwrap_err();
    assert!(err.is_body_failure());
    assert_eq!(body.result(), None);
}

#[test]
fn test_hash_reduce() {
    let context = shared_context();
    let hash = Arc::new(ConcurrentHash::new());
    for i in 0..50 {
        hash.set(i.to_string(), i * 2).unwrap();
    }
    let body = reduce_int_hash_func(
        hash,
        |hash, range| {
            let mut sum = 0i64;
            for i in range.indices() {
                sum += hash.get_as::<i64>(&i.to_string())?.unwrap_or(0);
            }
            Ok(sum)
        },
        |left: i64, right: Option<i64>| Ok(left + right.unwrap_or(0)),
    );
    let total = context.parallel_reduce(Range::new(0, 50, 6).unwrap(), &body).unwrap();
    assert_eq!(total, 2 * (0..50).sum::<i64>());
}

#[test]
fn test_failed_join_leaves_no_result() {
    let context = shared_context();
    for failing_mode in [1, 2] {
        let mode = Arc::new(AtomicUsize::new(0));
        let switch = Arc::clone(&mode);
        let body = reduce_int_array_func(
            Arc::new(ConcurrentArray::new()),
            |_, range| Ok(range.len()),
            move |left: u64, right: Option<u64>| {
                let right = right.unwrap_or(0);
                // the two halves of [0, 64) merge at the root
                if left == 32 && right == 32 {
                    match switch.load(Ordering::SeqCst) {
                        1 => anyhow::bail!("merge refused"),
                        2 => panic!("merge panicked"),
                        _ => {}
                    }
                }
                Ok(left + right)
            },
        );
        let range = Range::new(0, 64, 8).unwrap();

        assert_eq!(context.parallel_reduce(range, &body).unwrap(), 64);
        assert_eq!(body.result(), Some(64));
        mode.store(failing_mode, Ordering::SeqCst);
        let err = context.parallel_reduce(range, &body).unwrap_err();
        assert!(err.is_body_failure(), "mode {}", failing_mode);
        assert_eq!(body.result(), None);
    }
}

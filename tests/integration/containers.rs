//! 容器跨上下文集成测试

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use isotask::{current_context_id, for_int_array_func, ConcurrentArray, ContextId, Range, Value};

use crate::shared_context;

#[test]
fn test_value_read_in_another_context_is_a_deep_copy() {
    let context = shared_context();
    let array = Arc::new(ConcurrentArray::new());
    array
        .set(0, json!({"name": "alpha", "nested": {"xs": [1, 2, 3]}}))
        .unwrap();
    let mine = array.get(0).unwrap();

    let theirs: Arc<Mutex<Vec<(ContextId, Arc<Value>)>>> = Arc::default();
    let sink = Arc::clone(&theirs);
    let body = for_int_array_func(Arc::clone(&array), move |_, array| {
        if let Some(value) = array.get(0) {
            sink.lock().push((current_context_id(), value));
        }
        Ok(())
    });
    context.parallel_for(Range::new(0, 1, 1).unwrap(), &body).unwrap();

    let theirs = theirs.lock();
    assert_eq!(theirs.len(), 1);
    let (reader, value) = &theirs[0];
    assert_ne!(*reader, current_context_id());
    assert!(context.worker_ids().contains(reader));
    assert_eq!(**value, *mine);
    assert!(!Arc::ptr_eq(value, &mine));
}

#[test]
fn test_workers_write_distinct_slots() {
    let context = shared_context();
    let array = Arc::new(ConcurrentArray::new());
    let body = for_int_array_func(Arc::clone(&array), |range, array| {
        for i in range.indices() {
            array.set(i as usize, json!({"i": i, "owner": current_context_id().get()}))?;
        }
        Ok(())
    });
    context.parallel_for(Range::new(0, 512, 8).unwrap(), &body).unwrap();

    assert_eq!(array.len(), 512);
    for (i, value) in array.snapshot().into_iter().enumerate() {
        assert_eq!(value["i"], json!(i));
    }
}

#[test]
fn test_update_from_workers() {
    let context = shared_context();
    let array = Arc::new(ConcurrentArray::from_values(vec![0i64; 64]).unwrap());
    let body = for_int_array_func(Arc::clone(&array), |range, array| {
        for i in range.indices() {
            array.update(i as usize, |value| *value = json!(i + 1));
        }
        Ok(())
    });
    context.parallel_for(Range::new(0, 64, 4).unwrap(), &body).unwrap();
    assert_eq!(array.to_vec_as::<i64>().unwrap(), (1..=64).collect::<Vec<_>>());
    assert!(array.stats().cross_context_clones() >= 64);
}

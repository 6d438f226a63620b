//! Container unit tests

use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::*;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

#[test]
fn test_native_read_shares_handle() {
    let array = ConcurrentArray::new();
    array.set(0, json!({"k": [1, 2, 3]})).unwrap();

    let first = array.get(0).unwrap();
    let second = array.get(0).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    // the first read adopted the neutral value, the second was native
    assert_eq!(array.stats().cross_context_clones(), 1);
    assert_eq!(array.stats().native_hits(), 1);
}

#[test]
fn test_foreign_read_deep_clones() {
    let array = Arc::new(ConcurrentArray::new());
    array.set(3, json!({"name": "a", "tags": ["x", "y"]})).unwrap();
    let mine = array.get(3).unwrap();

    let other = Arc::clone(&array);
    let theirs = thread::spawn(move || other.get(3).unwrap()).join().unwrap();

    assert_eq!(*mine, *theirs);
    assert!(!Arc::ptr_eq(&mine, &theirs));
    assert_eq!(array.stats().cross_context_clones(), 2);
}

#[test]
fn test_set_extends_with_null() {
    let array = ConcurrentArray::new();
    array.set(2, 7).unwrap();
    assert_eq!(array.len(), 3);
    assert_eq!(array.snapshot(), vec![Value::Null, Value::Null, json!(7)]);
}

#[test]
fn test_set_by_reference_keeps_caller_copy() {
    let array = ConcurrentArray::new();
    let point = Point { x: 1, y: 2 };
    array.set(0, &point).unwrap();
    assert_eq!(array.get_as::<Point>(0).unwrap(), Some(point.clone()));
    assert_eq!(point, Point { x: 1, y: 2 });
}

#[test]
fn test_get_as_type_mismatch() {
    let array = ConcurrentArray::new();
    array.push("not a number").unwrap();
    let err = array.get_as::<i64>(0).unwrap_err();
    match err {
        Error::ContainerTypeMismatch { slot, .. } => assert_eq!(slot, "[0]"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_update_does_not_touch_returned_handles() {
    let array = ConcurrentArray::new();
    array.push(json!([1])).unwrap();
    let before = array.get(0).unwrap();

    array.update(0, |value| {
        if let Value::Array(items) = value {
            items.push(json!(2));
        }
    });

    assert_eq!(*before, json!([1]));
    assert_eq!(*array.get(0).unwrap(), json!([1, 2]));
    assert!(array.update(9, |_| ()).is_none());
}

#[test]
fn test_array_shape_operations() {
    let array = ConcurrentArray::from_values([1, 2, 3]).unwrap();
    assert_eq!(array.to_vec_as::<i32>().unwrap(), vec![1, 2, 3]);
    assert_eq!(array.pop(), Some(json!(3)));
    array.resize(4);
    assert_eq!(array.len(), 4);
    assert_eq!(array.get(3).as_deref(), Some(&Value::Null));
    array.clear();
    assert!(array.is_empty());
    assert!(array.get(0).is_none());
}

#[test]
fn test_concurrent_distinct_slots() {
    let array = Arc::new(ConcurrentArray::with_len(64));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let array = Arc::clone(&array);
            thread::spawn(move || {
                for i in (t..64).step_by(4) {
                    array.set(i, i * 10).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let values = array.to_vec_as::<usize>().unwrap();
    assert_eq!(values, (0..64).map(|i| i * 10).collect::<Vec<_>>());
}

#[test]
fn test_hash_basic() {
    let hash = ConcurrentHash::new();
    hash.set("b", 2).unwrap();
    hash.set("a", 1).unwrap();
    assert_eq!(hash.keys(), vec!["b".to_string(), "a".to_string()]);
    assert_eq!(hash.insert("b", 20).unwrap(), Some(json!(2)));
    assert_eq!(hash.get_as::<i32>("b").unwrap(), Some(20));
    assert!(hash.contains_key("a"));
    assert_eq!(hash.remove("b"), Some(json!(20)));
    assert_eq!(hash.len(), 1);
    assert!(hash.get("missing").is_none());
}

#[test]
fn test_hash_foreign_read_and_update() {
    let hash = Arc::new(ConcurrentHash::new());
    hash.set("p", Point { x: 0, y: 0 }).unwrap();

    let other = Arc::clone(&hash);
    thread::spawn(move || {
        other.update("p", |value| value["x"] = json!(5)).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(hash.get_as::<Point>("p").unwrap(), Some(Point { x: 5, y: 0 }));
    assert_eq!(hash.snapshot().len(), 1);
    hash.clear();
    assert!(hash.is_empty());
}

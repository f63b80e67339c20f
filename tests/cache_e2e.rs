//! End-to-end behaviour of the cache facade: single-flight callbacks, key
//! isolation, error propagation, idempotent deletes.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use embercache::Cache;

#[test]
fn repeated_gets_invoke_callback_once() {
    common::init_logger();
    let cache = Cache::new(common::default_cfg()).unwrap();

    let invokes = Arc::new(AtomicU64::new(0));
    let mut payload = None;
    for _ in 0..1000 {
        let counter = Arc::clone(&invokes);
        let bytes = cache
            .get("hello_world", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(b"test response".to_vec())
            })
            .unwrap();
        payload = Some(bytes);
    }

    assert_eq!(payload.unwrap().as_slice(), b"test response");
    assert_eq!(invokes.load(Ordering::SeqCst), 1);
    cache.close();
}

#[test]
fn distinct_keys_each_miss_once() {
    common::init_logger();
    let cache = Cache::new(common::default_cfg()).unwrap();

    let invokes = Arc::new(AtomicU64::new(0));
    let mut last = None;
    for i in 0..1000 {
        let counter = Arc::clone(&invokes);
        let bytes = cache
            .get(&format!("hello_world_{i}"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(format!("test response: #{i}").into_bytes())
            })
            .unwrap();
        last = Some(bytes);
    }

    assert_eq!(last.unwrap().as_slice(), b"test response: #999");
    assert_eq!(invokes.load(Ordering::SeqCst), 1000);
    assert_eq!(cache.len(), 1000);
    cache.close();
}

#[test]
fn callback_errors_propagate_and_never_insert() {
    common::init_logger();
    let cache = Cache::new(common::default_cfg()).unwrap();

    let invokes = Arc::new(AtomicU64::new(0));
    for i in 0..1000 {
        let counter = Arc::clone(&invokes);
        let err = cache
            .get(&format!("hello_world_{i}"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(format!("error #{i}").into())
            })
            .unwrap_err();
        assert!(err.to_string().contains(&format!("error #{i}")));
    }

    assert_eq!(invokes.load(Ordering::SeqCst), 1000);
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.mem(), 0);
    cache.close();
}

#[test]
fn del_absent_is_true_and_counters_untouched() {
    common::init_logger();
    let cache = Cache::new(common::default_cfg()).unwrap();

    assert!(cache.del("never_inserted"));
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.mem(), 0);

    cache.get("real", |_| Ok(vec![1, 2, 3])).unwrap();
    assert!(cache.del("real"));
    assert!(cache.del("real"));
    assert_eq!(cache.len(), 0);
    cache.close();
}

#[test]
fn clear_empties_everything() {
    common::init_logger();
    let cache = Cache::new(common::default_cfg()).unwrap();

    for i in 0..200 {
        cache
            .get(&format!("key-{i}"), |_| Ok(vec![0u8; 256]))
            .unwrap();
    }
    assert_eq!(cache.len(), 200);
    assert!(cache.mem() > 0);

    cache.clear();
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.mem(), 0);
    cache.close();
}

#[test]
fn hit_returns_cached_bytes_not_new_fetch() {
    common::init_logger();
    let cache = Cache::new(common::default_cfg()).unwrap();

    cache.get("versioned", |_| Ok(b"v1".to_vec())).unwrap();
    // A different callback on a hit never runs.
    let bytes = cache
        .get("versioned", |_| Ok(b"v2".to_vec()))
        .unwrap();
    assert_eq!(bytes.as_slice(), b"v1");
    cache.close();
}

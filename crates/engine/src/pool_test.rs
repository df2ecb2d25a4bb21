//! Tests for the envelope pool

use std::sync::Arc;
use std::thread;

use crate::envelope::Envelope;
use crate::pool::EnvelopePool;

#[test]
fn test_new_pool_is_full() {
    let pool: EnvelopePool<u64> = EnvelopePool::new(8, 128);

    assert_eq!(pool.capacity(), 8);
    assert_eq!(pool.available(), 8);
}

#[test]
fn test_zero_size_pool_still_works() {
    let pool: EnvelopePool<u64> = EnvelopePool::new(0, 0);
    assert_eq!(pool.capacity(), 1);

    let envelope = pool.get();
    pool.put(envelope);
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_get_from_empty_pool_allocates() {
    let pool: EnvelopePool<u64> = EnvelopePool::new(2, 64);

    let _e1 = pool.get();
    let _e2 = pool.get();
    assert_eq!(pool.available(), 0);

    let e3 = pool.get();
    assert!(e3.raw_capacity() >= 64);

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.hits, 2);
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.outstanding(), 3);
}

#[test]
fn test_put_resets_envelope() {
    let pool: EnvelopePool<String> = EnvelopePool::new(1, 64);

    let mut envelope = pool.get();
    envelope.fill("payload".into(), "msg-1", "trace-1", Some(b"raw"));
    pool.put(envelope);

    let envelope = pool.get();
    assert!(!envelope.is_filled());
    assert!(envelope.message_id().is_empty());
    assert!(envelope.raw().is_empty());
}

#[test]
fn test_put_drops_when_pool_full() {
    let pool: EnvelopePool<u64> = EnvelopePool::new(2, 64);

    pool.put(Envelope::with_raw_capacity(64));

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.drops, 1);
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_put_drops_oversized_buffers() {
    let pool: EnvelopePool<u64> = EnvelopePool::new(2, 4);
    let _held = pool.get();

    let mut envelope = pool.get();
    let big = vec![0u8; 4096];
    envelope.fill(1, "id", "trace", Some(&big));
    pool.put(envelope);

    assert_eq!(pool.available(), 0);
    assert_eq!(pool.metrics().snapshot().drops, 1);
}

#[test]
fn test_hit_rate() {
    let pool: EnvelopePool<u64> = EnvelopePool::new(1, 0);
    assert_eq!(pool.metrics().snapshot().hit_rate(), 1.0);

    let _a = pool.get();
    let _b = pool.get();
    assert_eq!(pool.metrics().snapshot().hit_rate(), 0.5);
}

#[test]
fn test_concurrent_get_put() {
    let pool: Arc<EnvelopePool<u64>> = Arc::new(EnvelopePool::new(16, 32));
    let mut handles = vec![];

    for t in 0..4 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            for i in 0..1000u64 {
                let mut envelope = pool.get();
                envelope.fill(i, "id", "trace", None);
                assert_eq!(envelope.payload(), Some(&i));
                pool.put(envelope);
            }
            t
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.hits + snapshot.misses, 4000);
    assert_eq!(snapshot.outstanding(), 0);
    assert!(pool.available() <= 16);
}

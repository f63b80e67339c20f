//! Bounded ring queue of 64-bit keys.
//!
//! Per-shard FIFO of keys pending refresh. One slot is sacrificed to
//! distinguish full from empty, so a queue built with capacity `n` holds at
//! most `n - 1` keys. The critical section is a handful of instructions
//! under a `parking_lot::Mutex`.
//!
//! The queue may contain stale keys whose entries were since evicted;
//! consumers revalidate against the shard map after popping.

use parking_lot::Mutex;

#[derive(Debug)]
struct Ring {
    buf: Box<[u64]>,
    head: usize,
    tail: usize,
}

/// Fixed-capacity FIFO with non-blocking push and pop.
#[derive(Debug)]
pub(crate) struct RingQueue {
    ring: Mutex<Ring>,
}

impl RingQueue {
    /// Allocates the backing buffer once; capacity is clamped to at least 2.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            ring: Mutex::new(Ring {
                buf: vec![0u64; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
        }
    }

    /// Appends `key`; false when the queue is full.
    pub(crate) fn try_push(&self, key: u64) -> bool {
        let mut ring = self.ring.lock();
        let next = (ring.head + 1) % ring.buf.len();
        if next == ring.tail {
            return false;
        }
        let head = ring.head;
        ring.buf[head] = key;
        ring.head = next;
        true
    }

    /// Pops the oldest key; `None` when empty.
    pub(crate) fn try_pop(&self) -> Option<u64> {
        let mut ring = self.ring.lock();
        if ring.head == ring.tail {
            return None;
        }
        let key = ring.buf[ring.tail];
        ring.tail = (ring.tail + 1) % ring.buf.len();
        Some(key)
    }
}

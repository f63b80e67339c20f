//! Expired-entry discovery.
//!
//! The lifetime worker asks the store for one expired entry at a time.
//! Discovery is queue-first: accesses that observed an expired entry have
//! already pushed its key onto the owning shard's refresh queue, so
//! draining those queues finds work without scanning. Queued keys are
//! revalidated — the entry must still exist and still be expired — and a
//! no-longer-expired entry gets its queued flag cleared so a later access
//! can re-enqueue it.
//!
//! When every queue comes up empty the store falls back to sampling shard
//! maps under opportunistic read locks, returning the expired entry with
//! the oldest `updated_at`.

use std::sync::Arc;

use crate::entry::Entry;
use crate::store::shard::RW_LOCK_SPINS;
use crate::store::{NUM_SHARDS, ShardedStore};

/// Expired entries tracked per fallback scan.
const PEEK_SAMPLE: usize = 32;

impl ShardedStore {
    /// One expired entry, queue-first with a sampling fallback.
    pub(crate) fn peek_expired(&self) -> Option<Arc<Entry>> {
        self.next_queued_expired()
            .or_else(|| self.peek_expired_sample(PEEK_SAMPLE))
    }

    fn next_queued_expired(&self) -> Option<Arc<Entry>> {
        let start = self.cursor_start();
        for i in 0..NUM_SHARDS {
            let shard = self.shard_at(start + i);
            if let Some(key) = shard.dequeue_expired() {
                if let Some(entry) = shard.get(key) {
                    if entry.is_expired(self.expiry()) {
                        // Caller refreshes; success clears the queued flag.
                        return Some(entry);
                    }
                    // Refreshed by someone else meanwhile; re-arm.
                    entry.dequeue_expired();
                }
            }
        }
        None
    }

    fn peek_expired_sample(&self, sample: usize) -> Option<Arc<Entry>> {
        let max_seen = sample * RW_LOCK_SPINS;
        let mut best: Option<Arc<Entry>> = None;
        let mut seen = 0usize;
        let mut hits = 0usize;

        'shards: for _ in 0..max_seen {
            let shard = self.next_shard();
            if shard.len() == 0 {
                continue;
            }
            let Some(core) = shard.try_read() else {
                continue;
            };
            for (_, entry) in core.iter() {
                if seen >= max_seen || hits >= sample {
                    break 'shards;
                }
                if entry.is_expired(self.expiry()) {
                    hits += 1;
                    let older = match &best {
                        None => true,
                        Some(current) => current.updated_at() > entry.updated_at(),
                    };
                    if older {
                        best = Some(Arc::clone(entry));
                    }
                }
                seen += 1;
            }
        }
        best
    }
}

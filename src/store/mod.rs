//! Sharded concurrent store.
//!
//! A fixed power-of-two array of [`Shard`]s (1024), addressed by
//! `primary_hash & (shards - 1)`. Global `len` and `mem` are atomics fed by
//! per-shard deltas computed under the shard lock; they agree with the
//! per-shard sums once mutators quiesce. A round-robin cursor gives
//! maintenance scans a fair starting shard.
//!
//! Eviction ([`eviction`]) and expired-entry discovery ([`refresh`]) are
//! implemented as store methods in their own modules.

pub(crate) mod eviction;
pub(crate) mod refresh;
pub(crate) mod shard;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crossbeam_channel::bounded;

use crate::config::{CacheConfig, ExpiryPolicy, LruMode};
use crate::entry::Entry;
use crate::shutdown::Watcher;
pub(crate) use shard::Shard;

pub(crate) const NUM_SHARDS: usize = 1024;
const SHARD_MASK: u64 = (NUM_SHARDS - 1) as u64;

/// Sharded map with precise-on-quiescence global counters.
pub(crate) struct ShardedStore {
    mode: LruMode,
    expiry: ExpiryPolicy,
    shards: Box<[Shard]>,
    len: AtomicI64,
    mem: AtomicI64,
    iter: AtomicU64,
    watcher: Watcher,
}

impl ShardedStore {
    pub(crate) fn new(watcher: Watcher, cfg: &CacheConfig) -> Self {
        let shards: Box<[Shard]> = (0..NUM_SHARDS).map(|_| Shard::new()).collect();

        let mode = match &cfg.eviction {
            Some(ev) => ev.lru_mode,
            None => LruMode::Sampling,
        };
        match mode {
            LruMode::Listing => {
                for shard in shards.iter() {
                    shard.enable_lru();
                }
            }
            LruMode::Sampling => {
                for shard in shards.iter() {
                    shard.disable_lru();
                }
            }
        }

        Self {
            mode,
            expiry: ExpiryPolicy::from_config(cfg),
            shards,
            len: AtomicI64::new(0),
            mem: AtomicI64::new(0),
            iter: AtomicU64::new(0),
            watcher,
        }
    }

    pub(crate) fn mode(&self) -> LruMode {
        self.mode
    }

    pub(crate) fn expiry(&self) -> &ExpiryPolicy {
        &self.expiry
    }

    pub(crate) fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Inserts or replaces; publishes the shard's deltas globally.
    pub(crate) fn set(&self, key: u64, entry: Arc<Entry>) {
        let (bytes_delta, len_delta) = self.shard(key).set(key, entry);
        if bytes_delta != 0 {
            self.mem.fetch_add(bytes_delta, Ordering::Relaxed);
        }
        if len_delta != 0 {
            self.len.fetch_add(len_delta, Ordering::Relaxed);
        }
    }

    pub(crate) fn get(&self, key: u64) -> Option<Arc<Entry>> {
        self.shard(key).get(key)
    }

    /// Deletes and publishes the freed weight. Returns `(freed, hit)`.
    pub(crate) fn remove(&self, key: u64) -> (i64, bool) {
        let (freed, hit) = self.shard(key).remove(key);
        if hit {
            self.len.fetch_sub(1, Ordering::Relaxed);
            self.mem.fetch_sub(freed, Ordering::Relaxed);
        }
        (freed, hit)
    }

    /// Wipes every shard, fixing the global counters from the totals.
    pub(crate) fn clear(&self) {
        self.walk_shards(|_, shard| {
            let (freed, items) = shard.clear();
            if freed != 0 {
                self.mem.fetch_sub(freed, Ordering::Relaxed);
            }
            if items != 0 {
                self.len.fetch_sub(items, Ordering::Relaxed);
            }
        });
    }

    pub(crate) fn len(&self) -> i64 {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn mem(&self) -> i64 {
        self.mem.load(Ordering::Relaxed)
    }

    /// Adjusts both the global and the owning shard's byte counters, for
    /// in-place payload swaps that bypass `set`.
    pub(crate) fn add_mem(&self, key: u64, delta: i64) {
        self.mem.fetch_add(delta, Ordering::Relaxed);
        self.shard(key).add_mem(delta);
    }

    /// Move-to-front on access; meaningful in listing mode only.
    pub(crate) fn touch(&self, key: u64) {
        if self.mode != LruMode::Listing {
            return;
        }
        self.shard(key).touch_lru(key);
    }

    pub(crate) fn enqueue_expired(&self, key: u64) -> bool {
        self.shard(key).enqueue_refresh(key)
    }

    #[inline]
    pub(crate) fn shard(&self, key: u64) -> &Shard {
        &self.shards[(key & SHARD_MASK) as usize]
    }

    /// Advances the round-robin cursor and returns the next shard.
    pub(crate) fn next_shard(&self) -> &Shard {
        let idx = self.iter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        &self.shards[(idx & SHARD_MASK) as usize]
    }

    /// Claims a round-robin starting index for multi-shard scans.
    pub(crate) fn cursor_start(&self) -> usize {
        (self.iter.fetch_add(1, Ordering::Relaxed) & SHARD_MASK) as usize
    }

    #[inline]
    pub(crate) fn shard_at(&self, idx: usize) -> &Shard {
        &self.shards[idx & (NUM_SHARDS - 1)]
    }

    /// Applies `f` to every shard in order on the calling thread.
    pub(crate) fn walk_shards<F>(&self, mut f: F)
    where
        F: FnMut(u64, &Shard),
    {
        for (idx, shard) in self.shards.iter().enumerate() {
            if self.watcher.is_cancelled() {
                return;
            }
            f(idx as u64, shard);
        }
    }

    /// Applies `f` to every shard from a pool of `concurrency` scoped
    /// threads fed by a shard-index channel. For maintenance and
    /// snapshotting; not a hot path.
    pub(crate) fn walk_shards_concurrent<F>(&self, concurrency: usize, f: F)
    where
        F: Fn(u64, &Shard) + Sync,
    {
        let concurrency = concurrency.max(1);
        let (tx, rx) = bounded::<usize>(NUM_SHARDS);

        std::thread::scope(|scope| {
            for _ in 0..concurrency {
                let rx = rx.clone();
                let f = &f;
                scope.spawn(move || {
                    for idx in rx.iter() {
                        if self.watcher.is_cancelled() {
                            return;
                        }
                        f(idx as u64, &self.shards[idx]);
                    }
                });
            }
            drop(rx);

            for idx in 0..NUM_SHARDS {
                if self.watcher.is_cancelled() {
                    break;
                }
                // The channel holds every index; send cannot block.
                if tx.send(idx).is_err() {
                    break;
                }
            }
            drop(tx);
        });
    }

    /// Sum of per-shard counters; test support for the global/shard
    /// agreement invariant.
    #[cfg(test)]
    pub(crate) fn shard_totals(&self) -> (i64, i64) {
        let mut len = 0;
        let mut mem = 0;
        for shard in self.shards.iter() {
            len += shard.len();
            mem += shard.mem();
        }
        (len, mem)
    }
}

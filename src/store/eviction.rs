//! Memory-bounded eviction.
//!
//! Two strategies, chosen at construction:
//!
//! - **Listing**: per-shard LRU lists; eviction round-robins over shards
//!   popping list tails. Each invocation keeps going until usage is back
//!   under the limit *and* at least [`MIN_EVICTION_FLOOR`] bytes were
//!   freed, which amortises the cost of waking the worker.
//! - **Sampling**: no lists; each step samples a few shards, scans a few
//!   keys per shard under an opportunistic read lock, and removes the entry
//!   with the smallest `touched_at` under an opportunistic write lock.
//!
//! Both honour a per-call spins budget so a single call cannot monopolise
//! the store, and both leave the global counters consistent with the shard
//! counters they adjust.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::LruMode;
use crate::entry::Entry;
use crate::store::shard::Shard;
use crate::store::{NUM_SHARDS, ShardedStore};

/// Listing-mode eviction keeps freeing until this many bytes came off,
/// even once usage is back under the limit.
const MIN_EVICTION_FLOOR: i64 = 8 << 20;

/// Shards probed for a listing-mode victim.
const LIST_VICTIM_PROBES: usize = 8;

/// Sampling width of the eviction loop.
const SHARDS_SAMPLE: i64 = 4;
const KEYS_SAMPLE: i64 = 8;

impl ShardedStore {
    /// Evicts until usage is within `limit`, spending at most `budget`
    /// spins. Returns `(freed_bytes, evicted_items)`.
    pub(crate) fn evict_until_within_limit(&self, limit: i64, budget: i64) -> (i64, i64) {
        match self.mode() {
            LruMode::Listing => self.evict_by_list(limit, budget),
            LruMode::Sampling => self.evict_by_sample(limit, budget),
        }
    }

    fn evict_by_list(&self, limit: i64, mut budget: i64) -> (i64, i64) {
        let mut freed = 0i64;
        let mut evicted = 0i64;

        while budget > 0 {
            let usage = self.mem.load(Ordering::Relaxed);
            if (usage <= limit && freed >= MIN_EVICTION_FLOOR) || self.len() == 0 {
                break;
            }
            let shard = self.next_shard();
            if shard.len() == 0 {
                budget -= 1;
                std::thread::yield_now();
                continue;
            }
            if let Some((_, entry)) = shard.lru_pop_tail() {
                let weight = entry.weight();
                self.mem.fetch_sub(weight, Ordering::Relaxed);
                self.len.fetch_sub(1, Ordering::Relaxed);
                freed += weight;
                evicted += 1;
            }
            budget -= 1;
        }
        (freed, evicted)
    }

    fn evict_by_sample(&self, limit: i64, mut budget: i64) -> (i64, i64) {
        if self.mem() <= limit || self.len() <= 0 {
            return (0, 0);
        }

        let mut freed = 0i64;
        let mut evicted = 0i64;

        while self.mem.load(Ordering::Relaxed) > limit && budget > 0 {
            budget -= 1;
            let Some((shard, victim)) = self.pick_victim_by_sample(SHARDS_SAMPLE, KEYS_SAMPLE)
            else {
                continue;
            };
            let Some(mut core) = shard.try_write() else {
                continue;
            };
            let (freed_bytes, hit) = shard.remove_entry(&mut core, victim.key().value());
            drop(core);
            if hit {
                self.mem.fetch_sub(freed_bytes, Ordering::Relaxed);
                self.len.fetch_sub(1, Ordering::Relaxed);
                freed += freed_bytes;
                evicted += 1;
            }
        }
        (freed, evicted)
    }

    /// Selects an eviction victim without removing it; the insert-time
    /// admission gate compares the candidate against it.
    pub(crate) fn pick_victim(
        &self,
        shards_sample: i64,
        keys_sample: i64,
    ) -> Option<(&Shard, Arc<Entry>)> {
        match self.mode() {
            LruMode::Listing => self.pick_victim_by_list(),
            LruMode::Sampling => self.pick_victim_by_sample(shards_sample, keys_sample),
        }
    }

    fn pick_victim_by_list(&self) -> Option<(&Shard, Arc<Entry>)> {
        let start = self.cursor_start();
        let mut best: Option<(&Shard, Arc<Entry>, i64)> = None;

        for i in 0..LIST_VICTIM_PROBES {
            let shard = self.shard_at((start + i) % NUM_SHARDS);
            if shard.len() == 0 {
                continue;
            }
            if let Some((_, entry)) = shard.lru_peek_tail() {
                let touched = entry.touched_at();
                let better = match &best {
                    None => true,
                    Some((_, _, best_at)) => touched < *best_at,
                };
                if better {
                    best = Some((shard, entry, touched));
                }
            }
        }
        best.map(|(shard, entry, _)| (shard, entry))
    }

    fn pick_victim_by_sample(
        &self,
        shards_sample: i64,
        keys_sample: i64,
    ) -> Option<(&Shard, Arc<Entry>)> {
        let mut best: Option<(&Shard, Arc<Entry>, i64)> = None;

        for _ in 0..shards_sample {
            let shard = self.next_shard();
            if shard.len() == 0 {
                continue;
            }
            let Some(core) = shard.try_read() else {
                std::thread::yield_now();
                continue;
            };

            let mut to_scan = keys_sample.min(shard.len());
            for (_, entry) in core.iter() {
                let touched = entry.touched_at();
                let better = match &best {
                    None => true,
                    Some((_, _, best_at)) => touched < *best_at,
                };
                if better {
                    best = Some((shard, Arc::clone(entry), touched));
                }
                to_scan -= 1;
                if to_scan <= 0 {
                    break;
                }
            }
        }
        best.map(|(shard, entry, _)| (shard, entry))
    }
}

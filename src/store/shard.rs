//! A single keyspace shard.
//!
//! Each shard owns a primary-hash-keyed map of entries, an optional LRU
//! list (listing mode), and a bounded refresh queue, all guarded by one
//! reader/writer lock. `len` and `mem` are atomics so global readers and
//! the maintenance workers never take the lock just to count.
//!
//! ## Invariants
//!
//! - `len` equals the map's cardinality; `mem` equals the sum of resident
//!   entry weights (published under the lock, read without it).
//! - When the LRU is enabled, the list and the map hold identical key sets.
//! - The refresh queue may hold keys whose entries were since removed;
//!   consumers revalidate through [`Shard::get`].
//!
//! ## Locking
//!
//! Map reads take the read lock; map writes and any LRU surgery take the
//! write lock. [`Shard::try_read`] and [`Shard::try_write`] bound their
//! spins so opportunistic maintenance never stalls hot-path traffic;
//! [`Shard::touch_lru`] attempts the write lock exactly once and treats
//! failure as a lost touch.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use crate::ds::{LruList, RingQueue};
use crate::entry::Entry;
use crate::shutdown::Watcher;

pub(crate) const REFRESH_QUEUE_CAP: usize = 4096;
pub(crate) const R_LOCK_SPINS: usize = 8;
pub(crate) const RW_LOCK_SPINS: usize = 16;

#[derive(Debug, Default)]
pub(crate) struct ShardCore {
    map: FxHashMap<u64, Arc<Entry>>,
    lru: Option<LruList>,
}

impl ShardCore {
    /// Iterates resident entries; order is the map's, i.e. arbitrary.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &Arc<Entry>)> {
        self.map.iter().map(|(&key, entry)| (key, entry))
    }
}

/// Independent keyspace partition with its own lock, counters, and queue.
#[derive(Debug)]
pub(crate) struct Shard {
    core: RwLock<ShardCore>,
    len: AtomicI64,
    mem: AtomicI64,
    refresh: RingQueue,
}

impl Shard {
    pub(crate) fn new() -> Self {
        Self {
            core: RwLock::new(ShardCore::default()),
            len: AtomicI64::new(0),
            mem: AtomicI64::new(0),
            refresh: RingQueue::new(REFRESH_QUEUE_CAP),
        }
    }

    pub(crate) fn len(&self) -> i64 {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn mem(&self) -> i64 {
        self.mem.load(Ordering::Relaxed)
    }

    pub(crate) fn add_mem(&self, delta: i64) {
        self.mem.fetch_add(delta, Ordering::Relaxed);
    }

    /// Inserts or replaces `key`. Returns `(bytes_delta, len_delta)` for
    /// the caller to publish into the global counters.
    pub(crate) fn set(&self, key: u64, entry: Arc<Entry>) -> (i64, i64) {
        let mut core = self.core.write();
        match core.map.insert(key, Arc::clone(&entry)) {
            Some(old) => {
                if let Some(lru) = core.lru.as_mut() {
                    lru.touch(key);
                }
                let bytes_delta = entry.weight() - old.weight();
                self.mem.fetch_add(bytes_delta, Ordering::Relaxed);
                (bytes_delta, 0)
            }
            None => {
                if let Some(lru) = core.lru.as_mut() {
                    lru.push_front(key);
                }
                let bytes_delta = entry.weight();
                self.len.fetch_add(1, Ordering::Relaxed);
                self.mem.fetch_add(bytes_delta, Ordering::Relaxed);
                (bytes_delta, 1)
            }
        }
    }

    pub(crate) fn get(&self, key: u64) -> Option<Arc<Entry>> {
        self.core.read().map.get(&key).cloned()
    }

    /// Deletes `key`. Returns `(freed_bytes, hit)`.
    pub(crate) fn remove(&self, key: u64) -> (i64, bool) {
        let mut core = self.core.write();
        self.remove_entry(&mut core, key)
    }

    /// Deletion body for callers already holding the write lock.
    pub(crate) fn remove_entry(&self, core: &mut ShardCore, key: u64) -> (i64, bool) {
        match core.map.remove(&key) {
            Some(old) => {
                if let Some(lru) = core.lru.as_mut() {
                    lru.remove(key);
                }
                let freed = old.weight();
                self.mem.fetch_sub(freed, Ordering::Relaxed);
                self.len.fetch_sub(1, Ordering::Relaxed);
                (freed, true)
            }
            None => (0, false),
        }
    }

    /// Drops every entry; returns `(freed_bytes, items)` totals. The
    /// refresh queue keeps its contents — stale keys are skipped on pop.
    pub(crate) fn clear(&self) -> (i64, i64) {
        let mut core = self.core.write();
        let items = self.len.load(Ordering::Relaxed);
        let freed = self.mem.load(Ordering::Relaxed);

        core.map = FxHashMap::default();
        if let Some(lru) = core.lru.as_mut() {
            lru.clear();
        }
        self.len.store(0, Ordering::Relaxed);
        self.mem.store(0, Ordering::Relaxed);
        (freed, items)
    }

    /// Iterates entries under the read or write lock per `write`. Stops
    /// when `f` returns false or the watcher is cancelled.
    pub(crate) fn walk<F>(&self, watcher: &Watcher, write: bool, mut f: F)
    where
        F: FnMut(u64, &Arc<Entry>) -> bool,
    {
        if write {
            let core = self.core.write();
            for (&key, entry) in core.map.iter() {
                if watcher.is_cancelled() || !f(key, entry) {
                    return;
                }
            }
        } else {
            let core = self.core.read();
            for (&key, entry) in core.map.iter() {
                if watcher.is_cancelled() || !f(key, entry) {
                    return;
                }
            }
        }
    }

    pub(crate) fn enqueue_refresh(&self, key: u64) -> bool {
        self.refresh.try_push(key)
    }

    pub(crate) fn dequeue_expired(&self) -> Option<u64> {
        self.refresh.try_pop()
    }

    /// Read lock with a bounded spin; `None` means the shard is busy.
    pub(crate) fn try_read(&self) -> Option<RwLockReadGuard<'_, ShardCore>> {
        for _ in 0..R_LOCK_SPINS {
            if let Some(guard) = self.core.try_read() {
                return Some(guard);
            }
            std::thread::yield_now();
        }
        None
    }

    /// Write lock with a bounded spin; `None` means the shard is busy.
    pub(crate) fn try_write(&self) -> Option<RwLockWriteGuard<'_, ShardCore>> {
        for _ in 0..RW_LOCK_SPINS {
            if let Some(guard) = self.core.try_write() {
                return Some(guard);
            }
            std::thread::yield_now();
        }
        None
    }

    // -- LRU locals (listing mode) ----------------------------------------

    /// Builds the LRU from the current map contents.
    pub(crate) fn enable_lru(&self) {
        let mut core = self.core.write();
        if core.lru.is_none() {
            let mut lru = LruList::new();
            for &key in core.map.keys() {
                lru.push_front(key);
            }
            core.lru = Some(lru);
        }
    }

    pub(crate) fn disable_lru(&self) {
        self.core.write().lru = None;
    }

    /// Move-to-front on access. A single failed write-lock attempt loses
    /// the touch, which is acceptable.
    pub(crate) fn touch_lru(&self, key: u64) {
        if let Some(mut core) = self.core.try_write() {
            if let Some(lru) = core.lru.as_mut() {
                lru.touch(key);
            }
        }
    }

    /// Reads the LRU tail without unlinking it.
    pub(crate) fn lru_peek_tail(&self) -> Option<(u64, Arc<Entry>)> {
        let core = self.core.read();
        let key = core.lru.as_ref()?.peek_tail()?;
        let entry = core.map.get(&key)?;
        Some((key, Arc::clone(entry)))
    }

    /// Unlinks the LRU tail and deletes it from the map, adjusting the
    /// shard counters. Returns the evicted pair.
    pub(crate) fn lru_pop_tail(&self) -> Option<(u64, Arc<Entry>)> {
        let mut core = self.core.write();
        let key = core.lru.as_mut()?.pop_tail()?;
        match core.map.remove(&key) {
            Some(entry) => {
                self.len.fetch_sub(1, Ordering::Relaxed);
                self.mem.fetch_sub(entry.weight(), Ordering::Relaxed);
                Some((key, entry))
            }
            None => None,
        }
    }
}

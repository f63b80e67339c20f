//! Core cache: lookup, admission-gated insert, TTL actions.
//!
//! This layer ties the sharded store to the admission filter and owns the
//! side effects of an access:
//!
//! - a hit renews `touched_at`, nudges the LRU (best-effort), and — when
//!   the entry is observed expired — enqueues it for refresh exactly once;
//! - a miss runs the fetch callback with no lock held, then inserts through
//!   the admission gate; a rejected insert is counted, not an error;
//! - crossing the hard memory ceiling triggers a bounded synchronous
//!   eviction burst before the insert lands.
//!
//! Primary-hash collisions are resolved by the full key fingerprint: a
//! colliding `get` misses and intentionally overwrites the resident entry,
//! which is vanishingly rare with 64+128-bit digests.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::admission::AdmissionControl;
use crate::config::{CacheConfig, TtlMode};
use crate::entry::{Entry, FetchFn, Item, Payload};
use crate::error::{BoxError, CacheError};
use crate::key::Key;
use crate::metrics::{AdmissionStats, CacheCounters};
use crate::shutdown::Watcher;
use crate::store::{Shard, ShardedStore};

/// Sampling width of the insert-time victim pick.
const VICTIM_SHARDS_SAMPLE: i64 = 2;
const VICTIM_KEYS_SAMPLE: i64 = 8;
/// Spin budget of the synchronous hard-limit eviction burst.
const HARD_EVICT_SPINS: i64 = 32;

/// Cache core shared by the facade and the maintenance workers.
pub(crate) struct CacheCore {
    cfg: CacheConfig,
    store: ShardedStore,
    admitter: AdmissionControl,
    counters: CacheCounters,
    soft_limit_bytes: i64,
}

impl CacheCore {
    pub(crate) fn new(watcher: Watcher, cfg: CacheConfig) -> Self {
        let soft_limit_bytes = cfg
            .eviction
            .as_ref()
            .map(|ev| ev.soft_limit_bytes(cfg.store.size_bytes))
            .unwrap_or(0);
        Self {
            store: ShardedStore::new(watcher, &cfg),
            admitter: AdmissionControl::from_config(cfg.admission.as_ref()),
            counters: CacheCounters::default(),
            soft_limit_bytes,
            cfg,
        }
    }

    /// Hit-or-fetch. The callback runs outside any shard lock; its error
    /// propagates verbatim and leaves the store untouched.
    pub(crate) fn get_bytes<F>(&self, key: &str, callback: F) -> Result<Payload, CacheError>
    where
        F: Fn(&dyn Item) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    {
        let fingerprint = Key::from_bytes(key.as_bytes());
        if let Some(entry) = self.get(fingerprint.value()) {
            if entry.key() == &fingerprint {
                return Ok(entry.payload_bytes().unwrap_or_default());
            }
            // Primary-hash collision: fall through and overwrite.
        }

        let callback: Arc<FetchFn> = Arc::new(callback);
        let entry = Arc::new(Entry::new_empty(
            fingerprint,
            self.cfg.ttl_nanos(),
            self.default_ttl_mode(),
            Arc::clone(&callback),
        ));

        let fetched = (callback.as_ref())(entry.as_ref()).map_err(CacheError::Callback)?;
        entry.set_payload(fetched);
        let payload = entry.payload_bytes().unwrap_or_default();
        self.set(entry);
        Ok(payload)
    }

    /// Idempotent delete: absent keys and collisions report success.
    pub(crate) fn del(&self, key: &str) -> bool {
        let fingerprint = Key::from_bytes(key.as_bytes());
        if let Some(entry) = self.get(fingerprint.value()) {
            if entry.key() == &fingerprint {
                let (_, hit) = self.store.remove(fingerprint.value());
                return hit;
            }
            // Collision: the resident entry is someone else's.
        }
        true
    }

    /// TTL action for one expired entry.
    pub(crate) fn on_ttl(&self, entry: &Arc<Entry>) -> Result<(), BoxError> {
        if entry.is_remove_on_ttl() {
            self.store.remove(entry.key().value());
            Ok(())
        } else {
            entry.refresh()
        }
    }

    pub(crate) fn len(&self) -> i64 {
        self.store.len()
    }

    pub(crate) fn mem(&self) -> i64 {
        self.store.mem()
    }

    pub(crate) fn clear(&self) {
        self.store.clear();
    }

    pub(crate) fn admission_stats(&self) -> AdmissionStats {
        self.counters.snapshot()
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub(crate) fn watcher(&self) -> &Watcher {
        self.store.watcher()
    }

    pub(crate) fn soft_limit_bytes(&self) -> i64 {
        self.soft_limit_bytes
    }

    /// Whether background eviction should run now.
    pub(crate) fn soft_limit_overcome(&self) -> bool {
        self.cfg.eviction.is_some() && self.store.len() > 0 && self.store.mem() > self.soft_limit_bytes
    }

    /// Background eviction burst down to the soft limit.
    pub(crate) fn soft_evict(&self, budget: i64) -> (i64, i64) {
        if self.cfg.eviction.is_none() {
            return (0, 0);
        }
        self.store
            .evict_until_within_limit(self.soft_limit_bytes, budget)
    }

    pub(crate) fn peek_expired(&self) -> Option<Arc<Entry>> {
        self.store.peek_expired()
    }

    /// Concurrent iteration over every resident entry. `writable` selects
    /// the shard lock mode; `f` returning false stops that shard's walk.
    pub(crate) fn around<F>(&self, writable: bool, f: F)
    where
        F: Fn(&Arc<Entry>) -> bool + Sync,
    {
        let parallelism = available_parallelism();
        self.store.walk_shards_concurrent(parallelism, |_, shard| {
            shard.walk(self.store.watcher(), writable, |_, entry| f(entry));
        });
    }

    /// Concurrent iteration at shard granularity, for snapshotting.
    pub(crate) fn walk_shards<F>(&self, f: F)
    where
        F: Fn(u64, &Shard) + Sync,
    {
        self.store
            .walk_shards_concurrent(available_parallelism(), f);
    }

    // -- internals ---------------------------------------------------------

    fn default_ttl_mode(&self) -> TtlMode {
        match &self.cfg.lifetime {
            Some(lt) => lt.on_ttl,
            None => TtlMode::Refresh,
        }
    }

    fn get(&self, key: u64) -> Option<Arc<Entry>> {
        let entry = self.store.get(key)?;
        self.touch(&entry);
        Some(entry)
    }

    /// Access side effects: recency stamp, LRU nudge, enqueue-once refresh.
    fn touch(&self, entry: &Arc<Entry>) {
        entry.renew_touched_at();
        let key = entry.key().value();
        self.store.touch(key);
        if entry.is_expired(self.store.expiry()) && entry.enqueue_expired() {
            if !self.store.enqueue_expired(key) {
                // Queue full: roll the flag back so a later access retries.
                entry.dequeue_expired();
            }
        }
    }

    /// Admission-gated insert. Returns whether the entry was persisted.
    pub(crate) fn set(&self, entry: Arc<Entry>) -> bool {
        let key = entry.key().value();
        self.admitter.record(key);

        if let Some(existing) = self.store.get(key) {
            if existing.payload_eq(&entry) {
                self.touch(&existing);
            } else {
                self.update_in_place(&existing, &entry);
            }
            return true;
        }

        if self.admission_consulted() {
            let victim = self
                .store
                .pick_victim(VICTIM_SHARDS_SAMPLE, VICTIM_KEYS_SAMPLE);
            let allowed = match victim {
                Some((_, victim)) => self.admitter.allow(key, victim.key().value()),
                None => false,
            };
            if !allowed {
                self.counters.admission_rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            self.counters.admission_allowed.fetch_add(1, Ordering::Relaxed);
        }

        if self.hard_limit_overcome() {
            let (freed, items) = self
                .store
                .evict_until_within_limit(self.cfg.store.size_bytes, HARD_EVICT_SPINS);
            if freed > 0 || items > 0 {
                self.counters.hard_evicted_items.fetch_add(items, Ordering::Relaxed);
                self.counters.hard_evicted_bytes.fetch_add(freed, Ordering::Relaxed);
            }
        }

        self.store.set(key, entry);
        true
    }

    /// Same key, different payload: swap in place and renew freshness.
    fn update_in_place(&self, existing: &Arc<Entry>, incoming: &Arc<Entry>) {
        let key = existing.key().value();
        self.store.add_mem(key, existing.swap_payload(incoming));
        existing.renew_touched_at();
        existing.renew_updated_at();
        existing.dequeue_expired();
        self.store.touch(key);
    }

    fn admission_consulted(&self) -> bool {
        self.admitter.is_enabled() && self.store.len() > 0 && self.store.mem() > 0
    }

    fn hard_limit_overcome(&self) -> bool {
        self.cfg.eviction.is_some()
            && self.store.len() > 0
            && self.store.mem() > self.cfg.store.size_bytes
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdmissionConfig, EvictionConfig, LifetimeConfig, LruMode};
    use crate::shutdown::Shutdown;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn core_with(cfg: CacheConfig) -> CacheCore {
        let shutdown = Shutdown::new();
        let watcher = shutdown.watcher();
        std::mem::forget(shutdown);
        CacheCore::new(watcher, cfg)
    }

    fn listing_cfg() -> CacheConfig {
        let mut cfg = CacheConfig::default();
        cfg.eviction = Some(EvictionConfig {
            lru_mode: LruMode::Listing,
            ..EvictionConfig::default()
        });
        cfg
    }

    #[test]
    fn get_caches_single_flight() {
        let core = core_with(listing_cfg());

        for _ in 0..100 {
            let payload = core
                .get_bytes("hello_world", |_| Ok(b"test response".to_vec()))
                .unwrap();
            assert_eq!(payload.as_slice(), b"test response");
        }
        assert_eq!(core.len(), 1);
    }

    #[test]
    fn callback_runs_once_per_key() {
        let core = core_with(listing_cfg());
        let invokes = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&invokes);
            let payload = core
                .get_bytes("counted", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(b"payload".to_vec())
                })
                .unwrap();
            assert_eq!(payload.as_slice(), b"payload");
        }
        assert_eq!(invokes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_error_propagates_without_insert() {
        let core = core_with(listing_cfg());
        let err = core
            .get_bytes("failing", |_| Err("error #7".into()))
            .unwrap_err();
        assert!(matches!(err, CacheError::Callback(_)));
        assert!(err.to_string().contains("error #7"));
        assert_eq!(core.len(), 0);
        assert_eq!(core.mem(), 0);
    }

    #[test]
    fn del_is_idempotent() {
        let core = core_with(listing_cfg());
        assert!(core.del("never-existed"));

        core.get_bytes("present", |_| Ok(vec![1, 2, 3])).unwrap();
        assert_eq!(core.len(), 1);
        assert!(core.del("present"));
        assert_eq!(core.len(), 0);
        assert!(core.del("present"));
    }

    #[test]
    fn clear_resets_len_and_mem() {
        let core = core_with(listing_cfg());
        for i in 0..50 {
            core.get_bytes(&format!("key-{i}"), |_| Ok(vec![0u8; 64]))
                .unwrap();
        }
        assert_eq!(core.len(), 50);
        core.clear();
        assert_eq!(core.len(), 0);
        assert_eq!(core.mem(), 0);
    }

    #[test]
    fn same_payload_reinsert_touches_instead_of_swapping() {
        let core = core_with(listing_cfg());
        core.get_bytes("stable", |_| Ok(b"same".to_vec())).unwrap();
        let mem_before = core.mem();

        // A second set with identical payload bytes must not change usage.
        let entry = Arc::new(Entry::new_empty(
            Key::from_bytes(b"stable"),
            0,
            TtlMode::Refresh,
            Arc::new(|_| Ok(Vec::new())),
        ));
        entry.set_payload(b"same".to_vec());
        assert!(core.set(entry));
        assert_eq!(core.mem(), mem_before);
        assert_eq!(core.len(), 1);
    }

    #[test]
    fn different_payload_updates_in_place() {
        let core = core_with(listing_cfg());
        core.get_bytes("mutable", |_| Ok(vec![0u8; 100])).unwrap();
        let resident = core.store.get(Key::from_bytes(b"mutable").value()).unwrap();
        let mem_before = core.mem();

        let incoming = Arc::new(Entry::new_empty(
            Key::from_bytes(b"mutable"),
            0,
            TtlMode::Refresh,
            Arc::new(|_| Ok(Vec::new())),
        ));
        incoming.set_payload(vec![1u8; 300]);
        assert!(core.set(Arc::clone(&incoming)));

        // Entry object survives; payload and usage change.
        assert_eq!(core.len(), 1);
        assert!(core.mem() > mem_before);
        assert_eq!(
            resident.payload_bytes().unwrap().as_slice(),
            vec![1u8; 300].as_slice()
        );
        let (_, shard_mem) = core.store.shard_totals();
        assert_eq!(core.mem(), shard_mem);
    }

    #[test]
    fn hard_limit_breach_evicts_synchronously() {
        let mut cfg = listing_cfg();
        cfg.store.size_bytes = 64 * 1024;
        let core = core_with(cfg);

        for i in 0..32 {
            core.get_bytes(&format!("chunk-{i}"), |_| Ok(vec![0u8; 16 * 1024]))
                .unwrap();
        }
        let stats = core.admission_stats();
        assert!(stats.hard_evicted_items > 0);
        assert!(stats.hard_evicted_bytes > 0);
    }

    #[test]
    fn admission_gate_counts_decisions() {
        let mut cfg = listing_cfg();
        cfg.admission = Some(AdmissionConfig::default());
        let core = core_with(cfg);

        // First insert: store empty, gate not consulted.
        core.get_bytes("seed", |_| Ok(vec![0u8; 32])).unwrap();
        assert_eq!(core.len(), 1);

        // Cold keys over a near-empty store are rejected — either no
        // victim sample comes back or the doorkeeper has not seen them —
        // and the rejection is counted, not surfaced as an error.
        for i in 0..64 {
            let payload = core
                .get_bytes(&format!("cold-{i}"), |_| Ok(vec![0u8; 32]))
                .unwrap();
            // A rejected insert still serves the fetched bytes.
            assert_eq!(payload.len(), 32);
        }
        let stats = core.admission_stats();
        assert_eq!(stats.allowed + stats.rejected, 64);
        assert!(stats.rejected > 0);
    }

    #[test]
    fn expired_hit_enqueues_once() {
        let mut cfg = listing_cfg();
        cfg.lifetime = Some(LifetimeConfig {
            ttl: Duration::from_secs(60),
            ..LifetimeConfig::default()
        });
        let core = core_with(cfg);

        core.get_bytes("aging", |_| Ok(vec![0u8; 8])).unwrap();
        let entry = core.store.get(Key::from_bytes(b"aging").value()).unwrap();
        entry.untouch_updated_at();

        // Two hits: the first wins the enqueue CAS, the second must not
        // enqueue again.
        core.get_bytes("aging", |_| Ok(vec![0u8; 8])).unwrap();
        assert!(entry.is_queued_for_refresh());
        core.get_bytes("aging", |_| Ok(vec![0u8; 8])).unwrap();

        let from_queue = core.peek_expired().unwrap();
        assert!(Arc::ptr_eq(&from_queue, &entry));
        // Queue drained: nothing else pending.
        assert!(core.store.shard(entry.key().value()).dequeue_expired().is_none());
    }

    #[test]
    fn on_ttl_remove_mode_drops_entry() {
        let mut cfg = CacheConfig::default();
        cfg.lifetime = Some(LifetimeConfig {
            on_ttl: TtlMode::Remove,
            ttl: Duration::from_secs(1),
            ..LifetimeConfig::default()
        });
        let core = core_with(cfg);

        core.get_bytes("doomed", |_| Ok(vec![0u8; 8])).unwrap();
        let entry = core.store.get(Key::from_bytes(b"doomed").value()).unwrap();
        assert!(entry.is_remove_on_ttl());

        core.on_ttl(&entry).unwrap();
        assert_eq!(core.len(), 0);
    }

    #[test]
    fn on_ttl_refresh_mode_reruns_callback() {
        let mut cfg = CacheConfig::default();
        cfg.lifetime = Some(LifetimeConfig {
            ttl: Duration::from_secs(60),
            ..LifetimeConfig::default()
        });
        let core = core_with(cfg);

        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshes);
        core.get_bytes("renewing", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(b"v".to_vec())
        })
        .unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        let entry = core.store.get(Key::from_bytes(b"renewing").value()).unwrap();
        core.on_ttl(&entry).unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(core.len(), 1);
    }

    #[test]
    fn around_visits_every_entry() {
        let core = core_with(listing_cfg());
        for i in 0..40 {
            core.get_bytes(&format!("key-{i}"), |_| Ok(vec![0u8; 8]))
                .unwrap();
        }
        let seen = AtomicUsize::new(0);
        core.around(false, |_| {
            seen.fetch_add(1, Ordering::Relaxed);
            true
        });
        assert_eq!(seen.load(Ordering::Relaxed), 40);
    }
}

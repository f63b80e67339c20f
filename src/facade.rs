//! Public cache handle.
//!
//! [`Cache::new`] validates the configuration and composes the subsystems
//! under one cancellation scope: the cached clock, the core store, the
//! eviction and lifetime workers, and the telemetry logger. [`Cache::close`]
//! (also run on drop) cancels that scope and joins the workers; it is
//! idempotent.
//!
//! ## Example Usage
//!
//! ```
//! use embercache::{Cache, CacheConfig};
//!
//! let cache = Cache::new(CacheConfig::default()).unwrap();
//!
//! let payload = cache
//!     .get("greeting", |_item| Ok(b"hello".to_vec()))
//!     .unwrap();
//! assert_eq!(payload.as_slice(), b"hello");
//!
//! // Second call is a hit; the callback does not run again.
//! let payload = cache
//!     .get("greeting", |_item| unreachable!("cached"))
//!     .unwrap();
//! assert_eq!(payload.as_slice(), b"hello");
//!
//! assert!(cache.del("greeting"));
//! cache.close();
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheCore;
use crate::config::CacheConfig;
use crate::entry::{Entry, Item, Payload};
use crate::error::{BoxError, CacheError, ConfigError};
use crate::metrics::{AdmissionStats, EvictionStats, LifetimeStats};
use crate::shutdown::Shutdown;
use crate::telemetry;
use crate::time;
use crate::workers::{Evictor, Lifetimer};

/// Embeddable byte cache: sharded store, TinyLFU admission, bounded
/// eviction, TTL refresh.
///
/// Cloning is not provided; share a `Cache` behind an `Arc` if multiple
/// owners need it. All methods take `&self`.
pub struct Cache {
    core: Arc<CacheCore>,
    evictor: Arc<Evictor>,
    lifetimer: Arc<Lifetimer>,
    shutdown: Shutdown,
}

impl Cache {
    /// Validates `cfg` and starts the cache with its maintenance workers.
    pub fn new(cfg: CacheConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let shutdown = Shutdown::new();
        time::run_if_enabled(shutdown.watcher(), cfg.store.cache_time_enabled);

        let core = Arc::new(CacheCore::new(shutdown.watcher(), cfg));
        let evictor = Arc::new(Evictor::from_config(
            core.config().eviction.as_ref(),
            Arc::clone(&core),
        ));
        let lifetimer = Arc::new(Lifetimer::from_config(
            core.config().lifetime.as_ref(),
            Arc::clone(&core),
        ));
        telemetry::run_if_enabled(
            shutdown.watcher(),
            Arc::clone(&core),
            Arc::clone(&evictor),
            Arc::clone(&lifetimer),
        );

        Ok(Self {
            core,
            evictor,
            lifetimer,
            shutdown,
        })
    }

    /// Returns the cached payload for `key`, or runs `callback` to produce
    /// it. The callback receives an [`Item`] capability to tune the entry's
    /// TTL; its error is returned verbatim and nothing is inserted.
    ///
    /// On a miss the produced entry is inserted through the admission gate;
    /// a rejected insert still returns the fetched bytes.
    pub fn get<F>(&self, key: &str, callback: F) -> Result<Payload, CacheError>
    where
        F: Fn(&dyn Item) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    {
        self.core.get_bytes(key, callback)
    }

    /// Deletes `key`. Idempotent: an absent key (or a primary-hash
    /// collision with a different key) reports `true`.
    pub fn del(&self, key: &str) -> bool {
        self.core.del(key)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.core.clear();
    }

    /// Number of resident entries.
    pub fn len(&self) -> i64 {
        self.core.len()
    }

    /// True when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident payload weight in bytes.
    pub fn mem(&self) -> i64 {
        self.core.mem()
    }

    /// Sends one eviction signal, waiting up to `timeout` for the worker
    /// pool to accept it.
    pub fn force_evict(&self, timeout: Duration) -> Result<(), CacheError> {
        self.evictor.force_call(timeout)
    }

    /// Admission decisions and hard-limit eviction counters.
    pub fn admission_stats(&self) -> AdmissionStats {
        self.core.admission_stats()
    }

    /// Background eviction counters.
    pub fn eviction_stats(&self) -> EvictionStats {
        self.evictor.stats()
    }

    /// TTL worker counters.
    pub fn lifetime_stats(&self) -> LifetimeStats {
        self.lifetimer.stats()
    }

    /// Concurrent iteration over every resident entry, for snapshotting
    /// and maintenance. `writable` takes each shard's write lock so the
    /// walk is exclusive with mutators; `f` returning false stops the walk
    /// within that shard.
    pub fn around<F>(&self, writable: bool, f: F)
    where
        F: Fn(&Arc<Entry>) -> bool + Sync,
    {
        self.core.around(writable, f);
    }

    /// Shard-aware variant of [`Cache::around`]: `f` additionally receives
    /// the shard index, letting consumers partition work (e.g. a
    /// shard-parallel snapshot) without extra bookkeeping.
    pub fn walk_shards<F>(&self, writable: bool, f: F)
    where
        F: Fn(u64, &Arc<Entry>) -> bool + Sync,
    {
        self.core.walk_shards(|idx, shard| {
            shard.walk(self.core.watcher(), writable, |_, entry| f(idx, entry));
        });
    }

    /// Cancels every worker and background thread. Idempotent; also runs
    /// on drop.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.evictor.close();
        self.lifetimer.close();
        self.shutdown.cancel();
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.close();
    }
}

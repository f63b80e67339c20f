//! Maintenance counters and their snapshots.
//!
//! Every block is a set of relaxed atomics bumped on the hot path and read
//! by `snapshot()` into a plain struct. Counters are best-effort monotonic:
//! a reader may observe a transient skew between related fields while a
//! writer is mid-publish, and snapshots from different blocks are not taken
//! at one instant. Deltas between snapshots aggregate losslessly.

use std::sync::atomic::{AtomicI64, Ordering};

// =============================================================================
// Cache (admission + hard eviction)
// =============================================================================

/// Counters owned by the core cache.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) admission_allowed: AtomicI64,
    pub(crate) admission_rejected: AtomicI64,
    pub(crate) hard_evicted_items: AtomicI64,
    pub(crate) hard_evicted_bytes: AtomicI64,
}

/// Snapshot of admission decisions and hard-limit evictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Inserts that passed the admission gate.
    pub allowed: i64,
    /// Inserts rejected by the admission gate (not an error).
    pub rejected: i64,
    /// Entries evicted synchronously on hard-limit breaches.
    pub hard_evicted_items: i64,
    /// Bytes freed by hard-limit evictions.
    pub hard_evicted_bytes: i64,
}

impl CacheCounters {
    pub(crate) fn snapshot(&self) -> AdmissionStats {
        AdmissionStats {
            allowed: self.admission_allowed.load(Ordering::Relaxed),
            rejected: self.admission_rejected.load(Ordering::Relaxed),
            hard_evicted_items: self.hard_evicted_items.load(Ordering::Relaxed),
            hard_evicted_bytes: self.hard_evicted_bytes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Eviction worker
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct EvictorCounters {
    pub(crate) scans: AtomicI64,
    pub(crate) scan_hits: AtomicI64,
    pub(crate) evicted_items: AtomicI64,
    pub(crate) evicted_bytes: AtomicI64,
}

/// Snapshot of the background (soft-limit) eviction worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    /// Provider ticks that inspected the store.
    pub scans: i64,
    /// Ticks that found the soft limit crossed and signalled the pool.
    pub scan_hits: i64,
    /// Entries evicted by the pool.
    pub evicted_items: i64,
    /// Bytes freed by the pool.
    pub evicted_bytes: i64,
}

impl EvictorCounters {
    pub(crate) fn snapshot(&self) -> EvictionStats {
        EvictionStats {
            scans: self.scans.load(Ordering::Relaxed),
            scan_hits: self.scan_hits.load(Ordering::Relaxed),
            evicted_items: self.evicted_items.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Lifetime worker
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct LifetimeCounters {
    pub(crate) affected: AtomicI64,
    pub(crate) errors: AtomicI64,
    pub(crate) scans: AtomicI64,
    pub(crate) scan_hits: AtomicI64,
    pub(crate) scan_misses: AtomicI64,
}

/// Snapshot of the TTL (refresh/remove) worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifetimeStats {
    /// Entries successfully refreshed or removed.
    pub affected: i64,
    /// Refresh callbacks that returned an error.
    pub errors: i64,
    /// Expired-entry scans performed.
    pub scans: i64,
    /// Scans that yielded an expired entry.
    pub hits: i64,
    /// Scans that found nothing expired.
    pub misses: i64,
}

impl LifetimeCounters {
    pub(crate) fn snapshot(&self) -> LifetimeStats {
        LifetimeStats {
            affected: self.affected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            hits: self.scan_hits.load(Ordering::Relaxed),
            misses: self.scan_misses.load(Ordering::Relaxed),
        }
    }
}

//! Cache entries.
//!
//! An [`Entry`] owns one byte payload behind an atomically swappable
//! reference, the fetch callback that produced it, and a set of atomic
//! fields driving recency (`touched_at`), freshness (`updated_at`, `ttl`),
//! and the refresh pipeline (`queued_for_refresh`, `remove_on_ttl`).
//!
//! ## Key Concepts
//!
//! - **Whole-payload visibility**: readers load the payload through
//!   `ArcSwapOption`, so they observe either the previous or the next byte
//!   slice in full, never a partial write.
//! - **Enqueue-once**: `enqueue_expired` transitions the queued flag 0→1
//!   via compare-and-set, so each expiration enqueues at most once until a
//!   `dequeue_expired` clears it.
//! - **Refresh success contract**: a successful [`Entry::refresh`] swaps in
//!   the fresh payload, renews `updated_at`, and clears the queued flag in
//!   one `set_payload`; a failing callback changes nothing.
//!
//! Expiry is deterministic (`elapsed > ttl`) or stochastic: past a
//! `coefficient * ttl` floor the entry is treated as expired with
//! probability `1 - exp(-beta * elapsed / ttl)`, which spreads refresh work
//! ahead of the deadline instead of synchronising it on the TTL boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::{ExpiryPolicy, TtlMode};
use crate::error::BoxError;
use crate::key::Key;
use crate::time;

/// Shared payload bytes as returned to callers.
pub type Payload = Arc<Vec<u8>>;

/// Fetch callback bound to an entry: produces fresh payload bytes on miss
/// and on every background refresh.
pub type FetchFn = dyn Fn(&dyn Item) -> Result<Vec<u8>, BoxError> + Send + Sync;

/// Capability handed to fetch callbacks.
///
/// Lets the callback tune the entry it is populating without exposing the
/// rest of the cache.
pub trait Item {
    /// Overrides the entry's lifetime. Zero disables expiry.
    fn set_ttl(&self, ttl: Duration);
    /// Selects what happens when the TTL elapses.
    fn set_ttl_mode(&self, mode: TtlMode);
}

const FLAG_SET: i32 = 1;
const FLAG_CLEAR: i32 = 0;

/// Payload holder with atomic freshness and recency state.
pub struct Entry {
    key: Key,
    payload: ArcSwapOption<Vec<u8>>,
    callback: Arc<FetchFn>,
    ttl_ns: AtomicI64,
    updated_at_ns: AtomicI64,
    touched_at_ns: AtomicI64,
    queued_for_refresh: AtomicI32,
    remove_on_ttl: AtomicI32,
}

impl Entry {
    /// Creates an entry with no payload yet, bound to its fetch callback.
    pub(crate) fn new_empty(key: Key, ttl_ns: i64, mode: TtlMode, callback: Arc<FetchFn>) -> Self {
        Self {
            key,
            payload: ArcSwapOption::empty(),
            callback,
            ttl_ns: AtomicI64::new(ttl_ns),
            updated_at_ns: AtomicI64::new(0),
            touched_at_ns: AtomicI64::new(0),
            queued_for_refresh: AtomicI32::new(FLAG_CLEAR),
            remove_on_ttl: AtomicI32::new(match mode {
                TtlMode::Refresh => FLAG_CLEAR,
                TtlMode::Remove => FLAG_SET,
            }),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Resident weight: fixed fields plus payload capacity.
    pub fn weight(&self) -> i64 {
        let payload_cap = self
            .payload
            .load()
            .as_ref()
            .map(|p| p.capacity())
            .unwrap_or(0);
        std::mem::size_of::<Entry>() as i64 + payload_cap as i64
    }

    /// Current payload, if one was ever set.
    pub fn payload_bytes(&self) -> Option<Payload> {
        self.payload.load_full()
    }

    /// Stores a fresh payload: renews both timestamps and clears the
    /// refresh-queued flag.
    pub(crate) fn set_payload(&self, bytes: Vec<u8>) {
        let now = time::unix_nano();
        self.touched_at_ns.store(now, Ordering::Relaxed);
        self.updated_at_ns.store(now, Ordering::Relaxed);
        self.queued_for_refresh.store(FLAG_CLEAR, Ordering::Relaxed);
        self.payload.store(Some(Arc::new(bytes)));
    }

    /// Takes `other`'s payload in place of this entry's and returns the
    /// resulting weight delta.
    pub(crate) fn swap_payload(&self, other: &Entry) -> i64 {
        let new_weight = other.weight();
        let old_weight = self.weight();
        self.payload.store(other.payload.load_full());
        new_weight - old_weight
    }

    /// Cheap payload equality: exact below 32 bytes, sampled xxh3 windows
    /// (head, middle, tail) above.
    pub(crate) fn payload_eq(&self, other: &Entry) -> bool {
        let a = self.payload.load_full();
        let b = other.payload.load_full();
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                if a.len() < 32 {
                    return a == b;
                }
                let mid = a.len() / 2;
                let sample = |s: &[u8]| {
                    xxh3_64(&s[..8]) ^ xxh3_64(&s[mid..mid + 8]) ^ xxh3_64(&s[s.len() - 8..])
                };
                sample(&a) == sample(&b)
            }
            _ => false,
        }
    }

    /// Invokes the callback and swaps in the result; errors propagate with
    /// no mutation.
    pub(crate) fn refresh(&self) -> Result<(), BoxError> {
        let fresh = (self.callback.as_ref())(self)?;
        self.set_payload(fresh);
        Ok(())
    }

    pub fn touched_at(&self) -> i64 {
        self.touched_at_ns.load(Ordering::Relaxed)
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn renew_touched_at(&self) {
        self.touched_at_ns.store(time::unix_nano(), Ordering::Relaxed);
    }

    pub(crate) fn renew_updated_at(&self) {
        self.updated_at_ns.store(time::unix_nano(), Ordering::Relaxed);
    }

    /// Backdates `updated_at` a full TTL plus one coarse clock tick, so
    /// the next expiry check fires even when the cached clock is active.
    #[cfg(test)]
    pub(crate) fn untouch_updated_at(&self) {
        let ttl = self.ttl_ns.load(Ordering::Relaxed);
        let tick = 20_000_000; // 20 ms in nanoseconds
        self.updated_at_ns
            .store(time::unix_nano() - ttl - tick, Ordering::Relaxed);
    }

    pub(crate) fn is_remove_on_ttl(&self) -> bool {
        self.remove_on_ttl.load(Ordering::Relaxed) == FLAG_SET
    }

    /// Attempts the 0→1 queued transition; true when this caller won.
    pub(crate) fn enqueue_expired(&self) -> bool {
        self.queued_for_refresh
            .compare_exchange(FLAG_CLEAR, FLAG_SET, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Clears the queued flag so a later access may enqueue again.
    pub(crate) fn dequeue_expired(&self) {
        self.queued_for_refresh.store(FLAG_CLEAR, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_queued_for_refresh(&self) -> bool {
        self.queued_for_refresh.load(Ordering::Acquire) == FLAG_SET
    }

    /// Expiry check under the given policy. `ttl == 0` never expires.
    pub(crate) fn is_expired(&self, policy: &ExpiryPolicy) -> bool {
        if policy.enabled && policy.stochastic {
            return self.is_probably_expired(policy.beta, policy.coefficient);
        }
        self.is_deterministically_expired()
    }

    fn is_deterministically_expired(&self) -> bool {
        let ttl = self.ttl_ns.load(Ordering::Relaxed);
        if ttl == 0 {
            return false;
        }
        let elapsed = time::unix_nano() - self.updated_at_ns.load(Ordering::Relaxed);
        elapsed > ttl
    }

    fn is_probably_expired(&self, beta: f64, coefficient: f64) -> bool {
        let ttl = self.ttl_ns.load(Ordering::Relaxed);
        if ttl == 0 {
            return false;
        }
        let elapsed = time::unix_nano() - self.updated_at_ns.load(Ordering::Relaxed);

        // Hard floor: nothing refreshes before coefficient * ttl.
        let min_stale = (ttl as f64 * coefficient) as i64;
        if min_stale > elapsed {
            return false;
        }

        let probability = 1.0 - (-beta * (elapsed as f64 / ttl as f64)).exp();
        rand::random::<f64>() < probability
    }
}

impl Item for Entry {
    fn set_ttl(&self, ttl: Duration) {
        self.ttl_ns.store(ttl.as_nanos() as i64, Ordering::Relaxed);
    }

    fn set_ttl_mode(&self, mode: TtlMode) {
        let flag = match mode {
            TtlMode::Refresh => FLAG_CLEAR,
            TtlMode::Remove => FLAG_SET,
        };
        self.remove_on_ttl.store(flag, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("ttl_ns", &self.ttl_ns.load(Ordering::Relaxed))
            .field("updated_at_ns", &self.updated_at())
            .field("touched_at_ns", &self.touched_at())
            .finish_non_exhaustive()
    }
}

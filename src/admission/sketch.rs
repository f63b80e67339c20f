//! Count-Min Sketch over 4-bit saturating counters.
//!
//! ## Architecture
//!
//! ```text
//!   words: Vec<AtomicU64>, 16 nibble lanes per word
//!
//!   word 0:  [n15|n14|…|n1|n0]     counter idx -> (idx >> 4, (idx & 15) * 4)
//!   word 1:  [n31|n30|…|n17|n16]
//!   …
//!
//!   increment(h): bump 4 lanes at mix64-derived indices (saturate at 15)
//!   estimate(h):  min of the same 4 lanes
//!   reset():      every lane halved, (w >> 1) & 0x7777…
//! ```
//!
//! ## Key Concepts
//!
//! - **Bounded CAS**: lane updates retry at most 64 times with cooperative
//!   backoff; a dropped increment under extreme contention is acceptable
//!   for an approximate frequency estimate.
//! - **Aging**: an `adds` counter tracks the logical window. Once it
//!   crosses `reset_at = sample_multiplier * counters`, exactly one caller
//!   (guarded by a CAS flag) halves every lane, forgetting old popularity.
//!
//! Hot-path reads and writes allocate nothing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::admission::mix::mix64;

const NIBBLE_MASK: u64 = 0xF;
const HALF_NIBBLES: u64 = 0x7777_7777_7777_7777;

// Bounded CAS retry policy, shared with the doorkeeper.
pub(crate) const MAX_CAS_TRIES: usize = 64;
pub(crate) const YIELD_EVERY_TRIES: usize = 8;
pub(crate) const SLEEP_AFTER_TRIES: usize = 32;

const DEFAULT_SAMPLE_MULTIPLIER: usize = 10;

/// TinyLFU frequency sketch: 4 probes per key, min-of-4 estimates.
#[derive(Debug)]
pub(crate) struct Sketch {
    words: Vec<AtomicU64>,
    /// `counters - 1`; the counter count is a power of two.
    mask: u32,
    /// Successful increments in the current logical window.
    adds: AtomicU64,
    /// Window size triggering aging.
    reset_at: u64,
    /// Best-effort guard so one thread performs the full-table halving.
    aging_active: AtomicU32,
}

impl Sketch {
    /// `counters` must be a power of two > 0. `sample_multiplier == 0`
    /// selects the default window.
    pub(crate) fn new(counters: usize, sample_multiplier: usize) -> Self {
        assert!(
            counters > 0 && counters.is_power_of_two(),
            "sketch: counter count must be a power of two"
        );
        let word_count = counters.div_ceil(16);
        let multiplier = if sample_multiplier == 0 {
            DEFAULT_SAMPLE_MULTIPLIER
        } else {
            sample_multiplier
        };
        Self {
            words: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            mask: (counters - 1) as u32,
            adds: AtomicU64::new(0),
            reset_at: (multiplier * counters) as u64,
            aging_active: AtomicU32::new(0),
        }
    }

    /// Bumps the 4 lanes of `h`, saturating each at 15.
    pub(crate) fn increment(&self, h: u64) {
        self.maybe_age();

        let (i0, i1, i2, i3) = self.probes(h);
        self.inc_at(i0);
        self.inc_at(i1);
        self.inc_at(i2);
        self.inc_at(i3);

        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    /// Min of the 4 lanes of `h`; lock-free loads only.
    pub(crate) fn estimate(&self, h: u64) -> u8 {
        let (i0, i1, i2, i3) = self.probes(h);
        self.lane_at(i0)
            .min(self.lane_at(i1))
            .min(self.lane_at(i2))
            .min(self.lane_at(i3))
    }

    /// Halves every lane. Called on window boundaries and by
    /// `AdmissionControl::reset`.
    pub(crate) fn reset(&self) {
        for word in &self.words {
            for tries in 1..=MAX_CAS_TRIES {
                let old = word.load(Ordering::Relaxed);
                let halved = (old >> 1) & HALF_NIBBLES;
                if word
                    .compare_exchange_weak(old, halved, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                backoff(tries);
            }
            // Skipping a hot word at the bound is acceptable; aging is
            // best-effort.
        }
    }

    #[inline]
    fn probes(&self, h: u64) -> (u32, u32, u32, u32) {
        let i0 = (h as u32) & self.mask;
        let h = mix64(h);
        let i1 = (h as u32) & self.mask;
        let h = mix64(h);
        let i2 = (h as u32) & self.mask;
        let h = mix64(h);
        let i3 = (h as u32) & self.mask;
        (i0, i1, i2, i3)
    }

    fn inc_at(&self, idx: u32) {
        let (word, shift) = word_shift(idx);
        let slot = &self.words[word];

        for tries in 1..=MAX_CAS_TRIES {
            let old = slot.load(Ordering::Relaxed);
            if (old >> shift) & NIBBLE_MASK == NIBBLE_MASK {
                return; // saturated
            }
            let bumped = old + (1 << shift);
            if slot
                .compare_exchange_weak(old, bumped, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff(tries);
        }
        // Lossy by design at the CAS bound.
    }

    #[inline]
    fn lane_at(&self, idx: u32) -> u8 {
        let (word, shift) = word_shift(idx);
        ((self.words[word].load(Ordering::Relaxed) >> shift) & NIBBLE_MASK) as u8
    }

    fn maybe_age(&self) {
        if self.adds.load(Ordering::Relaxed) < self.reset_at {
            return;
        }
        if self
            .aging_active
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            // Re-check under the guard so losers queued behind the winner
            // don't halve twice.
            if self.adds.load(Ordering::Relaxed) >= self.reset_at {
                self.reset();
                self.adds.store(0, Ordering::Relaxed);
            }
            self.aging_active.store(0, Ordering::Release);
        }
    }
}

/// Maps a counter index to (word index, bit shift): 16 nibbles per word.
#[inline]
fn word_shift(idx: u32) -> (usize, u32) {
    ((idx >> 4) as usize, (idx & 0xF) << 2)
}

/// Cooperative backoff between CAS retries: spin hints early, thread yields
/// once the retry count is high.
#[inline]
pub(crate) fn backoff(tries: usize) {
    if tries % YIELD_EVERY_TRIES == 0 {
        std::hint::spin_loop();
        if tries >= SLEEP_AFTER_TRIES {
            std::thread::yield_now();
        }
    }
}

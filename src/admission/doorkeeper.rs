//! Bloom-like admission pre-filter.
//!
//! The doorkeeper suppresses one-hit wonders: a key's first sighting only
//! sets its three bits here, and the frequency sketch is touched from the
//! second sighting on. It is reset together with sketch aging to keep the
//! false-positive rate bounded under churn.
//!
//! All operations are lock-free atomic loads and bounded CAS writes; a set
//! that gives up under extreme contention is an acceptable loss for a
//! probabilistic filter.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::admission::mix::{mix64, next_pow2};
use crate::admission::sketch::{MAX_CAS_TRIES, backoff};

const PROBES: usize = 3;

/// Power-of-two-sized bitset with 3 probes per key.
#[derive(Debug)]
pub(crate) struct Doorkeeper {
    bits: Vec<AtomicU64>,
    /// Index mask: bit count rounded to a power of two, minus one.
    mask: u32,
}

impl Doorkeeper {
    /// Sizes the bit array to the next power of two >= `total_bits`.
    pub(crate) fn new(total_bits: usize) -> Self {
        let bits = next_pow2(total_bits.max(1));
        let word_count = bits.div_ceil(64);
        Self {
            bits: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            mask: (bits - 1) as u32,
        }
    }

    /// True iff all three probed bits are set. Read-only.
    pub(crate) fn probably_seen(&self, h: u64) -> bool {
        self.indices(h).into_iter().all(|i| self.get(i))
    }

    /// Returns true when the key was probably seen already; otherwise sets
    /// the missing bits and returns false. The common admission path.
    pub(crate) fn seen_or_add(&self, h: u64) -> bool {
        let indices = self.indices(h);
        if indices.into_iter().all(|i| self.get(i)) {
            return true;
        }
        for i in indices {
            self.set(i);
        }
        false
    }

    /// Clears every bit. Called on aging boundaries.
    pub(crate) fn reset(&self) {
        for word in &self.bits {
            word.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    fn indices(&self, h: u64) -> [u32; PROBES] {
        let i0 = (h as u32) & self.mask;
        let h = mix64(h);
        let i1 = (h as u32) & self.mask;
        let h = mix64(h);
        let i2 = (h as u32) & self.mask;
        [i0, i1, i2]
    }

    #[inline]
    fn get(&self, i: u32) -> bool {
        let (word, bit) = word_bit(i);
        self.bits[word].load(Ordering::Relaxed) & bit != 0
    }

    fn set(&self, i: u32) {
        let (word, bit) = word_bit(i);
        let slot = &self.bits[word];

        for tries in 1..=MAX_CAS_TRIES {
            let old = slot.load(Ordering::Relaxed);
            let with_bit = old | bit;
            if with_bit == old
                || slot
                    .compare_exchange_weak(old, with_bit, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            backoff(tries);
        }
        // Losing the bit at the CAS bound is tolerated.
    }
}

/// Maps a flat bit index to (word index, bit mask).
#[inline]
fn word_bit(i: u32) -> (usize, u64) {
    ((i >> 6) as usize, 1u64 << (i & 63))
}

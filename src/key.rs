//! Key fingerprints.
//!
//! A key is the triple `(v, hi, lo)`: a 64-bit primary hash used for shard
//! routing and map lookup, plus a 128-bit secondary digest of the same bytes
//! that disambiguates primary-hash collisions without storing the original
//! key material. Both digests come from one xxh3 pass over the input.
//!
//! The streaming hasher is pooled per thread so fingerprinting allocates
//! nothing on the hot path.

use std::cell::RefCell;

use xxhash_rust::xxh3::Xxh3;

thread_local! {
    static HASHER: RefCell<Xxh3> = RefCell::new(Xxh3::new());
}

/// Immutable key fingerprint. Equality is field-wise on all three digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    v: u64,
    hi: u64,
    lo: u64,
}

impl Key {
    /// Fingerprints `data` in a single pass over a pooled hasher.
    pub fn from_bytes(data: &[u8]) -> Self {
        HASHER.with(|cell| {
            let mut hasher = cell.borrow_mut();
            hasher.reset();
            hasher.update(data);
            let v = hasher.digest();
            let wide = hasher.digest128();
            Self {
                v,
                hi: (wide >> 64) as u64,
                lo: wide as u64,
            }
        })
    }

    /// The 64-bit primary hash: map key and shard selector.
    pub fn value(&self) -> u64 {
        self.v
    }

    #[cfg(test)]
    pub(crate) fn from_parts(v: u64, hi: u64, lo: u64) -> Self {
        Self { v, hi, lo }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: fingerprinting is deterministic.
        #[test]
        fn prop_deterministic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(Key::from_bytes(&data), Key::from_bytes(&data));
        }

        /// Property: distinct short strings produce distinct fingerprints.
        #[test]
        fn prop_distinct_suffix(n in 0u32..100_000) {
            let a = Key::from_bytes(format!("key-{n}").as_bytes());
            let b = Key::from_bytes(format!("key-{}", n + 1).as_bytes());
            prop_assert_ne!(a, b);
        }
    }
}

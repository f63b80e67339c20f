//! Sharded TinyLFU admitter.
//!
//! Each admitter shard pairs a frequency [`Sketch`] with a [`Doorkeeper`]
//! and is cache-line padded so shards never share a line. Keys route to a
//! shard by `hash & mask`.
//!
//! `record` is the observation path: the first sighting of a key only sets
//! its doorkeeper bits; repeat sightings increment the sketch. `allow` is
//! the replacement decision: an unseen candidate is conservatively
//! rejected, and an admitted candidate must be *strictly* more popular than
//! the victim — ties keep the resident entry to avoid churn on cold keys.
//!
//! The candidate's doorkeeper and frequency live in the candidate's shard;
//! the victim's frequency is estimated in the victim's own shard, since the
//! two keys generally route to different shards.

use crossbeam_utils::CachePadded;

use crate::admission::doorkeeper::Doorkeeper;
use crate::admission::mix::next_pow2;
use crate::admission::sketch::Sketch;
use crate::config::AdmissionConfig;

struct AdmitterShard {
    sketch: Sketch,
    door: Doorkeeper,
}

/// TinyLFU admission filter over cache-line-padded shards.
pub(crate) struct ShardedAdmitter {
    mask: u64,
    shards: Vec<CachePadded<AdmitterShard>>,
}

impl ShardedAdmitter {
    pub(crate) fn new(cfg: &AdmissionConfig) -> Self {
        let per_shard_cap = (cfg.capacity / cfg.shards).max(1);

        // Counter table: power of two >= the per-shard capacity, clamped
        // from below by the configured minimum.
        let table_len = next_pow2(per_shard_cap).max(cfg.min_table_len_per_shard.max(1));

        // Doorkeeper sized proportionally to the counter space.
        let door_bits = table_len * cfg.door_bits_per_counter;

        let shards = (0..cfg.shards)
            .map(|_| {
                CachePadded::new(AdmitterShard {
                    sketch: Sketch::new(table_len, cfg.sample_multiplier),
                    door: Doorkeeper::new(door_bits),
                })
            })
            .collect();

        Self {
            mask: (cfg.shards - 1) as u64,
            shards,
        }
    }

    /// Observes one access of `h`. First sighting arms the doorkeeper only;
    /// repeat sightings reach the sketch.
    pub(crate) fn record(&self, h: u64) {
        let shard = self.shard(h);
        if shard.door.seen_or_add(h) {
            shard.sketch.increment(h);
        }
    }

    /// Whether `candidate` should replace `victim`.
    pub(crate) fn allow(&self, candidate: u64, victim: u64) -> bool {
        if candidate == victim {
            return true;
        }
        let candidate_shard = self.shard(candidate);
        if !candidate_shard.door.probably_seen(candidate) {
            return false;
        }
        let candidate_freq = candidate_shard.sketch.estimate(candidate);
        let victim_freq = self.shard(victim).sketch.estimate(victim);
        candidate_freq > victim_freq
    }

    /// Frequency estimate of `h` (diagnostics and tests).
    pub(crate) fn estimate(&self, h: u64) -> u8 {
        self.shard(h).sketch.estimate(h)
    }

    /// Forces aging now: halves every sketch and clears every doorkeeper.
    pub(crate) fn reset(&self) {
        for shard in &self.shards {
            shard.sketch.reset();
            shard.door.reset();
        }
    }

    #[inline]
    fn shard(&self, h: u64) -> &AdmitterShard {
        &self.shards[(h & self.mask) as usize]
    }
}

/// Admission strategy: a tagged variant keeps the disabled path free of
/// dynamic dispatch.
pub(crate) enum AdmissionControl {
    /// Admit everything; estimates are zero.
    Disabled,
    Sharded(ShardedAdmitter),
}

impl AdmissionControl {
    pub(crate) fn from_config(cfg: Option<&AdmissionConfig>) -> Self {
        match cfg {
            Some(cfg) => Self::Sharded(ShardedAdmitter::new(cfg)),
            None => Self::Disabled,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        matches!(self, Self::Sharded(_))
    }

    pub(crate) fn record(&self, h: u64) {
        if let Self::Sharded(admitter) = self {
            admitter.record(h);
        }
    }

    pub(crate) fn allow(&self, candidate: u64, victim: u64) -> bool {
        match self {
            Self::Disabled => true,
            Self::Sharded(admitter) => admitter.allow(candidate, victim),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn estimate(&self, h: u64) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Sharded(admitter) => admitter.estimate(h),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn reset(&self) {
        if let Self::Sharded(admitter) = self {
            admitter.reset();
        }
    }
}

//! Cache configuration.
//!
//! Each subsystem is configured independently; `admission`, `eviction`, and
//! `lifetime` are optional groups — an absent group disables the subsystem
//! entirely (admit everything, never evict, never expire).
//!
//! Validation follows the fallible-constructor pattern: values are plain
//! data, and [`CacheConfig::validate`] rejects out-of-range parameters with
//! a [`ConfigError`] naming the offending field.
//!
//! ## Example Usage
//!
//! ```
//! use embercache::config::{CacheConfig, EvictionConfig, LruMode};
//!
//! let mut cfg = CacheConfig::default();
//! cfg.store.size_bytes = 64 << 20;
//! cfg.eviction = Some(EvictionConfig {
//!     lru_mode: LruMode::Listing,
//!     ..EvictionConfig::default()
//! });
//! assert!(cfg.validate().is_ok());
//! ```

use std::time::Duration;

use crate::error::ConfigError;

/// Eviction victim-selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LruMode {
    /// Per-shard LRU lists; eviction pops list tails.
    Listing,
    /// No lists; eviction samples shards for the coldest entry.
    Sampling,
}

/// Policy applied to an entry whose TTL has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlMode {
    /// Re-invoke the entry's fetch callback and swap in the fresh payload.
    Refresh,
    /// Drop the entry from the store.
    Remove,
}

/// Store-wide settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Hard memory ceiling in bytes. Crossing it triggers synchronous
    /// eviction on insert.
    pub size_bytes: i64,
    /// Enables the coarse background clock (10 ms cadence) used by hot-path
    /// timestamp reads.
    pub cache_time_enabled: bool,
    /// Enables the periodic counter-deltas log.
    pub telemetry_logs_enabled: bool,
    /// Interval of the counter-deltas log.
    pub telemetry_logs_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            size_bytes: 1 << 30,
            cache_time_enabled: false,
            telemetry_logs_enabled: false,
            telemetry_logs_interval: Duration::from_secs(5),
        }
    }
}

/// TinyLFU admission control sizing.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Logical capacity the sketch is dimensioned for; typically the
    /// expected number of resident entries.
    pub capacity: usize,
    /// Number of independent admitter shards; must be a power of two.
    pub shards: usize,
    /// Lower bound on the per-shard counter table length; must be a power
    /// of two.
    pub min_table_len_per_shard: usize,
    /// Aging window multiplier: the sketch halves its counters after
    /// `sample_multiplier * counters` increments. Zero selects the default.
    pub sample_multiplier: usize,
    /// Doorkeeper bits allocated per sketch counter.
    pub door_bits_per_counter: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            shards: 4,
            min_table_len_per_shard: 256,
            sample_multiplier: 10,
            door_bits_per_counter: 8,
        }
    }
}

/// Background eviction settings.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Victim-selection strategy.
    pub lru_mode: LruMode,
    /// Soft limit as a fraction of `store.size_bytes`; crossing it wakes
    /// the eviction worker.
    pub soft_limit_coefficient: f64,
    /// Eviction scan cycles per second. Zero selects 1.
    pub calls_per_sec: u32,
    /// Per-invocation eviction budget in spins. Zero selects 2048.
    pub backoff_spins_per_call: i64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            lru_mode: LruMode::Listing,
            soft_limit_coefficient: 0.8,
            calls_per_sec: 5,
            backoff_spins_per_call: 1024,
        }
    }
}

impl EvictionConfig {
    /// Soft memory limit derived from the hard ceiling.
    pub fn soft_limit_bytes(&self, size_bytes: i64) -> i64 {
        (self.soft_limit_coefficient * size_bytes as f64) as i64
    }
}

/// TTL handling settings.
#[derive(Debug, Clone)]
pub struct LifetimeConfig {
    /// What happens when an entry's TTL elapses.
    pub on_ttl: TtlMode,
    /// Entry lifetime; callbacks may override per entry via `Item::set_ttl`.
    pub ttl: Duration,
    /// Refresh operations per second (refresh mode only; remove mode drains
    /// at a fixed internal rate).
    pub rate: u32,
    /// Steepness of the stochastic early-refresh probability curve.
    /// Recommended range (0, 1].
    pub beta: f64,
    /// Enables stochastic (β) early refresh; when disabled, expiry is the
    /// deterministic `elapsed > ttl`.
    pub stochastic_refresh_enabled: bool,
    /// Earliest refresh point as a fraction of TTL: no stochastic refresh
    /// before `coefficient * ttl` has elapsed. Range [0, 1].
    pub coefficient: f64,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            on_ttl: TtlMode::Refresh,
            ttl: Duration::from_secs(300),
            rate: 1000,
            beta: 0.5,
            stochastic_refresh_enabled: false,
            coefficient: 0.5,
        }
    }
}

/// Top-level cache configuration.
///
/// `admission`, `eviction`, and `lifetime` default to `None` (disabled).
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub store: StoreConfig,
    pub admission: Option<AdmissionConfig>,
    pub eviction: Option<EvictionConfig>,
    pub lifetime: Option<LifetimeConfig>,
}

impl CacheConfig {
    /// Validates all parameter ranges, naming the offending field on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.size_bytes <= 0 {
            return Err(ConfigError::new("store.size_bytes", "must be > 0"));
        }

        if let Some(adm) = &self.admission {
            if adm.capacity == 0 {
                return Err(ConfigError::new("admission.capacity", "must be > 0"));
            }
            if adm.shards == 0 || !adm.shards.is_power_of_two() {
                return Err(ConfigError::new(
                    "admission.shards",
                    "must be a power of two > 0",
                ));
            }
            if adm.min_table_len_per_shard != 0 && !adm.min_table_len_per_shard.is_power_of_two() {
                return Err(ConfigError::new(
                    "admission.min_table_len_per_shard",
                    "must be a power of two (or 0)",
                ));
            }
            if adm.door_bits_per_counter == 0 {
                return Err(ConfigError::new(
                    "admission.door_bits_per_counter",
                    "must be > 0",
                ));
            }
        }

        if let Some(ev) = &self.eviction {
            if !(ev.soft_limit_coefficient > 0.0 && ev.soft_limit_coefficient <= 1.0) {
                return Err(ConfigError::new(
                    "eviction.soft_limit_coefficient",
                    "must be in (0, 1]",
                ));
            }
            if ev.backoff_spins_per_call < 0 {
                return Err(ConfigError::new(
                    "eviction.backoff_spins_per_call",
                    "must be >= 0",
                ));
            }
        }

        if let Some(lt) = &self.lifetime {
            if lt.ttl.is_zero() {
                return Err(ConfigError::new("lifetime.ttl", "must be > 0"));
            }
            if lt.rate == 0 {
                return Err(ConfigError::new("lifetime.rate", "must be > 0"));
            }
            if lt.stochastic_refresh_enabled {
                if !(lt.beta > 0.0 && lt.beta <= 1.0) {
                    return Err(ConfigError::new("lifetime.beta", "must be in (0, 1]"));
                }
                if !(0.0..=1.0).contains(&lt.coefficient) {
                    return Err(ConfigError::new(
                        "lifetime.coefficient",
                        "must be in [0, 1]",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Configured TTL in nanoseconds; 0 when TTL handling is disabled.
    pub(crate) fn ttl_nanos(&self) -> i64 {
        match &self.lifetime {
            Some(lt) => lt.ttl.as_nanos() as i64,
            None => 0,
        }
    }
}

/// Expiry parameters threaded to hot-path `is_expired` checks, derived once
/// from the lifetime group.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpiryPolicy {
    pub(crate) enabled: bool,
    pub(crate) stochastic: bool,
    pub(crate) beta: f64,
    pub(crate) coefficient: f64,
}

impl ExpiryPolicy {
    pub(crate) fn from_config(cfg: &CacheConfig) -> Self {
        match &cfg.lifetime {
            Some(lt) => Self {
                enabled: true,
                stochastic: lt.stochastic_refresh_enabled,
                beta: lt.beta,
                coefficient: lt.coefficient,
            },
            None => Self {
                enabled: false,
                stochastic: false,
                beta: 0.0,
                coefficient: 0.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_size_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.store.size_bytes = 0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.param(), "store.size_bytes");
    }

    #[test]
    fn non_pow2_admitter_shards_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.admission = Some(AdmissionConfig {
            shards: 3,
            ..AdmissionConfig::default()
        });
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.param(), "admission.shards");
    }

    #[test]
    fn out_of_range_soft_coefficient_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.eviction = Some(EvictionConfig {
            soft_limit_coefficient: 1.5,
            ..EvictionConfig::default()
        });
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.param(), "eviction.soft_limit_coefficient");
    }

    #[test]
    fn stochastic_beta_range_enforced() {
        let mut cfg = CacheConfig::default();
        cfg.lifetime = Some(LifetimeConfig {
            stochastic_refresh_enabled: true,
            beta: 0.0,
            ..LifetimeConfig::default()
        });
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.param(), "lifetime.beta");

        cfg.lifetime = Some(LifetimeConfig {
            stochastic_refresh_enabled: false,
            beta: 0.0,
            ..LifetimeConfig::default()
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn soft_limit_derived_from_ceiling() {
        let ev = EvictionConfig {
            soft_limit_coefficient: 0.8,
            ..EvictionConfig::default()
        };
        assert_eq!(ev.soft_limit_bytes(1000), 800);
    }

    #[test]
    fn ttl_nanos_zero_when_lifetime_absent() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.ttl_nanos(), 0);

        let mut cfg = CacheConfig::default();
        cfg.lifetime = Some(LifetimeConfig {
            ttl: Duration::from_secs(2),
            ..LifetimeConfig::default()
        });
        assert_eq!(cfg.ttl_nanos(), 2_000_000_000);
    }
}

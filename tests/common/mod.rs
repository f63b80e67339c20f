//! Shared configuration builders for the end-to-end scenarios.
#![allow(dead_code)] // each test binary uses a subset of these helpers

use std::sync::Once;
use std::time::Duration;

use embercache::{CacheConfig, EvictionConfig, LifetimeConfig, LruMode, TtlMode};

static INIT_LOGGER: Once = Once::new();

/// Installs a test logger once; `RUST_LOG` controls verbosity.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Ample capacity, listing eviction, long TTLs: nothing interferes with
/// plain get/del behaviour.
pub fn default_cfg() -> CacheConfig {
    let mut cfg = CacheConfig::default();
    cfg.store.size_bytes = 1 << 30;
    cfg.eviction = Some(EvictionConfig {
        lru_mode: LruMode::Listing,
        soft_limit_coefficient: 0.8,
        calls_per_sec: 5,
        backoff_spins_per_call: 1024,
    });
    cfg.lifetime = Some(LifetimeConfig {
        on_ttl: TtlMode::Refresh,
        ttl: Duration::from_secs(300),
        rate: 1000,
        beta: 0.5,
        stochastic_refresh_enabled: false,
        coefficient: 0.5,
    });
    cfg
}

/// Tight 8 MiB soft limit for the eviction scenarios.
pub fn eviction_cfg(mode: LruMode) -> CacheConfig {
    let mut cfg = CacheConfig::default();
    cfg.store.size_bytes = 10 << 20;
    cfg.eviction = Some(EvictionConfig {
        lru_mode: mode,
        soft_limit_coefficient: 0.8,
        calls_per_sec: 5,
        backoff_spins_per_call: 8192,
    });
    cfg.lifetime = None;
    cfg
}

/// High-rate refresh lifetimer; eviction off.
pub fn lifetime_refresh_cfg(stochastic: bool) -> CacheConfig {
    let mut cfg = CacheConfig::default();
    cfg.eviction = None;
    cfg.lifetime = Some(LifetimeConfig {
        on_ttl: TtlMode::Refresh,
        ttl: Duration::from_secs(5),
        rate: 1_000_000,
        beta: 0.5,
        stochastic_refresh_enabled: stochastic,
        coefficient: 0.5,
    });
    cfg
}

/// Remove-on-TTL lifetimer; eviction off.
pub fn lifetime_remove_cfg() -> CacheConfig {
    let mut cfg = CacheConfig::default();
    cfg.eviction = None;
    cfg.lifetime = Some(LifetimeConfig {
        on_ttl: TtlMode::Remove,
        ttl: Duration::from_secs(5),
        rate: 1_000_000,
        beta: 0.5,
        stochastic_refresh_enabled: false,
        coefficient: 0.5,
    });
    cfg
}

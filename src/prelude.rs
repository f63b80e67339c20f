//! Convenience re-exports for typical embercache usage.

pub use crate::config::{
    AdmissionConfig, CacheConfig, EvictionConfig, LifetimeConfig, LruMode, StoreConfig, TtlMode,
};
pub use crate::error::{BoxError, CacheError, ConfigError};
pub use crate::facade::Cache;
pub use crate::{Item, Payload};

//! Error types for the embercache library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Returned by user-facing cache operations. A failing
//!   fetch callback is propagated verbatim as [`CacheError::Callback`]
//!   without touching the store; [`CacheError::EvictorNotResponded`] is
//!   the explicit timeout surface of `force_evict`.
//! - [`ConfigError`]: Returned when configuration parameters fail
//!   validation (zero size, non-power-of-two shard counts, out-of-range
//!   coefficients).
//!
//! Internal best-effort operations (a lost LRU touch, a doorkeeper bit set
//! that gave up under contention, a sketch increment dropped at the CAS
//! bound) never surface through these types.

use thiserror::Error;

/// Boxed error produced by a fetch callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error surface of user-facing cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The fetch callback failed; the store was not modified.
    #[error("fetch callback failed: {0}")]
    Callback(#[source] BoxError),

    /// `force_evict` timed out before the eviction worker accepted the call.
    #[error("evictor not responded")]
    EvictorNotResponded,
}

/// Error returned when cache configuration parameters are invalid.
///
/// Carries the offending parameter name and a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid config: {param}: {reason}")]
pub struct ConfigError {
    param: &'static str,
    reason: String,
}

impl ConfigError {
    pub(crate) fn new(param: &'static str, reason: impl Into<String>) -> Self {
        Self {
            param,
            reason: reason.into(),
        }
    }

    /// Returns the name of the parameter that failed validation.
    pub fn param(&self) -> &'static str {
        self.param
    }
}

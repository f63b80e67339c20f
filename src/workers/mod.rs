//! Background maintenance workers.
//!
//! - [`evictor`]: keeps memory under the soft limit via periodic bounded
//!   eviction bursts.
//! - [`lifetimer`]: refreshes or removes entries whose TTL elapsed, paced
//!   by [`rate`].
//!
//! Each worker owns its own shutdown and joins its threads on close.

pub(crate) mod evictor;
pub(crate) mod lifetimer;
pub(crate) mod rate;

pub(crate) use evictor::Evictor;
pub(crate) use lifetimer::Lifetimer;

//! TinyLFU-style admission control.
//!
//! Decides whether a newly fetched entry may displace a sampled victim,
//! based on approximate access frequency:
//!
//! - [`doorkeeper`]: Bloom-like pre-filter suppressing one-hit wonders;
//! - [`sketch`]: Count-Min Sketch of 4-bit saturating counters;
//! - [`admitter`]: cache-line-padded shards of {sketch, doorkeeper} behind
//!   the record/allow API, plus the disabled (allow-all) variant.

pub(crate) mod admitter;
pub(crate) mod doorkeeper;
pub(crate) mod mix;
pub(crate) mod sketch;

pub(crate) use admitter::AdmissionControl;

//! Periodic counter-deltas log.
//!
//! When enabled, a background thread samples every counter block on an
//! interval, converts the cumulative values into per-interval deltas, and
//! emits one structured `tracing` event per enabled subsystem plus a
//! storage summary. Counters are cumulative and monotonic; a snapshot that
//! runs backwards (a restarted block) is treated as the whole delta.

use std::sync::Arc;

use crossbeam_channel::{select, tick};
use tracing::info;

use crate::cache::CacheCore;
use crate::metrics::{AdmissionStats, EvictionStats, LifetimeStats};
use crate::shutdown::Watcher;
use crate::workers::{Evictor, Lifetimer};

/// Cumulative counters gathered at one sampling point.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Sample {
    pub(crate) admission: AdmissionStats,
    pub(crate) eviction: EvictionStats,
    pub(crate) lifetime: LifetimeStats,
}

pub(crate) fn sample(core: &CacheCore, evictor: &Evictor, lifetimer: &Lifetimer) -> Sample {
    Sample {
        admission: core.admission_stats(),
        eviction: evictor.stats(),
        lifetime: lifetimer.stats(),
    }
}

/// Per-interval deltas; `cur < prev` collapses to `cur`.
pub(crate) fn delta_sample(prev: &Sample, cur: &Sample) -> Sample {
    Sample {
        admission: AdmissionStats {
            allowed: delta(prev.admission.allowed, cur.admission.allowed),
            rejected: delta(prev.admission.rejected, cur.admission.rejected),
            hard_evicted_items: delta(
                prev.admission.hard_evicted_items,
                cur.admission.hard_evicted_items,
            ),
            hard_evicted_bytes: delta(
                prev.admission.hard_evicted_bytes,
                cur.admission.hard_evicted_bytes,
            ),
        },
        eviction: EvictionStats {
            scans: delta(prev.eviction.scans, cur.eviction.scans),
            scan_hits: delta(prev.eviction.scan_hits, cur.eviction.scan_hits),
            evicted_items: delta(prev.eviction.evicted_items, cur.eviction.evicted_items),
            evicted_bytes: delta(prev.eviction.evicted_bytes, cur.eviction.evicted_bytes),
        },
        lifetime: LifetimeStats {
            affected: delta(prev.lifetime.affected, cur.lifetime.affected),
            errors: delta(prev.lifetime.errors, cur.lifetime.errors),
            scans: delta(prev.lifetime.scans, cur.lifetime.scans),
            hits: delta(prev.lifetime.hits, cur.lifetime.hits),
            misses: delta(prev.lifetime.misses, cur.lifetime.misses),
        },
    }
}

fn delta(prev: i64, cur: i64) -> i64 {
    if cur >= prev { cur - prev } else { cur }
}

/// Spawns the deltas logger when telemetry logs are enabled.
pub(crate) fn run_if_enabled(
    watcher: Watcher,
    core: Arc<CacheCore>,
    evictor: Arc<Evictor>,
    lifetimer: Arc<Lifetimer>,
) {
    let cfg = core.config();
    if !cfg.store.telemetry_logs_enabled {
        return;
    }
    let interval = cfg.store.telemetry_logs_interval;
    let lifetime_enabled = cfg.lifetime.is_some();
    let admission_enabled = cfg.admission.is_some();
    let eviction_enabled = cfg.eviction.is_some();
    let hard_limit = fmt_mem(cfg.store.size_bytes.max(0) as u64);
    let soft_limit = if eviction_enabled {
        fmt_mem(core.soft_limit_bytes().max(0) as u64)
    } else {
        "INF".to_string()
    };

    std::thread::spawn(move || {
        let ticker = tick(interval);
        let mut prev = sample(&core, &evictor, &lifetimer);

        loop {
            select! {
                recv(watcher.channel()) -> _ => return,
                recv(ticker) -> _ => {
                    let cur = sample(&core, &evictor, &lifetimer);
                    let d = delta_sample(&prev, &cur);
                    prev = cur;

                    if lifetime_enabled {
                        info!(
                            target: "embercache::telemetry",
                            affected = d.lifetime.affected,
                            errors = d.lifetime.errors,
                            scans = d.lifetime.scans,
                            hits = d.lifetime.hits,
                            misses = d.lifetime.misses,
                            "lifetime_manager"
                        );
                    }
                    if admission_enabled {
                        info!(
                            target: "embercache::telemetry",
                            allowed = d.admission.allowed,
                            not_allowed = d.admission.rejected,
                            "admission_controller"
                        );
                    }
                    if eviction_enabled {
                        info!(
                            target: "embercache::telemetry",
                            scans = d.eviction.scans,
                            hits = d.eviction.scan_hits,
                            freed_items = d.eviction.evicted_items,
                            freed_bytes = %fmt_mem(d.eviction.evicted_bytes.max(0) as u64),
                            "soft_evictor"
                        );
                    }
                    if d.admission.hard_evicted_items > 0 || d.admission.hard_evicted_bytes > 0 {
                        info!(
                            target: "embercache::telemetry",
                            freed_items = d.admission.hard_evicted_items,
                            freed_bytes = %fmt_mem(d.admission.hard_evicted_bytes.max(0) as u64),
                            "hard_evictor"
                        );
                    }
                    info!(
                        target: "embercache::telemetry",
                        size = %fmt_mem(core.mem().max(0) as u64),
                        entries = core.len(),
                        soft_limit = %soft_limit,
                        hard_limit = %hard_limit,
                        "storage"
                    );
                }
            }
        }
    });
}

/// Human-readable byte count, two largest units.
pub(crate) fn fmt_mem(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    match bytes {
        b if b >= TB => format!("{}TB {}GB", b / TB, (b % TB) / GB),
        b if b >= GB => format!("{}GB {}MB", b / GB, (b % GB) / MB),
        b if b >= MB => format!("{}MB {}KB", b / MB, (b % MB) / KB),
        b if b >= KB => format!("{}KB {}B", b / KB, b % KB),
        b => format!("{b}B"),
    }
}

//! Low-resolution cached clock.
//!
//! Hot paths stamp entries on every access; asking the OS for the time each
//! time is measurable at high QPS. When enabled, a background thread stores
//! the current unix-nanosecond timestamp into a process-wide atomic on a
//! 10 ms cadence and hot paths read that. Tolerated drift is below the
//! cadence.
//!
//! When the updater was never started, or after cancellation stops it,
//! [`unix_nano`] falls back to the real clock.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::select;

use crate::shutdown::Watcher;

const CACHE_TIME_TICK: Duration = Duration::from_millis(10);

static NOW_NANOS: AtomicI64 = AtomicI64::new(0);
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Starts the clock updater thread when `enabled`; it stops on cancellation.
pub(crate) fn run_if_enabled(watcher: Watcher, enabled: bool) {
    if !enabled {
        return;
    }
    NOW_NANOS.store(real_unix_nano(), Ordering::SeqCst);
    ACTIVE.store(true, Ordering::SeqCst);

    std::thread::spawn(move || {
        let tick = crossbeam_channel::tick(CACHE_TIME_TICK);
        loop {
            select! {
                recv(watcher.channel()) -> _ => {
                    ACTIVE.store(false, Ordering::SeqCst);
                    return;
                }
                recv(tick) -> _ => {
                    NOW_NANOS.store(real_unix_nano(), Ordering::Relaxed);
                }
            }
        }
    });
}

/// Current unix time in nanoseconds: the cached value while the updater is
/// active, the real clock otherwise.
pub(crate) fn unix_nano() -> i64 {
    if ACTIVE.load(Ordering::Relaxed) {
        NOW_NANOS.load(Ordering::Relaxed)
    } else {
        real_unix_nano()
    }
}

fn real_unix_nano() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

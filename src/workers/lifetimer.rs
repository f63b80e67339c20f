//! TTL maintenance worker.
//!
//! A rate-limited provider asks the store for one expired entry per permit
//! and feeds it to a consumer pool over a buffered channel; consumers apply
//! the entry's TTL action (refresh via callback, or removal). In refresh
//! mode the permit rate is the configured refresh rate; in remove mode a
//! fixed high internal rate drains expirations promptly, since removals
//! cost no callback.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use tracing::info;

use crate::cache::CacheCore;
use crate::config::{LifetimeConfig, TtlMode};
use crate::entry::Entry;
use crate::metrics::{LifetimeCounters, LifetimeStats};
use crate::shutdown::{Shutdown, Watcher};
use crate::workers::rate::RateGate;

/// Permit rate used in remove mode regardless of the configured rate.
const REMOVE_MODE_RATE: u32 = 100_000;

/// Ceiling on the preallocated invoke-channel buffer; past this point the
/// provider blocking on send is equivalent to a larger buffer.
const INVOKE_BUFFER_CEILING: usize = 8192;

/// Lifetime strategy holder: absent config disables TTL handling.
pub(crate) enum Lifetimer {
    Disabled,
    Running(LifetimeWorker),
}

impl Lifetimer {
    pub(crate) fn from_config(cfg: Option<&LifetimeConfig>, core: Arc<CacheCore>) -> Self {
        match cfg {
            Some(cfg) => Self::Running(LifetimeWorker::spawn(cfg.clone(), core)),
            None => Self::Disabled,
        }
    }

    pub(crate) fn stats(&self) -> LifetimeStats {
        match self {
            Self::Disabled => LifetimeStats::default(),
            Self::Running(worker) => worker.counters.snapshot(),
        }
    }

    pub(crate) fn close(&self) {
        if let Self::Running(worker) = self {
            worker.close();
        }
    }
}

/// Rate-gated provider plus consumers applying TTL actions.
pub(crate) struct LifetimeWorker {
    shutdown: Shutdown,
    counters: Arc<LifetimeCounters>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LifetimeWorker {
    fn spawn(cfg: LifetimeConfig, core: Arc<CacheCore>) -> Self {
        let shutdown = Shutdown::new();
        let counters = Arc::new(LifetimeCounters::default());

        let rate = match cfg.on_ttl {
            TtlMode::Refresh => cfg.rate,
            TtlMode::Remove => REMOVE_MODE_RATE,
        };
        let gate = RateGate::new(shutdown.watcher(), rate);

        let buffer = (cfg.rate as usize).clamp(1, INVOKE_BUFFER_CEILING);
        let (entry_tx, entry_rx) = bounded::<Arc<Entry>>(buffer);

        info!(mode = ?cfg.on_ttl, rate = cfg.rate, "lifetime worker running");

        let mut handles = Vec::new();
        let consumers = 1 + available_parallelism();
        for _ in 0..consumers {
            let watcher = shutdown.watcher();
            let entry_rx = entry_rx.clone();
            let core = Arc::clone(&core);
            let counters = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                consumer(watcher, entry_rx, core, counters)
            }));
        }
        {
            let watcher = shutdown.watcher();
            let core = Arc::clone(&core);
            let counters = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                provider(watcher, gate, entry_tx, core, counters)
            }));
        }

        Self {
            shutdown,
            counters,
            handles: Mutex::new(handles),
        }
    }

    fn close(&self) {
        self.shutdown.cancel();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
        info!("lifetime worker stopped");
    }
}

/// Takes one permit, peeks one expired entry, hands it to the pool.
fn provider(
    watcher: Watcher,
    gate: RateGate,
    entry_tx: Sender<Arc<Entry>>,
    core: Arc<CacheCore>,
    counters: Arc<LifetimeCounters>,
) {
    loop {
        select! {
            recv(watcher.channel()) -> _ => return,
            recv(gate.channel()) -> permit => {
                if permit.is_err() {
                    return;
                }
                if core.len() == 0 {
                    continue;
                }
                counters.scans.fetch_add(1, Ordering::Relaxed);
                let Some(entry) = core.peek_expired() else {
                    counters.scan_misses.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                counters.scan_hits.fetch_add(1, Ordering::Relaxed);
                select! {
                    recv(watcher.channel()) -> _ => return,
                    send(entry_tx, entry) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Applies the TTL action per entry, counting outcomes.
fn consumer(
    watcher: Watcher,
    entry_rx: Receiver<Arc<Entry>>,
    core: Arc<CacheCore>,
    counters: Arc<LifetimeCounters>,
) {
    loop {
        select! {
            recv(watcher.channel()) -> _ => return,
            recv(entry_rx) -> msg => {
                let Ok(entry) = msg else {
                    return;
                };
                match core.on_ttl(&entry) {
                    Ok(()) => {
                        counters.affected.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::shutdown::Shutdown as CacheShutdown;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn ttl_core(lifetime: LifetimeConfig) -> (Arc<CacheCore>, LifetimeConfig) {
        let mut cfg = CacheConfig::default();
        cfg.lifetime = Some(lifetime.clone());
        let shutdown = CacheShutdown::new();
        let watcher = shutdown.watcher();
        std::mem::forget(shutdown);
        (Arc::new(CacheCore::new(watcher, cfg)), lifetime)
    }

    #[test]
    fn disabled_lifetimer_is_inert() {
        let lifetimer = Lifetimer::Disabled;
        assert_eq!(lifetimer.stats(), LifetimeStats::default());
        lifetimer.close();
    }

    #[test]
    fn refresh_mode_renews_expired_entries() {
        let (core, lt_cfg) = ttl_core(LifetimeConfig {
            ttl: Duration::from_millis(300),
            rate: 10_000,
            ..LifetimeConfig::default()
        });

        let refreshes = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let counter = Arc::clone(&refreshes);
            core.get_bytes(&format!("key-{i}"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![0u8; 64])
            })
            .unwrap();
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 10);

        let lifetimer = Lifetimer::from_config(Some(&lt_cfg), Arc::clone(&core));
        let deadline = Instant::now() + Duration::from_secs(15);
        while refreshes.load(Ordering::SeqCst) < 20 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(
            refreshes.load(Ordering::SeqCst) >= 20,
            "entries were not refreshed in time"
        );
        assert_eq!(core.len(), 10);

        let stats = lifetimer.stats();
        assert!(stats.scans > 0);
        assert!(stats.affected > 0);
        lifetimer.close();
    }

    #[test]
    fn remove_mode_drains_expired_entries() {
        let (core, lt_cfg) = ttl_core(LifetimeConfig {
            on_ttl: TtlMode::Remove,
            ttl: Duration::from_millis(300),
            rate: 1000,
            ..LifetimeConfig::default()
        });

        for i in 0..20 {
            core.get_bytes(&format!("key-{i}"), |_| Ok(vec![0u8; 64]))
                .unwrap();
        }
        assert_eq!(core.len(), 20);

        let lifetimer = Lifetimer::from_config(Some(&lt_cfg), Arc::clone(&core));
        let deadline = Instant::now() + Duration::from_secs(15);
        while core.len() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(core.len(), 0, "expired entries were not removed");
        lifetimer.close();
    }

    #[test]
    fn refresh_errors_are_counted_not_fatal() {
        let (core, lt_cfg) = ttl_core(LifetimeConfig {
            ttl: Duration::from_millis(200),
            rate: 10_000,
            ..LifetimeConfig::default()
        });

        core.get_bytes("flaky", {
            let first = AtomicUsize::new(0);
            move |_| {
                if first.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(vec![1u8; 8])
                } else {
                    Err("backend down".into())
                }
            }
        })
        .unwrap();

        let lifetimer = Lifetimer::from_config(Some(&lt_cfg), Arc::clone(&core));
        let deadline = Instant::now() + Duration::from_secs(15);
        while lifetimer.stats().errors == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        let stats = lifetimer.stats();
        assert!(stats.errors > 0, "refresh errors never surfaced in stats");
        // The entry survives refresh failures.
        assert_eq!(core.len(), 1);
        lifetimer.close();
    }
}

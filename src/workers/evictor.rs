//! Background soft-limit eviction worker.
//!
//! A provider ticks at `calls_per_sec`; whenever the store is non-empty and
//! above the soft limit it signals a pool of consumers over an unbuffered
//! rendezvous channel. Each consumer runs one bounded eviction burst per
//! signal. The rendezvous keeps pressure-driven back-off implicit: when
//! every consumer is busy, the provider's signal waits.
//!
//! `force_call` lets callers inject one signal with a timeout; the timeout
//! is the only error this worker surfaces.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::Mutex;
use tracing::info;

use crate::cache::CacheCore;
use crate::config::EvictionConfig;
use crate::error::CacheError;
use crate::metrics::{EvictionStats, EvictorCounters};
use crate::shutdown::{Shutdown, Watcher};

const DEFAULT_BACKOFF_SPINS: i64 = 2048;

/// Eviction strategy holder: absent config disables the worker entirely.
pub(crate) enum Evictor {
    Disabled,
    Running(EvictionWorker),
}

impl Evictor {
    pub(crate) fn from_config(cfg: Option<&EvictionConfig>, core: Arc<CacheCore>) -> Self {
        match cfg {
            Some(cfg) => Self::Running(EvictionWorker::spawn(cfg.clone(), core)),
            None => Self::Disabled,
        }
    }

    pub(crate) fn force_call(&self, timeout: Duration) -> Result<(), CacheError> {
        match self {
            Self::Disabled => Ok(()),
            Self::Running(worker) => worker.force_call(timeout),
        }
    }

    pub(crate) fn stats(&self) -> EvictionStats {
        match self {
            Self::Disabled => EvictionStats::default(),
            Self::Running(worker) => worker.counters.snapshot(),
        }
    }

    pub(crate) fn close(&self) {
        if let Self::Running(worker) = self {
            worker.close();
        }
    }
}

/// Ticker-driven provider plus a consumer pool sharing one rendezvous
/// channel.
pub(crate) struct EvictionWorker {
    shutdown: Shutdown,
    invoke_tx: Sender<()>,
    counters: Arc<EvictorCounters>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EvictionWorker {
    fn spawn(cfg: EvictionConfig, core: Arc<CacheCore>) -> Self {
        let shutdown = Shutdown::new();
        let counters = Arc::new(EvictorCounters::default());
        let (invoke_tx, invoke_rx) = bounded::<()>(0);

        let spins = if cfg.backoff_spins_per_call <= 0 {
            DEFAULT_BACKOFF_SPINS
        } else {
            cfg.backoff_spins_per_call
        };
        let calls_per_sec = cfg.calls_per_sec.max(1);

        info!(
            calls_per_sec,
            backoff_spins = spins,
            "eviction worker running"
        );

        let mut handles = Vec::new();
        let consumers = 1 + available_parallelism();
        for _ in 0..consumers {
            let watcher = shutdown.watcher();
            let invoke_rx = invoke_rx.clone();
            let core = Arc::clone(&core);
            let counters = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                consumer(watcher, invoke_rx, core, counters, spins)
            }));
        }
        {
            let watcher = shutdown.watcher();
            let invoke_tx = invoke_tx.clone();
            let core = Arc::clone(&core);
            let counters = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                provider(watcher, invoke_tx, core, counters, calls_per_sec)
            }));
        }

        Self {
            shutdown,
            invoke_tx,
            counters,
            handles: Mutex::new(handles),
        }
    }

    /// Injects one eviction signal, waiting up to `timeout` for a consumer.
    fn force_call(&self, timeout: Duration) -> Result<(), CacheError> {
        let watcher = self.shutdown.watcher();
        select! {
            recv(watcher.channel()) -> _ => Ok(()),
            send(self.invoke_tx, ()) -> res => {
                let _ = res;
                Ok(())
            }
            default(timeout) => Err(CacheError::EvictorNotResponded),
        }
    }

    fn close(&self) {
        self.shutdown.cancel();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
        info!("eviction worker stopped");
    }
}

/// Ticks and signals the pool whenever the soft limit is crossed.
fn provider(
    watcher: Watcher,
    invoke_tx: Sender<()>,
    core: Arc<CacheCore>,
    counters: Arc<EvictorCounters>,
    calls_per_sec: u32,
) {
    let ticker = tick(Duration::from_secs(1) / calls_per_sec);
    loop {
        select! {
            recv(watcher.channel()) -> _ => return,
            recv(ticker) -> _ => {
                if core.len() > 0 && core.mem() > 0 {
                    counters.scans.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if core.soft_limit_overcome() {
                        select! {
                            recv(watcher.channel()) -> _ => return,
                            send(invoke_tx, ()) -> res => {
                                if res.is_err() {
                                    return;
                                }
                                counters.scan_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Runs one bounded eviction burst per received signal.
fn consumer(
    watcher: Watcher,
    invoke_rx: crossbeam_channel::Receiver<()>,
    core: Arc<CacheCore>,
    counters: Arc<EvictorCounters>,
    spins: i64,
) {
    loop {
        select! {
            recv(watcher.channel()) -> _ => return,
            recv(invoke_rx) -> msg => {
                if msg.is_err() {
                    return;
                }
                if core.len() > 0 && core.mem() > 0 {
                    let (freed, items) = core.soft_evict(spins);
                    if freed > 0 || items > 0 {
                        counters.evicted_items.fetch_add(items, std::sync::atomic::Ordering::Relaxed);
                        counters.evicted_bytes.fetch_add(freed, std::sync::atomic::Ordering::Relaxed);
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
    use crate::config::{CacheConfig, LruMode};
    use crate::shutdown::Shutdown as CacheShutdown;

    fn eviction_core(size_bytes: i64, soft_coefficient: f64) -> (Arc<CacheCore>, EvictionConfig) {
        let mut cfg = CacheConfig::default();
        cfg.store.size_bytes = size_bytes;
        let ev = EvictionConfig {
            lru_mode: LruMode::Listing,
            soft_limit_coefficient: soft_coefficient,
            calls_per_sec: 50,
            backoff_spins_per_call: 8192,
        };
        cfg.eviction = Some(ev.clone());
        let shutdown = CacheShutdown::new();
        let watcher = shutdown.watcher();
        std::mem::forget(shutdown);
        (Arc::new(CacheCore::new(watcher, cfg)), ev)
    }

    #[test]
    fn disabled_evictor_is_inert() {
        let evictor = Evictor::Disabled;
        assert!(evictor.force_call(Duration::from_millis(1)).is_ok());
        assert_eq!(evictor.stats(), EvictionStats::default());
        evictor.close();
    }

    #[test]
    fn worker_evicts_once_soft_limit_crossed() {
        let (core, ev_cfg) = eviction_core(1 << 20, 0.5);

        // Fill ~1 MiB against a 512 KiB soft limit, then start the worker.
        for i in 0..64 {
            core.get_bytes(&format!("bulk-{i}"), |_| Ok(vec![0u8; 16 * 1024]))
                .unwrap();
        }
        assert!(core.soft_limit_overcome());
        let evictor = Evictor::from_config(Some(&ev_cfg), Arc::clone(&core));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while core.soft_limit_overcome() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!core.soft_limit_overcome(), "soft limit never enforced");

        let stats = evictor.stats();
        assert!(stats.scans > 0);
        assert!(stats.scan_hits > 0);
        assert!(stats.evicted_items > 0);
        assert!(stats.evicted_bytes > 0);
        evictor.close();
    }

    #[test]
    fn force_call_reaches_a_consumer() {
        let (core, ev_cfg) = eviction_core(1 << 30, 0.8);
        let evictor = Evictor::from_config(Some(&ev_cfg), core);
        assert!(evictor.force_call(Duration::from_secs(5)).is_ok());
        evictor.close();
    }

    #[test]
    fn force_call_after_close_returns_ok() {
        let (core, ev_cfg) = eviction_core(1 << 30, 0.8);
        let evictor = Evictor::from_config(Some(&ev_cfg), core);
        evictor.close();
        // The worker's own shutdown fired: the call short-circuits Ok.
        assert!(evictor.force_call(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let (core, ev_cfg) = eviction_core(1 << 30, 0.8);
        let evictor = Evictor::from_config(Some(&ev_cfg), core);
        evictor.close();
        evictor.close();
    }
}

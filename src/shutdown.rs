//! Cooperative cancellation shared by the cache and its workers.
//!
//! One [`Shutdown`] governs the lifetime of a cache instance. Workers hold
//! cloned [`Watcher`]s and observe cancellation two ways:
//!
//! - polling [`Watcher::is_cancelled`] between items in long walks;
//! - selecting on [`Watcher::channel`] alongside their work channels — the
//!   channel never carries a message, it only closes, which unblocks every
//!   pending `recv` at once.
//!
//! `cancel` is idempotent; dropping the last sender is what fans the signal
//! out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

/// Cancellation owner. Created once per cache; `cancel()` releases every
/// watcher.
#[derive(Debug)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    guard: Mutex<Option<Sender<()>>>,
    watcher: Watcher,
}

/// Cloneable cancellation observer handed to workers and walks.
#[derive(Debug, Clone)]
pub struct Watcher {
    flag: Arc<AtomicBool>,
    rx: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        let flag = Arc::new(AtomicBool::new(false));
        Self {
            watcher: Watcher {
                flag: Arc::clone(&flag),
                rx,
            },
            flag,
            guard: Mutex::new(Some(tx)),
        }
    }

    /// Returns a watcher observing this shutdown.
    pub fn watcher(&self) -> Watcher {
        self.watcher.clone()
    }

    /// Cancels all watchers. Safe to call more than once.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Dropping the sender closes the channel for every receiver clone.
        self.guard.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Channel that closes on cancellation; for use in `select!` arms.
    pub fn channel(&self) -> &Receiver<()> {
        &self.rx
    }
}

//! Permit source for rate-limited maintenance.
//!
//! A provider thread emits permits into a bounded channel on a monotonic
//! schedule of `1/rate` seconds, with the channel capacity acting as the
//! burst allowance (10% of the rate, at least 1). Consumers block on the
//! channel; when the watcher cancels, the provider returns, the channel
//! closes, and every consumer unblocks.
//!
//! Catch-up after a stall is capped at one burst so a paused consumer does
//! not face an unbounded permit flood.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded, select};

use crate::shutdown::Watcher;

/// Token source emitting at a fixed rate with a small burst.
#[derive(Debug)]
pub(crate) struct RateGate {
    rx: Receiver<()>,
}

impl RateGate {
    pub(crate) fn new(watcher: Watcher, rate: u32) -> Self {
        let rate = rate.max(1);
        let burst = ((rate as f64 * 0.1) as usize).max(1);
        let (tx, rx) = bounded::<()>(burst);

        std::thread::spawn(move || {
            let interval = Duration::from_nanos((1_000_000_000u64 / rate as u64).max(1));
            let catch_up_cap = interval.saturating_mul(burst.min(u32::MAX as usize) as u32);
            let mut next = Instant::now();

            loop {
                let now = Instant::now();
                if next > now {
                    let wait = next - now;
                    select! {
                        recv(watcher.channel()) -> _ => return,
                        default(wait) => {}
                    }
                }
                let now = Instant::now();
                if now > next + catch_up_cap {
                    next = now;
                }
                next += interval;

                select! {
                    recv(watcher.channel()) -> _ => return,
                    send(tx, ()) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self { rx }
    }

    /// Permit channel; closed once the provider exits.
    pub(crate) fn channel(&self) -> &Receiver<()> {
        &self.rx
    }
}

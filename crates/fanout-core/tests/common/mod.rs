//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fanout_core::ParallelOptions;

/// Options with a short poll interval so tests finish quickly.
pub fn fast_options(throttle: usize) -> ParallelOptions {
    ParallelOptions {
        throttle,
        poll_interval_ms: 5,
        ..Default::default()
    }
}

/// Tracks how many units are running at once and the highest value seen.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlight {
    /// Count one running unit for the lifetime of the returned guard.
    pub fn enter(&self) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            current: Arc::clone(&self.current),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sleep in small steps until `total` has passed or `cancelled` returns true.
pub fn sleep_unless(total: Duration, cancelled: impl Fn() -> bool) {
    let step = Duration::from_millis(5);
    let mut slept = Duration::ZERO;
    while slept < total && !cancelled() {
        std::thread::sleep(step);
        slept += step;
    }
}

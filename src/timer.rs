//! Tick accounting for congestion epochs.
//!
//! The driver calls `on_timer_tick` at a fixed interval.  The connection does
//! not read a clock; instead [`EpochTimer`] credits one `interval` per tick
//! and reports when a full `timeout` has accumulated.  The connection then
//! runs its once-per-epoch window growth check.

use std::time::Duration;

/// Accumulates timer ticks into timeout-length epochs.
#[derive(Debug, Clone)]
pub struct EpochTimer {
    interval: Duration,
    timeout: Duration,
    elapsed: Duration,
}

impl EpochTimer {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            elapsed: Duration::ZERO,
        }
    }

    /// Credit one tick.  Returns `true` when this tick completes an epoch, in
    /// which case the accumulator starts over.
    pub fn tick(&mut self) -> bool {
        self.elapsed += self.interval;
        if self.elapsed >= self.timeout {
            self.elapsed = Duration::ZERO;
            true
        } else {
            false
        }
    }

    /// Time accumulated in the current epoch.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

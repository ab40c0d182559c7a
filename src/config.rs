//! Per-connection tunables.

use std::time::Duration;

use thiserror::Error;

use crate::packet::PacketFormat;

/// Settings handed to [`crate::connection::Connection::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Window size in packets.
    ///
    /// Caps the receive buffer, seeds `ssthresh`, and stands in for the
    /// peer's advertised window until (or unless) one arrives on the wire.
    pub window: u32,
    /// Congestion window at start-up and after every retransmission timeout.
    pub initial_window: u32,
    /// How often the driver calls `on_timer_tick`.
    pub timer_interval: Duration,
    /// Length of one congestion epoch; the window grows once per epoch.
    pub timeout: Duration,
    /// Header layout shared with the peer.
    pub format: PacketFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: 16,
            initial_window: 1,
            timer_interval: Duration::from_millis(500),
            timeout: Duration::from_millis(2000),
            format: PacketFormat::default(),
        }
    }
}

impl Config {
    /// Reject settings the connection cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.initial_window == 0 {
            return Err(ConfigError::ZeroInitialWindow);
        }
        if self.timer_interval.is_zero() {
            return Err(ConfigError::ZeroTimer);
        }
        if self.timeout < self.timer_interval {
            return Err(ConfigError::TimeoutShorterThanTimer {
                timeout: self.timeout,
                timer: self.timer_interval,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least one packet")]
    ZeroWindow,
    #[error("initial congestion window must be at least one packet")]
    ZeroInitialWindow,
    #[error("timer interval must be non-zero")]
    ZeroTimer,
    #[error("timeout {timeout:?} is shorter than the timer interval {timer:?}")]
    TimeoutShorterThanTimer { timeout: Duration, timer: Duration },
}

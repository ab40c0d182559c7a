//! Slow start / AIMD congestion window.
//!
//! The window is measured in packets and adjusted by three events:
//!
//! - **Timeout** (a timer tick finds unacknowledged data): `ssthresh` halves
//!   and the window collapses to its initial size.
//! - **Duplicate-ACK run**: the same ack number observed
//!   [`DUP_ACK_THRESHOLD`] more times in a row halves the window.
//! - **Epoch end** (once per timeout-length span): below `ssthresh` the window
//!   roughly doubles, scaled by the fraction of packets sent in the epoch that
//!   were acknowledged; otherwise it grows by one packet.
//!
//! Nothing here touches the buffers; the connection feeds in events and
//! reads back [`Congestion::window`].

/// Repeats of one ack number that count as a congestion signal.
pub const DUP_ACK_THRESHOLD: u32 = 4;

/// How an incoming ack number was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEvent {
    /// A different ack number than last time.
    New,
    /// The same ack number again, below the threshold.
    Duplicate(u32),
    /// The duplicate run hit the threshold and the window was halved.
    Decrease,
}

#[derive(Debug, Clone)]
pub struct Congestion {
    cwnd: u32,
    /// Window after construction and after every timeout.
    initial: u32,
    ssthresh: u32,
    /// Packets transmitted for the first time during this epoch.
    sent: u32,
    /// Send-buffer packets released by acknowledgments during this epoch.
    acked: u32,
    last_ackno: u32,
    dup_acks: u32,
}

impl Congestion {
    /// Start in slow start with window `initial` and threshold `ssthresh`
    /// (usually the configured window).
    pub fn new(initial: u32, ssthresh: u32) -> Self {
        let initial = initial.max(1);
        Self {
            cwnd: initial,
            initial,
            ssthresh: ssthresh.max(1),
            sent: 0,
            acked: 0,
            last_ackno: 0,
            dup_acks: 0,
        }
    }

    /// Current congestion window in packets.
    pub fn window(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Classify an ack number and react to a duplicate run.
    pub fn on_ack(&mut self, ackno: u32) -> AckEvent {
        if ackno != self.last_ackno {
            self.last_ackno = ackno;
            self.dup_acks = 0;
            return AckEvent::New;
        }

        self.dup_acks += 1;
        if self.dup_acks < DUP_ACK_THRESHOLD {
            return AckEvent::Duplicate(self.dup_acks);
        }

        self.dup_acks = 0;
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = self.ssthresh;
        log::debug!(
            "[cc] {DUP_ACK_THRESHOLD} duplicate acks for {ackno}; cwnd={} ssthresh={}",
            self.cwnd,
            self.ssthresh
        );
        AckEvent::Decrease
    }

    /// A retransmission timeout fired with data outstanding.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.ssthresh / 2).max(1);
        self.cwnd = self.initial;
    }

    /// Count one first-time transmission toward the epoch.
    pub fn on_sent(&mut self) {
        self.sent = self.sent.saturating_add(1);
    }

    /// Count packets released from the send buffer toward the epoch.
    pub fn on_released(&mut self, packets: usize) {
        let packets = u32::try_from(packets).unwrap_or(u32::MAX);
        self.acked = self.acked.saturating_add(packets);
    }

    /// Once-per-epoch growth check; resets the epoch counters.
    ///
    /// An epoch in which nothing was sent leaves the window alone.  In slow
    /// start the multiplier `acked / sent` is capped at one, so the window at
    /// most doubles and never shrinks.
    pub fn on_epoch(&mut self) {
        if self.sent > 0 {
            let doubled = self.cwnd.saturating_mul(2);
            if doubled < self.ssthresh {
                let acked = self.acked.min(self.sent);
                let scaled = u64::from(doubled) * u64::from(acked) / u64::from(self.sent);
                self.cwnd = self.cwnd.max(scaled as u32);
            } else {
                self.cwnd = self.cwnd.saturating_add(1);
            }
        }
        log::trace!(
            "[cc] epoch sent={} acked={} -> cwnd={} ssthresh={}",
            self.sent,
            self.acked,
            self.cwnd,
            self.ssthresh
        );
        self.sent = 0;
        self.acked = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(cc: &mut Congestion, sent: u32, acked: usize) {
        for _ in 0..sent {
            cc.on_sent();
        }
        cc.on_released(acked);
        cc.on_epoch();
    }

    #[test]
    fn starts_in_slow_start() {
        let cc = Congestion::new(1, 16);
        assert_eq!(cc.window(), 1);
        assert_eq!(cc.ssthresh(), 16);
    }

    #[test]
    fn slow_start_doubles_with_full_delivery() {
        let mut cc = Congestion::new(1, 16);
        epoch(&mut cc, 1, 1);
        assert_eq!(cc.window(), 2);
        epoch(&mut cc, 2, 2);
        assert_eq!(cc.window(), 4);
        epoch(&mut cc, 4, 4);
        assert_eq!(cc.window(), 8);
    }

    #[test]
    fn slow_start_scales_by_delivery_ratio() {
        let mut cc = Congestion::new(1, 64);
        epoch(&mut cc, 1, 1);
        epoch(&mut cc, 2, 2);
        epoch(&mut cc, 4, 4);
        assert_eq!(cc.window(), 8);
        // 3 of 4 delivered: 2 * 8 * 3 / 4 = 12.
        epoch(&mut cc, 4, 3);
        assert_eq!(cc.window(), 12);
    }

    #[test]
    fn slow_start_never_shrinks() {
        let mut cc = Congestion::new(1, 64);
        epoch(&mut cc, 1, 1);
        epoch(&mut cc, 2, 2);
        assert_eq!(cc.window(), 4);
        epoch(&mut cc, 10, 0);
        assert_eq!(cc.window(), 4);
    }

    #[test]
    fn idle_epoch_is_a_noop() {
        let mut cc = Congestion::new(1, 16);
        epoch(&mut cc, 0, 0);
        assert_eq!(cc.window(), 1);
    }

    #[test]
    fn congestion_avoidance_adds_one() {
        let mut cc = Congestion::new(1, 4);
        epoch(&mut cc, 1, 1);
        assert_eq!(cc.window(), 2);
        // 2 * 2 is not below ssthresh 4: additive increase.
        epoch(&mut cc, 2, 2);
        assert_eq!(cc.window(), 3);
        epoch(&mut cc, 3, 3);
        assert_eq!(cc.window(), 4);
    }

    #[test]
    fn duplicate_run_halves_window() {
        let mut cc = Congestion::new(1, 64);
        for _ in 0..3 {
            epoch(&mut cc, 1, 1);
        }
        assert_eq!(cc.window(), 8);

        assert_eq!(cc.on_ack(5), AckEvent::New);
        assert_eq!(cc.on_ack(5), AckEvent::Duplicate(1));
        assert_eq!(cc.on_ack(5), AckEvent::Duplicate(2));
        assert_eq!(cc.on_ack(5), AckEvent::Duplicate(3));
        assert_eq!(cc.on_ack(5), AckEvent::Decrease);
        assert_eq!(cc.window(), 4);
        assert_eq!(cc.ssthresh(), 4);

        // The run restarts after a decrease.
        assert_eq!(cc.on_ack(5), AckEvent::Duplicate(1));
    }

    #[test]
    fn new_ack_resets_duplicate_run() {
        let mut cc = Congestion::new(1, 16);
        cc.on_ack(2);
        cc.on_ack(2);
        cc.on_ack(2);
        assert_eq!(cc.on_ack(3), AckEvent::New);
        assert_eq!(cc.on_ack(3), AckEvent::Duplicate(1));
    }

    #[test]
    fn timeout_halves_threshold_and_resets_window() {
        let mut cc = Congestion::new(1, 16);
        epoch(&mut cc, 1, 1);
        epoch(&mut cc, 2, 2);
        assert_eq!(cc.window(), 4);

        cc.on_timeout();
        assert_eq!(cc.window(), 1);
        assert_eq!(cc.ssthresh(), 8);
    }

    #[test]
    fn window_and_threshold_stay_positive() {
        let mut cc = Congestion::new(1, 1);
        for _ in 0..5 {
            cc.on_timeout();
        }
        assert_eq!(cc.ssthresh(), 1);
        for _ in 0..5 {
            cc.on_ack(9);
        }
        assert_eq!(cc.window(), 1);
    }
}

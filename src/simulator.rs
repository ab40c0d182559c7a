//! Fault-injecting datagram link.
//!
//! Real networks drop, reorder, duplicate and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, a [`Simulator`] sits between a connection and whatever carries
//! its datagrams and applies a configurable fault model to every outbound
//! datagram:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.          |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`.   |
//! | Duplication  | Deliver a datagram twice with `duplicate_rate`.        |
//! | Reordering   | Hold a datagram back with `reorder_rate` until the     |
//! |              | next one has gone out, letting it overtake.            |
//!
//! Faults are drawn from a [`StdRng`], seeded from `seed` when given so a
//! failing run can be replayed exactly.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Probabilities of each fault, all in `[0.0, 1.0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub corrupt_rate: f64,
    /// RNG seed; `None` seeds from the operating system.
    pub seed: Option<u64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulatorError {
    #[error("{name} must be a probability in [0, 1], got {value}")]
    BadRate { name: &'static str, value: f64 },
}

impl SimulatorConfig {
    /// `true` when no fault can ever fire.
    pub fn is_transparent(&self) -> bool {
        self.loss_rate == 0.0
            && self.duplicate_rate == 0.0
            && self.reorder_rate == 0.0
            && self.corrupt_rate == 0.0
    }

    pub fn validate(&self) -> Result<(), SimulatorError> {
        let rates = [
            ("loss rate", self.loss_rate),
            ("duplicate rate", self.duplicate_rate),
            ("reorder rate", self.reorder_rate),
            ("corrupt rate", self.corrupt_rate),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulatorError::BadRate { name, value });
            }
        }
        Ok(())
    }
}

/// Running totals of injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub transmitted: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub corrupted: u64,
}

/// One direction of a lossy link.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    /// Datagrams held back for reordering.
    held: VecDeque<Vec<u8>>,
    stats: SimulatorStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            rng,
            held: VecDeque::new(),
            stats: SimulatorStats::default(),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    /// Number of datagrams currently held back.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Push one datagram through the fault model.
    ///
    /// Returns the datagrams that reach the far end now, in arrival order.
    /// That may be nothing (lost or held), the datagram itself, a duplicate
    /// pair, or the datagram followed by older ones it overtook.
    pub fn transmit(&mut self, datagram: &[u8]) -> Vec<Vec<u8>> {
        self.stats.transmitted += 1;

        if self.roll(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[sim] dropped {} byte datagram", datagram.len());
            return Vec::new();
        }

        let mut datagram = datagram.to_vec();
        if !datagram.is_empty() && self.roll(self.config.corrupt_rate) {
            let index = self.rng.random_range(0..datagram.len());
            let bit = self.rng.random_range(0..8u8);
            datagram[index] ^= 1 << bit;
            self.stats.corrupted += 1;
            log::trace!("[sim] flipped bit {bit} of byte {index}");
        }

        if self.held.is_empty() && self.roll(self.config.reorder_rate) {
            self.stats.reordered += 1;
            log::trace!("[sim] holding {} byte datagram back", datagram.len());
            self.held.push_back(datagram);
            return Vec::new();
        }

        let mut out = Vec::with_capacity(2 + self.held.len());
        if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            out.push(datagram.clone());
        }
        out.push(datagram);
        out.extend(self.held.drain(..));
        out
    }

    /// Let go of every held datagram, e.g. on a timer tick when no later
    /// traffic came along to overtake it.
    pub fn release(&mut self) -> Vec<Vec<u8>> {
        self.held.drain(..).collect()
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.random::<f64>() < rate
    }
}

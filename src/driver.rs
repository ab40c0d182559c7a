//! Async event loop that runs one [`Connection`] over a UDP socket.
//!
//! The protocol core is synchronous and I/O-free.  This module supplies the
//! outside world it talks to:
//!
//! ```text
//!            local input (AsyncRead)            application output (AsyncWrite)
//!                    │                                       ▲
//!                    ▼                                       │
//!   ┌──────────────────────────────── DriverChannel ─────────┴─────────┐
//!   │ inbox (bytes read, not yet packetised)   delivered (bytes out)   │
//!   │ outbox (encoded datagrams) ── optional Simulator ──▶             │
//!   └──────────────────────────────────────────────────────────────────┘
//!                    ▲                    │
//!                    │ Connection         ▼
//!                  Socket::recv_from   Socket::send_to
//! ```
//!
//! One `tokio::select!` loop waits on the socket, the local input and an
//! interval timer, and maps each to an entry point:
//!
//! | Event                 | Entry point                                  |
//! |-----------------------|----------------------------------------------|
//! | datagram from peer    | `on_receive`                                 |
//! | local input readable  | `read_and_send`                              |
//! | timer tick            | `on_timer_tick`                              |
//! | output written        | `flush_to_application`                       |
//!
//! After every event the loop writes delivered bytes to the output and
//! drains the outbox to the peer.  It returns once the connection reports
//! [`Status::Closed`].
//!
//! Without a known peer (listen mode) the first datagram's sender is adopted
//! and anything from other addresses is dropped; local input is not read
//! until a peer is known.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::connection::{Channel, ConnError, Connection, Input};
use crate::simulator::{Simulator, SimulatorConfig, SimulatorStats};
use crate::socket::{Socket, SocketError};
use crate::state::Status;

/// Bytes of application output buffered before the connection stops
/// delivering.
pub const OUTPUT_CAPACITY: usize = 64 * 1024;

/// Bytes of local input read ahead of the connection.
const INPUT_READ_AHEAD: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Connection(#[from] ConnError),
    #[error("reading local input: {0}")]
    Input(#[source] io::Error),
    #[error("writing application output: {0}")]
    Output(#[source] io::Error),
}

/// What a finished run looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub peer: Option<SocketAddr>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub simulator: Option<SimulatorStats>,
}

/// [`Channel`] backed by in-memory queues that the event loop services.
#[derive(Debug)]
pub struct DriverChannel {
    outbox: VecDeque<Vec<u8>>,
    inbox: VecDeque<u8>,
    input_eof: bool,
    delivered: Vec<u8>,
    output_eof: bool,
    capacity: usize,
    simulator: Option<Simulator>,
}

impl DriverChannel {
    pub fn new(capacity: usize, simulator: Option<Simulator>) -> Self {
        Self {
            outbox: VecDeque::new(),
            inbox: VecDeque::new(),
            input_eof: false,
            delivered: Vec::new(),
            output_eof: false,
            capacity,
            simulator,
        }
    }

    /// Queue bytes read from local input.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.inbox.extend(bytes);
    }

    /// Local input has ended; once the inbox drains the connection sees EOF.
    pub fn close_input(&mut self) {
        self.input_eof = true;
    }

    pub fn pending_input(&self) -> usize {
        self.inbox.len()
    }

    /// Take every datagram waiting to go out.
    pub fn take_outbox(&mut self) -> Vec<Vec<u8>> {
        self.outbox.drain(..).collect()
    }

    /// Take bytes delivered since the last call.
    pub fn take_delivered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.delivered)
    }

    /// `true` once the peer's end of stream has been delivered.
    pub fn output_eof(&self) -> bool {
        self.output_eof
    }

    /// Release datagrams the simulator was holding back.
    pub fn release_held(&mut self) {
        if let Some(sim) = self.simulator.as_mut() {
            self.outbox.extend(sim.release());
        }
    }

    pub fn simulator_stats(&self) -> Option<SimulatorStats> {
        self.simulator.as_ref().map(Simulator::stats)
    }
}

impl Channel for DriverChannel {
    fn send_packet(&mut self, datagram: &[u8]) {
        match self.simulator.as_mut() {
            Some(sim) => self.outbox.extend(sim.transmit(datagram)),
            None => self.outbox.push_back(datagram.to_vec()),
        }
    }

    fn read_input(&mut self, buf: &mut [u8]) -> Input {
        if self.inbox.is_empty() {
            return if self.input_eof { Input::Eof } else { Input::Empty };
        }
        let n = buf.len().min(self.inbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbox.drain(..n)) {
            *slot = byte;
        }
        Input::Data(n)
    }

    fn deliver(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            self.output_eof = true;
        } else {
            self.delivered.extend_from_slice(data);
        }
        Ok(())
    }

    fn output_space(&self) -> usize {
        self.capacity.saturating_sub(self.delivered.len())
    }
}

/// Run one connection to completion.
///
/// `peer` is the remote address in connect mode, or `None` to adopt the
/// first sender.  `input` is read until EOF and streamed to the peer; bytes
/// from the peer are written to `output`, which is shut down when the peer's
/// stream ends.
pub async fn run<R, W>(
    socket: Socket,
    peer: Option<SocketAddr>,
    config: Config,
    simulator: Option<SimulatorConfig>,
    mut input: R,
    mut output: W,
) -> Result<Summary, DriverError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut peer = peer;
    let channel = DriverChannel::new(OUTPUT_CAPACITY, simulator.map(Simulator::new));
    let mut conn = Connection::new(channel, config.clone());

    let mut ticker = tokio::time::interval(config.timer_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut read_buf = vec![0u8; config.format.max_payload() * 8];
    let mut input_open = true;
    let mut output_open = true;
    let mut bytes_in = 0u64;
    let mut bytes_out = 0u64;

    match peer {
        Some(addr) => log::info!("[drv] {} → {addr}", socket.local_addr),
        None => log::info!("[drv] listening on {}", socket.local_addr),
    }

    loop {
        let want_input = input_open
            && peer.is_some()
            && conn.channel().pending_input() < INPUT_READ_AHEAD;

        tokio::select! {
            // ── Datagram from the network ───────────────────────────────
            received = socket.recv_from() => {
                let (datagram, from) = received?;
                match peer {
                    None => {
                        log::info!("[drv] adopted peer {from}");
                        peer = Some(from);
                    }
                    Some(addr) if addr != from => {
                        log::debug!("[drv] ignoring datagram from stranger {from}");
                        continue;
                    }
                    Some(_) => {}
                }
                conn.on_receive(&datagram)?;
            }

            // ── Local input ─────────────────────────────────────────────
            read = input.read(&mut read_buf), if want_input => {
                let n = read.map_err(DriverError::Input)?;
                if n == 0 {
                    log::debug!("[drv] local input closed after {bytes_in} bytes");
                    input_open = false;
                    conn.channel_mut().close_input();
                } else {
                    bytes_in += n as u64;
                    conn.channel_mut().push_input(&read_buf[..n]);
                }
                conn.read_and_send()?;
            }

            // ── Timer ───────────────────────────────────────────────────
            _ = ticker.tick() => {
                conn.channel_mut().release_held();
                conn.on_timer_tick()?;
            }
        }

        // Hand delivered bytes to the application, then let the
        // connection refill the space that freed up.
        let delivered = conn.channel_mut().take_delivered();
        if !delivered.is_empty() {
            output
                .write_all(&delivered)
                .await
                .map_err(DriverError::Output)?;
            output.flush().await.map_err(DriverError::Output)?;
            bytes_out += delivered.len() as u64;
            conn.flush_to_application()?;
        }
        if output_open && conn.channel().output_eof() {
            output.shutdown().await.map_err(DriverError::Output)?;
            output_open = false;
        }

        let closed = conn.status() == Status::Closed;
        if closed {
            // No later tick will come along to let these go.
            conn.channel_mut().release_held();
        }
        if let Some(addr) = peer {
            for datagram in conn.channel_mut().take_outbox() {
                socket.send_to(&datagram, addr).await?;
            }
        }
        if closed {
            break;
        }
    }

    let summary = Summary {
        peer,
        bytes_in,
        bytes_out,
        simulator: conn.channel().simulator_stats(),
    };
    log::info!(
        "[drv] done: {} bytes sent, {} bytes received",
        summary.bytes_in,
        summary.bytes_out
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_input_drains_inbox_then_reports_eof() {
        let mut ch = DriverChannel::new(16, None);
        let mut buf = [0u8; 4];
        assert_eq!(ch.read_input(&mut buf), Input::Empty);

        ch.push_input(b"abcdef");
        ch.close_input();
        assert_eq!(ch.read_input(&mut buf), Input::Data(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(ch.read_input(&mut buf), Input::Data(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(ch.read_input(&mut buf), Input::Eof);
    }

    #[test]
    fn output_space_shrinks_until_taken() {
        let mut ch = DriverChannel::new(10, None);
        ch.deliver(b"1234").unwrap();
        assert_eq!(ch.output_space(), 6);
        assert_eq!(ch.take_delivered(), b"1234");
        assert_eq!(ch.output_space(), 10);

        ch.deliver(&[]).unwrap();
        assert!(ch.output_eof());
    }

    #[test]
    fn lossy_simulator_filters_outbox() {
        let sim = Simulator::new(SimulatorConfig {
            loss_rate: 1.0,
            seed: Some(1),
            ..Default::default()
        });
        let mut ch = DriverChannel::new(10, Some(sim));
        ch.send_packet(b"lost");
        assert!(ch.take_outbox().is_empty());
        assert_eq!(ch.simulator_stats().map(|s| s.dropped), Some(1));

        let mut clear = DriverChannel::new(10, None);
        clear.send_packet(b"kept");
        assert_eq!(clear.take_outbox(), vec![b"kept".to_vec()]);
    }
}

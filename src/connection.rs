//! Per-connection protocol state machine.
//!
//! A [`Connection`] owns the complete state for one reliable byte stream in
//! each direction:
//! - a **send buffer** of transmitted but unacknowledged packets,
//! - a **receive buffer** of arrived but undelivered packets,
//! - sequence cursors, the congestion window and the four EOF flags.
//!
//! It performs no I/O of its own.  Everything outside the protocol (the
//! datagram socket, the local input, the consuming application) is reached
//! through the [`Channel`] it is constructed with, and an external event loop
//! drives it through four entry points:
//!
//! | Event                          | Entry point                           |
//! |--------------------------------|---------------------------------------|
//! | datagram arrived               | [`Connection::on_receive`]            |
//! | local input readable           | [`Connection::read_and_send`]         |
//! | application can take more data | [`Connection::flush_to_application`]  |
//! | periodic timer                 | [`Connection::on_timer_tick`]         |
//!
//! Every entry point takes `&mut self`, so calls are serialised by
//! construction.  Each returns the connection [`Status`]; once it reports
//! [`Status::Closed`] the buffers have been released and further calls do
//! nothing.
//!
//! # Sequence numbers
//!
//! Sequence numbers count packets, not bytes, and start at 1 in both
//! directions.  The EOF marker is a header-only data packet and consumes a
//! sequence number like any other.

use std::io;

use thiserror::Error;

use crate::buffer::{BufferError, PacketBuffer};
use crate::config::Config;
use crate::congestion::{AckEvent, Congestion};
use crate::packet::{Packet, PacketError};
use crate::state::{flags, EofFlags, Status};
use crate::timer::EpochTimer;

/// First sequence number used in either direction.
pub const INITIAL_SEQNO: u32 = 1;

/// Outcome of [`Channel::read_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// This many bytes were written to the front of the buffer.
    Data(usize),
    /// Nothing available right now.
    Empty,
    /// Local input is exhausted for good.
    Eof,
}

/// Everything a [`Connection`] needs from the outside world.
pub trait Channel {
    /// Hand one encoded datagram to the unreliable network.
    fn send_packet(&mut self, datagram: &[u8]);

    /// Read up to `buf.len()` bytes of local input.
    fn read_input(&mut self, buf: &mut [u8]) -> Input;

    /// Deliver in-order bytes to the application.  An empty slice signals
    /// end of stream.  Never called with more than [`Channel::output_space`]
    /// bytes.
    fn deliver(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bytes the application can accept right now.
    fn output_space(&self) -> usize;
}

/// Local faults.  Malformed datagrams are not errors; they are dropped.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("packet buffer corrupted: {0}")]
    Buffer(#[from] BufferError),
    #[error("delivery to the application failed: {0}")]
    Output(#[from] io::Error),
    #[error("could not frame outgoing packet: {0}")]
    Encode(#[from] PacketError),
}

/// One reliable, congestion-controlled connection.
#[derive(Debug)]
pub struct Connection<C: Channel> {
    channel: C,
    config: Config,

    /// Sent, not yet cumulatively acknowledged.
    send_buffer: PacketBuffer,
    /// Received, not yet delivered to the application.
    receive_buffer: PacketBuffer,

    next_seqno_to_send: u32,
    /// Sequence number of our EOF marker, once local input ran dry.
    final_seqno: Option<u32>,
    /// Lowest sequence number not yet received; the cumulative ack cursor.
    next_seqno_expected: u32,
    /// Sequence number of the peer's EOF marker, once it has been buffered.
    peer_final_seqno: Option<u32>,
    /// Bytes of the receive-buffer head already delivered.
    head_offset: usize,
    /// Receive window most recently advertised by the peer.
    peer_window: u32,

    eof: EofFlags,
    congestion: Congestion,
    epoch: EpochTimer,
    status: Status,
}

impl<C: Channel> Connection<C> {
    /// Create a connection that is ready to exchange data immediately.
    ///
    /// `config` should already have passed [`Config::validate`].
    pub fn new(channel: C, config: Config) -> Self {
        log::info!(
            "[rel] connection up: window={} initial_cwnd={} format={:?}",
            config.window,
            config.initial_window,
            config.format
        );
        Self {
            channel,
            send_buffer: PacketBuffer::new(),
            receive_buffer: PacketBuffer::new(),
            next_seqno_to_send: INITIAL_SEQNO,
            final_seqno: None,
            next_seqno_expected: INITIAL_SEQNO,
            peer_final_seqno: None,
            head_offset: 0,
            peer_window: config.window,
            eof: EofFlags::default(),
            congestion: Congestion::new(config.initial_window, config.window),
            epoch: EpochTimer::new(config.timer_interval, config.timeout),
            status: Status::Open,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Process one inbound datagram.
    ///
    /// Malformed datagrams, stale data packets and packets beyond the receive
    /// window are dropped without any error; only local faults are returned.
    pub fn on_receive(&mut self, datagram: &[u8]) -> Result<Status, ConnError> {
        if self.status == Status::Closed {
            return Ok(Status::Closed);
        }

        let packet = match Packet::decode(datagram, self.config.format) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("[rel] ← dropped {} byte datagram: {e}", datagram.len());
                return Ok(self.status);
            }
        };

        let ackno = packet.header.ackno;
        if ackno > self.next_seqno_to_send {
            log::debug!(
                "[rel] ← dropped packet acking {ackno}, only sent up to {}",
                self.next_seqno_to_send - 1
            );
            return Ok(self.status);
        }

        match packet.seqno() {
            None => {
                log::trace!("[rel] ← ACK ack={ackno} rwnd={:?}", packet.header.rwnd);
                self.note_peer_window(&packet);
                self.process_ack(ackno);
                self.send_window()?;
            }
            Some(seqno) => self.receive_data(seqno, packet)?,
        }

        Ok(self.destroy_check())
    }

    /// Pull local input and transmit it while the window has room.
    pub fn read_and_send(&mut self) -> Result<Status, ConnError> {
        if self.status == Status::Closed {
            return Ok(Status::Closed);
        }
        self.send_window()?;
        Ok(self.destroy_check())
    }

    /// Deliver contiguous received data to the application.
    ///
    /// If the advertised window was closed and this flush freed buffer
    /// space, a window-update ACK is sent so the peer resumes sending.
    pub fn flush_to_application(&mut self) -> Result<Status, ConnError> {
        if self.status == Status::Closed {
            return Ok(Status::Closed);
        }
        let window_was_closed = self.advertised_window() == 0;
        let freed = self.flush()?;
        if window_was_closed && freed > 0 {
            log::debug!("[rel] → window update rwnd={}", self.advertised_window());
            self.send_ack()?;
        }
        Ok(self.destroy_check())
    }

    /// Periodic timer.
    ///
    /// Any unacknowledged data counts as a timeout: the whole send buffer is
    /// retransmitted and the congestion window collapses.  Once a full
    /// timeout has accumulated the window growth check runs.
    pub fn on_timer_tick(&mut self) -> Result<Status, ConnError> {
        if self.status == Status::Closed {
            return Ok(Status::Closed);
        }

        if !self.send_buffer.is_empty() {
            self.congestion.on_timeout();
            log::debug!(
                "[rel] timeout, retransmitting {} packet(s); cwnd={} ssthresh={}",
                self.send_buffer.len(),
                self.congestion.window(),
                self.congestion.ssthresh()
            );
            for packet in self.send_buffer.iter() {
                let bytes = packet.encode(self.config.format)?;
                self.channel.send_packet(&bytes);
            }
        }

        if self.epoch.tick() {
            self.congestion.on_epoch();
        }

        Ok(self.status)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn eof_flags(&self) -> EofFlags {
        self.eof
    }

    pub fn next_seqno_to_send(&self) -> u32 {
        self.next_seqno_to_send
    }

    pub fn next_seqno_expected(&self) -> u32 {
        self.next_seqno_expected
    }

    pub fn final_seqno(&self) -> Option<u32> {
        self.final_seqno
    }

    pub fn congestion_window(&self) -> u32 {
        self.congestion.window()
    }

    pub fn ssthresh(&self) -> u32 {
        self.congestion.ssthresh()
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    pub fn send_buffer(&self) -> &PacketBuffer {
        &self.send_buffer
    }

    pub fn receive_buffer(&self) -> &PacketBuffer {
        &self.receive_buffer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Tear the connection apart and hand back its channel.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Receive window we advertise: capacity minus buffered packets.
    pub fn advertised_window(&self) -> u32 {
        let buffered = u32::try_from(self.receive_buffer.len()).unwrap_or(u32::MAX);
        self.config.window.saturating_sub(buffered)
    }

    // -----------------------------------------------------------------------
    // Receive path
    // -----------------------------------------------------------------------

    fn receive_data(&mut self, seqno: u32, packet: Packet) -> Result<(), ConnError> {
        if seqno < self.next_seqno_expected {
            log::trace!(
                "[rel] ← stale DATA seq={seqno} (expecting {})",
                self.next_seqno_expected
            );
            // Our ACK for it may have been lost; repeat the cumulative one.
            self.send_ack()?;
            return Ok(());
        }
        if seqno - self.next_seqno_expected >= self.config.window {
            log::debug!(
                "[rel] ← DATA seq={seqno} beyond receive window ({} + {})",
                self.next_seqno_expected,
                self.config.window
            );
            return Ok(());
        }

        self.note_peer_window(&packet);
        let ackno = packet.header.ackno;
        let is_eof = packet.is_eof();
        let len = packet.payload.len();

        if self.receive_buffer.find_by_seqno(seqno).is_some() {
            log::trace!("[rel] ← duplicate DATA seq={seqno}, already buffered");
        }
        if let Err(e) = self.receive_buffer.insert_in_order(packet) {
            log::warn!("[rel] receive buffer fault at seq={seqno}: {e}");
            return Err(e.into());
        }
        self.advance_expected();
        log::debug!(
            "[rel] ← DATA seq={seqno} len={len}; → ACK ack={}",
            self.next_seqno_expected
        );
        self.send_ack()?;

        // Data packets piggyback an acknowledgment of our own stream.
        if self.process_ack(ackno) > 0 {
            self.send_window()?;
        }

        if is_eof {
            log::debug!("[rel] ← EOF seq={seqno}");
            self.peer_final_seqno = Some(seqno);
            self.eof.set(flags::OTHER_SIDE);
        }

        self.flush()?;
        Ok(())
    }

    /// Move the cumulative-ack cursor past the run that starts at the
    /// receive-buffer head, provided that run reaches the cursor.
    fn advance_expected(&mut self) {
        let Some(head) = self.receive_buffer.head().and_then(Packet::seqno) else {
            return;
        };
        if head > self.next_seqno_expected {
            return;
        }
        let run_end = self.receive_buffer.last_consecutive_seqno();
        self.next_seqno_expected = self.next_seqno_expected.max(run_end.saturating_add(1));
    }

    /// Deliver contiguous data; returns the number of buffer nodes released.
    fn flush(&mut self) -> Result<usize, ConnError> {
        if self.eof.conn_output() {
            return Ok(0);
        }

        // Data stops at the cumulative-ack cursor or at the peer's EOF
        // marker, whichever comes first.
        let ceiling = self
            .peer_final_seqno
            .map_or(self.next_seqno_expected, |eof| eof.min(self.next_seqno_expected));
        let pending = self
            .receive_buffer
            .total_payload_bytes(Some(ceiling))
            .saturating_sub(self.head_offset);
        let mut released = 0;

        let space = self.channel.output_space();
        if pending > 0 && space > 0 {
            let mut out = vec![0u8; pending.min(space)];
            let copied = self
                .receive_buffer
                .serialize_payload(&mut out, Some(ceiling), self.head_offset);
            self.channel.deliver(&out[..copied.bytes])?;

            let finished = copied.packets - usize::from(copied.partial_offset > 0);
            for _ in 0..finished {
                self.receive_buffer.remove_head();
            }
            released += finished;
            self.head_offset = copied.partial_offset;
            if self.head_offset > 0 {
                log::trace!(
                    "[rel] partial delivery of {} bytes, head offset now {}",
                    copied.bytes,
                    self.head_offset
                );
            }
        }

        if self.head_offset == 0 && self.channel.output_space() > 0 {
            if let Some(head) = self.receive_buffer.head() {
                let seqno = head.seqno().ok_or(BufferError::MissingSeqno)?;
                if head.is_eof() && seqno < self.next_seqno_expected {
                    self.channel.deliver(&[])?;
                    self.receive_buffer.remove_head();
                    self.eof.set(flags::CONN_OUTPUT);
                    released += 1;
                    log::debug!("[rel] EOF delivered to application");
                }
            }
        }
        Ok(released)
    }

    // -----------------------------------------------------------------------
    // Send path
    // -----------------------------------------------------------------------

    /// Fill the usable window from local input.
    fn send_window(&mut self) -> Result<(), ConnError> {
        if self.eof.conn_input() {
            return Ok(());
        }

        let unacked = u32::try_from(self.send_buffer.len()).unwrap_or(u32::MAX);
        let mut window = self
            .congestion
            .window()
            .min(self.peer_window.saturating_sub(unacked));
        // With nothing in flight, keep one packet going so a closed peer
        // window is eventually reopened by its ACK.
        if unacked == 0 {
            window = window.max(1);
        }
        let window = window as usize;

        let mut chunk = vec![0u8; self.config.format.max_payload()];
        while self.send_buffer.len() < window {
            match self.channel.read_input(&mut chunk) {
                Input::Empty | Input::Data(0) => break,
                Input::Eof => {
                    self.eof.set(flags::CONN_INPUT);
                    self.final_seqno = Some(self.next_seqno_to_send);
                    log::debug!("[rel] local input done; → EOF seq={}", self.next_seqno_to_send);
                    self.send_new(Vec::new())?;
                    break;
                }
                Input::Data(n) => {
                    let n = n.min(chunk.len());
                    self.send_new(chunk[..n].to_vec())?;
                }
            }
        }
        Ok(())
    }

    /// Stamp, transmit and buffer a new data packet.
    fn send_new(&mut self, payload: Vec<u8>) -> Result<(), ConnError> {
        let seqno = self.next_seqno_to_send;
        self.next_seqno_to_send += 1;

        let packet = Packet::data(
            seqno,
            self.next_seqno_expected,
            self.advertised_window(),
            payload,
        );
        let bytes = packet.encode(self.config.format)?;
        self.channel.send_packet(&bytes);
        self.congestion.on_sent();
        log::debug!(
            "[rel] → DATA seq={seqno} len={} in_flight={}",
            packet.payload.len(),
            self.send_buffer.len() + 1
        );
        self.send_buffer.insert_in_order(packet)?;
        Ok(())
    }

    fn send_ack(&mut self) -> Result<(), ConnError> {
        let ack = Packet::ack(self.next_seqno_expected, self.advertised_window());
        let bytes = ack.encode(self.config.format)?;
        self.channel.send_packet(&bytes);
        Ok(())
    }

    /// Ack bookkeeping shared by pure ACKs and piggybacked ack numbers.
    ///
    /// Returns the number of send-buffer packets released.
    fn process_ack(&mut self, ackno: u32) -> usize {
        if let AckEvent::Duplicate(n) = self.congestion.on_ack(ackno) {
            log::trace!("[rel] duplicate ack {ackno} (#{n})");
        }
        if self.final_seqno.is_some_and(|last| ackno > last) && !self.eof.all_acked() {
            log::debug!("[rel] ← ACK {ackno} covers our EOF");
            self.eof.set(flags::ALL_ACKED);
        }
        let released = self.send_buffer.prune_below(ackno);
        self.congestion.on_released(released);
        released
    }

    fn note_peer_window(&mut self, packet: &Packet) {
        if let Some(rwnd) = packet.header.rwnd {
            self.peer_window = rwnd;
        }
    }

    /// Release everything once all four EOF conditions hold.
    fn destroy_check(&mut self) -> Status {
        if self.status == Status::Open && self.eof.complete() {
            log::info!(
                "[rel] both directions finished; releasing connection (sent {} packets, received {})",
                self.next_seqno_to_send - INITIAL_SEQNO,
                self.next_seqno_expected - INITIAL_SEQNO
            );
            self.send_buffer.clear();
            self.receive_buffer.clear();
            self.head_offset = 0;
            self.status = Status::Closed;
        }
        self.status
    }
}

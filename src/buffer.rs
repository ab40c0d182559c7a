//! Sequence-ordered packet buffer.
//!
//! [`PacketBuffer`] is the storage behind both halves of a connection:
//!
//! - as the **send buffer** it holds packets that were transmitted but not yet
//!   cumulatively acknowledged; the head is always the oldest unacknowledged
//!   packet and ACKs prune from the head.
//! - as the **receive buffer** it holds packets that arrived (possibly out of
//!   order) but have not been handed to the application; it may contain gaps
//!   and is consumed from the head once the head is contiguous.
//!
//! # Invariants
//!
//! - Nodes are strictly ascending by sequence number.
//! - No two nodes share a sequence number; re-inserting a present sequence
//!   number is a no-op (first writer wins).
//! - Every node owns exactly one data packet.  Packets move in by value and
//!   leave by value through [`PacketBuffer::remove_head`].
//!
//! The list is an owned doubly linked list; every lookup is a linear scan
//! from the head, which is fine for window-sized buffers.

use std::collections::LinkedList;

use thiserror::Error;

use crate::packet::Packet;

/// Structural faults in the buffer.
///
/// These never result from bad input on the wire; they mean a caller tried to
/// store something that is not a data packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("packet buffer node carries no sequence number")]
    MissingSeqno,
}

/// What [`PacketBuffer::insert_in_order`] did with its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The packet now occupies its own node.
    Inserted,
    /// A node with the same sequence number already existed; the new packet
    /// was dropped.
    Duplicate,
}

/// Result of [`PacketBuffer::serialize_payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Serialized {
    /// Bytes written to the destination.
    pub bytes: usize,
    /// Nodes whose payload was copied from, fully or partially.
    pub packets: usize,
    /// Position inside the last touched node where copying stopped, if it
    /// was only partially copied; `0` when every touched node was finished.
    pub partial_offset: usize,
}

/// Sequence-ordered doubly linked list of data packets.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    nodes: LinkedList<Packet>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `packet` at the position its sequence number dictates.
    ///
    /// Scans for the first node whose sequence number is ≥ the new one.  An
    /// equal node makes this a duplicate and `packet` is dropped; otherwise
    /// the packet is spliced in before that node, or at the tail.
    ///
    /// Fails if `packet`, or any node visited during the scan, has no
    /// sequence number.
    pub fn insert_in_order(&mut self, packet: Packet) -> Result<Insertion, BufferError> {
        let seqno = packet.seqno().ok_or(BufferError::MissingSeqno)?;

        // Appends dominate on the send side; skip the scan when possible.
        match self.nodes.back().map(Packet::seqno) {
            None => {
                self.nodes.push_back(packet);
                return Ok(Insertion::Inserted);
            }
            Some(Some(tail)) if tail < seqno => {
                self.nodes.push_back(packet);
                return Ok(Insertion::Inserted);
            }
            _ => {}
        }

        let mut position = self.nodes.len();
        for (index, node) in self.nodes.iter().enumerate() {
            let existing = node.seqno().ok_or(BufferError::MissingSeqno)?;
            if existing == seqno {
                log::trace!("[buf] duplicate seqno={seqno} dropped");
                return Ok(Insertion::Duplicate);
            }
            if existing > seqno {
                position = index;
                break;
            }
        }

        let mut tail = self.nodes.split_off(position);
        self.nodes.push_back(packet);
        self.nodes.append(&mut tail);
        Ok(Insertion::Inserted)
    }

    /// Detach and return the first node, or `None` when empty.
    pub fn remove_head(&mut self) -> Option<Packet> {
        self.nodes.pop_front()
    }

    /// The first node, if any.
    pub fn head(&self) -> Option<&Packet> {
        self.nodes.front()
    }

    /// Linear scan for the node carrying `seqno`.
    pub fn find_by_seqno(&self, seqno: u32) -> Option<&Packet> {
        self.nodes.iter().find(|p| p.seqno() == Some(seqno))
    }

    /// Highest sequence number reachable from the head by consecutive
    /// integers, or `0` for an empty buffer.
    ///
    /// `[5, 6, 7, 9]` yields `7`; `[5, 7]` yields `5`.
    pub fn last_consecutive_seqno(&self) -> u32 {
        let mut seqnos = self.nodes.iter().filter_map(Packet::seqno);
        let Some(mut last) = seqnos.next() else {
            return 0;
        };
        for seqno in seqnos {
            if Some(seqno) != last.checked_add(1) {
                break;
            }
            last = seqno;
        }
        last
    }

    /// Remove every head node whose sequence number is below `ackno`.
    ///
    /// Returns the number of nodes removed.
    pub fn prune_below(&mut self, ackno: u32) -> usize {
        let mut removed = 0;
        while self
            .nodes
            .front()
            .and_then(Packet::seqno)
            .is_some_and(|seqno| seqno < ackno)
        {
            self.nodes.pop_front();
            removed += 1;
        }
        removed
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over the nodes from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.nodes.iter()
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Sum of payload bytes over nodes whose sequence number is below
    /// `ceiling` (`None` = every node).
    pub fn total_payload_bytes(&self, ceiling: Option<u32>) -> usize {
        self.below(ceiling).map(|p| p.payload.len()).sum()
    }

    /// Copy payload bytes from consecutive nodes into `dest`.
    ///
    /// Copying starts `head_offset` bytes into the head node, stops before
    /// the first node at or above `ceiling`, and stops once `dest` is full.
    /// The returned [`Serialized`] says how many nodes were touched and, if
    /// the last one did not fit completely, where inside it copying stopped.
    pub fn serialize_payload(
        &self,
        dest: &mut [u8],
        ceiling: Option<u32>,
        head_offset: usize,
    ) -> Serialized {
        let mut out = Serialized::default();
        let mut skip = head_offset;

        for packet in self.below(ceiling) {
            let room = dest.len() - out.bytes;
            if room == 0 {
                break;
            }
            let start = skip.min(packet.payload.len());
            skip = 0;
            let remaining = &packet.payload[start..];
            let take = remaining.len().min(room);
            dest[out.bytes..out.bytes + take].copy_from_slice(&remaining[..take]);
            out.bytes += take;
            out.packets += 1;
            if take < remaining.len() {
                out.partial_offset = start + take;
                break;
            }
        }
        out
    }

    fn below(&self, ceiling: Option<u32>) -> impl Iterator<Item = &Packet> {
        self.nodes.iter().take_while(move |p| match (ceiling, p.seqno()) {
            (None, _) => true,
            (Some(ceiling), Some(seqno)) => seqno < ceiling,
            (Some(_), None) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use rand::Rng;

    use super::*;

    fn pkt(seqno: u32, payload: &[u8]) -> Packet {
        Packet::data(seqno, 1, 8, payload.to_vec())
    }

    fn buffer_of(seqnos: &[u32]) -> PacketBuffer {
        let mut buf = PacketBuffer::new();
        for &s in seqnos {
            buf.insert_in_order(pkt(s, b"")).unwrap();
        }
        buf
    }

    fn seqnos(buf: &PacketBuffer) -> Vec<u32> {
        buf.iter().filter_map(Packet::seqno).collect()
    }

    #[test]
    fn empty_buffer() {
        let mut buf = PacketBuffer::new();
        assert_eq!(buf.len(), 0);
        assert!(buf.remove_head().is_none());
        assert_eq!(buf.last_consecutive_seqno(), 0);
        assert_eq!(buf.total_payload_bytes(None), 0);
    }

    #[test]
    fn inserts_sort_out_of_order_arrivals() {
        let buf = buffer_of(&[3, 1, 99, 2, 50]);
        assert_eq!(seqnos(&buf), vec![1, 2, 3, 50, 99]);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let mut buf = PacketBuffer::new();
        assert_eq!(buf.insert_in_order(pkt(4, b"first")), Ok(Insertion::Inserted));
        assert_eq!(buf.insert_in_order(pkt(4, b"second")), Ok(Insertion::Duplicate));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.head().unwrap().payload, b"first");
    }

    #[test]
    fn duplicate_in_the_middle_is_dropped() {
        let mut buf = buffer_of(&[1, 2, 3]);
        assert_eq!(buf.insert_in_order(pkt(2, b"again")), Ok(Insertion::Duplicate));
        assert_eq!(seqnos(&buf), vec![1, 2, 3]);
    }

    #[test]
    fn ack_packets_are_rejected() {
        let mut buf = PacketBuffer::new();
        assert_eq!(
            buf.insert_in_order(Packet::ack(1, 1)),
            Err(BufferError::MissingSeqno)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn randomised_inserts_keep_strict_order() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let count = rng.random_range(1..40);
            let mut input: Vec<u32> = (0..count).map(|_| rng.random_range(1..30)).collect();
            input.shuffle(&mut rng);

            let buf = buffer_of(&input);

            let mut distinct = input.clone();
            distinct.sort_unstable();
            distinct.dedup();
            assert_eq!(seqnos(&buf), distinct);
            assert_eq!(buf.len(), distinct.len());
        }
    }

    #[test]
    fn remove_head_pops_in_sequence_order() {
        let mut buf = buffer_of(&[2, 1, 3]);
        assert_eq!(buf.remove_head().unwrap().seqno(), Some(1));
        assert_eq!(buf.head().unwrap().seqno(), Some(2));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn find_by_seqno_scans_the_list() {
        let buf = buffer_of(&[1, 4, 9]);
        assert!(buf.find_by_seqno(4).is_some());
        assert!(buf.find_by_seqno(5).is_none());
    }

    #[test]
    fn last_consecutive_seqno_follows_the_run() {
        assert_eq!(buffer_of(&[5, 6, 7, 9]).last_consecutive_seqno(), 7);
        assert_eq!(buffer_of(&[5, 7]).last_consecutive_seqno(), 5);
        assert_eq!(buffer_of(&[1]).last_consecutive_seqno(), 1);
    }

    #[test]
    fn prune_below_removes_acknowledged_prefix() {
        let mut buf = buffer_of(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.prune_below(3), 2);
        assert_eq!(buf.head().unwrap().seqno(), Some(3));
        assert_eq!(buf.len(), 3);

        // A stale ack removes nothing.
        assert_eq!(buf.prune_below(2), 0);
        assert_eq!(buf.prune_below(100), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn total_payload_bytes_respects_ceiling() {
        let mut buf = PacketBuffer::new();
        buf.insert_in_order(pkt(1, b"abc")).unwrap();
        buf.insert_in_order(pkt(2, b"de")).unwrap();
        buf.insert_in_order(pkt(4, b"fghi")).unwrap();
        assert_eq!(buf.total_payload_bytes(None), 9);
        assert_eq!(buf.total_payload_bytes(Some(3)), 5);
        assert_eq!(buf.total_payload_bytes(Some(1)), 0);
    }

    fn first_second() -> PacketBuffer {
        let mut buf = PacketBuffer::new();
        buf.insert_in_order(pkt(1, b"first")).unwrap();
        buf.insert_in_order(pkt(2, b"second")).unwrap();
        buf
    }

    #[test]
    fn serialize_splits_second_packet() {
        let mut dest = [0u8; 8];
        let out = first_second().serialize_payload(&mut dest, None, 0);
        assert_eq!(&dest, b"firstsec");
        assert_eq!(out.bytes, 8);
        assert_eq!(out.packets, 2);
        assert_eq!(out.partial_offset, 3);
    }

    #[test]
    fn serialize_exact_fit_reports_no_offset() {
        let mut dest = [0u8; 5];
        let out = first_second().serialize_payload(&mut dest, None, 0);
        assert_eq!(&dest, b"first");
        assert_eq!(out.packets, 1);
        assert_eq!(out.partial_offset, 0);
    }

    #[test]
    fn serialize_into_tiny_destination() {
        let mut dest = [0u8; 2];
        let out = first_second().serialize_payload(&mut dest, None, 0);
        assert_eq!(&dest, b"fi");
        assert_eq!(out.packets, 1);
        assert_eq!(out.partial_offset, 2);
    }

    #[test]
    fn serialize_stops_at_ceiling() {
        let mut dest = [0u8; 64];
        let out = first_second().serialize_payload(&mut dest, Some(2), 0);
        assert_eq!(&dest[..out.bytes], b"first");
        assert_eq!(out.packets, 1);
        assert_eq!(out.partial_offset, 0);
    }

    #[test]
    fn serialize_resumes_inside_the_head() {
        let buf = first_second();

        let mut dest = [0u8; 5];
        let out = buf.serialize_payload(&mut dest, None, 2);
        assert_eq!(&dest, b"rstse");
        assert_eq!(out.packets, 2);
        assert_eq!(out.partial_offset, 2);

        let mut dest = [0u8; 2];
        let out = buf.serialize_payload(&mut dest, None, 2);
        assert_eq!(&dest, b"rs");
        assert_eq!(out.packets, 1);
        assert_eq!(out.partial_offset, 4);

        let mut dest = [0u8; 3];
        let out = buf.serialize_payload(&mut dest, Some(2), 2);
        assert_eq!(&dest, b"rst");
        assert_eq!(out.packets, 1);
        assert_eq!(out.partial_offset, 0);
    }
}

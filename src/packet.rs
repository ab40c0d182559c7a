//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout for data and ack-only packets.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Validating and deserialising a raw datagram, returning a typed
//!   [`PacketError`] for anything malformed.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              Receive Window (windowed format only)            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Sequence Number (data packets)                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The length field covers the whole packet, header included.  An ack-only
//! packet stops after the acknowledgment (or window) field; a data packet
//! carrying no payload is the end-of-stream marker.

use thiserror::Error;

/// Largest datagram either side will ever put on the wire.
pub const MAX_PACKET_SIZE: usize = 512;

// Byte offsets shared by both formats.
const OFF_CHECKSUM: usize = 0;
const OFF_LEN: usize = 2;
const OFF_ACKNO: usize = 4;
const OFF_AFTER_ACKNO: usize = 8;

/// Which header layout the two peers agreed on.
///
/// The plain layout carries no receive-window field; the windowed layout
/// inserts a 32-bit advertisement right after the acknowledgment number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketFormat {
    Plain,
    #[default]
    Windowed,
}

impl PacketFormat {
    /// Exact length of an ack-only packet.
    pub const fn ack_len(self) -> usize {
        match self {
            PacketFormat::Plain => 8,
            PacketFormat::Windowed => 12,
        }
    }

    /// Length of a data packet with an empty payload (the EOF marker).
    pub const fn data_header_len(self) -> usize {
        self.ack_len() + 4
    }

    /// Largest payload a single data packet can carry.
    pub const fn max_payload(self) -> usize {
        MAX_PACKET_SIZE - self.data_header_len()
    }

    const fn seqno_offset(self) -> usize {
        self.ack_len()
    }

    const fn carries_window(self) -> bool {
        matches!(self, PacketFormat::Windowed)
    }
}

/// Fixed header fields in host byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Internet checksum over the packet with this field zeroed.
    ///
    /// Computed by [`Packet::encode`]; verified by [`Packet::decode`].
    pub checksum: u16,
    /// Total packet length including the header.
    pub len: u16,
    /// Cumulative acknowledgment: every sequence number below this one has
    /// been received.
    pub ackno: u32,
    /// Advertised receive window in packets, when the format carries it.
    pub rwnd: Option<u32>,
    /// Sequence number; `None` for ack-only packets.
    pub seqno: Option<u32>,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build an ack-only packet.
    pub fn ack(ackno: u32, rwnd: u32) -> Self {
        Packet {
            header: Header {
                checksum: 0,
                len: 0,
                ackno,
                rwnd: Some(rwnd),
                seqno: None,
            },
            payload: Vec::new(),
        }
    }

    /// Build a data packet.  An empty `payload` makes this the EOF marker.
    pub fn data(seqno: u32, ackno: u32, rwnd: u32, payload: Vec<u8>) -> Self {
        Packet {
            header: Header {
                checksum: 0,
                len: 0,
                ackno,
                rwnd: Some(rwnd),
                seqno: Some(seqno),
            },
            payload,
        }
    }

    /// `true` for ack-only packets.
    pub fn is_ack(&self) -> bool {
        self.header.seqno.is_none()
    }

    /// `true` for the header-only data packet that ends a stream.
    pub fn is_eof(&self) -> bool {
        self.header.seqno.is_some() && self.payload.is_empty()
    }

    /// Sequence number, `None` for ack-only packets.
    pub fn seqno(&self) -> Option<u32> {
        self.header.seqno
    }

    /// On-wire length of this packet in `format`.
    pub fn wire_len(&self, format: PacketFormat) -> usize {
        if self.is_ack() {
            format.ack_len()
        } else {
            format.data_header_len() + self.payload.len()
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// `header.len` and `header.checksum` are computed from the packet itself;
    /// any values already stored in those fields are ignored.
    pub fn encode(&self, format: PacketFormat) -> Result<Vec<u8>, PacketError> {
        if self.is_ack() && !self.payload.is_empty() {
            return Err(PacketError::PayloadOnAck);
        }
        if self.payload.len() > format.max_payload() {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }

        let len = self.wire_len(format);
        let mut buf = vec![0u8; len];

        buf[OFF_LEN..OFF_LEN + 2].copy_from_slice(&(len as u16).to_be_bytes());
        buf[OFF_ACKNO..OFF_ACKNO + 4].copy_from_slice(&self.header.ackno.to_be_bytes());
        if format.carries_window() {
            let rwnd = self.header.rwnd.unwrap_or(0);
            buf[OFF_AFTER_ACKNO..OFF_AFTER_ACKNO + 4].copy_from_slice(&rwnd.to_be_bytes());
        }
        if let Some(seqno) = self.header.seqno {
            let off = format.seqno_offset();
            buf[off..off + 4].copy_from_slice(&seqno.to_be_bytes());
            buf[format.data_header_len()..].copy_from_slice(&self.payload);
        }

        // Checksum field is still zero here.
        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Validate and parse a [`Packet`] from a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` cannot even hold the checksum and length fields,
    /// - the length field disagrees with `buf.len()`,
    /// - the declared length is neither an ack length nor a data length
    ///   within `[data_header_len, MAX_PACKET_SIZE]`,
    /// - the checksum does not verify, or
    /// - a data packet carries sequence number zero.
    pub fn decode(buf: &[u8], format: PacketFormat) -> Result<Self, PacketError> {
        if buf.len() < OFF_ACKNO {
            return Err(PacketError::BufferTooShort);
        }

        let checksum = read_u16(buf, OFF_CHECKSUM);
        let len = read_u16(buf, OFF_LEN);

        if usize::from(len) != buf.len() {
            return Err(PacketError::LengthMismatch {
                declared: len,
                actual: buf.len(),
            });
        }
        let is_ack = usize::from(len) == format.ack_len();
        if !is_ack
            && !(format.data_header_len()..=MAX_PACKET_SIZE).contains(&usize::from(len))
        {
            return Err(PacketError::LengthOutOfRange(len));
        }

        // Verify checksum: zero the stored field, recompute, compare.
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        if internet_checksum(&scratch) != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        let ackno = read_u32(buf, OFF_ACKNO);
        let rwnd = format
            .carries_window()
            .then(|| read_u32(buf, OFF_AFTER_ACKNO));

        let (seqno, payload) = if is_ack {
            (None, Vec::new())
        } else {
            let seqno = read_u32(buf, format.seqno_offset());
            if seqno == 0 {
                return Err(PacketError::InvalidSeqno);
            }
            (Some(seqno), buf[format.data_header_len()..].to_vec())
        };

        Ok(Packet {
            header: Header {
                checksum,
                len,
                ackno,
                rwnd,
                seqno,
            },
            payload,
        })
    }
}

/// Reasons a datagram is rejected or a packet cannot be serialised.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("length field says {declared} bytes but datagram has {actual}")]
    LengthMismatch { declared: u16, actual: usize },
    #[error("declared length {0} is not a valid packet length")]
    LengthOutOfRange(u16),
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("data packet carries sequence number 0")]
    InvalidSeqno,
    #[error("payload of {0} bytes does not fit in one packet")]
    PayloadTooLarge(usize),
    #[error("ack-only packets cannot carry a payload")]
    PayloadOnAck,
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: PacketFormat = PacketFormat::Windowed;
    const P: PacketFormat = PacketFormat::Plain;

    #[test]
    fn header_lengths_per_format() {
        assert_eq!(P.ack_len(), 8);
        assert_eq!(P.data_header_len(), 12);
        assert_eq!(P.max_payload(), 500);
        assert_eq!(W.ack_len(), 12);
        assert_eq!(W.data_header_len(), 16);
        assert_eq!(W.max_payload(), 496);
    }

    #[test]
    fn data_packet_roundtrip() {
        let pkt = Packet::data(7, 3, 12, b"hello".to_vec());
        let bytes = pkt.encode(W).unwrap();
        assert_eq!(bytes.len(), 16 + 5);

        let decoded = Packet::decode(&bytes, W).unwrap();
        assert_eq!(decoded.seqno(), Some(7));
        assert_eq!(decoded.header.ackno, 3);
        assert_eq!(decoded.header.rwnd, Some(12));
        assert_eq!(decoded.header.len, 21);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn plain_format_drops_window() {
        let bytes = Packet::data(1, 1, 99, b"x".to_vec()).encode(P).unwrap();
        assert_eq!(bytes.len(), 13);
        let decoded = Packet::decode(&bytes, P).unwrap();
        assert_eq!(decoded.header.rwnd, None);
        assert_eq!(decoded.seqno(), Some(1));
    }

    #[test]
    fn ack_packet_has_no_seqno() {
        let bytes = Packet::ack(42, 5).encode(P).unwrap();
        assert_eq!(bytes.len(), 8);
        let decoded = Packet::decode(&bytes, P).unwrap();
        assert!(decoded.is_ack());
        assert!(!decoded.is_eof());
        assert_eq!(decoded.header.ackno, 42);
    }

    #[test]
    fn header_only_data_packet_is_eof() {
        let bytes = Packet::data(9, 1, 4, Vec::new()).encode(W).unwrap();
        assert_eq!(bytes.len(), W.data_header_len());
        let decoded = Packet::decode(&bytes, W).unwrap();
        assert!(decoded.is_eof());
    }

    #[test]
    fn fields_are_big_endian_on_wire() {
        let bytes = Packet::data(0x0102_0304, 0x0506_0708, 0x0a0b_0c0d, vec![])
            .encode(W)
            .unwrap();
        assert_eq!(&bytes[OFF_LEN..OFF_LEN + 2], &[0x00, 0x10]);
        assert_eq!(&bytes[4..8], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[8..12], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&bytes[12..16], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[], W), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = Packet::data(1, 1, 1, b"data".to_vec()).encode(W).unwrap();
        bytes.pop();
        assert_eq!(
            Packet::decode(&bytes, W),
            Err(PacketError::LengthMismatch {
                declared: 20,
                actual: 19
            })
        );
    }

    #[test]
    fn decode_rejects_lengths_between_ack_and_data() {
        // A 10-byte plain datagram is neither an ack nor a data packet.
        let mut bytes = vec![0u8; 10];
        bytes[OFF_LEN..OFF_LEN + 2].copy_from_slice(&10u16.to_be_bytes());
        let csum = internet_checksum(&bytes);
        bytes[..2].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(
            Packet::decode(&bytes, P),
            Err(PacketError::LengthOutOfRange(10))
        );
    }

    #[test]
    fn decode_rejects_oversized_datagram() {
        let mut bytes = vec![0u8; MAX_PACKET_SIZE + 1];
        bytes[OFF_LEN..OFF_LEN + 2].copy_from_slice(&(MAX_PACKET_SIZE as u16 + 1).to_be_bytes());
        assert_eq!(
            Packet::decode(&bytes, P),
            Err(PacketError::LengthOutOfRange(513))
        );
    }

    #[test]
    fn decode_corrupt_byte_returns_checksum_error() {
        let mut bytes = Packet::data(99, 1, 8, b"test".to_vec()).encode(W).unwrap();
        *bytes.last_mut().unwrap() ^= 0xff;
        assert_eq!(Packet::decode(&bytes, W), Err(PacketError::ChecksumFailed));
    }

    #[test]
    fn decode_rejects_seqno_zero() {
        let bytes = Packet::data(0, 1, 1, b"z".to_vec()).encode(P).unwrap();
        assert_eq!(Packet::decode(&bytes, P), Err(PacketError::InvalidSeqno));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let pkt = Packet::data(1, 1, 1, vec![0u8; 497]);
        assert_eq!(pkt.encode(W), Err(PacketError::PayloadTooLarge(497)));
        assert!(pkt.encode(P).is_ok());
    }

    #[test]
    fn checksum_of_encoded_packet_verifies_to_zero() {
        let bytes = Packet::data(5, 2, 3, b"odd".to_vec()).encode(W).unwrap();
        // One's-complement sum over a packet including its checksum is 0xffff.
        assert_eq!(internet_checksum(&bytes), 0);
    }
}

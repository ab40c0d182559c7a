//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  Framing and validation belong to the connection; this module
//! owns only byte I/O.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Maximum UDP payload size (theoretical limit; protocol packets are far
/// smaller, but oversized junk must still be read whole to be rejected).
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sent {sent} of {len} bytes to {dest}")]
    ShortSend {
        sent: usize,
        len: usize,
        dest: SocketAddr,
    },
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[sock] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }

    /// Send `datagram` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        let sent = self.inner.send_to(datagram, dest).await?;
        if sent != datagram.len() {
            return Err(SocketError::ShortSend {
                sent,
                len: datagram.len(),
                dest,
            });
        }
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Returns `(bytes, sender_address)`.  Cancel safe: dropping the future
    /// before it completes loses no datagram.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn datagrams_round_trip_on_loopback() {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(a.local_addr.port(), 0);

        a.send_to(b"ping", b.local_addr).await.unwrap();
        let (bytes, from) = b.recv_from().await.unwrap();
        assert_eq!(bytes, b"ping");
        assert_eq!(from, a.local_addr);
    }
}

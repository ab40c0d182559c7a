//! `reliable-udp`: a reliable, congestion-controlled byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!   local input ──▶ read_and_send ─┐           ┌─ flush_to_application ──▶ output
//!                                  ▼           │
//!                  ┌────────────────────────────────────────┐
//!                  │               Connection               │
//!                  │  send buffer      receive buffer       │
//!                  │  (unacked)        (out of order)       │
//!                  │  Congestion       EofFlags             │
//!                  └──────┬──────────────────────▲──────────┘
//!                         │ Packet::encode       │ Packet::decode
//!                  ┌──────▼──────────────────────┴──────────┐
//!                  │ Channel (driver queues + Simulator)    │
//!                  └──────┬──────────────────────▲──────────┘
//!                         │ raw UDP datagrams    │
//!                  ┌──────▼──────────────────────┴──────────┐
//!                  │ Socket (tokio UdpSocket)               │
//!                  └────────────────────────────────────────┘
//! ```
//!
//! The [`connection`] core is synchronous and performs no I/O; the
//! [`driver`] runs it inside a tokio event loop.
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format and Internet checksum
//! - [`buffer`]: sequence-ordered packet list (send and receive side)
//! - [`connection`]: per-connection state machine and its four entry points
//! - [`congestion`]: slow start / AIMD window
//! - [`state`]: end-of-stream flags and connection status
//! - [`timer`]: tick accounting for congestion epochs
//! - [`config`]: per-connection tunables
//! - [`simulator`]: seeded loss/duplicate/reorder/corrupt link
//! - [`socket`]: async UDP socket abstraction
//! - [`driver`]: event loop binding socket, input, output and timer

pub mod buffer;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod driver;
pub mod packet;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use connection::{Channel, ConnError, Connection, Input};
pub use state::Status;

//! End-of-stream bookkeeping for a connection.
//!
//! A connection has no explicit open/close handshake.  It is established the
//! moment it is created and torn down once four independent end-of-stream
//! conditions all hold.  Each condition is raised by a different event, in
//! any order:
//!
//! ```text
//!  OTHER_SIDE   peer's EOF marker accepted by on_receive
//!  CONN_INPUT   local input reported EOF in read_and_send
//!  ALL_ACKED    peer acknowledged past our EOF marker
//!  CONN_OUTPUT  peer's EOF delivered to the application
//!
//!  OTHER_SIDE & CONN_INPUT & ALL_ACKED & CONN_OUTPUT  ==>  Closed
//! ```

/// Bit constants for [`EofFlags`].
pub mod flags {
    /// The peer's EOF marker has been received.
    pub const OTHER_SIDE: u8 = 0b0000_0001;
    /// Local input is exhausted.
    pub const CONN_INPUT: u8 = 0b0000_0010;
    /// Everything up to and including our EOF marker was acknowledged.
    pub const ALL_ACKED: u8 = 0b0000_0100;
    /// The peer's EOF has been handed to the application.
    pub const CONN_OUTPUT: u8 = 0b0000_1000;

    pub const ALL: u8 = OTHER_SIDE | CONN_INPUT | ALL_ACKED | CONN_OUTPUT;
}

/// The set of end-of-stream conditions reached so far.
///
/// Flags are only ever set, never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EofFlags(u8);

impl EofFlags {
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn other_side(self) -> bool {
        self.contains(flags::OTHER_SIDE)
    }

    pub fn conn_input(self) -> bool {
        self.contains(flags::CONN_INPUT)
    }

    pub fn all_acked(self) -> bool {
        self.contains(flags::ALL_ACKED)
    }

    pub fn conn_output(self) -> bool {
        self.contains(flags::CONN_OUTPUT)
    }

    /// `true` once every condition holds and the connection may be released.
    pub fn complete(self) -> bool {
        self.contains(flags::ALL)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for EofFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (flags::OTHER_SIDE, "other_side"),
            (flags::CONN_INPUT, "conn_input"),
            (flags::ALL_ACKED, "all_acked"),
            (flags::CONN_OUTPUT, "conn_output"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Whether a connection is still usable after an entry point returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Open,
    /// All four EOF conditions held; both buffers were released.
    Closed,
}

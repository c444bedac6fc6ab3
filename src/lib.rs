//! Low-level protocol logic for the RapidIO link layer
//!
//! rio-proto contains a fully deterministic implementation of the RapidIO
//! link-layer protocol: symbol framing, the acknowledged sliding-window
//! exchange, and the link-request/link-response recovery handshake. It does
//! not perform I/O and it never reads the clock; instead, the host drives a
//! [`Port`] by feeding it inbound symbols from the symbol codec, polling it
//! for outbound symbols, and supplying the current time. This allows it to
//! be driven by any transport the host cares to pair with a codec, and makes
//! the whole protocol deterministic under test.
//!
//! The [`Port`] object contains both halves of the link: a receiver that
//! reassembles inbound packets and decides how they are acknowledged, and a
//! transmitter that emits status symbols, packet frames, and whatever control
//! symbols the receiver asks it for. Packets move through two bounded queues
//! carved out of caller-supplied word buffers; nothing is allocated after
//! construction.

use std::fmt;

mod coding;
mod config;
mod crc;
mod link;
mod packet;
mod queue;
mod symbol;

#[cfg(test)]
mod tests;

pub use crate::coding::{Codec, UnexpectedEnd};
pub use crate::config::LinkConfig;
pub use crate::link::{InboundStats, LinkStats, OutboundStats, PartnerStats, Port};
pub use crate::packet::{Packet, PacketSizeExceeded};
pub use crate::queue::QueueError;
pub use crate::symbol::{ControlSymbol, NotAcceptedCause, Stype0, Stype1, SymbolDecodeError};

/// Maximum length of a packet in 32-bit words, including the embedded CRC
pub const PACKET_SIZE_MAX: usize = 69;

/// Words per queue slot: one length word followed by the packet itself
pub(crate) const SLOT_WORDS: usize = PACKET_SIZE_MAX + 1;

/// Shortest legal packet in words
pub(crate) const PACKET_SIZE_MIN: usize = 3;

/// The quantum of exchange with the symbol codec
///
/// Idle symbols are produced when there is nothing else to send. Control
/// symbols delimit and acknowledge packets and carry the 24-bit body in the
/// low bits, first wire byte C0 in bits 23..16. Data symbols carry one packet
/// word, first wire byte D0 in bits 31..24. `Error` is never produced by the
/// engine; the symbol decoder uses it to report characters it could not
/// decode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Symbol {
    /// Nothing to transmit, or nothing was received
    Idle,
    /// A 24-bit control symbol body, CRC-5 included
    Control(u32),
    /// One 32-bit packet data word
    Data(u32),
    /// Signalled by the decoder on an unrecoverable decode event
    Error,
}

/// Sequence number of an in-flight packet
///
/// Wraps modulo 32; the wire carries it in five bits, both in control-symbol
/// parameters and in the top bits of a packet's first word.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct AckId(u8);

impl AckId {
    /// Number of distinct ackIDs
    pub(crate) const SPAN: usize = 32;

    pub(crate) fn new(value: u8) -> Self {
        Self(value & 0x1f)
    }

    /// The raw 5-bit value
    pub fn value(self) -> u8 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

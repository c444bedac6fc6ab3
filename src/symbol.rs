use std::fmt;

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::coding::{self, Codec, UnexpectedEnd};
use crate::crc::crc5;
use crate::{AckId, Symbol};

//  Control symbol body, MSB first:
//
//  bit 23..21  stype0
//  bit 20..16  param0
//  bit 15..11  param1
//  bit 10..8   stype1
//  bit  7..5   cmd
//  bit  4..0   crc5

/// First symbol-type field: acknowledgement and status codes
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Stype0 {
    /// The packet named by param0 was received intact
    PacketAccepted = 0,
    /// The receiver is out of buffers; retransmit from param0
    PacketRetry = 1,
    /// The receiver rejected a packet; the cause travels in param1
    PacketNotAccepted = 2,
    /// Link status report; param0 is the expected ackID, param1 the sender's
    /// free inbound slots
    Status = 4,
    /// Reply to a link-request; param0 is the expected ackID, param1 the
    /// responder's port status
    LinkResponse = 5,
}

impl Stype0 {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::PacketAccepted,
            1 => Self::PacketRetry,
            2 => Self::PacketNotAccepted,
            4 => Self::Status,
            5 => Self::LinkResponse,
            _ => return None,
        })
    }
}

/// Second symbol-type field: packet delimiters and link commands
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Stype1 {
    /// Data words follow
    StartOfPacket = 0,
    /// Cancel the packet in progress
    Stomp = 1,
    /// Terminate the packet in progress
    EndOfPacket = 2,
    /// The transmitter is restarting a retried packet
    RestartFromRetry = 3,
    /// Ask the partner to report its input status
    LinkRequest = 4,
    /// Multicast event; not supported by this stack
    MulticastEvent = 5,
    /// No trailing function
    Nop = 7,
}

impl Stype1 {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::StartOfPacket,
            1 => Self::Stomp,
            2 => Self::EndOfPacket,
            3 => Self::RestartFromRetry,
            4 => Self::LinkRequest,
            5 => Self::MulticastEvent,
            7 => Self::Nop,
            _ => return None,
        })
    }
}

/// The cmd field value of a link-request asking for an input-status report
pub(crate) const CMD_INPUT_STATUS: u8 = 4;

/// Port status values carried in the param1 field of a link-response
pub(crate) const PORT_STATUS_OK: u8 = 0x10;
pub(crate) const PORT_STATUS_ERROR_STOPPED: u8 = 0x05;
pub(crate) const PORT_STATUS_RETRY_STOPPED: u8 = 0x04;

/// A control symbol after CRC-5 validation
///
/// `param0` and `param1` are five bits wide, `cmd` three; out-of-range bits
/// are discarded on encode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ControlSymbol {
    pub stype0: Stype0,
    pub param0: u8,
    pub param1: u8,
    pub stype1: Stype1,
    pub cmd: u8,
}

/// Reason a control symbol could not be decoded
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum SymbolDecodeError {
    /// The trailing CRC-5 did not match the body
    #[error("control symbol CRC mismatch")]
    Crc,
    /// A reserved stype0 or stype1 encoding was used
    #[error("reserved symbol type")]
    ReservedType,
}

impl ControlSymbol {
    pub(crate) fn new(stype0: Stype0, param0: u8, param1: u8, stype1: Stype1) -> Self {
        Self {
            stype0,
            param0,
            param1,
            stype1,
            cmd: 0,
        }
    }

    pub(crate) fn packet_accepted(ackid: AckId, buf_status: u8) -> Self {
        Self::new(Stype0::PacketAccepted, ackid.value(), buf_status, Stype1::Nop)
    }

    pub(crate) fn packet_not_accepted(cause: NotAcceptedCause) -> Self {
        Self::new(Stype0::PacketNotAccepted, 0, cause.into(), Stype1::Nop)
    }

    pub(crate) fn link_response(ackid: AckId, port_status: u8) -> Self {
        Self::new(Stype0::LinkResponse, ackid.value(), port_status, Stype1::Nop)
    }

    pub(crate) fn link_request(ackid: AckId, buf_status: u8) -> Self {
        Self {
            stype0: Stype0::Status,
            param0: ackid.value(),
            param1: buf_status,
            stype1: Stype1::LinkRequest,
            cmd: CMD_INPUT_STATUS,
        }
    }

    /// The 24-bit on-wire body, CRC-5 appended
    pub fn body(&self) -> u32 {
        let body = (self.stype0 as u32) << 21
            | ((self.param0 & 0x1f) as u32) << 16
            | ((self.param1 & 0x1f) as u32) << 11
            | (self.stype1 as u32) << 8
            | ((self.cmd & 0x07) as u32) << 5;
        body | crc5(body) as u32
    }

    /// Wrap the encoded body in a symbol
    pub fn to_symbol(self) -> Symbol {
        Symbol::Control(self.body())
    }

    /// Validate the CRC-5 and split a received body into its fields
    pub fn parse(body: u32) -> Result<Self, SymbolDecodeError> {
        if crc5(body) != (body & 0x1f) as u8 {
            return Err(SymbolDecodeError::Crc);
        }
        let stype0 =
            Stype0::from_bits(((body >> 21) & 0x7) as u8).ok_or(SymbolDecodeError::ReservedType)?;
        let stype1 =
            Stype1::from_bits(((body >> 8) & 0x7) as u8).ok_or(SymbolDecodeError::ReservedType)?;
        Ok(Self {
            stype0,
            param0: ((body >> 16) & 0x1f) as u8,
            param1: ((body >> 11) & 0x1f) as u8,
            stype1,
            cmd: ((body >> 5) & 0x7) as u8,
        })
    }
}

/// Code carried by a packet-not-accepted control symbol
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct NotAcceptedCause(u8);

impl From<u8> for NotAcceptedCause {
    fn from(x: u8) -> Self {
        Self(x & 0x1f)
    }
}

impl From<NotAcceptedCause> for u8 {
    fn from(x: NotAcceptedCause) -> Self {
        x.0
    }
}

macro_rules! causes {
    {$($name:ident($val:expr) $desc:expr;)*} => {
        impl NotAcceptedCause {
            $(#[doc = $desc] pub const $name: Self = NotAcceptedCause($val);)*
        }

        impl fmt::Debug for NotAcceptedCause {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "NotAcceptedCause({:02x})", self.0),
                }
            }
        }

        impl fmt::Display for NotAcceptedCause {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let x = match self.0 {
                    $($val => $desc,)*
                    _ => "unknown cause",
                };
                f.write_str(x)
            }
        }
    }
}

causes! {
    RESERVED(0) "reserved";
    UNEXPECTED_ACKID(1) "a packet carried an ackID the receiver did not expect";
    CONTROL_CRC(2) "a control symbol failed its CRC-5 check";
    NON_MAINTENANCE(3) "a non-maintenance packet was received while stopped";
    PACKET_CRC(4) "a packet failed its CRC-16 check";
    ILLEGAL_CHARACTER(5) "an illegal character was received";
    NO_RESOURCE(6) "no receive resource was available";
    DESCRAMBLER(7) "the descrambler lost synchronization";
    GENERAL(31) "a general error not covered by other causes";
}

impl Codec for Symbol {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        if buf.remaining() < 1 {
            return Err(UnexpectedEnd);
        }
        Ok(match buf.get_u8() {
            0 => Symbol::Idle,
            1 => {
                if buf.remaining() < 3 {
                    return Err(UnexpectedEnd);
                }
                let mut body = 0u32;
                for _ in 0..3 {
                    body = body << 8 | buf.get_u8() as u32;
                }
                Symbol::Control(body)
            }
            2 => {
                if buf.remaining() < 4 {
                    return Err(UnexpectedEnd);
                }
                Symbol::Data(buf.get_u32())
            }
            3 => Symbol::Error,
            _ => return Err(UnexpectedEnd),
        })
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        match *self {
            Symbol::Idle => buf.put_u8(0),
            Symbol::Control(body) => {
                buf.put_u8(1);
                // C0 first
                buf.put_u8((body >> 16) as u8);
                buf.put_u8((body >> 8) as u8);
                buf.put_u8(body as u8);
            }
            Symbol::Data(word) => {
                buf.put_u8(2);
                buf.put_u32(word);
            }
            Symbol::Error => buf.put_u8(3),
        }
    }
}

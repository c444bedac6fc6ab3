use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::coding::{self, BufExt, BufMutExt, Codec, UnexpectedEnd};
use crate::crc::{crc16, CRC16_HEADER_MASK, CRC16_INIT};
use crate::{AckId, PACKET_SIZE_MAX};

/// An opaque link-layer packet
///
/// The engine treats a packet as a run of up to [`PACKET_SIZE_MAX`] 32-bit
/// words. The first word carries the ackID in its top five bits; everything
/// below that, including the embedded CRC-16, belongs to the packet layer.
/// [`seal`](Packet::seal) appends the CRC the way the packet layer does, so
/// hosts and tests can produce packets the link will accept.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Packet {
    words: ArrayVec<u32, PACKET_SIZE_MAX>,
}

/// Error indicating that a packet ran out of word capacity
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("packet exceeds the maximum size")]
pub struct PacketSizeExceeded;

impl Packet {
    /// An empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a packet from raw words, without sealing it
    pub fn from_words(words: &[u32]) -> Result<Self, PacketSizeExceeded> {
        let mut packet = Self::new();
        for &word in words {
            packet.push_word(word)?;
        }
        Ok(packet)
    }

    pub(crate) fn from_slot(words: &[u32]) -> Self {
        let mut packet = Self::new();
        let take = words.len().min(PACKET_SIZE_MAX);
        let _ = packet.words.try_extend_from_slice(&words[..take]);
        packet
    }

    /// Length in 32-bit words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the packet contains no words
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The packet's words, first word first
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// The ackID field of the first word, as received from the wire
    ///
    /// Zero for packets that have not travelled yet.
    pub fn ack_id(&self) -> AckId {
        AckId::new(self.words.first().map_or(0, |w| (w >> 27) as u8))
    }

    /// Append one word
    pub fn push_word(&mut self, word: u32) -> Result<(), PacketSizeExceeded> {
        self.words.try_push(word).map_err(|_| PacketSizeExceeded)
    }

    /// Append the packet CRC-16, left-aligned in a zero-padded trailing word
    ///
    /// The ackID bits of the first word are excluded from the computation, so
    /// the link may relabel the packet in flight without breaking it.
    pub fn seal(&mut self) -> Result<(), PacketSizeExceeded> {
        let crc = self.residual();
        self.push_word((crc as u32) << 16)
    }

    /// Whether the running CRC-16 over all words has the all-clear residual
    pub fn is_crc_valid(&self) -> bool {
        !self.is_empty() && self.residual() == 0
    }

    fn residual(&self) -> u16 {
        let mut crc = CRC16_INIT;
        for (i, &word) in self.words.iter().enumerate() {
            let word = if i == 0 { word & CRC16_HEADER_MASK } else { word };
            crc = crc16(word, crc);
        }
        crc
    }
}

impl Codec for Packet {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        let len = buf.get::<u8>()? as usize;
        if len > PACKET_SIZE_MAX || buf.remaining() < len * 4 {
            return Err(UnexpectedEnd);
        }
        let mut packet = Self::new();
        for _ in 0..len {
            let word = buf.get::<u32>()?;
            packet.push_word(word).map_err(|_| UnexpectedEnd)?;
        }
        Ok(packet)
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write(self.len() as u8);
        for &word in self.words() {
            buf.write(word);
        }
    }
}

use thiserror::Error;

use crate::packet::Packet;
use crate::SLOT_WORDS;

/// Bounded ring of packet slots with a transmission window
///
/// Slots are carved out of a caller-supplied word buffer; each slot is one
/// length word followed by the packet words. Packets enter at the back, are
/// transmitted at the window and leave at the front once acknowledged:
///
/// ```text
///   front .. window        transmitted, awaiting acknowledgement
///   window .. back         queued, not yet transmitted
/// ```
///
/// The inbound direction uses the same ring with the window left at the
/// front.
#[derive(Debug)]
pub(crate) struct PacketQueue {
    buffer: Box<[u32]>,
    /// Slot count, fixed at construction
    size: u8,
    /// Free slots
    available: u8,
    /// Slots transmitted but not acknowledged
    window_size: u8,
    /// The slot to remove next, once acknowledged
    front_index: u8,
    /// The slot to transmit next
    window_index: u8,
    /// The slot to fill next
    back_index: u8,
}

/// Error returned when a queue operation finds no room or no packet
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum QueueError {
    /// No free slot is available
    #[error("queue is full")]
    Full,
    /// The queue holds no packet
    #[error("queue is empty")]
    Empty,
}

impl PacketQueue {
    pub(crate) fn new(buffer: Vec<u32>) -> Self {
        let size = (buffer.len() / SLOT_WORDS).min(255) as u8;
        Self {
            buffer: buffer.into_boxed_slice(),
            size,
            available: size,
            window_size: 0,
            front_index: 0,
            window_index: 0,
            back_index: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> u8 {
        self.size
    }

    pub(crate) fn available(&self) -> u8 {
        self.available
    }

    /// Occupied slots
    pub(crate) fn len(&self) -> u8 {
        self.size - self.available
    }

    /// Slots awaiting acknowledgement
    pub(crate) fn window_len(&self) -> u8 {
        self.window_size
    }

    /// Occupied slots that have not been transmitted yet
    pub(crate) fn window_available(&self) -> u8 {
        self.len() - self.window_size
    }

    /// Copy a whole packet into the back slot
    pub(crate) fn push_back(&mut self, packet: &Packet) -> Result<(), QueueError> {
        if self.available == 0 {
            return Err(QueueError::Full);
        }
        let slot = self.slot_mut(self.back_index);
        slot[0] = packet.len() as u32;
        slot[1..=packet.len()].copy_from_slice(packet.words());
        self.back_index = self.step(self.back_index);
        self.available -= 1;
        Ok(())
    }

    /// Word area of the back slot, for incremental filling
    ///
    /// `None` when no slot is free.
    pub(crate) fn back_slot_mut(&mut self) -> Option<&mut [u32]> {
        if self.available == 0 {
            return None;
        }
        let start = self.back_index as usize * SLOT_WORDS;
        Some(&mut self.buffer[start + 1..start + SLOT_WORDS])
    }

    /// Commit an incrementally filled back slot with the given word count
    pub(crate) fn commit_back(&mut self, len: u8) {
        debug_assert!(self.available > 0 && (len as usize) < SLOT_WORDS);
        if self.available == 0 {
            return;
        }
        self.slot_mut(self.back_index)[0] = len as u32;
        self.back_index = self.step(self.back_index);
        self.available -= 1;
    }

    /// The packet at the front of the queue
    pub(crate) fn front(&self) -> Result<&[u32], QueueError> {
        if self.len() == 0 {
            return Err(QueueError::Empty);
        }
        Ok(self.packet_at(self.front_index))
    }

    /// The packet at the transmission window, if one is waiting to go out
    pub(crate) fn window_packet(&self) -> Option<&[u32]> {
        if self.window_available() == 0 {
            return None;
        }
        Some(self.packet_at(self.window_index))
    }

    /// Mark the window packet as in flight and move the window forward
    pub(crate) fn window_advance(&mut self) {
        debug_assert!(self.window_available() > 0);
        if self.window_available() == 0 {
            return;
        }
        self.window_index = self.step(self.window_index);
        self.window_size += 1;
    }

    /// Rewind the window to the front, forcing retransmission of everything
    /// not yet acknowledged
    pub(crate) fn window_reset(&mut self) {
        self.window_index = self.front_index;
        self.window_size = 0;
    }

    /// Drop the front slot
    pub(crate) fn pop_front(&mut self) -> Result<(), QueueError> {
        if self.len() == 0 {
            return Err(QueueError::Empty);
        }
        self.front_index = self.step(self.front_index);
        self.available += 1;
        if self.window_size > 0 {
            self.window_size -= 1;
        } else {
            // Keep the unused window pinned to the front.
            self.window_index = self.front_index;
        }
        Ok(())
    }

    fn step(&self, index: u8) -> u8 {
        if self.size == 0 {
            return index;
        }
        (index + 1) % self.size
    }

    fn slot_mut(&mut self, index: u8) -> &mut [u32] {
        let start = index as usize * SLOT_WORDS;
        &mut self.buffer[start..start + SLOT_WORDS]
    }

    fn packet_at(&self, index: u8) -> &[u32] {
        let start = index as usize * SLOT_WORDS;
        let len = (self.buffer[start] as usize).min(SLOT_WORDS - 1);
        &self.buffer[start + 1..start + 1 + len]
    }
}

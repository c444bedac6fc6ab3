use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::crc::{crc16, CRC16_HEADER_MASK, CRC16_INIT};
use crate::link::transmitter::Transmitter;
use crate::link::{LinkStats, TxRequest};
use crate::queue::PacketQueue;
use crate::symbol::{
    ControlSymbol, NotAcceptedCause, Stype0, Stype1, SymbolDecodeError, PORT_STATUS_ERROR_STOPPED,
    PORT_STATUS_OK, PORT_STATUS_RETRY_STOPPED,
};
use crate::{AckId, Symbol, PACKET_SIZE_MAX, PACKET_SIZE_MIN};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum RxState {
    Uninitialized,
    PortInitialized,
    LinkInitialized,
    InputRetryStopped,
    InputErrorStopped,
}

/// Receiver half of the link
///
/// Consumes inbound symbols, reassembles packet frames straight into the
/// inbound queue, and decides how the transmitter should answer: pending
/// acknowledgements accumulate between `ackid_acked` and `ackid`, everything
/// else goes through the `TxRequest` mailbox.
pub(super) struct Receiver {
    pub(super) state: RxState,
    /// Next expected inbound ackID
    pub(super) ackid: AckId,
    /// Next ackID to acknowledge on the wire; trails `ackid`
    pub(super) ackid_acked: AckId,
    /// Words of the current frame received so far
    counter: u8,
    /// Running CRC-16 of the current frame
    crc: u16,
    /// A start-of-packet has been seen and the frame is still open
    in_frame: bool,
    /// A status symbol with the expected ackID has been received
    pub(super) status_received: bool,
    pub(super) queue: PacketQueue,
}

impl Receiver {
    pub(super) fn new(buffer: Vec<u32>) -> Self {
        Self {
            state: RxState::Uninitialized,
            ackid: AckId::default(),
            ackid_acked: AckId::default(),
            counter: 0,
            crc: CRC16_INIT,
            in_frame: false,
            status_received: false,
            queue: PacketQueue::new(buffer),
        }
    }

    /// The port came up: get ready to exchange status symbols
    pub(super) fn start(&mut self) {
        self.state = RxState::PortInitialized;
        self.ackid = AckId::default();
        self.ackid_acked = AckId::default();
        self.counter = 0;
        self.in_frame = false;
        self.status_received = false;
    }

    /// The codec lost synchronization: drop the link
    pub(super) fn stop(&mut self) {
        self.state = RxState::Uninitialized;
        self.counter = 0;
        self.in_frame = false;
        self.status_received = false;
    }

    /// Free inbound slots, clamped to the five-bit wire field
    pub(super) fn buf_status(&self) -> u8 {
        self.queue.available().min(31)
    }

    /// Input status reported in a link-response
    pub(super) fn port_status(&self) -> u8 {
        match self.state {
            RxState::InputErrorStopped => PORT_STATUS_ERROR_STOPPED,
            RxState::InputRetryStopped => PORT_STATUS_RETRY_STOPPED,
            _ => PORT_STATUS_OK,
        }
    }

    pub(super) fn has_pending_ack(&self) -> bool {
        self.ackid_acked != self.ackid
    }

    /// The next ackID to put in a packet-accepted symbol
    pub(super) fn take_pending_ack(&mut self) -> AckId {
        let acked = self.ackid_acked;
        self.ackid_acked = self.ackid_acked.next();
        acked
    }

    pub(super) fn handle_symbol(
        &mut self,
        tx: &mut Transmitter,
        mailbox: &mut Option<TxRequest>,
        stats: &mut LinkStats,
        now: Option<Instant>,
        symbol: Symbol,
    ) {
        match symbol {
            Symbol::Idle => {}
            Symbol::Error => self.on_codec_error(mailbox, stats),
            Symbol::Control(body) => self.on_control(tx, mailbox, stats, now, body),
            Symbol::Data(word) => self.on_data(mailbox, stats, word),
        }
    }

    fn on_codec_error(&mut self, mailbox: &mut Option<TxRequest>, stats: &mut LinkStats) {
        stats.inbound.illegal_character_errors =
            stats.inbound.illegal_character_errors.saturating_add(1);
        match self.state {
            RxState::Uninitialized | RxState::PortInitialized => {}
            RxState::LinkInitialized | RxState::InputRetryStopped => {
                self.enter_error_stopped(mailbox, NotAcceptedCause::ILLEGAL_CHARACTER);
            }
            RxState::InputErrorStopped => {}
        }
    }

    fn on_control(
        &mut self,
        tx: &mut Transmitter,
        mailbox: &mut Option<TxRequest>,
        stats: &mut LinkStats,
        now: Option<Instant>,
        body: u32,
    ) {
        if self.state == RxState::Uninitialized {
            return;
        }
        let symbol = match ControlSymbol::parse(body) {
            Ok(symbol) => symbol,
            Err(SymbolDecodeError::Crc) => {
                stats.inbound.control_crc_errors =
                    stats.inbound.control_crc_errors.saturating_add(1);
                match self.state {
                    RxState::LinkInitialized | RxState::InputRetryStopped => {
                        self.enter_error_stopped(mailbox, NotAcceptedCause::CONTROL_CRC);
                    }
                    _ => {}
                }
                return;
            }
            Err(SymbolDecodeError::ReservedType) => {
                stats.inbound.packets_unsupported =
                    stats.inbound.packets_unsupported.saturating_add(1);
                return;
            }
        };

        self.process_stype0(tx, stats, now, &symbol);
        self.process_stype1(mailbox, stats, &symbol);
    }

    /// Acknowledgement half of a control symbol; valid in every state once
    /// the port is up, since stopped receive states do not stop the
    /// transmitter's traffic
    fn process_stype0(
        &mut self,
        tx: &mut Transmitter,
        stats: &mut LinkStats,
        now: Option<Instant>,
        symbol: &ControlSymbol,
    ) {
        match symbol.stype0 {
            Stype0::Status => {
                tx.update_buffer_status(symbol.param1);
                if self.state == RxState::PortInitialized && symbol.param0 == tx.ackid.value() {
                    debug!("received status, link considered initialized");
                    self.status_received = true;
                    self.state = RxState::LinkInitialized;
                }
            }
            Stype0::PacketAccepted => {
                tx.update_buffer_status(symbol.param1);
                tx.on_packet_accepted(AckId::new(symbol.param0), now, stats);
            }
            Stype0::PacketRetry => {
                tx.update_buffer_status(symbol.param1);
                tx.on_packet_retry(AckId::new(symbol.param0), stats);
            }
            Stype0::PacketNotAccepted => {
                tx.on_packet_not_accepted(NotAcceptedCause::from(symbol.param1), stats);
            }
            Stype0::LinkResponse => {
                tx.on_link_response(AckId::new(symbol.param0), symbol.param1, stats);
            }
        }
    }

    /// Delimiter half of a control symbol, interpreted by receive state
    fn process_stype1(
        &mut self,
        mailbox: &mut Option<TxRequest>,
        stats: &mut LinkStats,
        symbol: &ControlSymbol,
    ) {
        match symbol.stype1 {
            Stype1::Nop => {}
            Stype1::LinkRequest => self.on_link_request(mailbox, stats),
            Stype1::MulticastEvent => {
                stats.inbound.packets_unsupported =
                    stats.inbound.packets_unsupported.saturating_add(1);
            }
            Stype1::StartOfPacket => self.on_start_of_packet(mailbox, stats),
            Stype1::EndOfPacket => self.on_end_of_packet(mailbox, stats),
            Stype1::Stomp => {
                if self.state == RxState::LinkInitialized && self.in_frame {
                    trace!("inbound packet stomped");
                    self.abort_frame();
                }
            }
            Stype1::RestartFromRetry => match self.state {
                RxState::InputRetryStopped => {
                    debug!("partner restarted from retry");
                    self.abort_frame();
                    self.state = RxState::LinkInitialized;
                }
                RxState::LinkInitialized => self.abort_frame(),
                _ => {}
            },
        }
    }

    fn on_link_request(&mut self, mailbox: &mut Option<TxRequest>, stats: &mut LinkStats) {
        if self.state == RxState::Uninitialized || self.state == RxState::PortInitialized {
            return;
        }
        stats.partner.link_requests = stats.partner.link_requests.saturating_add(1);
        debug!(state = ?self.state, "link-request received, resynchronizing receiver");
        self.abort_frame();
        self.state = RxState::LinkInitialized;
        *mailbox = Some(TxRequest::SendLinkResponse);
    }

    fn on_start_of_packet(&mut self, mailbox: &mut Option<TxRequest>, stats: &mut LinkStats) {
        if self.state != RxState::LinkInitialized {
            return;
        }
        // Back-to-back frames: a new start terminates the previous packet.
        if self.in_frame && !self.finish_frame(mailbox, stats) {
            return;
        }
        if self.queue.available() == 0 {
            stats.inbound.retried = stats.inbound.retried.saturating_add(1);
            debug!(ackid = %self.ackid, "no inbound slot free, retrying packet");
            self.state = RxState::InputRetryStopped;
            self.in_frame = false;
            *mailbox = Some(TxRequest::SendRetry);
            return;
        }
        self.in_frame = true;
        self.counter = 0;
    }

    fn on_end_of_packet(&mut self, mailbox: &mut Option<TxRequest>, stats: &mut LinkStats) {
        if self.state != RxState::LinkInitialized {
            return;
        }
        if !self.in_frame {
            stats.inbound.general_errors = stats.inbound.general_errors.saturating_add(1);
            self.enter_error_stopped(mailbox, NotAcceptedCause::GENERAL);
            return;
        }
        self.finish_frame(mailbox, stats);
    }

    /// Validate and commit the open frame; returns whether the receiver is
    /// still link-initialized afterwards
    fn finish_frame(&mut self, mailbox: &mut Option<TxRequest>, stats: &mut LinkStats) -> bool {
        self.in_frame = false;
        if (self.counter as usize) < PACKET_SIZE_MIN {
            stats.inbound.general_errors = stats.inbound.general_errors.saturating_add(1);
            self.enter_error_stopped(mailbox, NotAcceptedCause::GENERAL);
            return false;
        }
        if self.crc != 0 {
            stats.inbound.packet_crc_errors = stats.inbound.packet_crc_errors.saturating_add(1);
            self.enter_error_stopped(mailbox, NotAcceptedCause::PACKET_CRC);
            return false;
        }
        trace!(ackid = %self.ackid, words = self.counter, "inbound packet complete");
        self.queue.commit_back(self.counter);
        self.counter = 0;
        self.ackid = self.ackid.next();
        stats.inbound.complete = stats.inbound.complete.saturating_add(1);
        true
    }

    fn on_data(&mut self, mailbox: &mut Option<TxRequest>, stats: &mut LinkStats, word: u32) {
        match self.state {
            RxState::LinkInitialized if self.in_frame => {}
            RxState::LinkInitialized => {
                // Data with no frame open
                stats.inbound.general_errors = stats.inbound.general_errors.saturating_add(1);
                self.enter_error_stopped(mailbox, NotAcceptedCause::GENERAL);
                return;
            }
            _ => return,
        }
        if self.counter == 0 {
            let ackid = AckId::new((word >> 27) as u8);
            if ackid != self.ackid {
                stats.inbound.packet_ackid_errors =
                    stats.inbound.packet_ackid_errors.saturating_add(1);
                warn!(got = %ackid, expected = %self.ackid, "unexpected packet ackID");
                self.enter_error_stopped(mailbox, NotAcceptedCause::UNEXPECTED_ACKID);
                return;
            }
            self.crc = crc16(word & CRC16_HEADER_MASK, CRC16_INIT);
        } else {
            if self.counter as usize == PACKET_SIZE_MAX {
                stats.inbound.general_errors = stats.inbound.general_errors.saturating_add(1);
                self.enter_error_stopped(mailbox, NotAcceptedCause::GENERAL);
                return;
            }
            self.crc = crc16(word, self.crc);
        }
        let Some(slot) = self.queue.back_slot_mut() else {
            // A frame is never opened without a free slot; treat loss of it
            // as a resource error all the same.
            stats.inbound.general_errors = stats.inbound.general_errors.saturating_add(1);
            self.enter_error_stopped(mailbox, NotAcceptedCause::NO_RESOURCE);
            return;
        };
        slot[self.counter as usize] = word;
        self.counter += 1;
    }

    fn abort_frame(&mut self) {
        self.in_frame = false;
        self.counter = 0;
    }

    fn enter_error_stopped(&mut self, mailbox: &mut Option<TxRequest>, cause: NotAcceptedCause) {
        warn!(%cause, "receiver entering input-error-stopped");
        self.abort_frame();
        self.state = RxState::InputErrorStopped;
        *mailbox = Some(TxRequest::SendNotAccepted(cause));
    }
}

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::link::receiver::Receiver;
use crate::link::{LinkStats, TxRequest};
use crate::queue::PacketQueue;
use crate::symbol::{ControlSymbol, NotAcceptedCause, Stype0, Stype1};
use crate::{AckId, Symbol};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum TxState {
    Uninitialized,
    PortInitialized,
    LinkInitialized,
    OutputRetryStopped,
    OutputErrorStopped,
}

/// Transmitter half of the link
///
/// Every `poll_symbol` call emits exactly one symbol, chosen in priority
/// order: symbols the receiver asked for, pending acknowledgements, timeout
/// recovery, bring-up status, packet data, keepalive status, idle.
pub(super) struct Transmitter {
    pub(super) state: TxState,
    /// Words of the current outbound frame already emitted
    counter: u8,
    /// A start-of-packet has been emitted and its end-of-packet has not
    in_frame: bool,
    /// Countdown to the next unsolicited status symbol
    status_counter: u16,
    /// Status symbols still to send before declaring the link initialized
    status_burst: u8,
    /// When the packet with each ackID finished transmission
    frame_timeout: [Option<Instant>; AckId::SPAN],
    /// Oldest unacknowledged ackID
    pub(super) ackid: AckId,
    /// Next ackID to transmit
    pub(super) ackid_window: AckId,
    /// The partner's advertised free inbound slots
    pub(super) buffer_status: u8,
    /// A link-request still has to be emitted for the current recovery
    link_request_pending: bool,
    /// Recovery interrupted transmitted-but-unacknowledged data, so whatever
    /// survives the link-response goes out again
    recovery_retransmit: bool,
    pub(super) queue: PacketQueue,
}

impl Transmitter {
    pub(super) fn new(buffer: Vec<u32>) -> Self {
        Self {
            state: TxState::Uninitialized,
            counter: 0,
            in_frame: false,
            status_counter: 0,
            status_burst: 0,
            frame_timeout: [None; AckId::SPAN],
            ackid: AckId::default(),
            ackid_window: AckId::default(),
            buffer_status: 0,
            link_request_pending: false,
            recovery_retransmit: false,
            queue: PacketQueue::new(buffer),
        }
    }

    /// The port came up: start the status exchange
    pub(super) fn start(&mut self, config: &LinkConfig) {
        self.state = TxState::PortInitialized;
        self.counter = 0;
        self.in_frame = false;
        self.status_counter = 0;
        self.status_burst = config.init_status_count;
        self.frame_timeout = [None; AckId::SPAN];
        self.ackid = AckId::default();
        self.ackid_window = AckId::default();
        self.buffer_status = 0;
        self.link_request_pending = false;
        self.recovery_retransmit = false;
        // Anything still queued goes out again under fresh ackIDs.
        self.queue.window_reset();
    }

    /// The codec lost synchronization: drop the link
    pub(super) fn stop(&mut self) {
        self.state = TxState::Uninitialized;
        self.counter = 0;
        self.in_frame = false;
        self.link_request_pending = false;
        self.recovery_retransmit = false;
        self.frame_timeout = [None; AckId::SPAN];
        self.queue.window_reset();
    }

    pub(super) fn update_buffer_status(&mut self, value: u8) {
        self.buffer_status = value & 0x1f;
    }

    /// Whether acknowledgement traffic is meaningful in the current state
    fn link_up(&self) -> bool {
        matches!(
            self.state,
            TxState::LinkInitialized | TxState::OutputRetryStopped | TxState::OutputErrorStopped
        )
    }

    pub(super) fn on_packet_accepted(
        &mut self,
        ackid: AckId,
        now: Option<Instant>,
        stats: &mut LinkStats,
    ) {
        if !self.link_up() {
            return;
        }
        if self.queue.window_len() == 0 || ackid != self.ackid {
            warn!(got = %ackid, expected = %self.ackid, "unexpected packet-accepted");
            stats.outbound.packet_accepted_errors =
                stats.outbound.packet_accepted_errors.saturating_add(1);
            self.enter_error_stopped();
            return;
        }
        if let (Some(now), Some(sent)) = (now, self.frame_timeout[ackid.index()]) {
            let latency = now.saturating_duration_since(sent);
            if latency > stats.outbound.link_latency_max {
                stats.outbound.link_latency_max = latency;
            }
        }
        trace!(ackid = %ackid, "outbound packet acknowledged");
        self.frame_timeout[ackid.index()] = None;
        let _ = self.queue.pop_front();
        self.ackid = self.ackid.next();
        stats.outbound.complete = stats.outbound.complete.saturating_add(1);
    }

    pub(super) fn on_packet_retry(&mut self, ackid: AckId, stats: &mut LinkStats) {
        if !self.link_up() {
            return;
        }
        if ackid != self.ackid {
            warn!(got = %ackid, expected = %self.ackid, "unexpected packet-retry");
            stats.outbound.packet_retry_errors =
                stats.outbound.packet_retry_errors.saturating_add(1);
            self.enter_error_stopped();
            return;
        }
        debug!(ackid = %ackid, "partner out of buffers, retrying");
        stats.outbound.retried = stats.outbound.retried.saturating_add(1);
        self.rewind_window();
        self.state = TxState::OutputRetryStopped;
    }

    pub(super) fn on_packet_not_accepted(&mut self, cause: NotAcceptedCause, stats: &mut LinkStats) {
        if !self.link_up() {
            return;
        }
        let partner = &mut stats.partner;
        match cause {
            NotAcceptedCause::CONTROL_CRC => {
                partner.control_crc_errors = partner.control_crc_errors.saturating_add(1);
            }
            NotAcceptedCause::UNEXPECTED_ACKID => {
                partner.packet_ackid_errors = partner.packet_ackid_errors.saturating_add(1);
            }
            NotAcceptedCause::PACKET_CRC => {
                partner.packet_crc_errors = partner.packet_crc_errors.saturating_add(1);
            }
            NotAcceptedCause::ILLEGAL_CHARACTER => {
                partner.illegal_character_errors =
                    partner.illegal_character_errors.saturating_add(1);
            }
            _ => partner.general_errors = partner.general_errors.saturating_add(1),
        }
        warn!(%cause, "partner did not accept a packet");
        self.enter_error_stopped();
    }

    pub(super) fn on_link_response(&mut self, ackid: AckId, _port_status: u8, stats: &mut LinkStats) {
        if self.state != TxState::OutputErrorStopped {
            return;
        }
        debug!(expected = %ackid, "link-response received, resynchronizing transmitter");
        // Packets the partner already received were acknowledged by the
        // response itself.
        while self.queue.window_len() > 0 && self.ackid != ackid {
            self.frame_timeout[self.ackid.index()] = None;
            let _ = self.queue.pop_front();
            self.ackid = self.ackid.next();
            stats.outbound.complete = stats.outbound.complete.saturating_add(1);
        }
        if self.ackid != ackid {
            // The partner is somewhere we cannot account for; adopt its view.
            warn!(ours = %self.ackid, theirs = %ackid, "hard ackID resynchronization");
            self.ackid = ackid;
        }
        self.rewind_window();
        if self.recovery_retransmit && self.queue.len() > 0 {
            stats.outbound.retried = stats.outbound.retried.saturating_add(1);
        }
        self.recovery_retransmit = false;
        self.link_request_pending = false;
        self.state = TxState::LinkInitialized;
    }

    pub(super) fn poll_symbol(
        &mut self,
        rx: &mut Receiver,
        mailbox: &mut Option<TxRequest>,
        stats: &mut LinkStats,
        now: Option<Instant>,
        timeout: Duration,
        config: &LinkConfig,
    ) -> Symbol {
        match self.state {
            TxState::Uninitialized => Symbol::Idle,
            TxState::PortInitialized => {
                self.poll_init_status(rx, mailbox, stats, now, timeout, config)
            }
            TxState::LinkInitialized | TxState::OutputRetryStopped | TxState::OutputErrorStopped => {
                self.poll_link(rx, mailbox, stats, now, timeout, config)
            }
        }
    }

    /// Bring-up: status symbols at a slow cadence until the partner is
    /// heard from, then a burst of them to finish initialization
    fn poll_init_status(
        &mut self,
        rx: &mut Receiver,
        mailbox: &mut Option<TxRequest>,
        stats: &mut LinkStats,
        now: Option<Instant>,
        timeout: Duration,
        config: &LinkConfig,
    ) -> Symbol {
        if !rx.status_received {
            if self.status_counter == 0 {
                self.status_counter = config.status_interval;
                return self.status_symbol(rx, Stype1::Nop);
            }
            self.status_counter -= 1;
            return Symbol::Idle;
        }
        if self.status_burst > 0 {
            self.status_burst -= 1;
            return self.status_symbol(rx, Stype1::Nop);
        }
        debug!("transmitter link initialized");
        self.state = TxState::LinkInitialized;
        self.poll_link(rx, mailbox, stats, now, timeout, config)
    }

    fn poll_link(
        &mut self,
        rx: &mut Receiver,
        mailbox: &mut Option<TxRequest>,
        stats: &mut LinkStats,
        now: Option<Instant>,
        timeout: Duration,
        config: &LinkConfig,
    ) -> Symbol {
        // Symbols the receiver asked for take precedence over everything,
        // aborting any half-sent frame first.
        if mailbox.is_some() {
            if self.in_frame {
                return self.stomp(rx);
            }
            return match mailbox.take() {
                Some(TxRequest::SendRetry) => ControlSymbol::new(
                    Stype0::PacketRetry,
                    rx.ackid.value(),
                    rx.buf_status(),
                    Stype1::Nop,
                )
                .to_symbol(),
                Some(TxRequest::SendNotAccepted(cause)) => {
                    ControlSymbol::packet_not_accepted(cause).to_symbol()
                }
                Some(TxRequest::SendLinkResponse) => {
                    ControlSymbol::link_response(rx.ackid, rx.port_status()).to_symbol()
                }
                None => Symbol::Idle,
            };
        }

        match self.state {
            TxState::OutputRetryStopped => {
                if self.in_frame {
                    return self.stomp(rx);
                }
                debug!("restarting from retry");
                self.state = TxState::LinkInitialized;
                return self.status_symbol(rx, Stype1::RestartFromRetry);
            }
            TxState::OutputErrorStopped => {
                if self.in_frame {
                    return self.stomp(rx);
                }
                if self.link_request_pending {
                    self.link_request_pending = false;
                    self.frame_timeout[self.ackid.index()] = now;
                    return ControlSymbol::link_request(rx.ackid, rx.buf_status()).to_symbol();
                }
                if rx.has_pending_ack() {
                    return self.acknowledge(rx);
                }
                // Re-request if the answer is overdue; a lost link-request
                // must not wedge recovery.
                if let (Some(now), Some(asked)) = (now, self.frame_timeout[self.ackid.index()]) {
                    if now.saturating_duration_since(asked) > timeout {
                        debug!("link-response overdue, repeating link-request");
                        self.frame_timeout[self.ackid.index()] = Some(now);
                        return ControlSymbol::link_request(rx.ackid, rx.buf_status()).to_symbol();
                    }
                }
                return Symbol::Idle;
            }
            _ => {}
        }

        if rx.has_pending_ack() {
            return self.acknowledge(rx);
        }

        // Retransmission timer of the oldest in-flight packet
        if self.queue.window_len() > 0 {
            if let (Some(now), Some(sent)) = (now, self.frame_timeout[self.ackid.index()]) {
                if now.saturating_duration_since(sent) > timeout {
                    warn!(ackid = %self.ackid, "packet-accepted overdue, starting link recovery");
                    stats.outbound.timeout_errors = stats.outbound.timeout_errors.saturating_add(1);
                    self.enter_error_stopped();
                    if self.in_frame {
                        return self.stomp(rx);
                    }
                    self.link_request_pending = false;
                    self.frame_timeout[self.ackid.index()] = Some(now);
                    return ControlSymbol::link_request(rx.ackid, rx.buf_status()).to_symbol();
                }
            }
        }

        if self.in_frame {
            return self.continue_frame(rx, now);
        }
        if self.queue.window_packet().is_some() && self.queue.window_len() < self.buffer_status.min(31)
        {
            self.in_frame = true;
            self.counter = 0;
            trace!(ackid = %self.ackid_window, "starting outbound packet");
            return self.status_symbol(rx, Stype1::StartOfPacket);
        }

        // Keepalive status refreshes the partner's view of our buffers.
        if self.status_counter == 0 {
            self.status_counter = config.status_interval;
            return self.status_symbol(rx, Stype1::Nop);
        }
        self.status_counter -= 1;
        Symbol::Idle
    }

    fn continue_frame(&mut self, rx: &Receiver, now: Option<Instant>) -> Symbol {
        let word = match self.queue.window_packet() {
            Some(words) => words.get(self.counter as usize).copied(),
            None => {
                // The window vanished under the frame (recovery rewound it);
                // terminate cleanly.
                return self.stomp(rx);
            }
        };
        match word {
            Some(mut word) => {
                if self.counter == 0 {
                    word = word & 0x03ff_ffff | (self.ackid_window.value() as u32) << 27;
                }
                self.counter += 1;
                Symbol::Data(word)
            }
            None => {
                self.in_frame = false;
                self.counter = 0;
                self.frame_timeout[self.ackid_window.index()] = now;
                trace!(ackid = %self.ackid_window, "outbound packet complete");
                self.queue.window_advance();
                self.ackid_window = self.ackid_window.next();
                self.status_symbol(rx, Stype1::EndOfPacket)
            }
        }
    }

    fn acknowledge(&mut self, rx: &mut Receiver) -> Symbol {
        let acked = rx.take_pending_ack();
        trace!(ackid = %acked, "acknowledging inbound packet");
        ControlSymbol::packet_accepted(acked, rx.buf_status()).to_symbol()
    }

    /// A status-flavored control symbol carrying the receiver's expected
    /// ackID and free buffer count
    fn status_symbol(&self, rx: &Receiver, stype1: Stype1) -> Symbol {
        ControlSymbol::new(Stype0::Status, rx.ackid.value(), rx.buf_status(), stype1).to_symbol()
    }

    fn stomp(&mut self, rx: &Receiver) -> Symbol {
        trace!(ackid = %self.ackid_window, "stomping outbound packet");
        self.in_frame = false;
        self.counter = 0;
        self.status_symbol(rx, Stype1::Stomp)
    }

    fn rewind_window(&mut self) {
        self.queue.window_reset();
        self.ackid_window = self.ackid;
    }

    fn enter_error_stopped(&mut self) {
        if self.state != TxState::OutputErrorStopped {
            warn!("transmitter entering output-error-stopped");
            self.state = TxState::OutputErrorStopped;
            self.link_request_pending = true;
            self.recovery_retransmit = self.queue.window_len() > 0 || self.in_frame;
        }
    }
}

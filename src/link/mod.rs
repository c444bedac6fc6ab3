use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::LinkConfig;
use crate::packet::Packet;
use crate::queue::QueueError;
use crate::symbol::NotAcceptedCause;
use crate::Symbol;

mod receiver;
mod stats;
mod transmitter;

pub use stats::{InboundStats, LinkStats, OutboundStats, PartnerStats};

use receiver::{Receiver, RxState};
use transmitter::{Transmitter, TxState};

/// A control symbol the receiver needs the transmitter to emit
///
/// Posted by the receiver, consumed by the transmitter at its next poll,
/// ahead of any other traffic.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TxRequest {
    SendRetry,
    SendNotAccepted(NotAcceptedCause),
    SendLinkResponse,
}

/// One end of a RapidIO link
///
/// A `Port` holds the receiver and transmitter state machines and the two
/// packet queues between the link and the host. It performs no I/O: the host
/// feeds it symbols from the codec with [`handle_symbol`](Port::handle_symbol),
/// drains symbols to the codec with [`poll_symbol`](Port::poll_symbol), and
/// keeps it informed of the time with [`set_time`](Port::set_time). All
/// methods are synchronous and bounded; a `Port` may be driven from an
/// interrupt-style bottom half.
///
/// Bring-up follows the symbol codec: once the codec decodes idle symbols
/// reliably, call [`set_port_status`](Port::set_port_status)`(true)` and the
/// two ends will exchange status symbols until
/// [`link_is_initialized`](Port::link_is_initialized) reports `true`. If the
/// codec loses synchronization, `set_port_status(false)` drops the link;
/// queued outbound packets survive and are retransmitted after the next
/// bring-up.
///
/// The type parameter `U` is an opaque user-data slot carried along with the
/// port; the engine never looks at it.
pub struct Port<U = ()> {
    rx: Receiver,
    tx: Transmitter,
    mailbox: Option<TxRequest>,
    stats: LinkStats,
    time: Option<Instant>,
    timeout: Duration,
    config: LinkConfig,
    user: U,
}

impl Port<()> {
    /// Open a port over caller-supplied word buffers
    ///
    /// Each buffer is carved into packet slots of `PACKET_SIZE_MAX + 1`
    /// words; `rx_buffer` backs the inbound queue and `tx_buffer` the
    /// outbound queue. A buffer smaller than one slot yields a queue that
    /// accepts nothing.
    pub fn new(config: LinkConfig, rx_buffer: Vec<u32>, tx_buffer: Vec<u32>) -> Self {
        Self::with_user(config, rx_buffer, tx_buffer, ())
    }
}

impl<U> Port<U> {
    /// Open a port carrying caller context in its user-data slot
    pub fn with_user(config: LinkConfig, rx_buffer: Vec<u32>, tx_buffer: Vec<u32>, user: U) -> Self {
        Self {
            rx: Receiver::new(rx_buffer),
            tx: Transmitter::new(tx_buffer),
            mailbox: None,
            stats: LinkStats::default(),
            time: None,
            timeout: config.timeout,
            config,
            user,
        }
    }

    /// Borrow the user-data slot
    pub fn user(&self) -> &U {
        &self.user
    }

    /// Mutably borrow the user-data slot
    pub fn user_mut(&mut self) -> &mut U {
        &mut self.user
    }

    /// Inform the engine of the current time
    ///
    /// Timeouts are polled: they can only fire from a
    /// [`poll_symbol`](Port::poll_symbol) call made after `set_time` moved
    /// the clock past the deadline. The engine never reads the clock itself.
    pub fn set_time(&mut self, now: Instant) {
        self.time = Some(now);
    }

    /// Change the acknowledgement timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Report whether the symbol codec is synchronized to the link
    ///
    /// `true` starts link initialization from the uninitialized state;
    /// `false` drops both state machines back to uninitialized. Queued
    /// outbound packets are kept and go out again, under fresh ackIDs, once
    /// the link comes back.
    pub fn set_port_status(&mut self, initialized: bool) {
        if initialized {
            if self.rx.state == RxState::Uninitialized {
                debug!("port initialized");
                self.rx.start();
                self.tx.start(&self.config);
            }
        } else {
            debug!("port down");
            self.rx.stop();
            self.tx.stop();
            self.mailbox = None;
        }
    }

    /// Feed one symbol received from the codec into the receiver
    pub fn handle_symbol(&mut self, symbol: Symbol) {
        self.rx
            .handle_symbol(&mut self.tx, &mut self.mailbox, &mut self.stats, self.time, symbol);
    }

    /// Produce the next symbol to transmit
    pub fn poll_symbol(&mut self) -> Symbol {
        self.tx.poll_symbol(
            &mut self.rx,
            &mut self.mailbox,
            &mut self.stats,
            self.time,
            self.timeout,
            &self.config,
        )
    }

    /// Queue a packet for transmission
    ///
    /// The packet must already carry a valid CRC-16; the engine does not
    /// check it on this path. Check
    /// [`outbound_queue_available`](Port::outbound_queue_available) first if
    /// rejection matters to the caller.
    pub fn set_outbound_packet(&mut self, packet: &Packet) -> Result<(), QueueError> {
        self.tx.queue.push_back(packet)
    }

    /// Remove and return the oldest received packet
    pub fn get_inbound_packet(&mut self) -> Result<Packet, QueueError> {
        let packet = Packet::from_slot(self.rx.queue.front()?);
        let _ = self.rx.queue.pop_front();
        Ok(packet)
    }

    /// Received packets waiting for the host
    pub fn inbound_queue_len(&self) -> u8 {
        self.rx.queue.len()
    }

    /// Free inbound packet slots
    pub fn inbound_queue_available(&self) -> u8 {
        self.rx.queue.available()
    }

    /// Outbound packets not yet acknowledged by the partner
    pub fn outbound_queue_len(&self) -> u8 {
        self.tx.queue.len()
    }

    /// Free outbound packet slots
    pub fn outbound_queue_available(&self) -> u8 {
        self.tx.queue.available()
    }

    /// Whether both halves of the link have finished initialization
    ///
    /// Momentarily `false` again while the link recovers from an error or a
    /// retry.
    pub fn link_is_initialized(&self) -> bool {
        self.rx.state == RxState::LinkInitialized && self.tx.state == TxState::LinkInitialized
    }

    /// Link statistics
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Whether the link is up
    #[deprecated(note = "use `link_is_initialized()`")]
    pub fn status(&self) -> bool {
        self.link_is_initialized()
    }
}

#[cfg(test)]
impl<U> Port<U> {
    /// Structural invariants checked by the test harness after every step
    pub(crate) fn assert_invariants(&self) {
        let rxq = &self.rx.queue;
        let txq = &self.tx.queue;
        assert_eq!(rxq.available() + rxq.len(), rxq.size());
        assert_eq!(txq.available() + txq.len(), txq.size());
        assert!(self.rx.ackid.value() < 32);
        assert!(self.rx.ackid_acked.value() < 32);
        assert!(self.tx.ackid.value() < 32);
        assert!(self.tx.ackid_window.value() < 32);
        assert!(txq.window_len() <= txq.len());
        assert!(txq.window_len() <= 31);
    }

    pub(crate) fn tx_ackid(&self) -> u8 {
        self.tx.ackid.value()
    }
}

//! Link statistics

use std::time::Duration;

/// Counters for traffic received on the link
///
/// All counters are monotonic and saturate at `u32::MAX`.
#[derive(Default, Debug, Copy, Clone)]
#[non_exhaustive]
pub struct InboundStats {
    /// Packets received intact and delivered to the inbound queue
    pub complete: u32,
    /// Packets refused because no inbound slot was free
    pub retried: u32,
    /// Control symbols that failed their CRC-5 check
    pub control_crc_errors: u32,
    /// Packets that carried an unexpected ackID
    pub packet_ackid_errors: u32,
    /// Packets that failed their CRC-16 check
    pub packet_crc_errors: u32,
    /// Symbols the decoder flagged as illegal characters
    pub illegal_character_errors: u32,
    /// Malformed frames: too short, too long, or delimited out of order
    pub general_errors: u32,
    /// Symbols or packets this stack recognizes but does not support
    pub packets_unsupported: u32,
}

/// Counters for traffic transmitted on the link
#[derive(Default, Debug, Copy, Clone)]
#[non_exhaustive]
pub struct OutboundStats {
    /// Packets acknowledged by the partner
    pub complete: u32,
    /// Packets scheduled for retransmission, whether by a packet-retry or by
    /// link recovery
    pub retried: u32,
    /// Longest observed gap between a packet's end-of-packet and its
    /// packet-accepted
    pub link_latency_max: Duration,
    /// Packets whose retransmission timer expired
    pub timeout_errors: u32,
    /// Packet-accepted symbols that did not match the expected ackID
    pub packet_accepted_errors: u32,
    /// Packet-retry symbols that did not match the expected ackID
    pub packet_retry_errors: u32,
}

/// Counters describing errors observed by the link partner
///
/// Populated from link-requests and from the cause field of
/// packet-not-accepted symbols, so they describe the health of the
/// *outbound* path as seen from the far end.
#[derive(Default, Debug, Copy, Clone)]
#[non_exhaustive]
pub struct PartnerStats {
    /// Link-requests received; the partner starts recovery with these
    pub link_requests: u32,
    /// Control symbols the partner rejected for a CRC-5 mismatch
    pub control_crc_errors: u32,
    /// Packets the partner rejected for an unexpected ackID
    pub packet_ackid_errors: u32,
    /// Packets the partner rejected for a CRC-16 mismatch
    pub packet_crc_errors: u32,
    /// Illegal characters observed by the partner
    pub illegal_character_errors: u32,
    /// Partner errors that fit no other category
    pub general_errors: u32,
}

/// Link statistics
#[derive(Default, Debug, Copy, Clone)]
#[non_exhaustive]
pub struct LinkStats {
    /// Counters for traffic received on the link
    pub inbound: InboundStats,
    /// Counters for traffic transmitted on the link
    pub outbound: OutboundStats,
    /// Counters describing errors observed by the link partner
    pub partner: PartnerStats,
}

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use tracing::info_span;

use crate::coding::Codec;
use crate::symbol::{ControlSymbol, Stype0};
use crate::{LinkConfig, Packet, Port, Symbol, SLOT_WORDS};

/// Two ports joined back to back by a symbol pipe with simulated time
///
/// Each step advances the clock one tick, polls one symbol out of each port
/// and delivers it to the other, running it through the byte codec on the
/// way like a host transport would. Fault injection covers the scenarios the
/// protocol has to survive: whole-direction loss, single-symbol corruption,
/// and selective acknowledgement loss.
pub struct Pair {
    pub a: TestPort,
    pub b: TestPort,
    pub time: Instant,
    pub tick: Duration,
    /// Discard all symbols travelling a → b
    pub drop_a_to_b: bool,
    /// Discard all symbols travelling b → a
    pub drop_b_to_a: bool,
    /// Discard packet-accepted symbols travelling b → a
    pub drop_b_acks: bool,
    /// XOR mask applied to the body of the next control symbol a emits
    pub corrupt_next_control_a: Option<u32>,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_rx_slots(8, 8)
    }

    /// A pair whose inbound queues hold the given number of packets
    pub fn with_rx_slots(a_slots: usize, b_slots: usize) -> Self {
        Self {
            a: TestPort::new(a_slots, 8),
            b: TestPort::new(b_slots, 8),
            time: Instant::now(),
            tick: Duration::from_millis(1),
            drop_a_to_b: false,
            drop_b_to_a: false,
            drop_b_acks: false,
            corrupt_next_control_a: None,
        }
    }

    /// Bring both ports up and drive until the link initializes
    pub fn bring_up(&mut self) {
        self.a.set_port_status(true);
        self.b.set_port_status(true);
        self.drive_until(256, |pair| {
            pair.a.link_is_initialized() && pair.b.link_is_initialized()
        });
        assert!(self.a.link_is_initialized() && self.b.link_is_initialized());
    }

    /// Exchange one symbol in each direction
    pub fn step(&mut self) {
        self.time += self.tick;
        self.a.set_time(self.time);
        self.b.set_time(self.time);

        let sym_a = info_span!("a").in_scope(|| self.a.poll_symbol());
        let sym_b = info_span!("b").in_scope(|| self.b.poll_symbol());

        let sym_a = match (self.corrupt_next_control_a.take(), sym_a) {
            (Some(mask), Symbol::Control(body)) => Symbol::Control(body ^ mask),
            (mask, sym) => {
                self.corrupt_next_control_a = mask;
                sym
            }
        };

        if !self.drop_a_to_b {
            let sym = pipe(sym_a);
            info_span!("b").in_scope(|| self.b.handle_symbol(sym));
        }
        if !self.drop_b_to_a && !(self.drop_b_acks && is_ack(sym_b)) {
            let sym = pipe(sym_b);
            info_span!("a").in_scope(|| self.a.handle_symbol(sym));
        }

        self.a.assert_invariants();
        self.b.assert_invariants();
    }

    pub fn drive(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until the condition holds, up to a limit
    pub fn drive_until(&mut self, limit: usize, done: impl Fn(&Pair) -> bool) {
        for _ in 0..limit {
            if done(self) {
                return;
            }
            self.step();
        }
        assert!(done(self), "condition not reached within {} steps", limit);
    }
}

impl Default for Pair {
    fn default() -> Self {
        Pair::new()
    }
}

pub struct TestPort {
    pub port: Port,
}

impl TestPort {
    pub fn new(rx_slots: usize, tx_slots: usize) -> Self {
        Self {
            port: Port::new(
                LinkConfig::default(),
                vec![0; rx_slots * SLOT_WORDS],
                vec![0; tx_slots * SLOT_WORDS],
            ),
        }
    }
}

impl Deref for TestPort {
    type Target = Port;
    fn deref(&self) -> &Port {
        &self.port
    }
}

impl DerefMut for TestPort {
    fn deref_mut(&mut self) -> &mut Port {
        &mut self.port
    }
}

/// Serialize and deserialize a symbol, as a byte-oriented transport would
fn pipe(symbol: Symbol) -> Symbol {
    let mut buf = Vec::new();
    symbol.encode(&mut buf);
    Symbol::decode(&mut &buf[..]).expect("symbol pipe")
}

fn is_ack(symbol: Symbol) -> bool {
    match symbol {
        Symbol::Control(body) => {
            ControlSymbol::parse(body).map_or(false, |c| c.stype0 == Stype0::PacketAccepted)
        }
        _ => false,
    }
}

pub fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(sub)
}

/// A sealed packet over the given payload words
pub fn test_packet(words: &[u32]) -> Packet {
    let mut packet = Packet::from_words(words).expect("payload fits");
    packet.seal().expect("room for the CRC");
    packet
}

/// Packet equality ignoring the ackID bits the link rewrites in flight
pub fn assert_payload_eq(got: &Packet, want: &Packet) {
    assert_eq!(got.len(), want.len(), "word counts differ");
    for (i, (g, w)) in got.words().iter().zip(want.words()).enumerate() {
        let (g, w) = if i == 0 {
            (g & 0x03ff_ffff, w & 0x03ff_ffff)
        } else {
            (*g, *w)
        };
        assert_eq!(g, w, "word {} differs", i);
    }
}

//! The sans-IO reliability engine.
//!
//! The engine never touches a socket or spawns a task. The connection actor
//! feeds it inbound datagrams and asks it what to send; the engine keeps the
//! bookkeeping:
//!
//! - **Nonces**: every reliable packet gets the next nonce, starting at 1.
//!   Nonces are never reused, so running out is an error rather than a wrap.
//! - **In-flight sends**: composed bytes are kept until acknowledged and
//!   resent unchanged every `ack_interval`.
//! - **Inbound acks and duplicates**: every inbound reliable packet produces
//!   an acknowledgement; repeats are flagged so they are not processed twice.
//! - **Waiters**: callers can wait for the next inbound packet that matches
//!   one of several predicates.
//!
//! [`ReliabilityEngine::teardown`] resolves everything that is still pending.

use std::collections::BTreeMap;
use std::fmt;

use skeld_protocol::{Codec, HazelCodec, Packet, ProtocolError};
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use crate::{DuplicateFilter, ReliabilityConfig, ReliabilityError};

/// Why a reliable send ended without an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unacknowledged {
    /// The connection was torn down first.
    Closed,
    /// The retransmission limit was reached.
    TimedOut,
}

impl fmt::Display for Unacknowledged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed before acknowledgement"),
            Self::TimedOut => f.write_str("retransmission limit reached without acknowledgement"),
        }
    }
}

/// How a send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The peer acknowledged the nonce.
    Acknowledged,
    /// An unreliable packet was handed to the transport.
    Sent,
    /// A reliable packet was never acknowledged.
    Unacknowledged(Unacknowledged),
}

impl SendOutcome {
    /// True for `Acknowledged` and `Sent`.
    pub fn is_delivered(self) -> bool {
        !matches!(self, Self::Unacknowledged(_))
    }
}

/// Resolves the caller of a send.
pub type Reply = oneshot::Sender<Result<SendOutcome, ReliabilityError>>;

/// A test applied to each inbound packet on behalf of a waiter.
pub type Predicate = Box<dyn Fn(&Packet) -> bool + Send + Sync>;

/// The packet that satisfied a waiter and which predicate it satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub index: usize,
    pub packet: Packet,
}

/// Resolves a waiter. `None` means the connection closed first.
pub type WaitReply = oneshot::Sender<Option<Matched>>;

struct InFlight {
    bytes: Vec<u8>,
    reply: Option<Reply>,
    next_due: Instant,
    resends: u32,
}

struct Waiter {
    predicates: Vec<Predicate>,
    reply: WaitReply,
}

/// An inbound datagram after the engine has looked at it.
#[derive(Debug)]
pub struct Inbound {
    pub packet: Packet,
    /// Acknowledgement to send back, for reliable packets.
    pub ack: Option<Vec<u8>>,
    /// The nonce was seen recently. The ack must still be sent, but the
    /// packet must not be processed again.
    pub duplicate: bool,
}

/// Reliability bookkeeping for one connection.
pub struct ReliabilityEngine<C: Codec = HazelCodec> {
    config: ReliabilityConfig,
    codec: C,
    /// Next nonce to hand out. Wider than `u16` so exhaustion is detectable.
    next_nonce: u32,
    in_flight: BTreeMap<u16, InFlight>,
    waiters: Vec<Waiter>,
    duplicates: DuplicateFilter,
    closed: bool,
}

impl ReliabilityEngine<HazelCodec> {
    /// Creates a client-side engine.
    pub fn new(config: ReliabilityConfig) -> Self {
        Self::with_codec(config, HazelCodec::client())
    }
}

impl<C: Codec> ReliabilityEngine<C> {
    pub fn with_codec(config: ReliabilityConfig, codec: C) -> Self {
        let config = config.validated();
        debug!(
            ack_interval_ms = config.ack_interval.as_millis() as u64,
            max_retransmissions = ?config.max_retransmissions,
            "reliability engine created"
        );
        Self {
            duplicates: DuplicateFilter::new(config.duplicate_window),
            config,
            codec,
            next_nonce: 1,
            in_flight: BTreeMap::new(),
            waiters: Vec::new(),
            closed: false,
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    // -- Outbound ----------------------------------------------------------

    /// Numbers a reliable packet and composes it.
    ///
    /// Unreliable kinds are composed as they are. The packet is updated in
    /// place so the caller can see the nonce it was given.
    pub fn prepare(&mut self, packet: &mut Packet) -> Result<Vec<u8>, ReliabilityError> {
        if self.closed {
            return Err(ReliabilityError::Closed);
        }
        if packet.is_reliable() {
            let nonce = self.allocate_nonce()?;
            packet.set_nonce(nonce);
        }
        Ok(self.codec.encode(packet)?)
    }

    fn allocate_nonce(&mut self) -> Result<u16, ReliabilityError> {
        let nonce = u16::try_from(self.next_nonce).map_err(|_| ReliabilityError::NonceExhausted)?;
        self.next_nonce += 1;
        Ok(nonce)
    }

    /// The nonce the next reliable packet will get, if any are left.
    pub fn peek_next_nonce(&self) -> Option<u16> {
        u16::try_from(self.next_nonce).ok()
    }

    /// Arms retransmission for a reliable packet that was just sent.
    ///
    /// `reply`, if given, is resolved when the packet is acknowledged, when
    /// it times out, or at teardown.
    pub fn track(&mut self, nonce: u16, bytes: Vec<u8>, reply: Option<Reply>) {
        if self.closed {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(SendOutcome::Unacknowledged(Unacknowledged::Closed)));
            }
            return;
        }
        let next_due = Instant::now() + self.config.ack_interval;
        trace!(nonce, len = bytes.len(), "tracking reliable send");
        self.in_flight.insert(
            nonce,
            InFlight {
                bytes,
                reply,
                next_due,
                resends: 0,
            },
        );
    }

    /// Handles an acknowledgement. Returns false for unknown nonces.
    pub fn acknowledge(&mut self, nonce: u16) -> bool {
        match self.in_flight.remove(&nonce) {
            Some(entry) => {
                trace!(nonce, resends = entry.resends, "reliable send acknowledged");
                if let Some(reply) = entry.reply {
                    let _ = reply.send(Ok(SendOutcome::Acknowledged));
                }
                true
            }
            None => {
                trace!(nonce, "acknowledgement for unknown nonce ignored");
                false
            }
        }
    }

    /// Number of reliable packets awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, nonce: u16) -> bool {
        self.in_flight.contains_key(&nonce)
    }

    /// The earliest retransmission deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|entry| entry.next_due).min()
    }

    /// Sleeps until the earliest retransmission deadline.
    ///
    /// Pends forever when nothing is in flight, so it can sit in a
    /// `tokio::select!` next to the other event sources.
    pub async fn wait_for_retransmit(&self) {
        match self.next_deadline() {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Collects the datagrams whose deadline has passed.
    ///
    /// Each is returned byte-for-byte as first sent and rescheduled. Packets
    /// past the retransmission limit are dropped and their senders told.
    pub fn due(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let interval = self.config.ack_interval;
        let limit = self.config.max_retransmissions;
        let mut resend = Vec::new();
        let mut expired = Vec::new();

        for (&nonce, entry) in self.in_flight.iter_mut() {
            if entry.next_due > now {
                continue;
            }
            if limit.is_some_and(|max| entry.resends >= max) {
                expired.push(nonce);
                continue;
            }
            entry.resends += 1;
            entry.next_due = now + interval;
            trace!(nonce, attempt = entry.resends, "retransmitting");
            resend.push(entry.bytes.clone());
        }

        for nonce in expired {
            if let Some(entry) = self.in_flight.remove(&nonce) {
                warn!(nonce, resends = entry.resends, "reliable send never acknowledged");
                if let Some(reply) = entry.reply {
                    let _ = reply.send(Ok(SendOutcome::Unacknowledged(Unacknowledged::TimedOut)));
                }
            }
        }
        resend
    }

    // -- Inbound -----------------------------------------------------------

    /// Decodes an inbound datagram, applies acknowledgements and prepares
    /// the ack for reliable packets.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Inbound, ProtocolError> {
        let packet = self.codec.decode(bytes)?;
        if let Packet::Acknowledge { nonce, .. } = &packet {
            self.acknowledge(*nonce);
        }

        let (ack, duplicate) = match packet.nonce() {
            Some(nonce) => {
                let ack = self.codec.encode(&Packet::acknowledge(nonce))?;
                let duplicate = !self.duplicates.see(nonce);
                if duplicate {
                    debug!(nonce, "duplicate reliable packet");
                }
                (Some(ack), duplicate)
            }
            None => (None, false),
        };
        Ok(Inbound {
            packet,
            ack,
            duplicate,
        })
    }

    /// Composes an acknowledgement for a nonce whose packet could not be
    /// decoded.
    pub fn acknowledgement(&self, nonce: u16) -> Result<Vec<u8>, ProtocolError> {
        self.codec.encode(&Packet::acknowledge(nonce))
    }

    // -- Waiters -----------------------------------------------------------

    /// Waits for the next inbound packet matching any of `predicates`.
    ///
    /// Must be registered before sending the request whose answer it waits
    /// for, or the answer may be processed first.
    pub fn await_next(&mut self, predicates: Vec<Predicate>, reply: WaitReply) {
        if self.closed {
            let _ = reply.send(None);
            return;
        }
        self.waiters.push(Waiter { predicates, reply });
    }

    /// Resolves every waiter that `packet` satisfies. Returns how many.
    ///
    /// Each waiter resolves once, with the first of its predicates that
    /// matched. Waiters whose caller has gone away are pruned.
    pub fn offer(&mut self, packet: &Packet) -> usize {
        self.waiters.retain(|waiter| !waiter.reply.is_closed());

        let mut resolved = 0;
        let mut i = 0;
        while i < self.waiters.len() {
            let hit = self.waiters[i]
                .predicates
                .iter()
                .position(|predicate| predicate(packet));
            match hit {
                Some(index) => {
                    let waiter = self.waiters.remove(i);
                    let _ = waiter.reply.send(Some(Matched {
                        index,
                        packet: packet.clone(),
                    }));
                    resolved += 1;
                }
                None => i += 1,
            }
        }
        resolved
    }

    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Resolves every pending send and waiter and clears all timers.
    ///
    /// Idempotent. After teardown the engine refuses new work.
    pub fn teardown(&mut self) {
        if !self.closed {
            debug!(
                in_flight = self.in_flight.len(),
                waiters = self.waiters.len(),
                "reliability engine torn down"
            );
        }
        self.closed = true;
        for (_, entry) in std::mem::take(&mut self.in_flight) {
            if let Some(reply) = entry.reply {
                let _ = reply.send(Ok(SendOutcome::Unacknowledged(Unacknowledged::Closed)));
            }
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(None);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

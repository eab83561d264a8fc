//! The connection actor: one Tokio task per open connection.
//!
//! The actor owns the transport endpoint, the reliability engine and the
//! game replica. Nothing else touches them. A [`ConnectionHandle`] talks to
//! it through an mpsc channel, with a oneshot reply channel where the
//! caller wants an answer.
//!
//! One `tokio::select!` loop multiplexes the event sources:
//!
//! 1. Inbound datagram → acknowledge → drop duplicates → apply to the
//!    replica → publish events → resolve waiters
//! 2. Command from a handle → compose, send, track
//! 3. Retransmission deadline → resend the due datagrams
//! 4. Keepalive tick → reliable Ping
//!
//! Inbound packets are handled strictly in arrival order. When the loop
//! ends (peer Disconnect, transport closed, Close command, or every handle
//! dropped) every pending send, waiter and queued command is resolved.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use skeld_game::{Game, GameError, Replica};
use skeld_protocol::{peek_nonce, DisconnectReason, Packet, Payload, Vector2};
use skeld_reliability::{
    Matched, Predicate, ReliabilityEngine, ReliabilityError, Reply, SendOutcome, Unacknowledged,
    WaitReply,
};
use skeld_transport::Connection;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::{ClientConfig, ClientError, ClientEvent, SessionState};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// An action on the local player, applied to the replica by the actor.
#[derive(Debug, Clone)]
pub(crate) enum LocalAction {
    Move { position: Vector2, velocity: Vector2 },
    Snap { position: Vector2 },
    Chat { message: String },
}

pub(crate) type Outcome = oneshot::Receiver<Result<SendOutcome, ReliabilityError>>;

pub(crate) enum Command {
    /// Send a packet. Reliable packets resolve `reply` once acknowledged.
    Send { packet: Packet, reply: Option<Reply> },

    /// Resolve `reply` with the next inbound packet matching a predicate.
    Await {
        predicates: Vec<Predicate>,
        reply: WaitReply,
    },

    /// Apply a local action and send the resulting part. The reply carries
    /// the receiver for the send outcome.
    Local {
        action: LocalAction,
        reply: oneshot::Sender<Result<Outcome, ClientError>>,
    },

    /// A copy of the replicated game.
    Snapshot { reply: oneshot::Sender<Option<Game>> },

    /// Tear down and stop.
    Close { reply: oneshot::Sender<()> },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap to clone: a channel sender and the peer address.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    peer: SocketAddr,
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Queues a packet and returns the receiver for its outcome.
    pub(crate) async fn dispatch(&self, packet: Packet) -> Result<Outcome, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            packet,
            reply: Some(reply),
        })
        .await?;
        Ok(rx)
    }

    /// Sends a packet and waits for its outcome.
    pub(crate) async fn send(&self, packet: Packet) -> Result<SendOutcome, ClientError> {
        resolve(self.dispatch(packet).await?).await
    }

    /// Registers a waiter. Must be called before sending the request whose
    /// answer it waits for.
    pub(crate) async fn wait_for(
        &self,
        predicates: Vec<Predicate>,
    ) -> Result<oneshot::Receiver<Option<Matched>>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Await { predicates, reply }).await?;
        Ok(rx)
    }

    pub(crate) async fn local(&self, action: LocalAction) -> Result<SendOutcome, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Local { action, reply }).await?;
        let outcome = rx.await.map_err(|_| ClientError::NotConnected)??;
        resolve(outcome).await
    }

    pub(crate) async fn snapshot(&self) -> Option<Game> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Stops the actor and waits for it to finish tearing down.
    pub(crate) async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn resolve(outcome: Outcome) -> Result<SendOutcome, ClientError> {
    match outcome.await {
        Ok(outcome) => Ok(outcome?),
        Err(_) => Ok(SendOutcome::Unacknowledged(Unacknowledged::Closed)),
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Why the actor loop ended.
enum Exit {
    Peer {
        reason: Option<DisconnectReason>,
        message: Option<String>,
    },
    TransportClosed,
    Requested(oneshot::Sender<()>),
    HandlesDropped,
}

struct ConnectionActor<C: Connection> {
    conn: C,
    engine: ReliabilityEngine,
    replica: Replica,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ClientEvent>,
    state: Arc<watch::Sender<SessionState>>,
    keepalive: Option<Duration>,
}

/// Spawns the actor for an open transport connection.
pub(crate) fn spawn<C: Connection>(
    conn: C,
    config: &ClientConfig,
    events: broadcast::Sender<ClientEvent>,
    state: Arc<watch::Sender<SessionState>>,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let peer = conn.peer_addr();
    let actor = ConnectionActor {
        conn,
        engine: ReliabilityEngine::new(config.reliability.clone()),
        replica: Replica::new(),
        commands: rx,
        events,
        state,
        keepalive: config.keepalive_interval.filter(|d| !d.is_zero()),
    };
    tokio::spawn(actor.run());
    ConnectionHandle { peer, commands: tx }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<C: Connection> ConnectionActor<C> {
    async fn run(mut self) {
        let peer = self.conn.peer_addr();
        debug!(%peer, "connection actor started");

        let mut keepalive = self.keepalive.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let exit = loop {
            tokio::select! {
                datagram = self.conn.recv() => match datagram {
                    Ok(Some(bytes)) => {
                        if let ControlFlow::Break(exit) = self.on_datagram(&bytes).await {
                            break exit;
                        }
                    }
                    Ok(None) => break Exit::TransportClosed,
                    Err(e) => {
                        debug!(%peer, error = %e, "receive failed");
                        break Exit::TransportClosed;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(exit) = self.on_command(command).await {
                            break exit;
                        }
                    }
                    None => break Exit::HandlesDropped,
                },
                _ = self.engine.wait_for_retransmit() => {
                    for bytes in self.engine.due(Instant::now()) {
                        self.send_raw(&bytes).await;
                    }
                }
                _ = tick(&mut keepalive) => {
                    trace!(%peer, "keepalive");
                    self.send_packet(Packet::ping(), None).await;
                }
            }
        };

        self.shutdown(exit).await;
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_datagram(&mut self, bytes: &[u8]) -> ControlFlow<Exit> {
        let inbound = match self.engine.receive(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(len = bytes.len(), error = %e, "dropping malformed datagram");
                // Still acknowledge, or the server resends it forever.
                if let Some(nonce) = peek_nonce(bytes) {
                    if let Ok(ack) = self.engine.acknowledgement(nonce) {
                        self.send_raw(&ack).await;
                    }
                }
                return ControlFlow::Continue(());
            }
        };

        if let Some(ack) = &inbound.ack {
            self.send_raw(ack).await;
        }
        if inbound.duplicate {
            return ControlFlow::Continue(());
        }

        let packet = inbound.packet;
        trace!(?packet, "received");
        let _ = self.events.send(ClientEvent::Packet(packet.clone()));

        for payload in packet.payloads() {
            self.apply(payload).await;
        }
        self.engine.offer(&packet);

        match packet {
            Packet::Disconnect { reason, message } => {
                info!(peer = %self.conn.peer_addr(), ?reason, "server disconnected us");
                ControlFlow::Break(Exit::Peer { reason, message })
            }
            _ => ControlFlow::Continue(()),
        }
    }

    async fn apply(&mut self, payload: &Payload) {
        let effects = self.replica.apply(payload);
        for event in effects.events {
            let _ = self.events.send(ClientEvent::Game(event));
        }
        for reply in effects.replies {
            self.send_packet(Packet::reliable(vec![reply]), None).await;
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn on_command(&mut self, command: Command) -> ControlFlow<Exit> {
        match command {
            Command::Send { packet, reply } => self.send_packet(packet, reply).await,
            Command::Await { predicates, reply } => self.engine.await_next(predicates, reply),
            Command::Local { action, reply } => match self.local(action) {
                Ok(packet) => {
                    let (tx, rx) = oneshot::channel();
                    let _ = reply.send(Ok(rx));
                    self.send_packet(packet, Some(tx)).await;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.replica.game().cloned());
            }
            Command::Close { reply } => return ControlFlow::Break(Exit::Requested(reply)),
        }
        ControlFlow::Continue(())
    }

    /// Applies a local action to the replica and builds the packet that
    /// tells everyone else. Movement goes unreliable.
    fn local(&mut self, action: LocalAction) -> Result<Packet, ClientError> {
        let game = self.replica.game_mut().ok_or(GameError::NotInGame)?;
        let code = game.code();
        let (part, reliable) = match action {
            LocalAction::Move { position, velocity } => (game.local_move(position, velocity)?, false),
            LocalAction::Snap { position } => (game.local_snap(position)?, true),
            LocalAction::Chat { message } => (game.local_chat(message)?, true),
        };
        let payloads = vec![Payload::GameData {
            code,
            parts: vec![part],
        }];
        Ok(if reliable {
            Packet::reliable(payloads)
        } else {
            Packet::unreliable(payloads)
        })
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Numbers, composes and sends a packet, arming retransmission for
    /// reliable ones.
    async fn send_packet(&mut self, mut packet: Packet, reply: Option<Reply>) {
        let bytes = match self.engine.prepare(&mut packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "cannot send packet");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };
        if let Err(e) = self.conn.send(&bytes).await {
            debug!(error = %e, "send failed");
            if let Some(reply) = reply {
                let _ = reply.send(Err(e.into()));
            }
            return;
        }
        trace!(?packet, "sent");
        match packet.nonce().filter(|_| packet.is_reliable()) {
            Some(nonce) => self.engine.track(nonce, bytes, reply),
            None => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(SendOutcome::Sent));
                }
            }
        }
    }

    async fn send_raw(&self, bytes: &[u8]) {
        if let Err(e) = self.conn.send(bytes).await {
            debug!(error = %e, "send failed");
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    async fn shutdown(mut self, exit: Exit) {
        let peer = self.conn.peer_addr();
        let (reason, message, closer) = match exit {
            Exit::Peer { reason, message } => (reason, message, None),
            Exit::TransportClosed => {
                warn!(%peer, "transport closed");
                (None, None, None)
            }
            Exit::Requested(reply) => (None, None, Some(reply)),
            Exit::HandlesDropped => {
                debug!(%peer, "all handles dropped");
                (None, None, None)
            }
        };

        self.engine.teardown();
        if let Err(e) = self.conn.close().await {
            debug!(%peer, error = %e, "close failed");
        }
        self.state.send_replace(SessionState::Disconnected);

        // Anything still queued gets a definite answer.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send { reply, .. } => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(SendOutcome::Unacknowledged(Unacknowledged::Closed)));
                    }
                }
                Command::Await { reply, .. } => {
                    let _ = reply.send(None);
                }
                Command::Local { reply, .. } => {
                    let _ = reply.send(Err(ClientError::NotConnected));
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.replica.game().cloned());
                }
                Command::Close { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        let _ = self
            .events
            .send(ClientEvent::Disconnected { reason, message });
        info!(%peer, "disconnected");
        if let Some(reply) = closer {
            let _ = reply.send(());
        }
    }
}

//! The [`Client`]: session lifecycle on top of the connection actor.
//!
//! A `Client` owns a [`Transport`] and at most one open connection. Every
//! operation goes through the actor's command channel, so the client itself
//! holds no game state beyond the session state and the last username.

use std::net::SocketAddr;
use std::sync::Arc;

use skeld_game::{announce, Game};
use skeld_protocol::{
    DisconnectReason, GameListQuery, GameListing, Packet, Payload, RoomCode, Vector2,
    DEFAULT_MAP_OWNERSHIP,
};
use skeld_reliability::{Predicate, SendOutcome, Unacknowledged};
use skeld_transport::Transport;
use tokio::sync::{broadcast, watch};
use tokio::time;
use tracing::{debug, info, warn};

use crate::connection::{self, ConnectionHandle, LocalAction};
use crate::{ClientConfig, ClientError, ClientEvent, EventFilter, EventStream, SessionState};

/// Options for [`Client::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Send SceneChange and Ready once joined.
    pub announce: bool,
    /// Map ownership flags sent with the join request.
    pub map_ownership: u8,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            announce: true,
            map_ownership: DEFAULT_MAP_OWNERSHIP,
        }
    }
}

/// What answered a join request.
enum JoinAnswer {
    Redirect(SocketAddr),
    Joined,
    Rejected {
        reason: DisconnectReason,
        message: Option<String>,
    },
}

/// A predicate over the payloads of an inbound packet.
fn payload<F>(f: F) -> Predicate
where
    F: Fn(&Payload) -> bool + Send + Sync + 'static,
{
    Box::new(move |packet: &Packet| packet.payloads().iter().any(&f))
}

/// An Among Us client.
///
/// # Example
///
/// ```rust,no_run
/// use skeld::prelude::*;
///
/// # async fn run() -> Result<(), ClientError> {
/// let config = ClientConfig::default();
/// let server = config.master_server("EU").expect("known region");
///
/// let mut client = Client::udp(config);
/// client.connect(server, "weakeyes").await?;
///
/// let code: RoomCode = "ABCDEF".parse()?;
/// if let Some(game) = client.join(code, JoinOptions::default()).await? {
///     println!("{} players", game.players().len());
/// }
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport> {
    transport: T,
    config: ClientConfig,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<ClientEvent>,
    connection: Option<ConnectionHandle>,
    username: Option<String>,
}

#[cfg(feature = "udp")]
impl Client<skeld_transport::UdpTransport> {
    /// A client that talks real UDP.
    pub fn udp(config: ClientConfig) -> Self {
        Self::new(skeld_transport::UdpTransport::new(), config)
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            config,
            state: Arc::new(state),
            events,
            connection: None,
            username: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that sees every session state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Every client event from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe(), EventFilter::All)
    }

    /// Game events about one entity.
    pub fn subscribe_to(&self, target: skeld_game::EventTarget) -> EventStream {
        EventStream::new(self.events.subscribe(), EventFilter::Target(target))
    }

    /// The address of the server we are connected to.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.open().ok().map(ConnectionHandle::peer_addr)
    }

    /// A copy of the replicated game, if one has been joined.
    pub async fn game(&self) -> Option<Game> {
        self.open().ok()?.snapshot().await
    }

    // -----------------------------------------------------------------------
    // Connect / disconnect
    // -----------------------------------------------------------------------

    /// Opens a connection and performs the Hello handshake.
    ///
    /// An open connection is closed first.
    pub async fn connect(
        &mut self,
        addr: SocketAddr,
        username: impl Into<String>,
    ) -> Result<(), ClientError> {
        if self.connection.is_some() {
            self.disconnect().await;
        }
        let username = username.into();

        self.set_state(SessionState::Idle);
        self.set_state(SessionState::Connecting);
        debug!(%addr, %username, "connecting");

        let conn = match self.transport.connect(addr).await {
            Ok(conn) => conn,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e.into());
            }
        };
        let handle = connection::spawn(conn, &self.config, self.events.clone(), self.state.clone());

        let hello = Packet::hello(self.config.client_version, username.clone());
        let outcome = match time::timeout(self.config.connect_timeout, handle.send(hello)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                handle.close().await;
                return Err(e);
            }
            Err(_) => SendOutcome::Unacknowledged(Unacknowledged::TimedOut),
        };

        match outcome {
            SendOutcome::Acknowledged => {
                self.set_state(SessionState::Connected);
                self.connection = Some(handle);
                self.username = Some(username);
                let _ = self.events.send(ClientEvent::Connected { addr });
                info!(%addr, "connected");
                Ok(())
            }
            SendOutcome::Unacknowledged(why) => {
                warn!(%addr, "handshake not acknowledged: {why}");
                handle.close().await;
                Err(ClientError::HandshakeFailed(why))
            }
            SendOutcome::Sent => {
                handle.close().await;
                Err(ClientError::HandshakeFailed(Unacknowledged::TimedOut))
            }
        }
    }

    /// Says goodbye and closes the connection.
    ///
    /// Waits up to `disconnect_timeout` for the server's own Disconnect.
    /// Returns immediately when nothing is connected.
    pub async fn disconnect(&mut self) {
        let Some(handle) = self.connection.take() else {
            return;
        };
        if !handle.is_closed() {
            let goodbye: Predicate = Box::new(|p: &Packet| matches!(p, Packet::Disconnect { .. }));
            let waiter = handle.wait_for(vec![goodbye]).await;
            if let Ok(waiter) = waiter {
                if handle.dispatch(Packet::disconnect()).await.is_ok()
                    && time::timeout(self.config.disconnect_timeout, waiter)
                        .await
                        .is_err()
                {
                    debug!(addr = %handle.peer_addr(), "no disconnect from server, closing anyway");
                }
            }
            handle.close().await;
        }
        self.set_state(SessionState::Disconnected);
    }

    // -----------------------------------------------------------------------
    // Join
    // -----------------------------------------------------------------------

    /// Joins a game by room code, following redirects.
    ///
    /// Returns `Ok(None)` if the connection ended before an answer, or the
    /// redirect limit was reached.
    pub async fn join(
        &mut self,
        code: RoomCode,
        options: JoinOptions,
    ) -> Result<Option<Game>, ClientError> {
        let mut hops = 0u32;
        loop {
            let state = self.state();
            if state != SessionState::Connected {
                return Err(ClientError::InvalidState {
                    state,
                    operation: "join",
                });
            }
            let handle = self.open()?.clone();
            self.set_state(SessionState::Joining);

            let waiter = handle
                .wait_for(vec![
                    payload(|p| matches!(p, Payload::Redirect { .. })),
                    payload(move |p| matches!(p, Payload::JoinedGame { code: c, .. } if *c == code)),
                    payload(|p| matches!(p, Payload::JoinError { .. })),
                ])
                .await?;
            handle
                .dispatch(Packet::reliable(vec![Payload::JoinGame {
                    code,
                    map_ownership: options.map_ownership,
                }]))
                .await?;
            debug!(%code, "join requested");

            let Some(matched) = waiter.await.ok().flatten() else {
                debug!(%code, "connection closed while joining");
                return Ok(None);
            };
            let answer = matched.packet.payloads().iter().find_map(|p| match (matched.index, p) {
                (0, Payload::Redirect { addr }) => Some(JoinAnswer::Redirect(SocketAddr::V4(*addr))),
                (1, Payload::JoinedGame { code: c, .. }) if *c == code => Some(JoinAnswer::Joined),
                (2, Payload::JoinError { reason, message }) => Some(JoinAnswer::Rejected {
                    reason: *reason,
                    message: message.clone(),
                }),
                _ => None,
            });

            match answer {
                Some(JoinAnswer::Redirect(addr)) => {
                    hops += 1;
                    if hops > self.config.max_redirects {
                        warn!(%code, hops, "too many redirects, giving up");
                        self.set_state(SessionState::Connected);
                        return Ok(None);
                    }
                    info!(%code, %addr, hops, "redirected");
                    let username = self.username.clone().unwrap_or_default();
                    self.connect(addr, username).await?;
                }
                Some(JoinAnswer::Joined) => {
                    self.set_state(SessionState::InGame);
                    let game = handle.snapshot().await;
                    if let (true, Some(game)) = (options.announce, &game) {
                        handle
                            .dispatch(Packet::reliable(vec![announce(code, game.client_id())]))
                            .await?;
                    }
                    info!(%code, "joined game");
                    return Ok(game);
                }
                Some(JoinAnswer::Rejected { reason, message }) => {
                    self.set_state(SessionState::Connected);
                    info!(%code, %reason, "join rejected");
                    return Err(ClientError::Rejected { reason, message });
                }
                None => {
                    self.set_state(SessionState::Connected);
                    return Ok(None);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Game list
    // -----------------------------------------------------------------------

    /// Asks the server for public games matching `query`.
    ///
    /// Returns `Ok(None)` if the connection ended before the list arrived.
    pub async fn search(
        &self,
        query: GameListQuery,
    ) -> Result<Option<Vec<GameListing>>, ClientError> {
        let handle = self.open()?;
        let waiter = handle
            .wait_for(vec![payload(|p| matches!(p, Payload::GameList { .. }))])
            .await?;
        handle
            .dispatch(Packet::reliable(vec![Payload::GetGameList(query)]))
            .await?;

        let Some(matched) = waiter.await.ok().flatten() else {
            return Ok(None);
        };
        Ok(matched.packet.payloads().iter().find_map(|p| match p {
            Payload::GameList { listings } => Some(listings.clone()),
            _ => None,
        }))
    }

    // -----------------------------------------------------------------------
    // Local player
    // -----------------------------------------------------------------------

    /// Moves the local player. Sent unreliably.
    pub async fn move_to(
        &self,
        position: Vector2,
        velocity: Vector2,
    ) -> Result<SendOutcome, ClientError> {
        self.in_game("move")?
            .local(LocalAction::Move { position, velocity })
            .await
    }

    /// Teleports the local player.
    pub async fn snap_to(&self, position: Vector2) -> Result<SendOutcome, ClientError> {
        self.in_game("snap")?
            .local(LocalAction::Snap { position })
            .await
    }

    pub async fn send_chat(&self, message: impl Into<String>) -> Result<SendOutcome, ClientError> {
        self.in_game("chat")?
            .local(LocalAction::Chat {
                message: message.into(),
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn open(&self) -> Result<&ConnectionHandle, ClientError> {
        self.connection
            .as_ref()
            .filter(|handle| !handle.is_closed())
            .ok_or(ClientError::NotConnected)
    }

    fn in_game(&self, operation: &'static str) -> Result<&ConnectionHandle, ClientError> {
        let state = self.state();
        if state != SessionState::InGame {
            return Err(ClientError::InvalidState { state, operation });
        }
        self.open()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(&next) {
                debug!(from = %current, to = %next, "ignoring invalid state transition");
                return false;
            }
            *current = next;
            true
        });
    }
}

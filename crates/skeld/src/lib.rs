//! # Skeld
//!
//! An async client for the Among Us Hazel protocol.
//!
//! Skeld speaks the game's UDP protocol directly: it performs the Hello
//! handshake, keeps reliable delivery going with acknowledgements and
//! retransmission, joins games (following server redirects) and replicates
//! the game's entity graph so you can watch players move, vote and die.
//!
//! ## Layers
//!
//! ```text
//! skeld-transport   datagrams (UDP, or in-memory for tests)
//! skeld-protocol    Packet <-> bytes
//! skeld-reliability nonces, acks, retransmission, waiters
//! skeld-game        spawn registry, components, RPCs, events
//! skeld             Client, session state, connection actor
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skeld::prelude::*;
//!
//! # async fn run() -> Result<(), ClientError> {
//! let config = ClientConfig::default();
//! let server = config.master_server("EU").expect("known region");
//!
//! let mut client = Client::udp(config);
//! client.connect(server, "weakeyes").await?;
//!
//! let games = client.search(GameListQuery::new(&[MapId::TheSkeld])).await?;
//! println!("{games:?}");
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connection;
mod error;
mod events;
mod session;

pub use client::{Client, JoinOptions};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientEvent, EventFilter, EventStream};
pub use session::SessionState;

pub use skeld_game as game;
pub use skeld_protocol as protocol;
pub use skeld_reliability as reliability;
pub use skeld_transport as transport;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::{
        Client, ClientConfig, ClientError, ClientEvent, EventFilter, EventStream, JoinOptions,
        SessionState,
    };

    pub use skeld_game::{
        EventKind, EventTarget, Game, GameEvent, PlayerView, VoteOutcome,
    };
    pub use skeld_protocol::{
        ClientId, DisconnectReason, GameListQuery, GameListing, MapId, NetId, PlayerId,
        RoomCode, Vector2,
    };
    pub use skeld_reliability::{SendOutcome, Unacknowledged};
    pub use skeld_transport::{Connection, Transport};
}

//! Replicated game state for Skeld.
//!
//! Everything the server tells a client about a game ends up here:
//!
//! - **Components** ([`Component`], [`NetComponent`]): the replicated
//!   pieces, each decoded from spawn and update blobs.
//! - **Objects** ([`GameObject`], [`layout`]): groups of components created
//!   by one Spawn part, built from an exhaustive spawn-type table.
//! - **Registry** ([`Registry`]): every live component by net id.
//! - **RPC dispatch**: remote calls applied to components and players,
//!   reported as [`GameEvent`]s.
//! - **Game** ([`Game`]): membership plus player views resolved across
//!   objects, components and the game data table.
//! - **Replica** ([`Replica`]): feeds inbound payloads to the above, in
//!   order, and says what to send back.
//!
//! # Architecture
//!
//! This crate is sans-IO. The connection actor owns one [`Replica`] and
//! calls [`Replica::apply`] for each inbound payload, then publishes the
//! returned events and sends the returned replies.
//!
//! ```text
//! Payload → Replica → Game → Registry / rpc::dispatch → Vec<GameEvent>
//! ```
//!
//! Lookups always precede mutation. A payload that names an entity we do
//! not know about is dropped without partial effect.

pub mod components;
mod error;
mod events;
mod game;
mod objects;
mod registry;
mod replica;
mod rpc;

pub use components::{
    Applied, Component, ComponentKind, CustomNetworkTransform, GameDataTable, LobbyBehaviour,
    MeetingHud, NetComponent, Opaque, PlayerControl, PlayerPhysics, ShipStatus, SwitchSystem,
    VoteBanSystem,
};
pub use error::GameError;
pub use events::{EventKind, EventTarget, GameEvent, VoteOutcome};
pub use game::{Game, Member, PlayerView, StartCounter};
pub use objects::{kind_at, layout, GameObject, ObjectId};
pub use registry::{Despawned, Registry, Spawned};
pub use replica::{announce, ready, Effects, Replica};

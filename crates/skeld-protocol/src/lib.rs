//! Wire protocol for Skeld.
//!
//! This crate defines the "language" the game client and server speak over
//! Hazel:
//!
//! - **Buffer** ([`Reader`], [`Writer`]): little-endian primitives, packed
//!   integers, strings and length-framed sub-messages.
//! - **Types** ([`RoomCode`], [`ClientId`], [`NetId`], [`DisconnectReason`],
//!   etc.): the scalar vocabulary.
//! - **Packets** ([`Packet`], [`Payload`], [`Part`], [`Rpc`]): the nested
//!   message tree that travels in one datagram.
//! - **Codec** ([`parse`], [`compose`], [`Codec`], [`HazelCodec`]): bytes to
//!   packets and back, for a given direction.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw datagrams) and the
//! reliability engine. It knows nothing about connections or timers.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Reliability (acks, waiters) → Game
//! ```
//!
//! Unknown payload ids, part tags and RPC ids are kept as opaque bytes so a
//! packet can be re-emitted exactly as it was received.

mod buffer;
pub mod codec;
mod error;
pub mod packet;
mod types;

pub use buffer::{Reader, Writer};
pub use codec::{compose, parse, peek_nonce, Codec, HazelCodec};
pub use error::ProtocolError;
pub use packet::{
    GameListQuery, GameListing, Packet, Part, Payload, Rpc, Spawn, SpawnedComponent,
    DEFAULT_MAP_OWNERSHIP, HAZEL_VERSION,
};
pub use types::{
    Bound, ClientId, ClientVersion, DisconnectReason, MapId, NetId, PlayerId, PlayerRecord,
    RoomCode, SpawnType, TaskState, Vector2,
};

//! Packet parsing and composing.
//!
//! [`parse`] and [`compose`] are free functions over a [`Bound`]. The
//! [`Codec`] trait fixes that direction pair for one side of a
//! conversation, so the client core can hold a single value that always
//! encodes server-bound and decodes client-bound.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::buffer::{Reader, Writer};
use crate::packet::{payload_id, GameListQuery, GameListing, Packet, Part, Payload};
use crate::types::{Bound, ClientId, ClientVersion, DisconnectReason, RoomCode};
use crate::ProtocolError;

/// Packet operation bytes.
pub mod op {
    pub const UNRELIABLE: u8 = 0x00;
    pub const RELIABLE: u8 = 0x01;
    pub const HELLO: u8 = 0x08;
    pub const DISCONNECT: u8 = 0x09;
    pub const ACKNOWLEDGE: u8 = 0x0a;
    pub const PING: u8 = 0x0c;
}

/// Join results below this value are error reasons, not room codes.
const JOIN_ERROR_LIMIT: i32 = 256;

/// Parses one datagram travelling towards `bound`.
pub fn parse(bytes: &[u8], bound: Bound) -> Result<Packet, ProtocolError> {
    let mut r = Reader::new(bytes);
    let packet = match r.u8()? {
        op::UNRELIABLE => Packet::Unreliable {
            payloads: read_payloads(&mut r, bound)?,
        },
        op::RELIABLE => Packet::Reliable {
            nonce: r.u16()?,
            payloads: read_payloads(&mut r, bound)?,
        },
        op::HELLO => Packet::Hello {
            nonce: r.u16()?,
            hazel_version: r.u8()?,
            client_version: ClientVersion(r.i32()?),
            username: r.string()?,
        },
        op::DISCONNECT => {
            if r.is_empty() {
                Packet::disconnect()
            } else {
                let reason = DisconnectReason::from_id(r.u8()?);
                let message = if reason == DisconnectReason::Custom && !r.is_empty() {
                    Some(r.string()?)
                } else {
                    None
                };
                Packet::Disconnect {
                    reason: Some(reason),
                    message,
                }
            }
        }
        op::ACKNOWLEDGE => Packet::Acknowledge {
            nonce: r.u16()?,
            missing: r.u8()?,
        },
        op::PING => Packet::Ping { nonce: r.u16()? },
        other => return Err(ProtocolError::UnknownPacket(other)),
    };
    Ok(packet)
}

/// Composes a datagram travelling towards `bound`.
pub fn compose(packet: &Packet, bound: Bound) -> Result<Vec<u8>, ProtocolError> {
    let mut w = Writer::with_capacity(64);
    match packet {
        Packet::Unreliable { payloads } => {
            w.u8(op::UNRELIABLE);
            write_payloads(&mut w, payloads, bound)?;
        }
        Packet::Reliable { nonce, payloads } => {
            w.u8(op::RELIABLE).u16(*nonce);
            write_payloads(&mut w, payloads, bound)?;
        }
        Packet::Hello {
            nonce,
            hazel_version,
            client_version,
            username,
        } => {
            if bound != Bound::Server {
                return Err(ProtocolError::WrongDirection {
                    what: "Hello",
                    bound,
                });
            }
            w.u8(op::HELLO)
                .u16(*nonce)
                .u8(*hazel_version)
                .i32(client_version.0)
                .string(username);
        }
        Packet::Disconnect { reason, message } => {
            w.u8(op::DISCONNECT);
            if let Some(reason) = reason {
                w.u8(reason.id());
                if let (DisconnectReason::Custom, Some(message)) = (reason, message) {
                    w.string(message);
                }
            }
        }
        Packet::Acknowledge { nonce, missing } => {
            w.u8(op::ACKNOWLEDGE).u16(*nonce).u8(*missing);
        }
        Packet::Ping { nonce } => {
            w.u8(op::PING).u16(*nonce);
        }
    }
    Ok(w.into_bytes())
}

/// Reads the nonce of a reliable datagram without parsing its body.
///
/// Lets a receiver acknowledge a reliable packet whose payloads it could not
/// parse, so the peer stops retransmitting it.
pub fn peek_nonce(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [op::RELIABLE | op::HELLO | op::PING, lo, hi, ..] => {
            Some(u16::from_le_bytes([*lo, *hi]))
        }
        _ => None,
    }
}

fn read_payloads(r: &mut Reader<'_>, bound: Bound) -> Result<Vec<Payload>, ProtocolError> {
    let mut payloads = Vec::new();
    while !r.is_empty() {
        let (id, mut body) = r.framed()?;
        payloads.push(read_payload(id, &mut body, bound)?);
        if !body.is_empty() {
            tracing::trace!(id, %bound, skipped = body.remaining(), "payload has trailing bytes");
        }
    }
    Ok(payloads)
}

fn write_payloads(
    w: &mut Writer,
    payloads: &[Payload],
    bound: Bound,
) -> Result<(), ProtocolError> {
    for payload in payloads {
        check_direction(payload, bound)?;
        w.write_framed(payload.id(), |body| write_payload(body, payload, bound));
    }
    Ok(())
}

fn read_payload(id: u8, r: &mut Reader<'_>, bound: Bound) -> Result<Payload, ProtocolError> {
    use payload_id::*;
    let code = |r: &mut Reader<'_>| r.i32().map(RoomCode);

    let payload = match (id, bound) {
        (JOIN_GAME, Bound::Server) => Payload::JoinGame {
            code: code(r)?,
            map_ownership: r.u8()?,
        },
        (JOIN_GAME, Bound::Client) => {
            let first = r.i32()?;
            if (0..JOIN_ERROR_LIMIT).contains(&first) {
                let reason = DisconnectReason::from_id(first as u8);
                let message = if reason == DisconnectReason::Custom && !r.is_empty() {
                    Some(r.string()?)
                } else {
                    None
                };
                Payload::JoinError { reason, message }
            } else {
                Payload::PlayerJoined {
                    code: RoomCode(first),
                    client_id: ClientId(r.i32()? as u32),
                    host_id: ClientId(r.i32()? as u32),
                }
            }
        }
        (START_GAME, _) => Payload::StartGame { code: code(r)? },
        (REMOVE_PLAYER, Bound::Server) => Payload::RemovePlayer {
            code: code(r)?,
            client_id: ClientId(r.packed()?),
            reason: DisconnectReason::from_id(r.u8()?),
        },
        (REMOVE_PLAYER, Bound::Client) => Payload::PlayerRemoved {
            code: code(r)?,
            client_id: ClientId(r.i32()? as u32),
            host_id: ClientId(r.i32()? as u32),
            reason: DisconnectReason::from_id(r.u8()?),
        },
        (GAME_DATA, _) => Payload::GameData {
            code: code(r)?,
            parts: Part::read_all(r)?,
        },
        (GAME_DATA_TO, _) => Payload::GameDataTo {
            code: code(r)?,
            recipient: ClientId(r.packed()?),
            parts: Part::read_all(r)?,
        },
        (JOINED_GAME, Bound::Client) => {
            let code = code(r)?;
            let client_id = ClientId(r.i32()? as u32);
            let host_id = ClientId(r.i32()? as u32);
            let count = r.packed()?;
            let others = (0..count)
                .map(|_| r.packed().map(ClientId))
                .collect::<Result<_, _>>()?;
            Payload::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            }
        }
        (END_GAME, _) => Payload::EndGame {
            code: code(r)?,
            reason: r.u8()?,
            show_ad: r.bool()?,
        },
        (KICK_PLAYER, _) => Payload::KickPlayer {
            code: code(r)?,
            client_id: ClientId(r.packed()?),
            banned: r.bool()?,
        },
        (REDIRECT, Bound::Client) => {
            let ip = r.bytes(4)?;
            let ip = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
            Payload::Redirect {
                addr: SocketAddrV4::new(ip, r.u16()?),
            }
        }
        (GET_GAME_LIST_V2, Bound::Server) => Payload::GetGameList(GameListQuery {
            maps: r.u8()?,
            impostors: r.u8()?,
            language: r.u32()?,
        }),
        (GET_GAME_LIST_V2, Bound::Client) => {
            let count = r.packed()?;
            let mut listings = Vec::new();
            for _ in 0..count {
                let len = r.packed()? as usize;
                let mut body = r.sub_reader(len)?;
                listings.push(GameListing::read(&mut body)?);
            }
            Payload::GameList { listings }
        }
        (other, _) => Payload::Unknown {
            id: other,
            data: r.rest().to_vec(),
        },
    };
    Ok(payload)
}

fn check_direction(payload: &Payload, bound: Bound) -> Result<(), ProtocolError> {
    let (what, allowed) = match payload {
        Payload::JoinGame { .. } => ("JoinGame request", Bound::Server),
        Payload::RemovePlayer { .. } => ("RemovePlayer request", Bound::Server),
        Payload::GetGameList(_) => ("GetGameList query", Bound::Server),
        Payload::PlayerJoined { .. } => ("PlayerJoined", Bound::Client),
        Payload::JoinError { .. } => ("JoinError", Bound::Client),
        Payload::PlayerRemoved { .. } => ("PlayerRemoved", Bound::Client),
        Payload::JoinedGame { .. } => ("JoinedGame", Bound::Client),
        Payload::Redirect { .. } => ("Redirect", Bound::Client),
        Payload::GameList { .. } => ("GameList", Bound::Client),
        _ => return Ok(()),
    };
    if allowed == bound {
        Ok(())
    } else {
        Err(ProtocolError::WrongDirection { what, bound })
    }
}

/// Writes the body of a payload whose direction was already checked.
fn write_payload(w: &mut Writer, payload: &Payload, bound: Bound) {
    match payload {
        Payload::JoinGame {
            code,
            map_ownership,
        } => {
            w.i32(code.as_i32()).u8(*map_ownership);
        }
        Payload::PlayerJoined {
            code,
            client_id,
            host_id,
        } => {
            w.i32(code.as_i32())
                .i32(client_id.0 as i32)
                .i32(host_id.0 as i32);
        }
        Payload::JoinError { reason, message } => {
            w.i32(i32::from(reason.id()));
            if let (DisconnectReason::Custom, Some(message)) = (reason, message) {
                w.string(message);
            }
        }
        Payload::StartGame { code } => {
            w.i32(code.as_i32());
        }
        Payload::RemovePlayer {
            code,
            client_id,
            reason,
        } => {
            w.i32(code.as_i32()).packed(client_id.0).u8(reason.id());
        }
        Payload::PlayerRemoved {
            code,
            client_id,
            host_id,
            reason,
        } => {
            w.i32(code.as_i32())
                .i32(client_id.0 as i32)
                .i32(host_id.0 as i32)
                .u8(reason.id());
        }
        Payload::GameData { code, parts } => {
            w.i32(code.as_i32());
            for part in parts {
                part.write(w);
            }
        }
        Payload::GameDataTo {
            code,
            recipient,
            parts,
        } => {
            w.i32(code.as_i32()).packed(recipient.0);
            for part in parts {
                part.write(w);
            }
        }
        Payload::JoinedGame {
            code,
            client_id,
            host_id,
            others,
        } => {
            w.i32(code.as_i32())
                .i32(client_id.0 as i32)
                .i32(host_id.0 as i32)
                .packed(others.len() as u32);
            for other in others {
                w.packed(other.0);
            }
        }
        Payload::EndGame {
            code,
            reason,
            show_ad,
        } => {
            w.i32(code.as_i32()).u8(*reason).bool(*show_ad);
        }
        Payload::KickPlayer {
            code,
            client_id,
            banned,
        } => {
            w.i32(code.as_i32()).packed(client_id.0).bool(*banned);
        }
        Payload::Redirect { addr } => {
            w.bytes(&addr.ip().octets()).u16(addr.port());
        }
        Payload::GetGameList(query) => {
            w.u8(query.maps).u8(query.impostors).u32(query.language);
        }
        Payload::GameList { listings } => {
            w.packed(listings.len() as u32);
            for listing in listings {
                let mut body = Writer::new();
                listing.write(&mut body);
                w.packed(body.len() as u32).bytes(body.as_bytes());
            }
        }
        Payload::Unknown { data, .. } => {
            w.bytes(data);
        }
    }
    tracing::trace!(id = payload.id(), %bound, len = w.len(), "payload composed");
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Converts packets to and from datagrams for one side of a conversation.
pub trait Codec: Send + Sync + 'static {
    /// Composes an outbound packet.
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError>;

    /// Parses an inbound datagram.
    fn decode(&self, data: &[u8]) -> Result<Packet, ProtocolError>;
}

/// The Hazel binary codec.
///
/// `local` is the side this codec sits on: a client-side codec decodes
/// client-bound packets and encodes server-bound ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HazelCodec {
    pub local: Bound,
}

impl HazelCodec {
    pub fn client() -> Self {
        Self {
            local: Bound::Client,
        }
    }

    pub fn server() -> Self {
        Self {
            local: Bound::Server,
        }
    }
}

impl Default for HazelCodec {
    fn default() -> Self {
        Self::client()
    }
}

impl Codec for HazelCodec {
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        compose(packet, self.local.opposite())
    }

    fn decode(&self, data: &[u8]) -> Result<Packet, ProtocolError> {
        parse(data, self.local)
    }
}

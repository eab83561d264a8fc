//! The packet model: packets, payloads, game-data parts and RPCs.
//!
//! ```text
//! Packet ── Reliable/Unreliable ──> Payload* ── GameData/GameDataTo ──> Part*
//!                                                               └─ Rpc ──> args
//! ```
//!
//! Parts and RPCs read the same in both directions, so their wire code lives
//! here. Packets and payloads are direction-dependent and are handled by
//! [`crate::codec`].

use std::net::SocketAddrV4;

use serde::Serialize;

use crate::buffer::{Reader, Writer};
use crate::types::{
    ClientId, ClientVersion, DisconnectReason, MapId, NetId, PlayerId, PlayerRecord,
    RoomCode, SpawnType, Vector2,
};
use crate::ProtocolError;

/// Hazel protocol revision sent in the handshake.
pub const HAZEL_VERSION: u8 = 1;

/// Map ownership flags sent with a join request.
pub const DEFAULT_MAP_OWNERSHIP: u8 = 0x07;

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// One datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Unreliable {
        payloads: Vec<Payload>,
    },
    Reliable {
        nonce: u16,
        payloads: Vec<Payload>,
    },
    Hello {
        nonce: u16,
        hazel_version: u8,
        client_version: ClientVersion,
        username: String,
    },
    Disconnect {
        reason: Option<DisconnectReason>,
        message: Option<String>,
    },
    Acknowledge {
        nonce: u16,
        /// Bitfield of earlier nonces the peer is missing. `0xff` means none.
        missing: u8,
    },
    Ping {
        nonce: u16,
    },
}

impl Packet {
    /// A reliable carrier with a placeholder nonce, to be numbered on send.
    pub fn reliable(payloads: Vec<Payload>) -> Self {
        Self::Reliable { nonce: 0, payloads }
    }

    pub fn unreliable(payloads: Vec<Payload>) -> Self {
        Self::Unreliable { payloads }
    }

    pub fn hello(client_version: ClientVersion, username: impl Into<String>) -> Self {
        Self::Hello {
            nonce: 0,
            hazel_version: HAZEL_VERSION,
            client_version,
            username: username.into(),
        }
    }

    pub fn ping() -> Self {
        Self::Ping { nonce: 0 }
    }

    pub fn acknowledge(nonce: u16) -> Self {
        Self::Acknowledge {
            nonce,
            missing: 0xff,
        }
    }

    pub fn disconnect() -> Self {
        Self::Disconnect {
            reason: None,
            message: None,
        }
    }

    /// Whether this kind must be acknowledged by the receiver.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            Self::Reliable { .. } | Self::Hello { .. } | Self::Ping { .. }
        )
    }

    /// The nonce of a reliable packet.
    pub fn nonce(&self) -> Option<u16> {
        match self {
            Self::Reliable { nonce, .. } | Self::Hello { nonce, .. } | Self::Ping { nonce } => {
                Some(*nonce)
            }
            _ => None,
        }
    }

    /// Renumbers a reliable packet. No effect on other kinds.
    pub fn set_nonce(&mut self, value: u16) {
        match self {
            Self::Reliable { nonce, .. } | Self::Hello { nonce, .. } | Self::Ping { nonce } => {
                *nonce = value
            }
            _ => {}
        }
    }

    /// Payloads carried by a Reliable or Unreliable packet.
    pub fn payloads(&self) -> &[Payload] {
        match self {
            Self::Reliable { payloads, .. } | Self::Unreliable { payloads } => payloads,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload ids.
pub mod payload_id {
    pub const JOIN_GAME: u8 = 1;
    pub const START_GAME: u8 = 2;
    pub const REMOVE_PLAYER: u8 = 4;
    pub const GAME_DATA: u8 = 5;
    pub const GAME_DATA_TO: u8 = 6;
    pub const JOINED_GAME: u8 = 7;
    pub const END_GAME: u8 = 8;
    pub const KICK_PLAYER: u8 = 11;
    pub const REDIRECT: u8 = 13;
    pub const GET_GAME_LIST_V2: u8 = 16;
}

/// A sub-message of a Reliable or Unreliable packet.
///
/// Variants documented as one-directional only compose in that direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Server-bound join request.
    JoinGame { code: RoomCode, map_ownership: u8 },
    /// Client-bound: someone (possibly us) joined the game.
    PlayerJoined {
        code: RoomCode,
        client_id: ClientId,
        host_id: ClientId,
    },
    /// Client-bound: the join request was refused.
    JoinError {
        reason: DisconnectReason,
        message: Option<String>,
    },
    StartGame { code: RoomCode },
    /// Server-bound: ask the server to remove a player.
    RemovePlayer {
        code: RoomCode,
        client_id: ClientId,
        reason: DisconnectReason,
    },
    /// Client-bound: a player left.
    PlayerRemoved {
        code: RoomCode,
        client_id: ClientId,
        host_id: ClientId,
        reason: DisconnectReason,
    },
    GameData { code: RoomCode, parts: Vec<Part> },
    GameDataTo {
        code: RoomCode,
        recipient: ClientId,
        parts: Vec<Part>,
    },
    /// Client-bound: we are now in the game.
    JoinedGame {
        code: RoomCode,
        client_id: ClientId,
        host_id: ClientId,
        others: Vec<ClientId>,
    },
    EndGame {
        code: RoomCode,
        reason: u8,
        show_ad: bool,
    },
    KickPlayer {
        code: RoomCode,
        client_id: ClientId,
        banned: bool,
    },
    /// Client-bound: reconnect elsewhere.
    Redirect { addr: SocketAddrV4 },
    /// Server-bound game-list query.
    GetGameList(GameListQuery),
    /// Client-bound game-list response.
    GameList { listings: Vec<GameListing> },
    /// Any id this crate does not model, kept byte-for-byte.
    Unknown { id: u8, data: Vec<u8> },
}

impl Payload {
    pub fn id(&self) -> u8 {
        use payload_id::*;
        match self {
            Self::JoinGame { .. } | Self::PlayerJoined { .. } | Self::JoinError { .. } => {
                JOIN_GAME
            }
            Self::StartGame { .. } => START_GAME,
            Self::RemovePlayer { .. } | Self::PlayerRemoved { .. } => REMOVE_PLAYER,
            Self::GameData { .. } => GAME_DATA,
            Self::GameDataTo { .. } => GAME_DATA_TO,
            Self::JoinedGame { .. } => JOINED_GAME,
            Self::EndGame { .. } => END_GAME,
            Self::KickPlayer { .. } => KICK_PLAYER,
            Self::Redirect { .. } => REDIRECT,
            Self::GetGameList(_) | Self::GameList { .. } => GET_GAME_LIST_V2,
            Self::Unknown { id, .. } => *id,
        }
    }

    /// The room code a payload is scoped to, if any.
    pub fn code(&self) -> Option<RoomCode> {
        match self {
            Self::JoinGame { code, .. }
            | Self::PlayerJoined { code, .. }
            | Self::StartGame { code }
            | Self::RemovePlayer { code, .. }
            | Self::PlayerRemoved { code, .. }
            | Self::GameData { code, .. }
            | Self::GameDataTo { code, .. }
            | Self::JoinedGame { code, .. }
            | Self::EndGame { code, .. }
            | Self::KickPlayer { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Filters for a game-list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameListQuery {
    /// Bitmask with bit `n` set for map id `n`.
    pub maps: u8,
    /// Number of impostors, 0 for any.
    pub impostors: u8,
    pub language: u32,
}

impl GameListQuery {
    pub const ANY_LANGUAGE: u32 = 0;

    pub fn new(maps: &[MapId]) -> Self {
        Self {
            maps: MapId::mask(maps),
            impostors: 0,
            language: Self::ANY_LANGUAGE,
        }
    }

    pub fn impostors(mut self, impostors: u8) -> Self {
        self.impostors = impostors;
        self
    }

    pub fn language(mut self, language: u32) -> Self {
        self.language = language;
        self
    }
}

impl Default for GameListQuery {
    fn default() -> Self {
        Self::new(&[MapId::TheSkeld, MapId::MiraHq, MapId::Polus])
    }
}

/// One public game returned by a game-list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameListing {
    pub addr: SocketAddrV4,
    pub code: RoomCode,
    pub host_name: String,
    pub players: u8,
    /// Seconds since the game was created.
    pub age: u32,
    pub map: u8,
    pub impostors: u8,
    pub max_players: u8,
}

impl GameListing {
    pub fn map_id(&self) -> Option<MapId> {
        MapId::from_id(self.map)
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let ip = r.bytes(4)?;
        let ip = std::net::Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
        let port = r.u16()?;
        Ok(Self {
            addr: SocketAddrV4::new(ip, port),
            code: RoomCode(r.i32()?),
            host_name: r.string()?,
            players: r.u8()?,
            age: r.packed()?,
            map: r.u8()?,
            impostors: r.u8()?,
            max_players: r.u8()?,
        })
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.bytes(&self.addr.ip().octets())
            .u16(self.addr.port())
            .i32(self.code.as_i32())
            .string(&self.host_name)
            .u8(self.players)
            .packed(self.age)
            .u8(self.map)
            .u8(self.impostors)
            .u8(self.max_players);
    }
}

// ---------------------------------------------------------------------------
// Game-data parts
// ---------------------------------------------------------------------------

/// Part tags.
pub mod part_tag {
    pub const DATA: u8 = 1;
    pub const RPC: u8 = 2;
    pub const SPAWN: u8 = 4;
    pub const DESPAWN: u8 = 5;
    pub const SCENE_CHANGE: u8 = 6;
    pub const READY: u8 = 7;
}

/// A sub-message of a GameData or GameDataTo payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Incremental state for one component.
    Data { net_id: NetId, data: Vec<u8> },
    Rpc { net_id: NetId, rpc: Rpc },
    Spawn(Spawn),
    Despawn { net_id: NetId },
    SceneChange { client_id: ClientId, scene: String },
    Ready { client_id: ClientId },
    Unknown { tag: u8, data: Vec<u8> },
}

/// A composite object creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    pub spawn_type: SpawnType,
    /// Owning client id, `-1` for server-owned objects.
    pub owner: i32,
    pub flags: u8,
    pub components: Vec<SpawnedComponent>,
}

/// One `(net id, initial state)` record of a Spawn part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedComponent {
    pub net_id: NetId,
    pub data: Vec<u8>,
}

impl Part {
    pub fn tag(&self) -> u8 {
        use part_tag::*;
        match self {
            Self::Data { .. } => DATA,
            Self::Rpc { .. } => RPC,
            Self::Spawn(_) => SPAWN,
            Self::Despawn { .. } => DESPAWN,
            Self::SceneChange { .. } => SCENE_CHANGE,
            Self::Ready { .. } => READY,
            Self::Unknown { tag, .. } => *tag,
        }
    }

    /// Reads one framed part.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let (tag, mut body) = r.framed()?;
        let part = match tag {
            part_tag::DATA => Self::Data {
                net_id: NetId(body.packed()?),
                data: body.rest().to_vec(),
            },
            part_tag::RPC => {
                let net_id = NetId(body.packed()?);
                let id = body.u8()?;
                Self::Rpc {
                    net_id,
                    rpc: Rpc::read(id, &mut body)?,
                }
            }
            part_tag::SPAWN => Self::Spawn(Spawn::read(&mut body)?),
            part_tag::DESPAWN => Self::Despawn {
                net_id: NetId(body.packed()?),
            },
            part_tag::SCENE_CHANGE => Self::SceneChange {
                client_id: ClientId(body.packed()?),
                scene: body.string()?,
            },
            part_tag::READY => Self::Ready {
                client_id: ClientId(body.packed()?),
            },
            other => Self::Unknown {
                tag: other,
                data: body.rest().to_vec(),
            },
        };
        if !body.is_empty() {
            tracing::trace!(tag, skipped = body.remaining(), "part has trailing bytes");
        }
        Ok(part)
    }

    /// Writes the part with its frame.
    pub fn write(&self, w: &mut Writer) {
        w.write_framed(self.tag(), |body| match self {
            Self::Data { net_id, data } => {
                body.packed(net_id.0).bytes(data);
            }
            Self::Rpc { net_id, rpc } => {
                body.packed(net_id.0).u8(rpc.id());
                rpc.write_args(body);
            }
            Self::Spawn(spawn) => spawn.write(body),
            Self::Despawn { net_id } => {
                body.packed(net_id.0);
            }
            Self::SceneChange { client_id, scene } => {
                body.packed(client_id.0).string(scene);
            }
            Self::Ready { client_id } => {
                body.packed(client_id.0);
            }
            Self::Unknown { data, .. } => {
                body.bytes(data);
            }
        });
    }

    /// Reads parts until the reader is exhausted.
    pub fn read_all(r: &mut Reader<'_>) -> Result<Vec<Self>, ProtocolError> {
        let mut parts = Vec::new();
        while !r.is_empty() {
            parts.push(Self::read(r)?);
        }
        Ok(parts)
    }
}

impl Spawn {
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let spawn_type = SpawnType::from_id(r.packed()?);
        let owner = r.packed_i32()?;
        let flags = r.u8()?;
        let count = r.packed()?;
        let mut components = Vec::new();
        for _ in 0..count {
            let net_id = NetId(r.packed()?);
            let len = r.packed()? as usize;
            components.push(SpawnedComponent {
                net_id,
                data: r.bytes(len)?.to_vec(),
            });
        }
        Ok(Self {
            spawn_type,
            owner,
            flags,
            components,
        })
    }

    fn write(&self, w: &mut Writer) {
        w.packed(self.spawn_type.id())
            .packed_i32(self.owner)
            .u8(self.flags)
            .packed(self.components.len() as u32);
        for component in &self.components {
            w.packed(component.net_id.0)
                .packed(component.data.len() as u32)
                .bytes(&component.data);
        }
    }
}

// ---------------------------------------------------------------------------
// RPCs
// ---------------------------------------------------------------------------

/// RPC ids.
pub mod rpc_id {
    pub const COMPLETE_TASK: u8 = 1;
    pub const SET_INFECTED: u8 = 3;
    pub const EXILED: u8 = 4;
    pub const CHECK_NAME: u8 = 5;
    pub const SET_NAME: u8 = 6;
    pub const CHECK_COLOR: u8 = 7;
    pub const SET_COLOR: u8 = 8;
    pub const SET_HAT: u8 = 9;
    pub const SET_SKIN: u8 = 10;
    pub const REPORT_DEAD_BODY: u8 = 11;
    pub const MURDER_PLAYER: u8 = 12;
    pub const SEND_CHAT: u8 = 13;
    pub const START_MEETING: u8 = 14;
    pub const SET_PET: u8 = 17;
    pub const SET_START_COUNTER: u8 = 18;
    pub const ENTER_VENT: u8 = 19;
    pub const EXIT_VENT: u8 = 20;
    pub const SNAP_TO: u8 = 21;
    pub const VOTING_COMPLETE: u8 = 23;
    pub const CAST_VOTE: u8 = 24;
    pub const SET_TASKS: u8 = 29;
    pub const UPDATE_GAME_DATA: u8 = 30;
}

/// Player id byte meaning "nobody".
const NO_PLAYER: u8 = 0xff;

fn optional_player(raw: u8) -> Option<PlayerId> {
    (raw != NO_PLAYER).then_some(PlayerId(raw))
}

fn optional_player_byte(player: Option<PlayerId>) -> u8 {
    player.map_or(NO_PLAYER, |p| p.0)
}

/// A remote procedure call addressed to a component.
#[derive(Debug, Clone, PartialEq)]
pub enum Rpc {
    CompleteTask { index: u32 },
    SetInfected { impostors: Vec<PlayerId> },
    Exiled,
    CheckName { name: String },
    SetName { name: String },
    CheckColor { color: u8 },
    SetColor { color: u8 },
    SetHat { hat: u32 },
    SetSkin { skin: u32 },
    /// `None` is the emergency button.
    ReportDeadBody { target: Option<PlayerId> },
    MurderPlayer { victim: NetId },
    SendChat { message: String },
    /// `None` is the emergency button.
    StartMeeting { target: Option<PlayerId> },
    SetPet { pet: u32 },
    SetStartCounter { sequence: u32, seconds: i8 },
    EnterVent { vent: u32 },
    ExitVent { vent: u32 },
    SnapTo { position: Vector2 },
    VotingComplete {
        states: Vec<u8>,
        /// `None` when the vote was skipped.
        exiled: Option<PlayerId>,
        tie: bool,
    },
    CastVote { voter: PlayerId, suspect: PlayerId },
    SetTasks { player: PlayerId, tasks: Vec<u8> },
    UpdateGameData { players: Vec<PlayerRecord> },
    Unknown { id: u8, data: Vec<u8> },
}

impl Rpc {
    pub fn id(&self) -> u8 {
        use rpc_id::*;
        match self {
            Self::CompleteTask { .. } => COMPLETE_TASK,
            Self::SetInfected { .. } => SET_INFECTED,
            Self::Exiled => EXILED,
            Self::CheckName { .. } => CHECK_NAME,
            Self::SetName { .. } => SET_NAME,
            Self::CheckColor { .. } => CHECK_COLOR,
            Self::SetColor { .. } => SET_COLOR,
            Self::SetHat { .. } => SET_HAT,
            Self::SetSkin { .. } => SET_SKIN,
            Self::ReportDeadBody { .. } => REPORT_DEAD_BODY,
            Self::MurderPlayer { .. } => MURDER_PLAYER,
            Self::SendChat { .. } => SEND_CHAT,
            Self::StartMeeting { .. } => START_MEETING,
            Self::SetPet { .. } => SET_PET,
            Self::SetStartCounter { .. } => SET_START_COUNTER,
            Self::EnterVent { .. } => ENTER_VENT,
            Self::ExitVent { .. } => EXIT_VENT,
            Self::SnapTo { .. } => SNAP_TO,
            Self::VotingComplete { .. } => VOTING_COMPLETE,
            Self::CastVote { .. } => CAST_VOTE,
            Self::SetTasks { .. } => SET_TASKS,
            Self::UpdateGameData { .. } => UPDATE_GAME_DATA,
            Self::Unknown { id, .. } => *id,
        }
    }

    /// Reads the arguments of RPC `id`. Bytes past the known arguments are
    /// left unread in `r`.
    pub fn read(id: u8, r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        use rpc_id::*;
        let rpc = match id {
            COMPLETE_TASK => Self::CompleteTask { index: r.packed()? },
            SET_INFECTED => {
                let count = r.packed()?;
                let impostors = (0..count)
                    .map(|_| r.u8().map(PlayerId))
                    .collect::<Result<_, _>>()?;
                Self::SetInfected { impostors }
            }
            EXILED => Self::Exiled,
            CHECK_NAME => Self::CheckName { name: r.string()? },
            SET_NAME => Self::SetName { name: r.string()? },
            CHECK_COLOR => Self::CheckColor { color: r.u8()? },
            SET_COLOR => Self::SetColor { color: r.u8()? },
            SET_HAT => Self::SetHat { hat: r.packed()? },
            SET_SKIN => Self::SetSkin { skin: r.packed()? },
            REPORT_DEAD_BODY => Self::ReportDeadBody {
                target: optional_player(r.u8()?),
            },
            MURDER_PLAYER => Self::MurderPlayer {
                victim: NetId(r.packed()?),
            },
            SEND_CHAT => Self::SendChat {
                message: r.string()?,
            },
            START_MEETING => Self::StartMeeting {
                target: optional_player(r.u8()?),
            },
            SET_PET => Self::SetPet { pet: r.packed()? },
            SET_START_COUNTER => Self::SetStartCounter {
                sequence: r.packed()?,
                seconds: r.i8()?,
            },
            ENTER_VENT => Self::EnterVent { vent: r.packed()? },
            EXIT_VENT => Self::ExitVent { vent: r.packed()? },
            SNAP_TO => Self::SnapTo {
                position: r.vector2()?,
            },
            VOTING_COMPLETE => {
                let count = r.packed()? as usize;
                let states = r.bytes(count)?.to_vec();
                let exiled = optional_player(r.u8()?);
                let tie = r.bool()?;
                Self::VotingComplete {
                    states,
                    exiled,
                    tie,
                }
            }
            CAST_VOTE => Self::CastVote {
                voter: PlayerId(r.u8()?),
                suspect: PlayerId(r.u8()?),
            },
            SET_TASKS => {
                let player = PlayerId(r.u8()?);
                let count = r.packed()? as usize;
                let tasks = r.bytes(count)?.to_vec();
                Self::SetTasks { player, tasks }
            }
            UPDATE_GAME_DATA => Self::UpdateGameData {
                players: PlayerRecord::read_list(r)?,
            },
            other => Self::Unknown {
                id: other,
                data: r.rest().to_vec(),
            },
        };
        Ok(rpc)
    }

    /// Writes the arguments only; the caller writes the id.
    pub fn write_args(&self, w: &mut Writer) {
        match self {
            Self::CompleteTask { index } => {
                w.packed(*index);
            }
            Self::SetInfected { impostors } => {
                w.packed(impostors.len() as u32);
                for player in impostors {
                    w.u8(player.0);
                }
            }
            Self::Exiled => {}
            Self::CheckName { name } | Self::SetName { name } => {
                w.string(name);
            }
            Self::CheckColor { color } | Self::SetColor { color } => {
                w.u8(*color);
            }
            Self::SetHat { hat: value }
            | Self::SetSkin { skin: value }
            | Self::SetPet { pet: value }
            | Self::EnterVent { vent: value }
            | Self::ExitVent { vent: value } => {
                w.packed(*value);
            }
            Self::ReportDeadBody { target } | Self::StartMeeting { target } => {
                w.u8(optional_player_byte(*target));
            }
            Self::MurderPlayer { victim } => {
                w.packed(victim.0);
            }
            Self::SendChat { message } => {
                w.string(message);
            }
            Self::SetStartCounter { sequence, seconds } => {
                w.packed(*sequence).i8(*seconds);
            }
            Self::SnapTo { position } => {
                w.vector2(*position);
            }
            Self::VotingComplete {
                states,
                exiled,
                tie,
            } => {
                w.packed(states.len() as u32)
                    .bytes(states)
                    .u8(optional_player_byte(*exiled))
                    .bool(*tie);
            }
            Self::CastVote { voter, suspect } => {
                w.u8(voter.0).u8(suspect.0);
            }
            Self::SetTasks { player, tasks } => {
                w.u8(player.0).packed(tasks.len() as u32).bytes(tasks);
            }
            Self::UpdateGameData { players } => PlayerRecord::write_list(players, w),
            Self::Unknown { data, .. } => {
                w.bytes(data);
            }
        }
    }
}

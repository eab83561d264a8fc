//! Scalar protocol types: ids, room codes, enumerations and small records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::buffer::{Reader, Writer};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which side a packet is travelling towards.
///
/// Some payloads share an id but have different bodies depending on
/// direction, so both parsing and composing need to know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bound {
    /// Server to client.
    Client,
    /// Client to server.
    Server,
}

impl Bound {
    /// The direction of a reply.
    pub fn opposite(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client-bound"),
            Self::Server => f.write_str("server-bound"),
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// A participant's connection id, assigned by the server.
    ClientId(u32)
);
id_type!(
    /// Identifies one live component inside a game.
    NetId(u32)
);
id_type!(
    /// A player's slot in the game data table.
    PlayerId(u8)
);

// ---------------------------------------------------------------------------
// Room codes
// ---------------------------------------------------------------------------

const V2_ALPHABET: &[u8; 26] = b"QWXRTYLPESDFGHUJKZOCVBINMA";
const V2_MAP: [u32; 26] = [
    25, 21, 19, 10, 8, 11, 12, 13, 22, 15, 16, 6, 24, 23, 18, 7, 0, 3, 9, 4, 14,
    20, 1, 2, 5, 17,
];

/// A game's room code as carried on the wire.
///
/// Two textual forms exist. Old four-letter codes are the ASCII bytes read
/// as a little-endian `i32`. Six-letter codes pack into the low 31 bits and
/// always set the sign bit, which is how the two are told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomCode(pub i32);

impl RoomCode {
    pub fn as_i32(self) -> i32 {
        self.0
    }

    fn v1_text(self) -> Option<String> {
        let bytes = self.0.to_le_bytes();
        bytes
            .iter()
            .all(u8::is_ascii_uppercase)
            .then(|| bytes.iter().map(|&b| char::from(b)).collect())
    }

    fn v2_text(self) -> String {
        let code = self.0 as u32;
        let a = code & 0x3ff;
        let b = (code >> 10) & 0xfffff;
        [a % 26, a / 26, b % 26, b / 26 % 26, b / 676 % 26, b / 17576 % 26]
            .iter()
            .map(|&i| char::from(V2_ALPHABET[i as usize]))
            .collect()
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            return f.write_str(&self.v2_text());
        }
        match self.v1_text() {
            Some(text) => f.write_str(&text),
            None => write!(f, "#{}", self.0),
        }
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(ProtocolError::InvalidRoomCode(s.to_owned()));
        }
        match bytes.len() {
            4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                Ok(Self(i32::from_le_bytes(raw)))
            }
            6 => {
                let d: Vec<u32> = bytes
                    .iter()
                    .map(|&c| V2_MAP[usize::from(c - b'A')])
                    .collect();
                let one = (d[0] + 26 * d[1]) & 0x3ff;
                let two = d[2] + 26 * (d[3] + 26 * (d[4] + 26 * d[5]));
                let code = one | ((two << 10) & 0x3fff_fc00) | 0x8000_0000;
                Ok(Self(code as i32))
            }
            _ => Err(ProtocolError::InvalidRoomCode(s.to_owned())),
        }
    }
}

impl From<i32> for RoomCode {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// The integer game version sent in the Hello handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientVersion(pub i32);

impl ClientVersion {
    /// Encodes a release date and revision the way the game does.
    pub const fn new(year: i32, month: i32, day: i32, revision: i32) -> Self {
        Self(year * 25000 + month * 1800 + day * 50 + revision)
    }
}

impl Default for ClientVersion {
    fn default() -> Self {
        Self::new(2020, 9, 7, 0)
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// The playable maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapId {
    TheSkeld,
    MiraHq,
    Polus,
}

impl MapId {
    pub fn id(self) -> u8 {
        match self {
            Self::TheSkeld => 0,
            Self::MiraHq => 1,
            Self::Polus => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::TheSkeld),
            1 => Some(Self::MiraHq),
            2 => Some(Self::Polus),
            _ => None,
        }
    }

    /// Bit for this map in a game-list filter.
    pub fn bit(self) -> u8 {
        1 << self.id()
    }

    /// Combines maps into a filter bitmask.
    pub fn mask(maps: &[MapId]) -> u8 {
        maps.iter().fold(0, |acc, map| acc | map.bit())
    }
}

/// Why a connection ended or a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisconnectReason {
    ExitGame,
    GameFull,
    GameStarted,
    GameNotFound,
    IncorrectVersion,
    Banned,
    Kicked,
    Custom,
    InvalidName,
    Hacking,
    Destroy,
    Error,
    IncorrectGame,
    ServerRequest,
    ServerFull,
    FocusLostBackground,
    IntentionalLeaving,
    FocusLost,
    NewConnection,
    Unknown(u8),
}

impl DisconnectReason {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Self::ExitGame,
            1 => Self::GameFull,
            2 => Self::GameStarted,
            3 => Self::GameNotFound,
            5 => Self::IncorrectVersion,
            6 => Self::Banned,
            7 => Self::Kicked,
            8 => Self::Custom,
            9 => Self::InvalidName,
            10 => Self::Hacking,
            16 => Self::Destroy,
            17 => Self::Error,
            18 => Self::IncorrectGame,
            19 => Self::ServerRequest,
            20 => Self::ServerFull,
            207 => Self::FocusLostBackground,
            208 => Self::IntentionalLeaving,
            209 => Self::FocusLost,
            210 => Self::NewConnection,
            other => Self::Unknown(other),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::ExitGame => 0,
            Self::GameFull => 1,
            Self::GameStarted => 2,
            Self::GameNotFound => 3,
            Self::IncorrectVersion => 5,
            Self::Banned => 6,
            Self::Kicked => 7,
            Self::Custom => 8,
            Self::InvalidName => 9,
            Self::Hacking => 10,
            Self::Destroy => 16,
            Self::Error => 17,
            Self::IncorrectGame => 18,
            Self::ServerRequest => 19,
            Self::ServerFull => 20,
            Self::FocusLostBackground => 207,
            Self::IntentionalLeaving => 208,
            Self::FocusLost => 209,
            Self::NewConnection => 210,
            Self::Unknown(id) => id,
        }
    }

    /// The text the game shows for this reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::ExitGame => "You left the game.",
            Self::GameFull => {
                "The game you tried to join is full. Check with the host to see if you can join next round."
            }
            Self::GameStarted => {
                "The game you tried to join already started. Check with the host to see if you can join next round."
            }
            Self::GameNotFound | Self::IncorrectGame => {
                "Could not find the game you're looking for."
            }
            Self::IncorrectVersion => {
                "You are running an older version of the game. Please update to play with others."
            }
            Self::Banned => "You were banned from the room. You cannot join this room again.",
            Self::Kicked => "You were kicked from the room.",
            Self::Custom => "Custom disconnect.",
            Self::InvalidName => "Server refused username.",
            Self::Hacking => "You were banned for hacking. Please stop.",
            Self::Destroy => "The game was closed.",
            Self::Error => "You disconnected from the server.",
            Self::ServerRequest => {
                "The server stopped this game. Possibly due to inactivity."
            }
            Self::ServerFull => "The servers are overloaded. Please try again later.",
            Self::FocusLostBackground => "You lost focus and were disconnected.",
            Self::IntentionalLeaving => "You left the game.",
            Self::FocusLost => "You lost focus and were disconnected.",
            Self::NewConnection => "You connected from another device.",
            Self::Unknown(_) => "Unknown disconnect reason.",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.id())
    }
}

/// Which composite object a Spawn part creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpawnType {
    ShipStatus,
    MeetingHub,
    LobbyBehaviour,
    GameData,
    Player,
    HeadQuarters,
    PlanetMap,
    AprilShipStatus,
    Unknown(u32),
}

impl SpawnType {
    pub fn from_id(id: u32) -> Self {
        match id {
            0 => Self::ShipStatus,
            1 => Self::MeetingHub,
            2 => Self::LobbyBehaviour,
            3 => Self::GameData,
            4 => Self::Player,
            5 => Self::HeadQuarters,
            6 => Self::PlanetMap,
            7 => Self::AprilShipStatus,
            other => Self::Unknown(other),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Self::ShipStatus => 0,
            Self::MeetingHub => 1,
            Self::LobbyBehaviour => 2,
            Self::GameData => 3,
            Self::Player => 4,
            Self::HeadQuarters => 5,
            Self::PlanetMap => 6,
            Self::AprilShipStatus => 7,
            Self::Unknown(id) => id,
        }
    }
}

// ---------------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------------

const LERP_MIN: f32 = -40.0;
const LERP_MAX: f32 = 40.0;

/// A position or velocity. On the wire each axis is a `u16` spread evenly
/// over `[-40, 40]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn from_lerped(x: u16, y: u16) -> Self {
        Self {
            x: unlerp(x),
            y: unlerp(y),
        }
    }

    pub fn to_lerped(self) -> (u16, u16) {
        (lerp(self.x), lerp(self.y))
    }
}

fn unlerp(raw: u16) -> f32 {
    LERP_MIN + (f32::from(raw) / f32::from(u16::MAX)) * (LERP_MAX - LERP_MIN)
}

fn lerp(value: f32) -> u16 {
    let clamped = value.clamp(LERP_MIN, LERP_MAX);
    let t = (clamped - LERP_MIN) / (LERP_MAX - LERP_MIN);
    (t * f32::from(u16::MAX)).round() as u16
}

// ---------------------------------------------------------------------------
// Player records
// ---------------------------------------------------------------------------

/// One task on a player's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub id: u32,
    pub completed: bool,
}

/// A row of the shared game data table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlayerRecord {
    pub player_id: PlayerId,
    pub name: String,
    pub color: u8,
    pub hat: u32,
    pub pet: u32,
    pub skin: u32,
    pub flags: u8,
    pub tasks: Vec<TaskState>,
}

impl PlayerRecord {
    pub const DISCONNECTED: u8 = 0x01;
    pub const IMPOSTOR: u8 = 0x02;
    pub const DEAD: u8 = 0x04;

    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            ..Self::default()
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.flags & Self::DISCONNECTED != 0
    }

    pub fn is_impostor(&self) -> bool {
        self.flags & Self::IMPOSTOR != 0
    }

    pub fn is_dead(&self) -> bool {
        self.flags & Self::DEAD != 0
    }

    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let player_id = PlayerId(r.u8()?);
        let name = r.string()?;
        let color = r.u8()?;
        let hat = r.packed()?;
        let pet = r.packed()?;
        let skin = r.packed()?;
        let flags = r.u8()?;
        let count = r.u8()?;
        let mut tasks = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            tasks.push(TaskState {
                id: r.packed()?,
                completed: r.bool()?,
            });
        }
        Ok(Self {
            player_id,
            name,
            color,
            hat,
            pet,
            skin,
            flags,
            tasks,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.u8(self.player_id.0)
            .string(&self.name)
            .u8(self.color)
            .packed(self.hat)
            .packed(self.pet)
            .packed(self.skin)
            .u8(self.flags);
        // The task count is a single byte; anything past 255 is not sent.
        let tasks = &self.tasks[..self.tasks.len().min(usize::from(u8::MAX))];
        w.u8(u8::try_from(tasks.len()).unwrap_or(u8::MAX));
        for task in tasks {
            w.packed(task.id).bool(task.completed);
        }
    }

    /// Reads `[packed count]([u16 len][record])*`. The length counts the
    /// record's bytes after the player id.
    pub fn read_list(r: &mut Reader<'_>) -> Result<Vec<Self>, ProtocolError> {
        let count = r.packed()?;
        let mut records = Vec::new();
        for _ in 0..count {
            let len = usize::from(r.u16()?);
            let mut body = r.sub_reader(len + 1)?;
            records.push(Self::read(&mut body)?);
        }
        Ok(records)
    }

    pub fn write_list(records: &[Self], w: &mut Writer) {
        w.packed(u32::try_from(records.len()).unwrap_or(u32::MAX));
        for record in records {
            let mut body = Writer::new();
            record.write(&mut body);
            // Records are far below 64 KiB: a name string plus a byte per task.
            let len = u16::try_from(body.len() - 1).unwrap_or(u16::MAX);
            w.u16(len).bytes(body.as_bytes());
        }
    }
}

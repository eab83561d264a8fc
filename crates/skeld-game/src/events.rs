//! Events emitted as the replicated game changes.
//!
//! Every event names the entity it concerns through an [`EventTarget`], so
//! an observer can subscribe to one player or one component instead of the
//! whole stream.

use serde::Serialize;
use skeld_protocol::{ClientId, DisconnectReason, NetId, PlayerId, RoomCode, SpawnType, Vector2};

use crate::objects::ObjectId;

/// The entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventTarget {
    Game,
    Member(ClientId),
    Player(PlayerId),
    Component(NetId),
}

/// The result of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoteOutcome {
    Tie,
    Skipped,
    Exiled(PlayerId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventKind {
    // Membership
    GameJoined { code: RoomCode },
    MemberJoined,
    MemberLeft { reason: DisconnectReason },
    Kicked { banned: bool },
    HostChanged { host_id: ClientId },
    GameStarted,
    GameEnded { reason: u8 },

    // Objects
    Spawned { object: ObjectId, spawn_type: SpawnType },
    Despawned,
    SceneChanged { scene: String },
    MemberReady,
    ComponentUpdated,

    // Movement
    Moved { position: Vector2, velocity: Vector2 },
    Snapped { position: Vector2 },

    // Play
    Murder { murderer: PlayerId, victim: PlayerId },
    Murdered { by: PlayerId },
    MurderedSomeone { victim: PlayerId },
    /// `None` is the emergency button.
    MeetingStarted { target: Option<PlayerId> },
    BodyReported { target: Option<PlayerId> },
    VotingComplete(VoteOutcome),
    /// `None` is a skip vote.
    VoteCast { suspect: Option<PlayerId> },
    StartCounter { seconds: i8 },
    ImpostorsSet { impostors: Vec<PlayerId> },
    TasksSet { tasks: Vec<u8> },
    TaskCompleted { index: u32 },
    Chat { message: String },
    EnteredVent { vent: u32 },
    ExitedVent { vent: u32 },
    Exiled,

    // Cosmetics
    NameChanged { name: String },
    ColorChanged { color: u8 },
    HatChanged { hat: u32 },
    SkinChanged { skin: u32 },
    PetChanged { pet: u32 },
    RecordUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameEvent {
    pub target: EventTarget,
    pub kind: EventKind,
}

impl GameEvent {
    pub fn new(target: EventTarget, kind: EventKind) -> Self {
        Self { target, kind }
    }

    pub fn game(kind: EventKind) -> Self {
        Self::new(EventTarget::Game, kind)
    }

    pub fn member(client_id: ClientId, kind: EventKind) -> Self {
        Self::new(EventTarget::Member(client_id), kind)
    }

    pub fn player(player_id: PlayerId, kind: EventKind) -> Self {
        Self::new(EventTarget::Player(player_id), kind)
    }

    pub fn component(net_id: NetId, kind: EventKind) -> Self {
        Self::new(EventTarget::Component(net_id), kind)
    }
}

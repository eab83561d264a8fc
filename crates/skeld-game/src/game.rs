//! The joined game: membership, the component registry and the domain
//! views built on top of it.
//!
//! `Game` is plain data. It is mutated by [`Replica`](crate::Replica) as
//! payloads arrive and by the local mutators (`local_move` and friends),
//! which return the [`Part`] the caller must send. Nothing here does I/O.

use std::collections::BTreeMap;

use serde::Serialize;
use skeld_protocol::{
    ClientId, NetId, Part, PlayerId, PlayerRecord, RoomCode, Rpc, Spawn, SpawnType, TaskState,
    Vector2,
};
use tracing::{debug, trace};

use crate::components::{
    Applied, Component, ComponentKind, GameDataTable, LobbyBehaviour, MeetingHud, ShipStatus,
};
use crate::events::{EventKind, GameEvent};
use crate::objects::{GameObject, ObjectId};
use crate::registry::{Registry, Spawned};
use crate::{rpc, GameError};

/// A participant in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub client_id: ClientId,
    /// The member's player object, once spawned.
    pub player: Option<ObjectId>,
}

/// The last applied start countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartCounter {
    pub sequence: u32,
    pub seconds: i8,
}

/// A resolved player: its object, control and table row, flattened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub object: ObjectId,
    pub owner: Option<ClientId>,
    /// Net id of the player's control component.
    pub net_id: NetId,
    pub name: Option<String>,
    pub color: Option<u8>,
    pub dead: bool,
    pub impostor: bool,
    pub tasks: Vec<TaskState>,
    pub position: Option<Vector2>,
}

#[derive(Debug, Clone)]
pub struct Game {
    code: RoomCode,
    client_id: ClientId,
    host_id: ClientId,
    started: bool,
    ended: Option<u8>,
    members: BTreeMap<ClientId, Member>,
    pub(crate) registry: Registry,
    pub(crate) start_counter: Option<StartCounter>,
    pub(crate) impostors: Vec<PlayerId>,
}

impl Game {
    /// A game as described by a JoinedGame payload. The local client is
    /// always a member.
    pub fn new(
        code: RoomCode,
        client_id: ClientId,
        host_id: ClientId,
        others: impl IntoIterator<Item = ClientId>,
    ) -> Self {
        let mut game = Self {
            code,
            client_id,
            host_id,
            started: false,
            ended: None,
            members: BTreeMap::new(),
            registry: Registry::new(),
            start_counter: None,
            impostors: Vec::new(),
        };
        game.add_member(client_id);
        for other in others {
            game.add_member(other);
        }
        game
    }

    // -----------------------------------------------------------------------
    // Session state
    // -----------------------------------------------------------------------

    pub fn code(&self) -> RoomCode {
        self.code
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn host_id(&self) -> ClientId {
        self.host_id
    }

    pub fn is_host(&self) -> bool {
        self.host_id == self.client_id
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// The EndGame reason, once the round is over.
    pub fn ended(&self) -> Option<u8> {
        self.ended
    }

    pub fn start_counter(&self) -> Option<StartCounter> {
        self.start_counter
    }

    pub fn impostor_ids(&self) -> &[PlayerId] {
        &self.impostors
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, client_id: ClientId) -> Option<&Member> {
        self.members.get(&client_id)
    }

    /// Returns `false` if the member was already present.
    pub(crate) fn add_member(&mut self, client_id: ClientId) -> bool {
        if self.members.contains_key(&client_id) {
            return false;
        }
        // Player objects can arrive before PlayerJoined.
        let player = self
            .registry
            .objects()
            .find(|o| o.spawn_type == SpawnType::Player && o.owner_client() == Some(client_id))
            .map(|o| o.id);
        self.members
            .insert(client_id, Member { client_id, player });
        true
    }

    pub(crate) fn remove_member(&mut self, client_id: ClientId) -> Option<Member> {
        self.members.remove(&client_id)
    }

    /// Returns `true` if the host changed.
    pub(crate) fn set_host(&mut self, host_id: ClientId) -> bool {
        std::mem::replace(&mut self.host_id, host_id) != host_id
    }

    pub(crate) fn start(&mut self) {
        self.started = true;
        self.ended = None;
    }

    pub(crate) fn end(&mut self, reason: u8) {
        self.started = false;
        self.ended = Some(reason);
        self.start_counter = None;
        self.impostors.clear();
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn component(&self, net_id: NetId) -> Option<&Component> {
        self.registry.get(net_id)
    }

    pub fn game_data(&self) -> Option<&GameDataTable> {
        self.registry
            .first_of(ComponentKind::GameData)
            .and_then(|(_, c)| c.as_game_data())
    }

    pub fn lobby(&self) -> Option<&LobbyBehaviour> {
        self.registry
            .first_of(ComponentKind::LobbyBehaviour)
            .and_then(|(_, c)| c.as_lobby())
    }

    pub fn meeting(&self) -> Option<&MeetingHud> {
        self.registry
            .first_of(ComponentKind::MeetingHud)
            .and_then(|(_, c)| c.as_meeting_hud())
    }

    pub fn ship_status(&self) -> Option<&ShipStatus> {
        self.registry
            .first_of(ComponentKind::ShipStatus)
            .and_then(|(_, c)| c.as_ship_status())
    }

    pub(crate) fn game_data_mut(&mut self) -> Option<&mut GameDataTable> {
        self.registry
            .first_of_mut(ComponentKind::GameData)
            .and_then(Component::as_game_data_mut)
    }

    // -----------------------------------------------------------------------
    // Players
    // -----------------------------------------------------------------------

    /// The player that owns the object `net_id` belongs to, found through
    /// the object's control component.
    pub fn player_id_of(&self, net_id: NetId) -> Option<PlayerId> {
        let object = self.registry.object_of(net_id)?;
        self.control_of(object.id).map(|(_, id)| id)
    }

    fn control_of(&self, object: ObjectId) -> Option<(NetId, PlayerId)> {
        let (net_id, component) = self.registry.sibling(object, ComponentKind::PlayerControl)?;
        component
            .as_player_control()
            .map(|control| (net_id, control.player_id))
    }

    /// The object of the player with this id.
    pub(crate) fn player_object(&self, player_id: PlayerId) -> Option<ObjectId> {
        self.registry
            .objects()
            .filter(|o| o.spawn_type == SpawnType::Player)
            .find(|o| self.control_of(o.id).map(|(_, id)| id) == Some(player_id))
            .map(|o| o.id)
    }

    fn view(&self, object: &GameObject) -> Option<PlayerView> {
        let (net_id, player_id) = self.control_of(object.id)?;
        let record: Option<&PlayerRecord> =
            self.game_data().and_then(|table| table.record(player_id));
        let position = self
            .registry
            .sibling(object.id, ComponentKind::CustomNetworkTransform)
            .and_then(|(_, c)| c.as_transform())
            .map(|t| t.position);
        Some(PlayerView {
            player_id,
            object: object.id,
            owner: object.owner_client(),
            net_id,
            name: record.map(|r| r.name.clone()),
            color: record.map(|r| r.color),
            dead: record.is_some_and(PlayerRecord::is_dead),
            impostor: record.is_some_and(PlayerRecord::is_impostor)
                || self.impostors.contains(&player_id),
            tasks: record.map(|r| r.tasks.clone()).unwrap_or_default(),
            position,
        })
    }

    /// Every spawned player, ordered by player id.
    pub fn players(&self) -> Vec<PlayerView> {
        let mut players: Vec<PlayerView> = self
            .registry
            .objects()
            .filter(|o| o.spawn_type == SpawnType::Player)
            .filter_map(|o| self.view(o))
            .collect();
        players.sort_by_key(|p| p.player_id);
        players
    }

    pub fn player(&self, player_id: PlayerId) -> Option<PlayerView> {
        let object = self.player_object(player_id)?;
        self.registry.object(object).and_then(|o| self.view(o))
    }

    pub fn player_by_net_id(&self, net_id: NetId) -> Option<PlayerView> {
        self.registry.object_of(net_id).and_then(|o| self.view(o))
    }

    /// The local player.
    pub fn me(&self) -> Option<PlayerView> {
        let object = self.local_object()?;
        self.registry.object(object).and_then(|o| self.view(o))
    }

    fn local_object(&self) -> Option<ObjectId> {
        let member = self.members.get(&self.client_id)?;
        member.player.filter(|id| self.registry.object(*id).is_some())
    }

    fn local_sibling(&self, kind: ComponentKind) -> Result<NetId, GameError> {
        let object = self.local_object().ok_or(GameError::NoLocalPlayer)?;
        self.registry
            .sibling(object, kind)
            .map(|(net_id, _)| net_id)
            .ok_or(GameError::NoLocalPlayer)
    }

    // -----------------------------------------------------------------------
    // Local mutators
    // -----------------------------------------------------------------------

    /// Moves the local player and returns the Data part to send.
    pub fn local_move(&mut self, position: Vector2, velocity: Vector2) -> Result<Part, GameError> {
        let net_id = self.local_sibling(ComponentKind::CustomNetworkTransform)?;
        let transform = self
            .registry
            .get_mut(net_id)
            .and_then(Component::as_transform_mut)
            .ok_or(GameError::UnknownComponent(net_id))?;
        let data = transform.advance(position, velocity);
        Ok(Part::Data { net_id, data })
    }

    /// Teleports the local player and returns the SnapTo part to send.
    pub fn local_snap(&mut self, position: Vector2) -> Result<Part, GameError> {
        let net_id = self.local_sibling(ComponentKind::CustomNetworkTransform)?;
        if let Some(transform) = self
            .registry
            .get_mut(net_id)
            .and_then(Component::as_transform_mut)
        {
            transform.snap(position);
        }
        Ok(Part::Rpc {
            net_id,
            rpc: Rpc::SnapTo { position },
        })
    }

    /// The SendChat part for the local player.
    pub fn local_chat(&self, message: impl Into<String>) -> Result<Part, GameError> {
        let net_id = self.local_sibling(ComponentKind::PlayerControl)?;
        Ok(Part::Rpc {
            net_id,
            rpc: Rpc::SendChat {
                message: message.into(),
            },
        })
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Applies one GameData part. Unknown ids and malformed blobs are
    /// dropped without effect.
    pub fn apply_part(&mut self, part: &Part) -> Vec<GameEvent> {
        match part {
            Part::Spawn(spawn) => self.apply_spawn(spawn),
            Part::Despawn { net_id } => self.apply_despawn(*net_id),
            Part::Data { net_id, data } => self.apply_data(*net_id, data),
            Part::Rpc { net_id, rpc } => rpc::dispatch(self, *net_id, rpc),
            Part::SceneChange { client_id, scene } => vec![GameEvent::member(
                *client_id,
                EventKind::SceneChanged {
                    scene: scene.clone(),
                },
            )],
            Part::Ready { client_id } => {
                vec![GameEvent::member(*client_id, EventKind::MemberReady)]
            }
            Part::Unknown { tag, .. } => {
                trace!(tag, "skipping unknown part");
                Vec::new()
            }
        }
    }

    fn apply_spawn(&mut self, spawn: &Spawn) -> Vec<GameEvent> {
        let Spawned { object, replaced } = match self.registry.spawn(spawn) {
            Ok(Some(spawned)) => spawned,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!(code = %self.code, spawn_type = ?spawn.spawn_type, error = %e, "dropping malformed spawn");
                return Vec::new();
            }
        };
        for gone in replaced {
            self.unlink_player(gone);
        }
        if spawn.spawn_type == SpawnType::Player {
            let owner = u32::try_from(spawn.owner).ok().map(ClientId);
            if let Some(member) = owner.and_then(|id| self.members.get_mut(&id)) {
                member.player = Some(object);
            }
        }
        vec![GameEvent::game(EventKind::Spawned {
            object,
            spawn_type: spawn.spawn_type,
        })]
    }

    fn apply_despawn(&mut self, net_id: NetId) -> Vec<GameEvent> {
        let Some(gone) = self.registry.despawn(net_id) else {
            debug!(%net_id, "despawn for unknown net id");
            return Vec::new();
        };
        if gone.emptied.is_some() {
            self.unlink_player(gone.object);
        }
        vec![GameEvent::component(net_id, EventKind::Despawned)]
    }

    /// Clears every member link to an object that no longer exists.
    fn unlink_player(&mut self, object: ObjectId) {
        for member in self.members.values_mut() {
            if member.player == Some(object) {
                member.player = None;
            }
        }
    }

    fn apply_data(&mut self, net_id: NetId, data: &[u8]) -> Vec<GameEvent> {
        match self.registry.data(net_id, data) {
            Ok(Some(Applied::Updated)) => {}
            Ok(Some(Applied::Stale)) => {
                trace!(%net_id, "stale update ignored");
                return Vec::new();
            }
            Ok(None) => {
                debug!(%net_id, "data for unknown net id");
                return Vec::new();
            }
            Err(e) => {
                debug!(%net_id, error = %e, "dropping malformed data");
                return Vec::new();
            }
        }
        let moved = self
            .registry
            .get(net_id)
            .and_then(Component::as_transform)
            .map(|t| (t.position, t.velocity));
        match (moved, self.player_id_of(net_id)) {
            (Some((position, velocity)), Some(player)) => {
                vec![GameEvent::player(player, EventKind::Moved { position, velocity })]
            }
            _ => vec![GameEvent::component(net_id, EventKind::ComponentUpdated)],
        }
    }
}

//! Network components: the replicated pieces of a game object.
//!
//! Every component is created from a spawn blob and then kept current by
//! Data parts addressed to its net id. Both paths go through
//! [`NetComponent::deserialize`], so a component has no "half spawned"
//! state: a blob either decodes completely and is applied, or it fails and
//! the component is untouched.
//!
//! The set of component kinds is closed. [`Component`] is the sealed enum
//! the registry stores, and [`ComponentKind`] is its tag, used by the spawn
//! layout table to decide which component to build for each child.

use std::collections::BTreeMap;

use serde::Serialize;
use skeld_protocol::{ClientId, PlayerId, PlayerRecord, ProtocolError, Reader, Vector2, Writer};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Whether an update changed the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// The blob decoded but was older than the current state.
    Stale,
}

/// A replicated component.
pub trait NetComponent {
    /// Applies a spawn or update blob.
    ///
    /// On error the component is left exactly as it was.
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError>;

    /// Encodes the full state in spawn form.
    fn serialize(&self) -> Vec<u8>;
}

// ---------------------------------------------------------------------------
// Player components
// ---------------------------------------------------------------------------

/// Binds a player object to its slot in the game data table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerControl {
    pub is_new: bool,
    pub player_id: PlayerId,
}

impl NetComponent for PlayerControl {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        let mut r = Reader::new(data);
        // Updates carry only the player id; spawns lead with the is_new flag.
        if data.len() == 1 {
            self.player_id = PlayerId(r.u8()?);
        } else {
            let is_new = r.bool()?;
            let player_id = PlayerId(r.u8()?);
            self.is_new = is_new;
            self.player_id = player_id;
        }
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(2);
        w.bool(self.is_new).u8(self.player_id.0);
        w.into_bytes()
    }
}

/// Carries vent and climb RPCs. No replicated state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerPhysics;

impl NetComponent for PlayerPhysics {
    fn deserialize(&mut self, _data: &[u8]) -> Result<Applied, ProtocolError> {
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// A player's position, velocity and the sequence number that orders
/// movement updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomNetworkTransform {
    pub sequence: u16,
    pub position: Vector2,
    pub velocity: Vector2,
    #[serde(skip)]
    synced: bool,
}

impl CustomNetworkTransform {
    /// Whether `sequence` is at or after the current one, comparing
    /// circularly so the counter may wrap.
    pub fn accepts(&self, sequence: u16) -> bool {
        !self.synced || (sequence.wrapping_sub(self.sequence) as i16) >= 0
    }

    /// Moves the transform as the owner and returns the update blob.
    pub fn advance(&mut self, position: Vector2, velocity: Vector2) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);
        self.position = position;
        self.velocity = velocity;
        self.synced = true;
        NetComponent::serialize(self)
    }

    /// Teleports without touching the sequence.
    pub fn snap(&mut self, position: Vector2) {
        self.position = position;
        self.velocity = Vector2::ZERO;
    }
}

impl NetComponent for CustomNetworkTransform {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        let mut r = Reader::new(data);
        let sequence = r.u16()?;
        let position = r.vector2()?;
        let velocity = r.vector2()?;
        if !self.accepts(sequence) {
            return Ok(Applied::Stale);
        }
        self.sequence = sequence;
        self.position = position;
        self.velocity = velocity;
        self.synced = true;
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(10);
        w.u16(self.sequence)
            .vector2(self.position)
            .vector2(self.velocity);
        w.into_bytes()
    }
}

// ---------------------------------------------------------------------------
// Shared game objects
// ---------------------------------------------------------------------------

/// The player table. Updates merge by player id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GameDataTable {
    pub players: BTreeMap<PlayerId, PlayerRecord>,
}

impl GameDataTable {
    pub fn record(&self, player: PlayerId) -> Option<&PlayerRecord> {
        self.players.get(&player)
    }

    pub fn record_mut(&mut self, player: PlayerId) -> Option<&mut PlayerRecord> {
        self.players.get_mut(&player)
    }

    /// The record for `player`, created empty if missing.
    pub fn entry(&mut self, player: PlayerId) -> &mut PlayerRecord {
        self.players
            .entry(player)
            .or_insert_with(|| PlayerRecord::new(player))
    }

    pub fn merge(&mut self, records: impl IntoIterator<Item = PlayerRecord>) {
        for record in records {
            self.players.insert(record.player_id, record);
        }
    }
}

impl NetComponent for GameDataTable {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        let records = PlayerRecord::read_list(&mut Reader::new(data))?;
        self.merge(records);
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        let records: Vec<PlayerRecord> = self.players.values().cloned().collect();
        let mut w = Writer::new();
        PlayerRecord::write_list(&records, &mut w);
        w.into_bytes()
    }
}

/// Kick votes: who has voted to kick whom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoteBanSystem {
    pub votes: BTreeMap<ClientId, Vec<ClientId>>,
}

impl NetComponent for VoteBanSystem {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        let mut r = Reader::new(data);
        let count = r.u8()?;
        let mut votes = BTreeMap::new();
        for _ in 0..count {
            let target = ClientId(r.packed()?);
            let n = r.u8()?;
            let mut voters = Vec::with_capacity(usize::from(n));
            for _ in 0..n {
                voters.push(ClientId(r.packed()?));
            }
            votes.insert(target, voters);
        }
        self.votes = votes;
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        // Both counts are single bytes; entries past 255 are not sent.
        let limit = usize::from(u8::MAX);
        let targets = self.votes.len().min(limit);
        let mut w = Writer::new();
        w.u8(u8::try_from(targets).unwrap_or(u8::MAX));
        for (target, voters) in self.votes.iter().take(targets) {
            let voters = &voters[..voters.len().min(limit)];
            w.packed(target.0)
                .u8(u8::try_from(voters.len()).unwrap_or(u8::MAX));
            for voter in voters {
                w.packed(voter.0);
            }
        }
        w.into_bytes()
    }
}

/// Marks the lobby scene. No replicated state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LobbyBehaviour;

impl NetComponent for LobbyBehaviour {
    fn deserialize(&mut self, _data: &[u8]) -> Result<Applied, ProtocolError> {
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// The meeting screen: one vote-state byte per player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeetingHud {
    pub states: Vec<u8>,
}

impl MeetingHud {
    const DEAD: u8 = 0x80;
    const VOTED: u8 = 0x40;
    const REPORTED: u8 = 0x20;

    pub fn is_dead(&self, slot: usize) -> bool {
        self.state(slot) & Self::DEAD != 0
    }

    pub fn has_voted(&self, slot: usize) -> bool {
        self.state(slot) & Self::VOTED != 0
    }

    pub fn did_report(&self, slot: usize) -> bool {
        self.state(slot) & Self::REPORTED != 0
    }

    fn state(&self, slot: usize) -> u8 {
        self.states.get(slot).copied().unwrap_or_default()
    }
}

impl NetComponent for MeetingHud {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        let mut r = Reader::new(data);
        let count = r.packed()? as usize;
        self.states = r.bytes(count)?.to_vec();
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.states.len() + 1);
        w.packed(self.states.len() as u32).bytes(&self.states);
        w.into_bytes()
    }
}

/// The electrical switch panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwitchSystem {
    pub expected: u8,
    pub actual: u8,
    pub value: u8,
}

impl SwitchSystem {
    /// Lights are out while any switch differs from its expected position.
    pub fn is_sabotaged(&self) -> bool {
        self.expected != self.actual
    }

    /// Whether switch `index` (0..5) is flipped up.
    pub fn switch(&self, index: u8) -> bool {
        index < 8 && self.actual & (1 << index) != 0
    }
}

/// Ship systems. Only the switch panel is modelled; the rest of the blob
/// is kept as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShipStatus {
    pub switches: SwitchSystem,
    pub tail: Vec<u8>,
}

impl NetComponent for ShipStatus {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        let mut r = Reader::new(data);
        let switches = SwitchSystem {
            expected: r.u8()?,
            actual: r.u8()?,
            value: r.u8()?,
        };
        self.switches = switches;
        self.tail = r.rest().to_vec();
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(3 + self.tail.len());
        w.u8(self.switches.expected)
            .u8(self.switches.actual)
            .u8(self.switches.value)
            .bytes(&self.tail);
        w.into_bytes()
    }
}

/// A component this crate does not model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Opaque {
    pub data: Vec<u8>,
}

impl NetComponent for Opaque {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        self.data = data.to_vec();
        Ok(Applied::Updated)
    }

    fn serialize(&self) -> Vec<u8> {
        self.data.clone()
    }
}

// ---------------------------------------------------------------------------
// Sealed component set
// ---------------------------------------------------------------------------

/// Tag for each component kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComponentKind {
    ShipStatus,
    MeetingHud,
    LobbyBehaviour,
    GameData,
    VoteBanSystem,
    PlayerControl,
    PlayerPhysics,
    CustomNetworkTransform,
    Opaque,
}

impl ComponentKind {
    /// A fresh component of this kind, ready for its spawn blob.
    pub fn instantiate(self) -> Component {
        match self {
            Self::ShipStatus => Component::ShipStatus(ShipStatus::default()),
            Self::MeetingHud => Component::MeetingHud(MeetingHud::default()),
            Self::LobbyBehaviour => Component::LobbyBehaviour(LobbyBehaviour),
            Self::GameData => Component::GameData(GameDataTable::default()),
            Self::VoteBanSystem => Component::VoteBanSystem(VoteBanSystem::default()),
            Self::PlayerControl => Component::PlayerControl(PlayerControl::default()),
            Self::PlayerPhysics => Component::PlayerPhysics(PlayerPhysics),
            Self::CustomNetworkTransform => {
                Component::CustomNetworkTransform(CustomNetworkTransform::default())
            }
            Self::Opaque => Component::Opaque(Opaque::default()),
        }
    }
}

/// Any live component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "state")]
pub enum Component {
    ShipStatus(ShipStatus),
    MeetingHud(MeetingHud),
    LobbyBehaviour(LobbyBehaviour),
    GameData(GameDataTable),
    VoteBanSystem(VoteBanSystem),
    PlayerControl(PlayerControl),
    PlayerPhysics(PlayerPhysics),
    CustomNetworkTransform(CustomNetworkTransform),
    Opaque(Opaque),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::ShipStatus(_) => ComponentKind::ShipStatus,
            Self::MeetingHud(_) => ComponentKind::MeetingHud,
            Self::LobbyBehaviour(_) => ComponentKind::LobbyBehaviour,
            Self::GameData(_) => ComponentKind::GameData,
            Self::VoteBanSystem(_) => ComponentKind::VoteBanSystem,
            Self::PlayerControl(_) => ComponentKind::PlayerControl,
            Self::PlayerPhysics(_) => ComponentKind::PlayerPhysics,
            Self::CustomNetworkTransform(_) => ComponentKind::CustomNetworkTransform,
            Self::Opaque(_) => ComponentKind::Opaque,
        }
    }

    pub fn as_player_control(&self) -> Option<&PlayerControl> {
        match self {
            Self::PlayerControl(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<&CustomNetworkTransform> {
        match self {
            Self::CustomNetworkTransform(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_transform_mut(&mut self) -> Option<&mut CustomNetworkTransform> {
        match self {
            Self::CustomNetworkTransform(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_game_data(&self) -> Option<&GameDataTable> {
        match self {
            Self::GameData(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_game_data_mut(&mut self) -> Option<&mut GameDataTable> {
        match self {
            Self::GameData(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_meeting_hud(&self) -> Option<&MeetingHud> {
        match self {
            Self::MeetingHud(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_meeting_hud_mut(&mut self) -> Option<&mut MeetingHud> {
        match self {
            Self::MeetingHud(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_ship_status(&self) -> Option<&ShipStatus> {
        match self {
            Self::ShipStatus(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_lobby(&self) -> Option<&LobbyBehaviour> {
        match self {
            Self::LobbyBehaviour(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_vote_ban(&self) -> Option<&VoteBanSystem> {
        match self {
            Self::VoteBanSystem(c) => Some(c),
            _ => None,
        }
    }
}

impl NetComponent for Component {
    fn deserialize(&mut self, data: &[u8]) -> Result<Applied, ProtocolError> {
        match self {
            Self::ShipStatus(c) => c.deserialize(data),
            Self::MeetingHud(c) => c.deserialize(data),
            Self::LobbyBehaviour(c) => c.deserialize(data),
            Self::GameData(c) => c.deserialize(data),
            Self::VoteBanSystem(c) => c.deserialize(data),
            Self::PlayerControl(c) => c.deserialize(data),
            Self::PlayerPhysics(c) => c.deserialize(data),
            Self::CustomNetworkTransform(c) => c.deserialize(data),
            Self::Opaque(c) => c.deserialize(data),
        }
    }

    fn serialize(&self) -> Vec<u8> {
        match self {
            Self::ShipStatus(c) => NetComponent::serialize(c),
            Self::MeetingHud(c) => NetComponent::serialize(c),
            Self::LobbyBehaviour(c) => NetComponent::serialize(c),
            Self::GameData(c) => NetComponent::serialize(c),
            Self::VoteBanSystem(c) => NetComponent::serialize(c),
            Self::PlayerControl(c) => NetComponent::serialize(c),
            Self::PlayerPhysics(c) => NetComponent::serialize(c),
            Self::CustomNetworkTransform(c) => NetComponent::serialize(c),
            Self::Opaque(c) => NetComponent::serialize(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform_blob(sequence: u16, x: f32) -> Vec<u8> {
        let mut w = Writer::new();
        w.u16(sequence)
            .vector2(Vector2::new(x, 0.0))
            .vector2(Vector2::ZERO);
        w.into_bytes()
    }

    #[test]
    fn test_player_control_spawn_and_update_forms() {
        let mut control = PlayerControl::default();
        control.deserialize(&[1, 7]).unwrap();
        assert!(control.is_new);
        assert_eq!(control.player_id, PlayerId(7));

        control.deserialize(&[3]).unwrap();
        assert!(control.is_new);
        assert_eq!(control.player_id, PlayerId(3));

        assert_eq!(NetComponent::serialize(&control), vec![1, 3]);
        assert!(control.deserialize(&[]).is_err());
    }

    #[test]
    fn test_transform_rejects_older_sequence() {
        let mut t = CustomNetworkTransform::default();
        assert_eq!(t.deserialize(&transform_blob(10, 4.0)).unwrap(), Applied::Updated);
        assert_eq!(t.deserialize(&transform_blob(9, 8.0)).unwrap(), Applied::Stale);
        assert_eq!(t.sequence, 10);
        assert!((t.position.x - 4.0).abs() < 0.01);

        // Same sequence is accepted.
        assert_eq!(t.deserialize(&transform_blob(10, 8.0)).unwrap(), Applied::Updated);
    }

    #[test]
    fn test_transform_sequence_wraps() {
        let mut t = CustomNetworkTransform::default();
        t.deserialize(&transform_blob(65_530, 0.0)).unwrap();
        assert_eq!(t.deserialize(&transform_blob(3, 0.0)).unwrap(), Applied::Updated);
        assert_eq!(t.sequence, 3);
        assert_eq!(t.deserialize(&transform_blob(65_534, 0.0)).unwrap(), Applied::Stale);
    }

    #[test]
    fn test_transform_first_blob_always_applies() {
        let mut t = CustomNetworkTransform::default();
        // 40000 is "behind" 0 circularly, but nothing has been synced yet.
        assert_eq!(t.deserialize(&transform_blob(40_000, 0.0)).unwrap(), Applied::Updated);
    }

    #[test]
    fn test_transform_truncated_leaves_state() {
        let mut t = CustomNetworkTransform::default();
        t.deserialize(&transform_blob(5, 0.0)).unwrap();
        let before = t.clone();
        assert!(t.deserialize(&transform_blob(6, 1.0)[..7]).is_err());
        assert_eq!(t, before);
    }

    #[test]
    fn test_advance_increments_and_wraps() {
        let mut t = CustomNetworkTransform {
            sequence: u16::MAX,
            ..Default::default()
        };
        let blob = t.advance(Vector2::new(-40.0, 40.0), Vector2::ZERO);
        assert_eq!(t.sequence, 0);
        assert_eq!(&blob[..2], &[0, 0]);

        let mut remote = CustomNetworkTransform::default();
        remote.deserialize(&blob).unwrap();
        assert_eq!(remote.position, Vector2::new(-40.0, 40.0));
    }

    #[test]
    fn test_game_data_merges_by_player() {
        let mut first = PlayerRecord::new(PlayerId(0));
        first.name = "red".into();
        let mut second = PlayerRecord::new(PlayerId(1));
        second.name = "blue".into();

        let mut w = Writer::new();
        PlayerRecord::write_list(&[first, second], &mut w);
        let mut table = GameDataTable::default();
        table.deserialize(w.as_bytes()).unwrap();

        let mut renamed = PlayerRecord::new(PlayerId(1));
        renamed.name = "cyan".into();
        let mut w = Writer::new();
        PlayerRecord::write_list(&[renamed], &mut w);
        table.deserialize(w.as_bytes()).unwrap();

        assert_eq!(table.players.len(), 2);
        assert_eq!(table.record(PlayerId(0)).unwrap().name, "red");
        assert_eq!(table.record(PlayerId(1)).unwrap().name, "cyan");
    }

    #[test]
    fn test_vote_ban_counts_are_capped() {
        let mut votes = VoteBanSystem::default();
        for target in 0..300 {
            votes.votes.insert(ClientId(target), vec![]);
        }
        votes
            .votes
            .insert(ClientId(0), (0..300).map(ClientId).collect());

        let mut remote = VoteBanSystem::default();
        remote.deserialize(&NetComponent::serialize(&votes)).unwrap();
        assert_eq!(remote.votes.len(), 255);
        assert_eq!(remote.votes[&ClientId(0)].len(), 255);
        assert_eq!(remote.votes[&ClientId(0)][254], ClientId(254));
        assert!(!remote.votes.contains_key(&ClientId(255)));
    }

    #[test]
    fn test_vote_ban_replaces() {
        let mut votes = VoteBanSystem::default();
        votes.votes.insert(ClientId(9), vec![ClientId(1), ClientId(2)]);
        let blob = NetComponent::serialize(&votes);
        assert_eq!(blob, vec![1, 9, 2, 1, 2]);

        let mut remote = VoteBanSystem::default();
        remote.votes.insert(ClientId(4), vec![]);
        remote.deserialize(&blob).unwrap();
        assert_eq!(remote, votes);
    }

    #[test]
    fn test_meeting_hud_state_bits() {
        let mut hud = MeetingHud::default();
        hud.deserialize(&[2, 0x80, 0x61]).unwrap();
        assert!(hud.is_dead(0));
        assert!(hud.has_voted(1));
        assert!(hud.did_report(1));
        assert!(!hud.is_dead(5));
        assert_eq!(NetComponent::serialize(&hud), vec![2, 0x80, 0x61]);
    }

    #[test]
    fn test_ship_status_keeps_tail() {
        let mut ship = ShipStatus::default();
        ship.deserialize(&[0b1_0101, 0b1_0100, 255, 9, 9]).unwrap();
        assert!(ship.switches.is_sabotaged());
        assert!(ship.switches.switch(2));
        assert!(!ship.switches.switch(0));
        assert_eq!(ship.tail, vec![9, 9]);
        assert_eq!(NetComponent::serialize(&ship), vec![0b1_0101, 0b1_0100, 255, 9, 9]);

        assert!(ship.deserialize(&[1, 2]).is_err());
        assert_eq!(ship.tail, vec![9, 9]);
    }

    #[test]
    fn test_instantiate_matches_kind() {
        for kind in [
            ComponentKind::ShipStatus,
            ComponentKind::MeetingHud,
            ComponentKind::LobbyBehaviour,
            ComponentKind::GameData,
            ComponentKind::VoteBanSystem,
            ComponentKind::PlayerControl,
            ComponentKind::PlayerPhysics,
            ComponentKind::CustomNetworkTransform,
            ComponentKind::Opaque,
        ] {
            assert_eq!(kind.instantiate().kind(), kind);
        }
    }
}

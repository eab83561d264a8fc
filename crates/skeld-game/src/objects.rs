//! Composite game objects and the spawn layout table.

use std::fmt;

use serde::Serialize;
use skeld_protocol::{ClientId, NetId, SpawnType};

use crate::components::ComponentKind;

/// Local handle for a spawned object. Never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Which components a spawn type is made of, in spawn order.
///
/// Children past the end of the layout, and every child of an unknown
/// spawn type, are stored as [`ComponentKind::Opaque`].
pub fn layout(spawn_type: SpawnType) -> &'static [ComponentKind] {
    use ComponentKind::*;
    match spawn_type {
        SpawnType::ShipStatus
        | SpawnType::HeadQuarters
        | SpawnType::PlanetMap
        | SpawnType::AprilShipStatus => &[ShipStatus],
        SpawnType::MeetingHub => &[MeetingHud],
        SpawnType::LobbyBehaviour => &[LobbyBehaviour],
        SpawnType::GameData => &[GameData, VoteBanSystem],
        SpawnType::Player => &[PlayerControl, PlayerPhysics, CustomNetworkTransform],
        SpawnType::Unknown(_) => &[],
    }
}

/// The kind for child `index` of a spawn.
pub fn kind_at(spawn_type: SpawnType, index: usize) -> ComponentKind {
    layout(spawn_type)
        .get(index)
        .copied()
        .unwrap_or(ComponentKind::Opaque)
}

/// A spawned object: an ordered group of components sharing one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameObject {
    pub id: ObjectId,
    pub spawn_type: SpawnType,
    /// Owning client id; negative values mean the server owns it.
    pub owner: i32,
    pub flags: u8,
    /// Live components, in spawn order.
    pub components: Vec<NetId>,
}

impl GameObject {
    /// The owning client, if a client owns it.
    pub fn owner_client(&self) -> Option<ClientId> {
        u32::try_from(self.owner).ok().map(ClientId)
    }

    pub fn contains(&self, net_id: NetId) -> bool {
        self.components.contains(&net_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_layout() {
        assert_eq!(
            layout(SpawnType::Player),
            &[
                ComponentKind::PlayerControl,
                ComponentKind::PlayerPhysics,
                ComponentKind::CustomNetworkTransform
            ]
        );
    }

    #[test]
    fn test_ship_variants_share_layout() {
        for ty in [
            SpawnType::ShipStatus,
            SpawnType::HeadQuarters,
            SpawnType::PlanetMap,
            SpawnType::AprilShipStatus,
        ] {
            assert_eq!(layout(ty), &[ComponentKind::ShipStatus]);
        }
    }

    #[test]
    fn test_surplus_and_unknown_are_opaque() {
        assert_eq!(kind_at(SpawnType::LobbyBehaviour, 1), ComponentKind::Opaque);
        assert_eq!(kind_at(SpawnType::Unknown(42), 0), ComponentKind::Opaque);
        assert_eq!(kind_at(SpawnType::GameData, 1), ComponentKind::VoteBanSystem);
    }

    #[test]
    fn test_owner_client() {
        let mut obj = GameObject {
            id: ObjectId(1),
            spawn_type: SpawnType::Player,
            owner: 12,
            flags: 0,
            components: vec![],
        };
        assert_eq!(obj.owner_client(), Some(ClientId(12)));
        obj.owner = -2;
        assert_eq!(obj.owner_client(), None);
    }
}

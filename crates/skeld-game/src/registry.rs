//! The component registry: every live component by net id, grouped into
//! spawned objects.
//!
//! The registry is owned by a single [`Game`](crate::Game) and mutated only
//! from the connection's inbound path, so it needs no locking. Ordered maps
//! keep lookups such as "the game data table" deterministic when a server
//! spawns more than one.

use std::collections::BTreeMap;

use skeld_protocol::{NetId, ProtocolError, Spawn};
use tracing::{debug, trace};

use crate::components::{Applied, Component, ComponentKind, NetComponent};
use crate::objects::{kind_at, GameObject, ObjectId};

#[derive(Debug, Clone)]
struct Entry {
    component: Component,
    object: ObjectId,
}

/// The result of a spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spawned {
    pub object: ObjectId,
    /// Objects that lost their last component to a reused net id.
    pub replaced: Vec<ObjectId>,
}

/// What a despawn removed.
#[derive(Debug, Clone)]
pub struct Despawned {
    pub component: Component,
    pub object: ObjectId,
    /// Set when the removed component was the object's last one.
    pub emptied: Option<GameObject>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    components: BTreeMap<NetId, Entry>,
    objects: BTreeMap<ObjectId, GameObject>,
    next_object: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Builds and registers every component of a spawn.
    ///
    /// All children are decoded before anything is registered: if one blob
    /// is malformed the whole spawn is dropped. Net ids already live are
    /// replaced. Returns `None` for a spawn with no children.
    pub fn spawn(&mut self, spawn: &Spawn) -> Result<Option<Spawned>, ProtocolError> {
        let mut built: Vec<(NetId, Component)> = Vec::with_capacity(spawn.components.len());
        for (index, child) in spawn.components.iter().enumerate() {
            if built.iter().any(|(id, _)| *id == child.net_id) {
                return Err(ProtocolError::InvalidMessage(format!(
                    "net id {} spawned twice",
                    child.net_id
                )));
            }
            let mut component = kind_at(spawn.spawn_type, index).instantiate();
            component.deserialize(&child.data)?;
            built.push((child.net_id, component));
        }
        if built.is_empty() {
            return Ok(None);
        }

        let mut replaced = Vec::new();
        for (net_id, _) in &built {
            if let Some(gone) = self.remove(*net_id) {
                debug!(%net_id, "respawned live net id, replacing");
                replaced.extend(gone.emptied.map(|object| object.id));
            }
        }

        let id = ObjectId(self.next_object);
        self.next_object = self.next_object.wrapping_add(1);
        let object = GameObject {
            id,
            spawn_type: spawn.spawn_type,
            owner: spawn.owner,
            flags: spawn.flags,
            components: built.iter().map(|(net_id, _)| *net_id).collect(),
        };
        for (net_id, component) in built {
            self.components.insert(net_id, Entry { component, object: id });
        }
        trace!(object = %id, spawn_type = ?spawn.spawn_type, "spawned");
        self.objects.insert(id, object);
        Ok(Some(Spawned {
            object: id,
            replaced,
        }))
    }

    /// Removes exactly one component. Siblings stay live; the object is
    /// forgotten once its last component is gone.
    pub fn despawn(&mut self, net_id: NetId) -> Option<Despawned> {
        self.remove(net_id)
    }

    /// Applies an update blob. `Ok(None)` means the net id is not live.
    pub fn data(&mut self, net_id: NetId, data: &[u8]) -> Result<Option<Applied>, ProtocolError> {
        match self.components.get_mut(&net_id) {
            Some(entry) => entry.component.deserialize(data).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&mut self) {
        self.components.clear();
        self.objects.clear();
    }

    fn remove(&mut self, net_id: NetId) -> Option<Despawned> {
        let entry = self.components.remove(&net_id)?;
        let mut emptied = None;
        if let Some(object) = self.objects.get_mut(&entry.object) {
            object.components.retain(|id| *id != net_id);
            if object.components.is_empty() {
                emptied = self.objects.remove(&entry.object);
            }
        }
        Some(Despawned {
            component: entry.component,
            object: entry.object,
            emptied,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, net_id: NetId) -> Option<&Component> {
        self.components.get(&net_id).map(|e| &e.component)
    }

    pub fn get_mut(&mut self, net_id: NetId) -> Option<&mut Component> {
        self.components.get_mut(&net_id).map(|e| &mut e.component)
    }

    pub fn contains(&self, net_id: NetId) -> bool {
        self.components.contains_key(&net_id)
    }

    pub fn object(&self, id: ObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    /// The object a component belongs to.
    pub fn object_of(&self, net_id: NetId) -> Option<&GameObject> {
        let entry = self.components.get(&net_id)?;
        self.objects.get(&entry.object)
    }

    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// The first live component of `kind` inside `object`.
    pub fn sibling(&self, object: ObjectId, kind: ComponentKind) -> Option<(NetId, &Component)> {
        let object = self.objects.get(&object)?;
        object
            .components
            .iter()
            .filter_map(|id| self.get(*id).map(|c| (*id, c)))
            .find(|(_, c)| c.kind() == kind)
    }

    /// The lowest-numbered live component of `kind` in the whole game.
    pub fn first_of(&self, kind: ComponentKind) -> Option<(NetId, &Component)> {
        self.components
            .iter()
            .find(|(_, e)| e.component.kind() == kind)
            .map(|(id, e)| (*id, &e.component))
    }

    pub fn first_of_mut(&mut self, kind: ComponentKind) -> Option<&mut Component> {
        self.components
            .values_mut()
            .map(|e| &mut e.component)
            .find(|c| c.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

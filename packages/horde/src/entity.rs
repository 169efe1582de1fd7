//! Entity handles and the index allocator behind them.

use std::alloc::Layout;
use std::collections::BTreeSet;
use std::fmt::{self, Debug, Display, Formatter};

use crate::component::{Component, ComponentTypeID};
use crate::error::WorldError;

/// An entity handle: a slot index plus the generation of that slot.
///
/// Handles are only valid while the generation matches. Destroying an entity
/// bumps the generation of its slot, so stale handles never alias a reused
/// slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// A handle which never refers to a live entity.
    pub const NULL: Entity = Entity { index: u32::MAX, generation: 0 };

    /// Build a handle from its raw parts.
    pub const fn from_raw_parts(index: u32, generation: u32) -> Entity {
        Entity { index, generation }
    }

    /// The slot index of this entity.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns true if this is the null handle.
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NULL
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}v{}", self.index, self.generation)
        }
    }
}

unsafe impl Component for Entity {
    fn type_id() -> ComponentTypeID {
        ComponentTypeID::new(0)
    }

    fn layout() -> Layout {
        Layout::new::<Entity>()
    }
}

/// Where the row of a live entity is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: usize,
    pub chunk: usize,
    pub row: usize,
}

#[derive(Clone, Debug)]
struct EntitySlot {
    generation: u32,
    location: Option<EntityLocation>,
}

/// Allocates entity indices, always preferring the lowest free index.
#[derive(Clone, Debug)]
pub(crate) struct EntityAllocator {
    slots: Vec<EntitySlot>,
    free: BTreeSet<u32>,
    capacity: u32,
    alive: usize,
}

impl EntityAllocator {
    /// Create an allocator which hands out at most `capacity` indices.
    pub fn new(capacity: u32) -> EntityAllocator {
        EntityAllocator {
            slots: Vec::new(),
            free: BTreeSet::new(),
            capacity: capacity.min(u32::MAX - 1),
            alive: 0,
        }
    }

    /// The number of live entities.
    pub fn len(&self) -> usize {
        self.alive
    }

    /// The maximum number of simultaneously allocated indices.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserve a new handle. The handle is not live until it is placed.
    pub fn allocate(&mut self) -> Result<Entity, WorldError> {
        if let Some(index) = self.free.pop_first() {
            let generation = self.slots[index as usize].generation;
            return Ok(Entity { index, generation });
        }

        let index = self.slots.len() as u32;
        if index >= self.capacity {
            return Err(WorldError::CapacityExceeded { capacity: self.capacity });
        }

        self.slots.push(EntitySlot { generation: 0, location: None });
        Ok(Entity { index, generation: 0 })
    }

    /// Look up the location of a live entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.slots.get(entity.index as usize)
            .filter(|slot| slot.generation == entity.generation)
            .and_then(|slot| slot.location)
    }

    /// Record where an entity's row now lives.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let slot = &mut self.slots[entity.index as usize];
        debug_assert_eq!(slot.generation, entity.generation);
        if slot.location.is_none() {
            self.alive += 1;
        }
        slot.location = Some(location);
    }

    /// Kill an entity, bumping its generation and freeing its index.
    pub fn free(&mut self, entity: Entity) -> Result<EntityLocation, WorldError> {
        let location = self.location(entity)
            .ok_or(WorldError::NotFound(entity))?;
        let slot = &mut self.slots[entity.index as usize];
        slot.location = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.insert(entity.index);
        self.alive -= 1;
        Ok(location)
    }
}

//! The component store: every live entity, partitioned by archetype.

use std::collections::HashMap;
use std::sync::Arc;

use crate::archetype::{Archetype, ComponentVecSet};
use crate::chunk_set::ChunkSet;
use crate::component::{Component, ComponentTypeID};
use crate::component_data::{ComponentValueRef, EntityTemplate};
use crate::entity::{Entity, EntityAllocator, EntityLocation};
use crate::error::{StructuralChange, WorldError};

/// The default number of rows per chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1024;

/// Storage configuration for a `World`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    pub chunk_capacity: usize,
    pub max_entities: u32,
}

impl WorldConfig {
    /// Set the number of rows in each chunk.
    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> WorldConfig {
        self.chunk_capacity = chunk_capacity.max(1);
        self
    }

    /// Set the maximum number of simultaneously live entities.
    pub fn with_max_entities(mut self, max_entities: u32) -> WorldConfig {
        self.max_entities = max_entities;
        self
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            max_entities: u32::MAX - 1,
        }
    }
}

/// A `World` owns every entity and all of their component data.
///
/// Entities are grouped by archetype, each archetype owning a `ChunkSet`.
/// Archetypes are created on demand and never removed, so archetype IDs are
/// stable indices into `archetypes()` and `chunk_sets()`.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    entities: EntityAllocator,
    archetypes: Vec<Arc<Archetype>>,
    archetype_index: HashMap<ComponentVecSet, usize>,
    chunk_sets: Vec<ChunkSet>,
}

impl World {
    /// Create a new empty world with the default configuration.
    pub fn new() -> World {
        World::with_config(WorldConfig::default())
    }

    /// Create a new empty world.
    pub fn with_config(config: WorldConfig) -> World {
        World {
            config,
            entities: EntityAllocator::new(config.max_entities),
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            chunk_sets: Vec::new(),
        }
    }

    /// Return the configuration this world was created with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// The number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if there are no live entities.
    pub fn is_empty(&self) -> bool {
        self.entities.len() == 0
    }

    /// All archetypes created so far, indexed by archetype ID.
    pub fn archetypes(&self) -> &[Arc<Archetype>] {
        &self.archetypes
    }

    /// The chunk sets of every archetype, indexed by archetype ID.
    pub fn chunk_sets(&self) -> &[ChunkSet] {
        &self.chunk_sets
    }

    pub(crate) fn chunk_sets_mut(&mut self) -> &mut [ChunkSet] {
        &mut self.chunk_sets
    }

    /// Find or create the archetype for a set of component types.
    pub fn ensure_archetype(&mut self, component_types: ComponentVecSet) -> usize {
        if let Some(id) = self.archetype_index.get(&component_types) {
            return *id;
        }

        let id = self.archetypes.len();
        log::trace!("creating archetype #{} {:?}", id, component_types);
        let archetype = Arc::new(Archetype::new(id, component_types.clone(), self.config.chunk_capacity));
        self.chunk_sets.push(ChunkSet::new(archetype.clone()));
        self.archetypes.push(archetype);
        self.archetype_index.insert(component_types, id);
        id
    }

    /// Returns true if the entity handle refers to a live entity.
    pub fn exists(&self, entity: Entity) -> bool {
        self.entities.location(entity).is_some()
    }

    /// Get where an entity's row is stored.
    pub fn location(&self, entity: Entity) -> Result<EntityLocation, WorldError> {
        self.entities.location(entity)
            .ok_or(WorldError::NotFound(entity))
    }

    /// Create an entity with no components.
    pub fn create(&mut self) -> Result<Entity, WorldError> {
        self.create_from(&EntityTemplate::new())
    }

    /// Create an entity with the components in `template`.
    pub fn create_from(&mut self, template: &EntityTemplate) -> Result<Entity, WorldError> {
        let entity = self.entities.allocate()?;
        let archetype = self.ensure_archetype(template.component_types());
        let location = self.push_row(archetype, entity, template.iter());
        self.entities.set_location(entity, location);
        Ok(entity)
    }

    /// Destroy an entity, invalidating its handle.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), WorldError> {
        let location = self.entities.free(entity)?;
        self.remove_row(location);
        Ok(())
    }

    /// Get the component types of an entity.
    pub fn component_types(&self, entity: Entity) -> Result<&ComponentVecSet, WorldError> {
        let location = self.location(entity)?;
        Ok(self.archetypes[location.archetype].component_types())
    }

    /// Returns true if the entity is alive and has a component of type `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.entities.location(entity)
            .map_or(false, |l| self.archetypes[l.archetype].has_component_type(&T::type_id()))
    }

    /// Get a reference to a component of an entity.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<&T, WorldError> {
        let location = self.location(entity)?;
        self.chunk_sets[location.archetype]
            .chunk(location.chunk)
            .and_then(|chunk| chunk.components::<T>())
            .map(|components| &components[location.row])
            .ok_or_else(|| missing::<T>(entity))
    }

    /// Get a mutable reference to a component of an entity.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, WorldError> {
        let location = self.location(entity)?;
        self.chunk_sets[location.archetype]
            .chunk_mut(location.chunk)
            .and_then(|chunk| chunk.components_mut::<T>())
            .map(|components| &mut components[location.row])
            .ok_or_else(|| missing::<T>(entity))
    }

    /// Overwrite an existing component of an entity.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), WorldError> {
        self.set_raw(entity, ComponentValueRef::from(&value))
    }

    /// Add a component to an entity, moving it to a new archetype.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), WorldError> {
        self.add_raw(entity, ComponentValueRef::from(&value))
    }

    /// Remove a component from an entity, moving it to a new archetype.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.remove_raw(entity, T::type_id())
    }

    /// Add every component in `template` to an entity with a single move.
    ///
    /// Fails without changing anything if any of the components is already
    /// present.
    pub fn insert(&mut self, entity: Entity, template: &EntityTemplate) -> Result<(), WorldError> {
        let location = self.location(entity)?;
        let archetype = &self.archetypes[location.archetype];

        if let Some(present) = template.iter().find(|v| archetype.has_component_type(&v.type_id())) {
            return Err(WorldError::InvalidStructuralChange {
                entity,
                component: present.type_id().name(),
                change: StructuralChange::Add,
            });
        }

        if template.is_empty() {
            return Ok(());
        }

        let mut component_types = archetype.component_types().clone();
        for value in template.iter() {
            component_types.insert(value.type_id());
        }

        let mut row = self.read_row(location);
        for value in template.iter() {
            row.set_raw(value);
        }

        self.relocate(entity, location, component_types, &row);
        Ok(())
    }

    /// Overwrite a type-erased component value.
    pub fn set_raw(&mut self, entity: Entity, value: ComponentValueRef<'_>) -> Result<(), WorldError> {
        let location = self.location(entity)?;
        let written = self.chunk_sets[location.archetype]
            .chunk_mut(location.chunk)
            .map_or(false, |chunk| chunk.write(location.row, value));

        if written {
            Ok(())
        } else {
            Err(WorldError::MissingComponent {
                entity,
                component: value.type_id().name(),
            })
        }
    }

    /// Add a type-erased component value.
    pub fn add_raw(&mut self, entity: Entity, value: ComponentValueRef<'_>) -> Result<(), WorldError> {
        let location = self.location(entity)?;
        let archetype = &self.archetypes[location.archetype];

        if value.type_id() == Entity::type_id() || archetype.has_component_type(&value.type_id()) {
            return Err(WorldError::InvalidStructuralChange {
                entity,
                component: value.type_id().name(),
                change: StructuralChange::Add,
            });
        }

        let mut component_types = archetype.component_types().clone();
        component_types.insert(value.type_id());

        let mut row = self.read_row(location);
        row.set_raw(value);

        self.relocate(entity, location, component_types, &row);
        Ok(())
    }

    /// Remove a component by type ID.
    pub fn remove_raw(&mut self, entity: Entity, type_id: ComponentTypeID) -> Result<(), WorldError> {
        let location = self.location(entity)?;
        let archetype = &self.archetypes[location.archetype];

        if type_id == Entity::type_id() || !archetype.has_component_type(&type_id) {
            return Err(WorldError::InvalidStructuralChange {
                entity,
                component: type_id.name(),
                change: StructuralChange::Remove,
            });
        }

        let mut component_types = archetype.component_types().clone();
        component_types.remove(type_id);

        let mut row = self.read_row(location);
        row.remove(type_id);

        self.relocate(entity, location, component_types, &row);
        Ok(())
    }

    /// Copy every component of a row into a template.
    fn read_row(&self, location: EntityLocation) -> EntityTemplate {
        let mut row = EntityTemplate::new();
        if let Some(chunk) = self.chunk_sets[location.archetype].chunk(location.chunk) {
            for value in chunk.row_values(location.row) {
                row.set_raw(value);
            }
        }
        row
    }

    /// Move an entity's row into the archetype for `component_types`.
    fn relocate(&mut self, entity: Entity, from: EntityLocation, component_types: ComponentVecSet, row: &EntityTemplate) {
        let archetype = self.ensure_archetype(component_types);
        self.remove_row(from);
        let to = self.push_row(archetype, entity, row.iter());
        self.entities.set_location(entity, to);
    }

    fn push_row<'a>(&mut self, archetype: usize, entity: Entity, values: impl IntoIterator<Item=ComponentValueRef<'a>>) -> EntityLocation {
        let (chunk, row) = self.chunk_sets[archetype].push(entity, values);
        EntityLocation { archetype, chunk, row }
    }

    fn remove_row(&mut self, location: EntityLocation) {
        if let Some((moved, chunk, row)) = self.chunk_sets[location.archetype].remove(location.chunk, location.row) {
            self.entities.set_location(moved, EntityLocation {
                archetype: location.archetype,
                chunk,
                row,
            });
        }
    }
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

fn missing<T: Component>(entity: Entity) -> WorldError {
    WorldError::MissingComponent {
        entity,
        component: T::type_id().name(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Hp(i32);

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Pos(f32, f32);

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Frozen;

    crate::component!(Hp, Pos, Frozen);

    #[test]
    fn test_create_get_set() {
        let mut world = World::new();
        let e = world.create_from(&EntityTemplate::new().with(Hp(10)).with(Pos(1.0, 2.0))).unwrap();

        assert!(world.exists(e));
        assert_eq!(world.len(), 1);
        assert_eq!(world.get::<Hp>(e), Ok(&Hp(10)));
        assert_eq!(world.get::<Pos>(e), Ok(&Pos(1.0, 2.0)));

        world.set(e, Hp(3)).unwrap();
        world.get_mut::<Pos>(e).unwrap().0 = 9.0;
        assert_eq!(world.get::<Hp>(e), Ok(&Hp(3)));
        assert_eq!(world.get::<Pos>(e), Ok(&Pos(9.0, 2.0)));

        assert!(matches!(world.get::<Frozen>(e), Err(WorldError::MissingComponent { .. })));
        assert!(matches!(world.set(e, Frozen), Err(WorldError::MissingComponent { .. })));
    }

    #[test]
    fn test_identity_stability() {
        let mut world = World::new();
        let a = world.create().unwrap();
        let b = world.create().unwrap();

        world.destroy(a).unwrap();
        assert!(!world.exists(a));
        assert_eq!(world.get::<Entity>(a), Err(WorldError::NotFound(a)));
        assert_eq!(world.destroy(a), Err(WorldError::NotFound(a)));

        let c = world.create().unwrap();
        assert_eq!(c.index(), a.index());
        assert_eq!(c.generation(), a.generation() + 1);
        assert!(!world.exists(a));
        assert!(world.exists(b));
        assert!(world.exists(c));
        assert_eq!(world.get::<Entity>(c), Ok(&c));
    }

    #[test]
    fn test_structural_changes_preserve_values() {
        let mut world = World::new();
        let e = world.create_from(&EntityTemplate::new().with(Hp(5))).unwrap();

        world.add_component(e, Pos(3.0, 4.0)).unwrap();
        assert_eq!(world.get::<Hp>(e), Ok(&Hp(5)));
        assert_eq!(world.get::<Pos>(e), Ok(&Pos(3.0, 4.0)));

        world.add_component(e, Frozen).unwrap();
        assert!(world.has::<Frozen>(e));

        world.remove_component::<Pos>(e).unwrap();
        assert!(!world.has::<Pos>(e));
        assert_eq!(world.get::<Hp>(e), Ok(&Hp(5)));

        assert!(matches!(
            world.add_component(e, Hp(1)),
            Err(WorldError::InvalidStructuralChange { change: StructuralChange::Add, .. })
        ));
        assert!(matches!(
            world.remove_component::<Pos>(e),
            Err(WorldError::InvalidStructuralChange { change: StructuralChange::Remove, .. })
        ));
        assert!(matches!(
            world.remove_component::<Entity>(e),
            Err(WorldError::InvalidStructuralChange { .. })
        ));
    }

    #[test]
    fn test_insert_bundle() {
        let mut world = World::new();
        let e = world.create_from(&EntityTemplate::new().with(Hp(1))).unwrap();

        world.insert(e, &EntityTemplate::new().with(Pos(1.0, 1.0)).with(Frozen)).unwrap();
        assert_eq!(world.component_types(e).unwrap().len(), 4);

        let err = world.insert(e, &EntityTemplate::new().with(Hp(2)));
        assert!(matches!(err, Err(WorldError::InvalidStructuralChange { .. })));
        assert_eq!(world.get::<Hp>(e), Ok(&Hp(1)));
    }

    #[test]
    fn test_moves_update_other_locations() {
        let mut world = World::with_config(WorldConfig::default().with_chunk_capacity(2));
        let entities = (0..7)
            .map(|i| world.create_from(&EntityTemplate::new().with(Hp(i))).unwrap())
            .collect::<Vec<_>>();

        world.destroy(entities[0]).unwrap();
        world.add_component(entities[3], Frozen).unwrap();
        world.remove_component::<Hp>(entities[5]).unwrap();

        for (i, e) in entities.iter().enumerate() {
            match i {
                0 => assert!(!world.exists(*e)),
                5 => assert!(!world.has::<Hp>(*e)),
                _ => assert_eq!(world.get::<Hp>(*e), Ok(&Hp(i as i32))),
            }
        }

        for set in world.chunk_sets() {
            let total: usize = set.chunks().iter().map(|c| c.len()).sum();
            assert_eq!(total, set.len());
            for chunk in set.chunks().iter().rev().skip(1) {
                assert!(chunk.is_full());
            }
        }
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut world = World::with_config(WorldConfig::default().with_max_entities(2));
        world.create().unwrap();
        let b = world.create().unwrap();
        assert_eq!(world.create(), Err(WorldError::CapacityExceeded { capacity: 2 }));

        world.destroy(b).unwrap();
        assert!(world.create().is_ok());
    }
}

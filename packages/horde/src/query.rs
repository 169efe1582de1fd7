//! Queries select the archetypes which match a set of component locks and hand
//! out typed views over their chunks.

use std::marker::PhantomData;
use std::slice;
use std::sync::atomic::{self, AtomicU32};
use std::sync::Arc;

use bit_vec::BitVec;
use rayon::prelude::*;

use crate::archetype::Archetype;
use crate::chunk::Chunk;
use crate::component::{Component, ComponentTypeID};
use crate::entity::Entity;
use crate::error::{Access, WorldError};
use crate::world::World;

/// A `Lock` declares how a query touches one component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lock {
    Read(ComponentTypeID),
    Write(ComponentTypeID),
    Exclude(ComponentTypeID),
}

impl Lock {
    /// Returns true if this is a read lock.
    pub fn is_read(&self) -> bool {
        matches!(self, Lock::Read(_))
    }

    /// Returns true if this is a write lock.
    pub fn is_write(&self) -> bool {
        matches!(self, Lock::Write(_))
    }

    /// Returns true if this is an exclusion.
    pub fn is_exclude(&self) -> bool {
        matches!(self, Lock::Exclude(_))
    }

    /// Return the component type for this lock.
    pub fn type_id(&self) -> ComponentTypeID {
        match self {
            Lock::Read(x) => *x,
            Lock::Write(x) => *x,
            Lock::Exclude(x) => *x,
        }
    }
}

/// Checks whether a given lock set applies to an archetype.
pub fn locks_include_archetype(archetype: &Archetype, locks: &[Lock]) -> bool {
    let component_types = archetype.component_types();
    locks.iter().all(|lock| match lock {
        Lock::Read(type_id) | Lock::Write(type_id) => component_types.includes(type_id),
        Lock::Exclude(type_id) => !component_types.includes(type_id),
    })
}

/// A set of component locks, plus a cache of the archetypes they match.
///
/// A component type may appear at most once in a query, which guarantees that
/// a write-locked column is never aliased by another view of the same chunk.
///
/// The cache is refreshed incrementally: archetypes are never removed from a
/// `World`, so only archetypes created since the last refresh are checked.
#[derive(Clone, Debug, Default)]
pub struct Query {
    locks: Vec<Lock>,
    matched: BitVec,
}

impl Query {
    /// Create a query which matches every archetype.
    pub fn new() -> Query {
        Query::default()
    }

    /// Require `T` and allow reading it.
    pub fn read<T: Component>(self) -> Query {
        self.lock(Lock::Read(T::type_id()))
    }

    /// Require `T` and allow writing it.
    pub fn write<T: Component>(self) -> Query {
        self.lock(Lock::Write(T::type_id()))
    }

    /// Only match archetypes without `T`.
    pub fn exclude<T: Component>(self) -> Query {
        self.lock(Lock::Exclude(T::type_id()))
    }

    /// Add a lock to this query.
    ///
    /// # Panics
    /// Panics if the component type is already locked by this query, if
    /// `Entity` is locked for anything but reading, or if more than 32 locks
    /// are added.
    pub fn lock(mut self, lock: Lock) -> Query {
        assert!(self.locks.len() < 32, "only 32 locks supported currently");
        assert!(
            !self.locks.iter().any(|l| l.type_id() == lock.type_id()),
            "{:?} is already locked by this query", lock.type_id(),
        );
        assert!(
            lock.type_id() != Entity::type_id() || lock.is_read(),
            "entity IDs can only be read",
        );

        self.locks.push(lock);
        self.matched = BitVec::new();
        self
    }

    /// Get the locks of this query.
    pub fn locks(&self) -> &[Lock] {
        &self.locks
    }

    /// Returns true if this query matches the given archetype.
    pub fn matches(&self, archetype: &Archetype) -> bool {
        locks_include_archetype(archetype, &self.locks)
    }

    /// Bring the archetype cache up to date with the world.
    pub fn refresh(&mut self, world: &World) {
        let archetypes = world.archetypes();
        for archetype in &archetypes[self.matched.len()..] {
            let matches = locks_include_archetype(archetype, &self.locks);
            self.matched.push(matches);
        }
    }

    fn matched_ids(&self) -> impl Iterator<Item=usize> + '_ {
        self.matched.iter()
            .enumerate()
            .filter_map(|(id, matched)| if matched { Some(id) } else { None })
    }

    /// Iterate over the archetypes this query matches.
    pub fn archetypes<'w>(&'w mut self, world: &'w World) -> impl Iterator<Item=&'w Arc<Archetype>> + 'w {
        self.refresh(world);
        let this: &'w Query = self;
        this.matched_ids().map(move |id| &world.archetypes()[id])
    }

    /// Iterate over every matching chunk, read-only.
    pub fn iter_chunks<'w>(&'w mut self, world: &'w World) -> impl Iterator<Item=&'w Chunk> + 'w {
        self.refresh(world);
        let this: &'w Query = self;
        this.matched_ids()
            .flat_map(move |id| world.chunk_sets()[id].iter_chunks())
    }

    /// Iterate over every matching chunk in parallel, read-only.
    pub fn par_iter_chunks<'w>(&'w mut self, world: &'w World) -> impl ParallelIterator<Item=&'w Chunk> + 'w {
        self.refresh(world);
        let chunk_sets = world.chunk_sets();
        let ids = self.matched_ids().collect::<Vec<_>>();
        ids.into_par_iter()
            .flat_map(move |id| chunk_sets[id].par_iter_chunks())
    }

    /// Take guarded read-write views of every matching chunk, in archetype
    /// then chunk order.
    ///
    /// Each chunk is handed out once, so guards may be processed in parallel.
    pub fn chunks_mut<'w>(&'w mut self, world: &'w mut World) -> Vec<ChunkGuard<'w>> {
        self.refresh(world);
        let this: &'w Query = self;
        let matched = &this.matched;
        let locks: &'w [Lock] = &this.locks;

        world.chunk_sets_mut()
            .iter_mut()
            .enumerate()
            .filter(|(id, _)| matched.get(*id).unwrap_or(false))
            .flat_map(|(_, chunk_set)| chunk_set.chunks_mut().iter_mut())
            .map(move |chunk| ChunkGuard::new(locks, chunk))
            .collect()
    }

    /// Count the entities this query matches.
    pub fn count(&mut self, world: &World) -> usize {
        self.refresh(world);
        self.matched_ids()
            .map(|id| world.chunk_sets()[id].len())
            .sum()
    }

    /// Collect the entities this query matches, in iteration order.
    pub fn entities(&mut self, world: &World) -> Vec<Entity> {
        self.iter_chunks(world)
            .flat_map(|chunk| chunk.entities().iter().copied())
            .collect()
    }
}

/// A guarded view of a single chunk matched by a query.
///
/// Read-locked columns may be borrowed any number of times. Each write-locked
/// column may be borrowed mutably once per guard.
pub struct ChunkGuard<'w> {
    locks: &'w [Lock],
    chunk: &'w Chunk,
    taken: AtomicU32,
    _marker: PhantomData<&'w mut Chunk>,
}

impl<'w> ChunkGuard<'w> {
    /// Create a new chunk guard. Taking `&mut` proves exclusive access.
    pub(crate) fn new(locks: &'w [Lock], chunk: &'w mut Chunk) -> ChunkGuard<'w> {
        ChunkGuard {
            locks,
            chunk,
            taken: AtomicU32::new(0),
            _marker: PhantomData,
        }
    }

    /// Get the archetype this chunk belongs to.
    pub fn archetype(&self) -> &'w Arc<Archetype> {
        self.chunk.archetype()
    }

    /// Get the number of entities in this chunk.
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    /// Returns true if this chunk contains no entities.
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// Returns true if the chunk's archetype has component `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.chunk.archetype().has_component_type(&T::type_id())
    }

    /// Get the entity IDs in this chunk.
    pub fn entities(&self) -> &'w [Entity] {
        self.chunk.entities()
    }

    /// Get a read-locked column.
    pub fn components<T: Component>(&self) -> Result<&'w [T], WorldError> {
        let allowed = T::type_id() == Entity::type_id()
            || self.locks.contains(&Lock::Read(T::type_id()));

        if allowed {
            if let Some(components) = self.chunk.components::<T>() {
                return Ok(components);
            }
        }

        Err(WorldError::AccessDenied {
            component: T::type_id().name(),
            access: Access::Read,
        })
    }

    /// Get a write-locked column. Each column can be taken once.
    pub fn components_mut<T: Component>(&self) -> Result<&'w mut [T], WorldError> {
        let denied = || WorldError::AccessDenied {
            component: T::type_id().name(),
            access: Access::Write,
        };

        let idx = self.locks.iter()
            .position(|l| l == &Lock::Write(T::type_id()))
            .ok_or_else(denied)?;

        let taken = self.taken.fetch_or(1 << idx, atomic::Ordering::Relaxed);
        if (taken & (1 << idx)) != 0 {
            return Err(denied());
        }

        let ptr = self.chunk.column_ptr::<T>().ok_or_else(denied)?;
        Ok(unsafe { slice::from_raw_parts_mut(ptr, self.chunk.len()) })
    }
}

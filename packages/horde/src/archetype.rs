//! Archetypes are the 'layout' of entities: the sorted set of attached component
//! types, and where each component column lives inside a chunk.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize};

use crossbeam_queue::SegQueue;

use crate::component::{Component, ComponentTypeID};
use crate::entity::Entity;

fn ensure_component_set_valid(component_types: &mut Vec<ComponentTypeID>) {
    let entity_component_type = Entity::type_id();

    if !component_types.contains(&entity_component_type) {
        component_types.push(entity_component_type);
    }
    component_types.sort();
    component_types.dedup();
}

/// A `Vec`-backed list of component types which ensures a couple of useful
/// invariants:
/// - Component types are sorted and unique
/// - `Entity` is included
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentVecSet(Vec<ComponentTypeID>);

impl ComponentVecSet {
    /// Create a new `ComponentVecSet` from a `Vec` of component types.
    pub fn new(mut component_types: Vec<ComponentTypeID>) -> ComponentVecSet {
        ensure_component_set_valid(&mut component_types);
        ComponentVecSet(component_types)
    }

    /// Return the sorted slice contents of this set.
    pub fn as_slice(&self) -> &[ComponentTypeID] {
        &self.0
    }

    /// Return the number of component types in this set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A set is never empty, it always contains `Entity`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if this set contains the given component.
    pub fn includes(&self, component_type: &ComponentTypeID) -> bool {
        self.0.binary_search(component_type).is_ok()
    }

    /// Returns true if this set contains all of the given component types.
    pub fn includes_all<'a>(&self, component_types: impl IntoIterator<Item=&'a ComponentTypeID>) -> bool {
        component_types.into_iter().all(|ct| self.includes(ct))
    }

    /// Insert a component type into this set.
    pub fn insert(&mut self, component_type: ComponentTypeID) {
        if let Err(idx) = self.0.binary_search(&component_type) {
            self.0.insert(idx, component_type);
        }
    }

    /// Remove a component type from this set. `Entity` can never be removed.
    pub fn remove(&mut self, component_type: ComponentTypeID) {
        if component_type == Entity::type_id() {
            return;
        }

        if let Ok(idx) = self.0.binary_search(&component_type) {
            self.0.remove(idx);
        }
    }

    /// Iterate over the component types in order.
    pub fn iter(&self) -> impl Iterator<Item=&ComponentTypeID> + '_ {
        self.0.iter()
    }
}

impl From<Vec<ComponentTypeID>> for ComponentVecSet {
    fn from(component_types: Vec<ComponentTypeID>) -> Self {
        ComponentVecSet::new(component_types)
    }
}

/// Where one component column lives inside a chunk page.
#[derive(Clone, Copy, Debug)]
pub struct Column {
    type_id: ComponentTypeID,
    offset: usize,
    size: usize,
    write_default: unsafe fn(*mut u8),
}

impl Column {
    /// The component type stored in this column.
    pub fn type_id(&self) -> ComponentTypeID {
        self.type_id
    }

    /// The byte offset of this column from the start of the chunk page.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The size of a single component in this column.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn default_writer(&self) -> unsafe fn(*mut u8) {
        self.write_default
    }
}

/// An archetype represents a particular layout of an entity.
///
/// It contains the sorted set of `ComponentTypeID`s, the column layout of its
/// chunks, and a pool of recycled chunk pages.
pub struct Archetype {
    id: usize,
    component_types: ComponentVecSet,
    columns: Vec<Column>,
    chunk_capacity: usize,
    chunk_layout: Layout,
    allocated_chunks: AtomicUsize,
    free_list: SegQueue<NonNull<u8>>,
}

unsafe impl Send for Archetype {}
unsafe impl Sync for Archetype {}

impl Archetype {
    /// Create a new archetype given the component set.
    pub(crate) fn new(id: usize, component_types: ComponentVecSet, chunk_capacity: usize) -> Archetype {
        let chunk_capacity = chunk_capacity.max(1);
        let (columns, chunk_layout) = Archetype::calculate_layout(&component_types, chunk_capacity);

        Archetype {
            id,
            component_types,
            columns,
            chunk_capacity,
            chunk_layout,
            allocated_chunks: AtomicUsize::new(0),
            free_list: SegQueue::new(),
        }
    }

    /// Return the unique archetype ID within its world.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Return the sorted list of component types in this archetype.
    pub fn component_types(&self) -> &ComponentVecSet {
        &self.component_types
    }

    /// Return the columns of this archetype, in component type order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get the maximum number of rows in a chunk of this archetype.
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Get the required memory layout for a chunk.
    pub fn chunk_layout(&self) -> Layout {
        self.chunk_layout
    }

    /// Returns true if this archetype contains the given component.
    pub fn has_component_type(&self, component_type: &ComponentTypeID) -> bool {
        self.component_types.includes(component_type)
    }

    /// Returns true if this archetype contains all of the given component types.
    pub fn has_all_component_types<'a>(&self, component_types: impl IntoIterator<Item=&'a ComponentTypeID>) -> bool {
        self.component_types.includes_all(component_types)
    }

    /// Returns the number of pages currently allocated for this archetype.
    ///
    /// This includes currently unused pages in the free pool.
    pub fn allocated_chunks(&self) -> usize {
        self.allocated_chunks.load(atomic::Ordering::Relaxed)
    }

    /// Get the column for a given component type.
    pub fn column(&self, component_type: ComponentTypeID) -> Option<&Column> {
        self.component_types.as_slice()
            .binary_search(&component_type)
            .ok()
            .map(|idx| &self.columns[idx])
    }

    /// Get the offset into the chunk storage for a given component type.
    pub fn component_offset(&self, component_type: ComponentTypeID) -> Option<usize> {
        self.column(component_type).map(Column::offset)
    }

    /// Deallocate all unused pages.
    pub fn flush(&self) {
        while let Some(p) = self.free_list.pop() {
            unsafe { alloc::dealloc(p.as_ptr(), self.chunk_layout) };
            self.allocated_chunks.fetch_sub(1, atomic::Ordering::Relaxed);
        }
    }

    /// Allocate a page for a new chunk, reusing a free one if possible.
    pub(crate) fn allocate_page(&self) -> NonNull<u8> {
        if self.chunk_layout.size() == 0 {
            return NonNull::dangling();
        }

        match self.free_list.pop() {
            Some(ptr) => ptr,
            None => {
                self.allocated_chunks.fetch_add(1, atomic::Ordering::Relaxed);
                let raw_ptr = unsafe { alloc::alloc(self.chunk_layout) };
                match NonNull::new(raw_ptr) {
                    Some(ptr) => ptr,
                    None => alloc::handle_alloc_error(self.chunk_layout),
                }
            }
        }
    }

    /// Return a page to the free pool.
    ///
    /// # Safety
    /// `p` must have come from `allocate_page` on this archetype and must not
    /// be used again by the caller.
    pub(crate) unsafe fn free_page(&self, p: NonNull<u8>) {
        if self.chunk_layout.size() > 0 {
            self.free_list.push(p)
        }
    }

    /// Calculate the column layout of chunks of this archetype.
    fn calculate_layout(component_types: &ComponentVecSet, capacity: usize) -> (Vec<Column>, Layout) {
        let mut offset = 0;
        let mut align = 1;

        let mut columns = Vec::with_capacity(component_types.len());

        for ty in component_types.iter() {
            let registration = ty.registration();
            let layout = registration.layout();

            let misalignment = offset % layout.align();
            if misalignment != 0 {
                offset += layout.align() - misalignment;
            }
            align = align.max(layout.align());

            columns.push(Column {
                type_id: *ty,
                offset,
                size: layout.size(),
                write_default: registration.default_writer(),
            });

            offset += capacity * layout.size();
        }

        match Layout::from_size_align(offset, align) {
            Ok(layout) => (columns, layout),
            Err(err) => panic!("chunk of {} rows is too large for {:?}: {}", capacity, component_types, err),
        }
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        self.flush()
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("component_types", &self.component_types)
            .field("chunk_capacity", &self.chunk_capacity)
            .finish()
    }
}

/// Shortcut for neatly creating component sets.
#[macro_export]
macro_rules! component_set {
    () => { $crate::archetype::ComponentVecSet::new(Vec::new()) };
    ($($x:expr),+ $(,)?) => {
        $crate::archetype::ComponentVecSet::new(vec![$($x),+])
    };
}

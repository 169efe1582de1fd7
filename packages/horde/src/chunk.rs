//! Logic for dealing with chunks of entities.

use std::fmt::{self, Debug, Formatter};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use crate::archetype::{Archetype, Column};
use crate::component::{Component, ComponentTypeID};
use crate::component_data::ComponentValueRef;
use crate::entity::Entity;

/// A single `Chunk` of entities of the same `Archetype`.
///
/// The components are stored as a struct of arrays in one contiguous page of
/// memory. Rows are always densely packed in `0..len()`.
pub struct Chunk {
    archetype: Arc<Archetype>,
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Chunk {}

unsafe impl Sync for Chunk {}

impl Chunk {
    /// Create a new, empty chunk for the given archetype.
    pub(crate) fn new(archetype: Arc<Archetype>) -> Chunk {
        let ptr = archetype.allocate_page();
        Chunk {
            archetype,
            ptr,
            len: 0,
        }
    }

    /// Return the `Archetype` this chunk belongs to.
    pub fn archetype(&self) -> &Arc<Archetype> {
        &self.archetype
    }

    /// Get the total number of entities currently stored in this chunk.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if this chunk contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if no more rows can be pushed.
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity()
    }

    /// Get the total capacity of this chunk.
    pub fn capacity(&self) -> usize {
        self.archetype.chunk_capacity()
    }

    /// Get the entity IDs stored in this chunk.
    pub fn entities(&self) -> &[Entity] {
        // Every archetype carries an `Entity` column at offset zero.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr() as *const Entity, self.len) }
    }

    /// Get a slice of components from this chunk.
    pub fn components<T: Component>(&self) -> Option<&[T]> {
        self.column_ptr::<T>()
            .map(|ptr| unsafe { slice::from_raw_parts(ptr as *const T, self.len) })
    }

    /// Get a mutable slice of components from this chunk.
    pub fn components_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        self.column_ptr::<T>()
            .map(|ptr| unsafe { slice::from_raw_parts_mut(ptr, self.len) })
    }

    /// Get a raw pointer to the start of the column of `T`.
    ///
    /// The column memory lives in the chunk page, not in `Chunk` itself, so
    /// disjoint columns may be borrowed independently.
    pub(crate) fn column_ptr<T: Component>(&self) -> Option<*mut T> {
        self.archetype.component_offset(T::type_id())
            .map(|offset| unsafe { self.ptr.as_ptr().add(offset) as *mut T })
    }

    unsafe fn slot(&self, column: &Column, row: usize) -> *mut u8 {
        self.ptr.as_ptr().add(column.offset() + column.size() * row)
    }

    /// Borrow a single component of a row as a type-erased value.
    pub fn value(&self, row: usize, type_id: ComponentTypeID) -> Option<ComponentValueRef<'_>> {
        assert!(row < self.len, "row {} out of bounds ({} rows)", row, self.len);
        self.archetype.column(type_id)
            .map(|column| unsafe {
                ComponentValueRef::from_raw(type_id, self.slot(column, row), column.size())
            })
    }

    /// Iterate over every component of a row, excluding `Entity`.
    pub fn row_values(&self, row: usize) -> impl Iterator<Item=ComponentValueRef<'_>> + '_ {
        assert!(row < self.len, "row {} out of bounds ({} rows)", row, self.len);
        let entity_type = Entity::type_id();
        self.archetype.columns().iter()
            .filter(move |column| column.type_id() != entity_type)
            .map(move |column| unsafe {
                ComponentValueRef::from_raw(column.type_id(), self.slot(column, row), column.size())
            })
    }

    /// Overwrite a single component of a row.
    ///
    /// Returns false if the component is not part of this chunk.
    pub(crate) fn write(&mut self, row: usize, value: ComponentValueRef<'_>) -> bool {
        assert!(row < self.len, "row {} out of bounds ({} rows)", row, self.len);
        if value.type_id() == Entity::type_id() {
            return false;
        }

        match self.archetype.column(value.type_id()) {
            Some(column) => {
                assert_eq!(column.size(), value.size());
                unsafe { value.copy_to(self.slot(column, row)) };
                true
            }
            None => false,
        }
    }

    /// Append a row, filling components from `values` and defaulting the rest.
    ///
    /// `values` must be sorted by type. Values whose type is not part of this
    /// chunk are skipped.
    pub(crate) fn push<'a>(&mut self, entity: Entity, values: impl IntoIterator<Item=ComponentValueRef<'a>>) -> usize {
        assert!(!self.is_full(), "tried to push into a full chunk");

        let row = self.len;
        self.len += 1;

        let entity_type = Entity::type_id();
        let archetype = self.archetype.clone();
        let mut values = values.into_iter().peekable();

        for column in archetype.columns() {
            let dest = unsafe { self.slot(column, row) };
            if column.type_id() == entity_type {
                unsafe { ptr::write(dest as *mut Entity, entity) };
                continue;
            }

            while values.peek().map_or(false, |v| v.type_id() < column.type_id()) {
                values.next();
            }

            match values.peek() {
                Some(value) if value.type_id() == column.type_id() => {
                    assert_eq!(column.size(), value.size());
                    unsafe { value.copy_to(dest) };
                    values.next();
                }
                _ => unsafe { (column.default_writer())(dest) },
            }
        }

        row
    }

    /// Copy a whole row from another chunk of the same archetype.
    pub(crate) fn copy_row_from(&mut self, row: usize, other: &Chunk, other_row: usize) {
        assert!(Arc::ptr_eq(&self.archetype, &other.archetype));
        assert!(row < self.len && other_row < other.len);

        for column in self.archetype.columns() {
            unsafe {
                ptr::copy_nonoverlapping(other.slot(column, other_row), self.slot(column, row), column.size());
            }
        }
    }

    /// Remove a row by moving the last row into its place.
    ///
    /// Returns the entity which was moved into `row`, if any.
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        assert!(row < self.len, "row {} out of bounds ({} rows)", row, self.len);

        let last = self.len - 1;
        if row != last {
            for column in self.archetype.columns() {
                unsafe {
                    ptr::copy_nonoverlapping(self.slot(column, last), self.slot(column, row), column.size());
                }
            }
        }

        self.len -= 1;
        if row != last {
            Some(self.entities()[row])
        } else {
            None
        }
    }

    /// Drop the last row. Components are `Copy`, so nothing needs dropping.
    pub(crate) fn pop(&mut self) {
        assert!(self.len > 0, "tried to pop from an empty chunk");
        self.len -= 1;
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe { self.archetype.free_page(self.ptr) };
    }
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<Chunk archetype #{}; {}/{} rows>", self.archetype.id(), self.len, self.capacity())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component_set;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Score(u32);

    impl Default for Score {
        fn default() -> Self {
            Score(7)
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Point(f32, f32);

    crate::component!(Score, Point);

    fn archetype(capacity: usize) -> Arc<Archetype> {
        Arc::new(Archetype::new(0, component_set!(Score::type_id(), Point::type_id()), capacity))
    }

    #[test]
    fn test_push_defaults() {
        let mut chunk = Chunk::new(archetype(4));
        let p = Point(1.0, 2.0);
        let row = chunk.push(Entity::from_raw_parts(5, 0), vec![ComponentValueRef::from(&p)]);

        assert_eq!(row, 0);
        assert_eq!(chunk.entities(), &[Entity::from_raw_parts(5, 0)]);
        assert_eq!(chunk.components::<Point>().unwrap(), &[Point(1.0, 2.0)]);
        assert_eq!(chunk.components::<Score>().unwrap(), &[Score(7)]);
    }

    #[test]
    fn test_swap_remove() {
        let mut chunk = Chunk::new(archetype(4));
        for i in 0..3 {
            let score = Score(i);
            chunk.push(Entity::from_raw_parts(i, 0), vec![ComponentValueRef::from(&score)]);
        }

        assert_eq!(chunk.swap_remove(0), Some(Entity::from_raw_parts(2, 0)));
        assert_eq!(chunk.components::<Score>().unwrap(), &[Score(2), Score(1)]);
        assert_eq!(chunk.swap_remove(1), None);
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn test_write_and_read() {
        let mut chunk = Chunk::new(archetype(2));
        chunk.push(Entity::from_raw_parts(0, 0), std::iter::empty());
        assert!(chunk.write(0, ComponentValueRef::from(&Score(11))));
        assert!(!chunk.write(0, ComponentValueRef::from(&Entity::NULL)));
        assert_eq!(chunk.value(0, Score::type_id()).and_then(|v| v.read::<Score>()), Some(Score(11)));

        let types = chunk.row_values(0).map(|v| v.type_id()).collect::<Vec<_>>();
        assert_eq!(types.len(), 2);
        assert!(!types.contains(&Entity::type_id()));
    }

    #[test]
    fn test_page_returned_on_drop() {
        let archetype = archetype(2);
        {
            let _chunk = Chunk::new(archetype.clone());
            assert_eq!(archetype.allocated_chunks(), 1);
        }
        let _again = Chunk::new(archetype.clone());
        assert_eq!(archetype.allocated_chunks(), 1);
    }
}

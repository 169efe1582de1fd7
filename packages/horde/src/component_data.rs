//! Containers for type-erased component data.
//!
//! Used to move rows between archetypes, to describe the initial components of
//! a new entity, and to store values inside command buffers.

use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr;

use crate::archetype::ComponentVecSet;
use crate::component::{Component, ComponentTypeID};

/// A reference to a single type-erased component value.
#[derive(Clone, Copy)]
pub struct ComponentValueRef<'a> {
    type_id: ComponentTypeID,
    ptr: *const u8,
    size: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> ComponentValueRef<'a> {
    /// Create a `ComponentValueRef` from a raw pointer.
    ///
    /// # Safety
    /// `ptr` must point at `size` bytes holding a valid value of the component
    /// type `type_id`, readable for the lifetime `'a`.
    pub unsafe fn from_raw(type_id: ComponentTypeID, ptr: *const u8, size: usize) -> ComponentValueRef<'a> {
        ComponentValueRef {
            type_id,
            ptr,
            size,
            _marker: PhantomData,
        }
    }

    /// Get the type ID of the referenced component value.
    pub fn type_id(&self) -> ComponentTypeID {
        self.type_id
    }

    /// The size in bytes of the referenced value.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy the value out if it is of type `T`.
    pub fn read<T: Component>(&self) -> Option<T> {
        if T::type_id() == self.type_id {
            Some(unsafe { ptr::read_unaligned(self.ptr as *const T) })
        } else {
            None
        }
    }

    /// Copy the raw value into `dest`.
    ///
    /// # Safety
    /// `dest` must be valid for writes of `size()` bytes and must not overlap
    /// the source.
    pub(crate) unsafe fn copy_to(&self, dest: *mut u8) {
        ptr::copy_nonoverlapping(self.ptr, dest, self.size);
    }
}

impl<'a, T: Component> From<&'a T> for ComponentValueRef<'a> {
    fn from(v: &'a T) -> Self {
        ComponentValueRef {
            type_id: T::type_id(),
            ptr: v as *const T as *const u8,
            size: mem::size_of::<T>(),
            _marker: PhantomData,
        }
    }
}

impl<'a> Debug for ComponentValueRef<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?}; {} bytes>", self.type_id, self.size)
    }
}

/// A growable, untyped byte store for component values.
///
/// Bytes are kept as `MaybeUninit` since component padding is never
/// initialised.
#[derive(Clone, Default)]
pub(crate) struct ValueBuffer(Vec<MaybeUninit<u8>>);

impl ValueBuffer {
    pub fn new() -> ValueBuffer {
        ValueBuffer(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    /// Append a value, returning its byte range.
    pub fn push(&mut self, value: ComponentValueRef<'_>) -> (usize, usize) {
        let start = self.0.len();
        self.0.reserve(value.size());
        unsafe {
            value.copy_to(self.0.as_mut_ptr().add(start) as *mut u8);
            self.0.set_len(start + value.size());
        }
        (start, start + value.size())
    }

    /// Overwrite a previously pushed value of the same size.
    pub fn overwrite(&mut self, start: usize, value: ComponentValueRef<'_>) {
        assert!(start + value.size() <= self.0.len());
        unsafe { value.copy_to(self.0.as_mut_ptr().add(start) as *mut u8) };
    }

    /// Append the whole of another buffer, returning the offset it landed at.
    pub fn extend(&mut self, other: &ValueBuffer) -> usize {
        let offset = self.0.len();
        self.0.extend_from_slice(&other.0);
        offset
    }

    /// Borrow a value previously pushed at `start..end`.
    pub fn get(&self, type_id: ComponentTypeID, start: usize, end: usize) -> ComponentValueRef<'_> {
        assert!(start <= end && end <= self.0.len());
        unsafe { ComponentValueRef::from_raw(type_id, self.0.as_ptr().add(start) as *const u8, end - start) }
    }
}

impl Debug for ValueBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<{} bytes>", self.0.len())
    }
}

#[derive(Clone, Copy, Debug)]
struct TemplateEntry {
    type_id: ComponentTypeID,
    start: usize,
    end: usize,
}

/// An owned set of component values, sorted by type.
///
/// Templates describe the initial components of a new entity, or a bundle of
/// components to add to an existing one. `Entity` itself is never stored.
#[derive(Clone, Debug, Default)]
pub struct EntityTemplate {
    data: ValueBuffer,
    entries: Vec<TemplateEntry>,
}

impl EntityTemplate {
    /// Create an empty template.
    pub fn new() -> EntityTemplate {
        EntityTemplate::default()
    }

    /// Add a component value to this template, builder style.
    pub fn with<T: Component>(mut self, value: T) -> EntityTemplate {
        self.set(value);
        self
    }

    /// Set a component value, replacing any existing value of that type.
    pub fn set<T: Component>(&mut self, value: T) {
        self.set_raw(ComponentValueRef::from(&value));
    }

    /// Set a type-erased component value.
    pub fn set_raw(&mut self, value: ComponentValueRef<'_>) {
        if value.type_id() == crate::entity::Entity::type_id() {
            return;
        }

        match self.entries.binary_search_by_key(&value.type_id(), |e| e.type_id) {
            Ok(idx) => {
                let entry = self.entries[idx];
                debug_assert_eq!(entry.end - entry.start, value.size());
                self.data.overwrite(entry.start, value);
            }
            Err(idx) => {
                let (start, end) = self.data.push(value);
                self.entries.insert(idx, TemplateEntry {
                    type_id: value.type_id(),
                    start,
                    end,
                });
            }
        }
    }

    /// Remove a component type from the template.
    ///
    /// Returns true if the type was present.
    pub fn remove(&mut self, type_id: ComponentTypeID) -> bool {
        match self.entries.binary_search_by_key(&type_id, |e| e.type_id) {
            Ok(idx) => {
                self.entries.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns true if the template holds a value of the given type.
    pub fn contains(&self, type_id: ComponentTypeID) -> bool {
        self.entries.binary_search_by_key(&type_id, |e| e.type_id).is_ok()
    }

    /// Copy out the value of type `T`, if present.
    pub fn get<T: Component>(&self) -> Option<T> {
        self.get_raw(T::type_id()).and_then(|v| v.read::<T>())
    }

    /// Borrow the type-erased value of a given type, if present.
    pub fn get_raw(&self, type_id: ComponentTypeID) -> Option<ComponentValueRef<'_>> {
        self.entries.binary_search_by_key(&type_id, |e| e.type_id)
            .ok()
            .map(|idx| {
                let entry = self.entries[idx];
                self.data.get(entry.type_id, entry.start, entry.end)
            })
    }

    /// The archetype this template describes, including `Entity`.
    pub fn component_types(&self) -> ComponentVecSet {
        ComponentVecSet::new(self.entries.iter().map(|e| e.type_id).collect())
    }

    /// Iterate over the values in type order.
    pub fn iter(&self) -> impl Iterator<Item=ComponentValueRef<'_>> + Clone + '_ {
        self.entries.iter()
            .map(move |e| self.data.get(e.type_id, e.start, e.end))
    }

    /// The number of component values in this template.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the template holds no values.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all values, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::Entity;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Mass(f32);

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Charge(i64, u8);

    crate::component!(Mass, Charge);

    #[test]
    fn test_value_ref() {
        let m = Mass(2.5);
        let v = ComponentValueRef::from(&m);
        assert_eq!(v.type_id(), Mass::type_id());
        assert_eq!(v.size(), 4);
        assert_eq!(v.read::<Mass>(), Some(Mass(2.5)));
        assert_eq!(v.read::<Charge>(), None);
    }

    #[test]
    fn test_template() {
        let mut template = EntityTemplate::new()
            .with(Charge(-3, 1))
            .with(Mass(1.0));

        assert_eq!(template.len(), 2);
        assert_eq!(template.get::<Mass>(), Some(Mass(1.0)));

        template.set(Mass(4.0));
        assert_eq!(template.len(), 2);
        assert_eq!(template.get::<Mass>(), Some(Mass(4.0)));
        assert_eq!(template.get::<Charge>(), Some(Charge(-3, 1)));

        let types = template.iter().map(|v| v.type_id()).collect::<Vec<_>>();
        assert!(types.windows(2).all(|w| w[0] < w[1]));

        let set = template.component_types();
        assert!(set.includes(&Entity::type_id()));
        assert_eq!(set.len(), 3);

        assert!(template.remove(Mass::type_id()));
        assert!(!template.remove(Mass::type_id()));
        assert_eq!(template.get::<Mass>(), None);
    }

    #[test]
    fn test_template_ignores_entity() {
        let template = EntityTemplate::new().with(Entity::from_raw_parts(1, 0));
        assert!(template.is_empty());
    }
}

//! Component types and the global registry which numbers them.
//!
//! Every piece of entity state is a component: a plain `Copy` value stored
//! column-wise inside the chunks of an archetype. There is no intrinsic value
//! to an entity beyond the components attached to it.
//!
//! Each component type is allocated a unique ID the first time it is used.
//! The `component!` macro assigns this unique ID.

use std::alloc::Layout;
use std::any::type_name;
use std::fmt::{self, Debug, Formatter};
use std::ptr;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::{Lazy, OnceCell};

use crate::entity::Entity;

/// The registry index of a component type. Index 0 is always `Entity`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeID(usize);

struct ComponentRegistry {
    component_types: Vec<Arc<ComponentRegistration>>,
}

static COMPONENT_REGISTRY: Lazy<RwLock<ComponentRegistry>> = Lazy::new(|| {
    RwLock::new(ComponentRegistry {
        component_types: vec![
            Arc::new(ComponentRegistration::new::<Entity>(ComponentTypeID(0))),
        ],
    })
});

impl ComponentTypeID {
    /// Wrap a raw registry index.
    pub(crate) const fn new(inner: usize) -> ComponentTypeID {
        ComponentTypeID(inner)
    }

    /// Add `T` to the registry, returning its new index.
    pub fn register<T: Component>() -> ComponentTypeID {
        let mut registry = COMPONENT_REGISTRY.write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = ComponentTypeID(registry.component_types.len());
        registry.component_types.push(Arc::new(ComponentRegistration::new::<T>(id)));
        log::trace!("registered component {} as #{}", type_name::<T>(), id.0);
        id
    }

    fn safe_registration(&self) -> Option<Arc<ComponentRegistration>> {
        let registry = COMPONENT_REGISTRY.read()
            .unwrap_or_else(PoisonError::into_inner);
        registry.component_types.get(self.0).cloned()
    }

    /// Look up the registration for this type.
    ///
    /// IDs are only handed out by the registry, so every ID has a registration.
    pub fn registration(&self) -> Arc<ComponentRegistration> {
        let registry = COMPONENT_REGISTRY.read()
            .unwrap_or_else(PoisonError::into_inner);
        registry.component_types[self.0].clone()
    }

    /// The raw registry index.
    pub fn id(&self) -> usize {
        self.0
    }

    /// The layout of one value of this type.
    pub fn layout(&self) -> Layout {
        self.registration().layout()
    }

    /// Return the name of this component type.
    pub fn name(&self) -> &'static str {
        self.safe_registration()
            .map_or("<unregistered>", |r| r.name())
    }
}

impl Debug for ComponentTypeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.safe_registration() {
            Some(reg) => write!(f, "{}", reg.name()),
            None => write!(f, "ComponentTypeID(#{} missing)", self.0),
        }
    }
}

/// Registers a component type on first use. Used by `component!`.
pub struct AutoComponentTypeID(OnceCell<ComponentTypeID>);

impl AutoComponentTypeID {
    pub const fn new() -> AutoComponentTypeID {
        AutoComponentTypeID(OnceCell::new())
    }

    /// The ID of `T`, registering it if needed.
    pub fn get<T: Component>(&self) -> ComponentTypeID {
        *self.0.get_or_init(ComponentTypeID::register::<T>)
    }
}

/// Plain data which can be stored in a chunk column.
///
/// Unsafe to implement: chunks trust `type_id` to cast raw columns back to
/// `Self`, so it must be unique to the type. Use `component!` instead.
pub unsafe trait Component: Debug + Default + Copy + Send + Sync + 'static {
    /// The registry ID of this type.
    fn type_id() -> ComponentTypeID;

    /// The layout of one value.
    fn layout() -> Layout;
}

/// Everything the store needs to handle a component type without knowing it
/// statically.
#[derive(Clone, Copy)]
pub struct ComponentRegistration {
    type_id: ComponentTypeID,
    layout: Layout,
    write_default: unsafe fn(*mut u8),
    name: &'static str,
}

impl ComponentRegistration {
    /// Describe `T`.
    pub fn new<T: Component>(type_id: ComponentTypeID) -> ComponentRegistration {
        unsafe fn write_default<T: Component>(dest: *mut u8) {
            ptr::write(dest as *mut T, T::default());
        }

        ComponentRegistration {
            type_id,
            layout: T::layout(),
            write_default: write_default::<T>,
            name: type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> ComponentTypeID {
        self.type_id
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The Rust type name, for logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The raw default-writer for this component type.
    pub(crate) fn default_writer(&self) -> unsafe fn(*mut u8) {
        self.write_default
    }

    /// Write the default value of this component into `dest`.
    ///
    /// # Safety
    /// `dest` must be valid for writes of `layout().size()` bytes and aligned
    /// to `layout().align()`.
    pub unsafe fn write_default(&self, dest: *mut u8) {
        (self.write_default)(dest)
    }
}

impl Debug for ComponentRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<ComponentRegistration {} #{}>", self.name, self.type_id.id())
    }
}

/// Implement the `Component` trait on one or more types.
///
/// Component types must implement `Copy`, `Default` and `Debug`.
#[macro_export]
macro_rules! component {
    ($($i:ident),+ $(,)?) => {
        $(
            const _: () = {
                static INIT_TYPE: $crate::component::AutoComponentTypeID =
                    $crate::component::AutoComponentTypeID::new();

                unsafe impl $crate::component::Component for $i {
                    fn type_id() -> $crate::component::ComponentTypeID {
                        INIT_TYPE.get::<$i>()
                    }

                    fn layout() -> ::core::alloc::Layout {
                        ::core::alloc::Layout::new::<$i>()
                    }
                }
            };
        )+
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_uniqueness() {
        #[derive(Debug, Clone, Copy, Default)]
        struct A;
        #[derive(Debug, Clone, Copy, Default)]
        struct B;

        component!(A, B);

        assert_ne!(Entity::type_id(), A::type_id());
        assert_ne!(Entity::type_id(), B::type_id());
        assert_ne!(A::type_id(), B::type_id());
        assert_eq!(A::type_id(), A::type_id());
    }

    #[test]
    fn test_default() {
        #[derive(Debug, Clone, Copy)]
        struct A(u8);

        component!(A);

        impl Default for A {
            fn default() -> A {
                A(42)
            }
        }

        let registration = A::type_id().registration();
        assert_eq!(registration.type_id(), A::type_id());
        assert_eq!(registration.layout(), Layout::new::<A>());
        assert!(registration.name().ends_with("A"));

        let mut raw = [0u8];
        unsafe { registration.write_default(raw.as_mut_ptr()) };
        assert_eq!(raw[0], 42);
    }
}

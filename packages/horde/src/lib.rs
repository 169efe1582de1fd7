//! A deterministic archetype entity component system.
//!
//! Entities with the same set of components are stored together in chunks,
//! one column per component. Systems run over the chunks matched by a
//! `Query`, optionally in parallel, and record structural changes into a
//! `CommandBuffer` which is played back once the pass is done.
//!
//! The `sim` module builds a unit simulation on top of the kernel whose
//! results do not depend on how its passes are scheduled.

pub use archetype::Archetype;
pub use chunk::Chunk;
pub use chunk_set::ChunkSet;
pub use command_buffer::{
    CommandBuffer,
    EntityRef,
    Placeholder,
    PlaybackReport,
};
pub use component::{
    Component,
    ComponentTypeID,
};
pub use component_data::{ComponentValueRef, EntityTemplate};
pub use entity::{Entity, EntityLocation};
pub use error::{WorldError, StructuralChange, Access};
pub use query::{ChunkGuard, Lock, Query};
pub use sim::{SimConfig, Simulation, TickStats};
pub use system::{
    BoxSystem,
    ExecutionMode,
    Flush,
    System,
    SystemContext,
    SystemGroup,
};
pub use world::{World, WorldConfig};

pub mod error;
pub mod component;
pub mod component_data;
mod entity;
pub mod archetype;

pub mod chunk;
pub mod chunk_set;
pub mod query;

pub mod command_buffer;
pub mod rng;

pub mod world;
pub mod system;
pub mod sim;

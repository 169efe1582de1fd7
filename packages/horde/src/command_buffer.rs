//! Deferred structural changes.
//!
//! Structural changes (creating or destroying entities, adding or removing
//! components) move rows between chunks, so they cannot happen while a pass is
//! iterating. A `CommandBuffer` records them instead, and `playback` applies
//! them once the pass is done.

use crate::component::{Component, ComponentTypeID};
use crate::component_data::{ComponentValueRef, EntityTemplate, ValueBuffer};
use crate::entity::Entity;
use crate::error::WorldError;
use crate::world::World;

/// Stands in for an entity which will be created during playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placeholder(u32);

impl Placeholder {
    /// The position of this placeholder within its buffer.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// The target of a recorded command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRef {
    Entity(Entity),
    Placeholder(Placeholder),
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::Entity(entity)
    }
}

impl From<Placeholder> for EntityRef {
    fn from(placeholder: Placeholder) -> Self {
        EntityRef::Placeholder(placeholder)
    }
}

#[derive(Clone, Copy, Debug)]
struct ValueSlot {
    type_id: ComponentTypeID,
    start: usize,
    end: usize,
}

#[derive(Clone, Copy, Debug)]
enum Command {
    Create(Placeholder, usize),
    Destroy(EntityRef),
    Insert(EntityRef, usize),
    Add(EntityRef, ValueSlot),
    Remove(EntityRef, ComponentTypeID),
    Set(EntityRef, ValueSlot),
}

/// A command which failed during playback and was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackFailure {
    /// The position of the command in recording order.
    pub index: usize,
    pub error: WorldError,
}

/// The outcome of playing back a `CommandBuffer`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// The number of commands which were applied.
    pub applied: usize,
    /// Commands which were skipped, in recording order.
    pub failed: Vec<PlaybackFailure>,
    created: Vec<Option<Entity>>,
}

impl PlaybackReport {
    /// Get the entity a placeholder resolved to.
    pub fn entity(&self, placeholder: Placeholder) -> Option<Entity> {
        self.created.get(placeholder.index()).copied().flatten()
    }

    /// All entities created during playback, in recording order.
    pub fn created(&self) -> impl Iterator<Item=Entity> + '_ {
        self.created.iter().filter_map(|e| *e)
    }
}

/// An append-only log of structural changes.
///
/// Commands are applied in exactly the order they were recorded. Buffers
/// filled by different workers can be concatenated with `append`, which keeps
/// the result independent of how the work was scheduled.
#[derive(Clone, Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    templates: Vec<EntityTemplate>,
    component_data: ValueBuffer,
    placeholders: u32,
}

impl CommandBuffer {
    /// Create a new, empty, command buffer.
    pub fn new() -> CommandBuffer {
        CommandBuffer::default()
    }

    /// Merge several command buffers, preserving their order.
    pub fn merge(buffers: impl IntoIterator<Item=CommandBuffer>) -> CommandBuffer {
        let mut dest = CommandBuffer::new();
        for buffer in buffers {
            dest.append(buffer);
        }
        dest
    }

    /// The number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Forget every recorded command.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.templates.clear();
        self.component_data.clear();
        self.placeholders = 0;
    }

    /// Record the creation of an entity.
    pub fn record_create(&mut self, template: EntityTemplate) -> Placeholder {
        let placeholder = Placeholder(self.placeholders);
        self.placeholders += 1;
        self.templates.push(template);
        self.commands.push(Command::Create(placeholder, self.templates.len() - 1));
        placeholder
    }

    /// Record the destruction of an entity.
    pub fn record_destroy(&mut self, entity: impl Into<EntityRef>) {
        self.commands.push(Command::Destroy(entity.into()));
    }

    /// Record adding several components to an entity in one move.
    pub fn record_insert(&mut self, entity: impl Into<EntityRef>, template: EntityTemplate) {
        self.templates.push(template);
        self.commands.push(Command::Insert(entity.into(), self.templates.len() - 1));
    }

    /// Record adding a component to an entity.
    pub fn record_add<T: Component>(&mut self, entity: impl Into<EntityRef>, value: T) {
        let slot = self.push_value(ComponentValueRef::from(&value));
        self.commands.push(Command::Add(entity.into(), slot));
    }

    /// Record removing a component from an entity.
    pub fn record_remove<T: Component>(&mut self, entity: impl Into<EntityRef>) {
        self.commands.push(Command::Remove(entity.into(), T::type_id()));
    }

    /// Record overwriting a component of an entity.
    pub fn record_set<T: Component>(&mut self, entity: impl Into<EntityRef>, value: T) {
        let slot = self.push_value(ComponentValueRef::from(&value));
        self.commands.push(Command::Set(entity.into(), slot));
    }

    fn push_value(&mut self, value: ComponentValueRef<'_>) -> ValueSlot {
        let (start, end) = self.component_data.push(value);
        ValueSlot {
            type_id: value.type_id(),
            start,
            end,
        }
    }

    /// Append another buffer's commands after this buffer's commands.
    ///
    /// Placeholders from `other` are renumbered so they stay distinct.
    pub fn append(&mut self, other: CommandBuffer) {
        if other.is_empty() {
            return;
        }

        let placeholder_offset = self.placeholders;
        let template_offset = self.templates.len();
        let data_offset = self.component_data.extend(&other.component_data);

        let remap_ref = |r: EntityRef| match r {
            EntityRef::Placeholder(p) => EntityRef::Placeholder(Placeholder(p.0 + placeholder_offset)),
            entity => entity,
        };
        let remap_slot = |s: ValueSlot| ValueSlot {
            type_id: s.type_id,
            start: s.start + data_offset,
            end: s.end + data_offset,
        };

        self.commands.extend(other.commands.into_iter().map(|command| match command {
            Command::Create(p, t) => Command::Create(Placeholder(p.0 + placeholder_offset), t + template_offset),
            Command::Destroy(r) => Command::Destroy(remap_ref(r)),
            Command::Insert(r, t) => Command::Insert(remap_ref(r), t + template_offset),
            Command::Add(r, s) => Command::Add(remap_ref(r), remap_slot(s)),
            Command::Remove(r, ty) => Command::Remove(remap_ref(r), ty),
            Command::Set(r, s) => Command::Set(remap_ref(r), remap_slot(s)),
        }));
        self.templates.extend(other.templates);
        self.placeholders += other.placeholders;
    }

    /// Apply every recorded command to the world, then clear the buffer.
    ///
    /// Commands which fail with a recoverable error are skipped and reported.
    /// Running out of entity capacity aborts playback and is returned as an
    /// error, leaving the remaining commands unapplied.
    pub fn playback(&mut self, world: &mut World) -> Result<PlaybackReport, WorldError> {
        let mut report = PlaybackReport {
            applied: 0,
            failed: Vec::new(),
            created: vec![None; self.placeholders as usize],
        };

        let commands = std::mem::take(&mut self.commands);
        for (index, command) in commands.iter().enumerate() {
            match self.apply(world, &mut report.created, *command) {
                Ok(()) => report.applied += 1,
                Err(error) if error.is_fatal() => {
                    log::error!("command buffer playback aborted at command {}: {}", index, error);
                    self.clear();
                    return Err(error);
                }
                Err(error) => {
                    log::debug!("skipping command {} ({:?}): {}", index, command, error);
                    report.failed.push(PlaybackFailure { index, error });
                }
            }
        }

        self.clear();
        Ok(report)
    }

    fn apply(&self, world: &mut World, created: &mut [Option<Entity>], command: Command) -> Result<(), WorldError> {
        match command {
            Command::Create(placeholder, template) => {
                let entity = world.create_from(&self.templates[template])?;
                created[placeholder.index()] = Some(entity);
                Ok(())
            }
            Command::Destroy(r) => world.destroy(resolve(created, r)?),
            Command::Insert(r, template) => world.insert(resolve(created, r)?, &self.templates[template]),
            Command::Add(r, slot) => {
                let value = self.component_data.get(slot.type_id, slot.start, slot.end);
                world.add_raw(resolve(created, r)?, value)
            }
            Command::Remove(r, type_id) => world.remove_raw(resolve(created, r)?, type_id),
            Command::Set(r, slot) => {
                let value = self.component_data.get(slot.type_id, slot.start, slot.end);
                world.set_raw(resolve(created, r)?, value)
            }
        }
    }
}

fn resolve(created: &[Option<Entity>], r: EntityRef) -> Result<Entity, WorldError> {
    match r {
        EntityRef::Entity(entity) => Ok(entity),
        EntityRef::Placeholder(p) => created.get(p.index())
            .copied()
            .flatten()
            .ok_or(WorldError::NotFound(Entity::NULL)),
    }
}

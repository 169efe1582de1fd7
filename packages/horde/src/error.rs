//! Error types shared by the store, queries and command playback.

use std::fmt;

use thiserror::Error;

use crate::entity::Entity;

/// The kind of structural change which was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuralChange {
    Add,
    Remove,
}

impl fmt::Display for StructuralChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralChange::Add => f.write_str("add"),
            StructuralChange::Remove => f.write_str("remove"),
        }
    }
}

/// The kind of column access a chunk guard was asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Errors produced when manipulating a `World`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WorldError {
    /// The entity handle is stale or was never allocated.
    #[error("entity {0} does not exist")]
    NotFound(Entity),

    /// The entity is alive but does not carry the requested component.
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },

    /// Adding an already-present component or removing an absent one.
    #[error("cannot {change} {component} on entity {entity}")]
    InvalidStructuralChange {
        entity: Entity,
        component: &'static str,
        change: StructuralChange,
    },

    /// The entity index space is exhausted.
    #[error("entity capacity of {capacity} exhausted")]
    CapacityExceeded {
        capacity: u32,
    },

    /// A chunk guard was asked for a column its query does not lock.
    #[error("query does not grant {access} access to {component}")]
    AccessDenied {
        component: &'static str,
        access: Access,
    },
}

impl WorldError {
    /// Returns true for lookups which failed because the entity or its
    /// component is gone. These are recoverable and usually ignored.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorldError::NotFound(_) | WorldError::MissingComponent { .. })
    }

    /// Returns true if this error must abort the current tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorldError::CapacityExceeded { .. } | WorldError::AccessDenied { .. })
    }
}

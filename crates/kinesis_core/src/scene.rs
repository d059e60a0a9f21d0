//! # Scene Registry
//!
//! A typed per-entity component registry. Lookups are keyed by the closed
//! [`ComponentKind`] enumeration and return typed references or a
//! [`LookupError`], never an untyped handle.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::entity::{EntityAllocator, EntityId};
use crate::math::Pose;
use crate::physics::BodyHandle;

/// Every component kind the sync layer can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentKind {
    /// Renderable transform.
    Mesh = 0,
    /// Body owned by the physics engine.
    RigidBody = 1,
}

impl ComponentKind {
    #[inline]
    const fn bit(self) -> u64 {
        1 << (self as u8)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh => f.write_str("Mesh"),
            Self::RigidBody => f.write_str("RigidBody"),
        }
    }
}

/// Errors from component lookups.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    /// The entity was never spawned or has been despawned.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The entity exists but lacks the component.
    #[error("entity {entity} has no {kind} component")]
    Missing {
        /// Entity that was queried.
        entity: EntityId,
        /// Component that was requested.
        kind: ComponentKind,
    },
}

/// Renderable transform of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mesh {
    /// Pose the renderer draws.
    pub pose: Pose,
}

/// Link from an entity to its physics body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RigidBody {
    /// Handle into the physics world.
    pub handle: BodyHandle,
}

#[derive(Debug, Default)]
struct Slot {
    /// Bitmask of attached components.
    mask: u64,
    mesh: Option<Mesh>,
    body: Option<RigidBody>,
}

/// Entity/component store handed to sync components each update.
#[derive(Debug, Default)]
pub struct Scene {
    allocator: EntityAllocator,
    slots: HashMap<EntityId, Slot>,
}

impl Scene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns an entity with no components.
    pub fn spawn(&mut self) -> EntityId {
        let id = self.allocator.allocate();
        self.slots.insert(id, Slot::default());
        id
    }

    /// Despawns an entity and drops its components.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        self.slots.remove(&entity);
        self.allocator.free(entity)
    }

    /// Returns true if the entity is alive.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.slots.contains_key(&entity)
    }

    /// Returns true if the entity has the component.
    #[must_use]
    pub fn has(&self, entity: EntityId, kind: ComponentKind) -> bool {
        self.slots
            .get(&entity)
            .is_some_and(|slot| slot.mask & kind.bit() != 0)
    }

    /// Attaches or replaces a mesh.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if the entity is not alive.
    pub fn insert_mesh(&mut self, entity: EntityId, mesh: Mesh) -> Result<(), LookupError> {
        let slot = self.slot_mut(entity)?;
        slot.mesh = Some(mesh);
        slot.mask |= ComponentKind::Mesh.bit();
        Ok(())
    }

    /// Attaches or replaces a physics body link.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if the entity is not alive.
    pub fn insert_body(&mut self, entity: EntityId, body: RigidBody) -> Result<(), LookupError> {
        let slot = self.slot_mut(entity)?;
        slot.body = Some(body);
        slot.mask |= ComponentKind::RigidBody.bit();
        Ok(())
    }

    /// Mesh of `entity`.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or `Missing`.
    pub fn mesh(&self, entity: EntityId) -> Result<&Mesh, LookupError> {
        self.slot(entity)?.mesh.as_ref().ok_or(LookupError::Missing {
            entity,
            kind: ComponentKind::Mesh,
        })
    }

    /// Mutable mesh of `entity`.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or `Missing`.
    pub fn mesh_mut(&mut self, entity: EntityId) -> Result<&mut Mesh, LookupError> {
        self.slot_mut(entity)?.mesh.as_mut().ok_or(LookupError::Missing {
            entity,
            kind: ComponentKind::Mesh,
        })
    }

    /// Physics body link of `entity`.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` or `Missing`.
    pub fn body(&self, entity: EntityId) -> Result<RigidBody, LookupError> {
        self.slot(entity)?.body.ok_or(LookupError::Missing {
            entity,
            kind: ComponentKind::RigidBody,
        })
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no entity is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, entity: EntityId) -> Result<&Slot, LookupError> {
        self.slots.get(&entity).ok_or(LookupError::UnknownEntity(entity))
    }

    fn slot_mut(&mut self, entity: EntityId) -> Result<&mut Slot, LookupError> {
        self.slots
            .get_mut(&entity)
            .ok_or(LookupError::UnknownEntity(entity))
    }
}

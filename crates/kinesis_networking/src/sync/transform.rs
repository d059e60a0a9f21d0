//! Mesh pose replication.
//!
//! The host samples the mesh pose and broadcasts it. Clients buffer what
//! arrives with the local receipt time and render one tick interval in the
//! past, blending between the two snapshots around that instant.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use kinesis_core::{EntityId, Scene};
use tracing::{debug, warn};

use super::{InterpolationBuffer, NetComponent, TimedSnapshot, UpdateContext};
use crate::error::SetupError;
use crate::events::OwnerId;
use crate::protocol::{Message, Topic};
use crate::session::SyncContext;

/// When the host samples the pose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cadence {
    /// Once per fixed tick, for physically driven entities.
    #[default]
    EveryTick,
    /// Once per rendered frame.
    EveryFrame,
}

/// Replicates one entity's mesh pose from host to clients.
pub struct TransformSync {
    entity: EntityId,
    ctx: SyncContext,
    owner: OwnerId,
    cadence: Cadence,
    interpolate: bool,
    active: bool,
    inbox: Rc<RefCell<VecDeque<TimedSnapshot>>>,
    buffer: InterpolationBuffer,
    published: u64,
}

impl TransformSync {
    /// Creates the component. Interpolation and rotation blending follow the
    /// session config.
    #[must_use]
    pub fn new(entity: EntityId, ctx: &SyncContext) -> Self {
        let owner = ctx.role.bus().register_owner();
        Self {
            entity,
            owner,
            cadence: Cadence::EveryTick,
            interpolate: ctx.config.interpolate,
            active: false,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            buffer: InterpolationBuffer::new(ctx.config.rotation_blend),
            published: 0,
            ctx: ctx.clone(),
        }
    }

    /// Sets when the host samples.
    #[must_use]
    pub const fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    /// Overrides interpolation for this entity. When off, each snapshot is
    /// applied as it arrives, in receipt order.
    #[must_use]
    pub const fn with_interpolation(mut self, interpolate: bool) -> Self {
        self.interpolate = interpolate;
        self
    }

    /// Snapshots waiting to be rendered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.inbox.borrow().len()
    }

    /// Poses broadcast so far.
    #[must_use]
    pub const fn published(&self) -> u64 {
        self.published
    }

    fn publish(&mut self, scene: &Scene) {
        let pose = match scene.mesh(self.entity) {
            Ok(mesh) => mesh.pose,
            Err(e) => {
                debug!(entity = %self.entity, error = %e, "nothing to publish");
                return;
            }
        };
        let message = Message::MeshTransformUpdate { entity: self.entity, update: pose.into() };
        match self.ctx.role.send(&message) {
            Ok(()) => self.published += 1,
            Err(e) => warn!(entity = %self.entity, error = %e, "transform broadcast failed"),
        }
    }

    fn follow(&mut self, ctx: &mut UpdateContext<'_>) {
        let arrived: Vec<TimedSnapshot> = self.inbox.borrow_mut().drain(..).collect();
        let Ok(mesh) = ctx.scene.mesh_mut(self.entity) else {
            return;
        };

        if !self.interpolate {
            if let Some(last) = arrived.last() {
                mesh.pose = last.pose;
            }
            return;
        }

        for snapshot in arrived {
            self.buffer.push(snapshot.pose, snapshot.received_at);
        }
        if let Some(pose) = self.buffer.sample(ctx.now_ms - ctx.tick_interval_ms) {
            mesh.pose = pose;
        }
    }
}

impl NetComponent for TransformSync {
    fn entity(&self) -> EntityId {
        self.entity
    }

    fn activate(&mut self, scene: &Scene) -> Result<(), SetupError> {
        if self.active {
            return Err(SetupError::AlreadyActive(self.entity));
        }
        scene.mesh(self.entity)?;

        if !self.ctx.role.is_host() {
            let inbox = Rc::clone(&self.inbox);
            let time = Rc::clone(&self.ctx.time);
            self.ctx.role.bus().subscribe_owned(
                self.owner,
                Topic::MeshTransformUpdate(self.entity),
                move |message| {
                    if let Message::MeshTransformUpdate { update, .. } = message {
                        inbox.borrow_mut().push_back(TimedSnapshot {
                            pose: (*update).into(),
                            received_at: time.now_ms(),
                        });
                    }
                },
            );
        }
        self.active = true;
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut UpdateContext<'_>) {
        if !self.active {
            return;
        }
        if self.ctx.role.is_host() {
            if self.cadence == Cadence::EveryFrame {
                self.publish(ctx.scene);
            }
        } else {
            self.follow(ctx);
        }
    }

    fn on_fixed_update(&mut self, ctx: &mut UpdateContext<'_>) {
        if self.active && self.cadence == Cadence::EveryTick && self.ctx.role.is_host() {
            self.publish(ctx.scene);
        }
    }

    fn detach(&mut self) {
        self.ctx.role.bus().unsubscribe_owner(self.owner);
        self.inbox.borrow_mut().clear();
        self.buffer.clear();
        self.active = false;
    }
}

//! Named animation triggers, host to clients.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use kinesis_core::{EntityId, Scene};
use tracing::warn;

use super::{NetComponent, UpdateContext};
use crate::error::SetupError;
use crate::events::OwnerId;
use crate::protocol::{Message, Topic};
use crate::session::SyncContext;

/// Whatever plays clips on the local side.
pub trait AnimationPlayer {
    /// Starts `name` on `entity`.
    fn play(&mut self, entity: EntityId, name: &str);
}

/// Mirrors `play` calls made on the host.
pub struct AnimationSync {
    entity: EntityId,
    ctx: SyncContext,
    owner: OwnerId,
    player: Box<dyn AnimationPlayer>,
    pending: Rc<RefCell<VecDeque<String>>>,
    active: bool,
}

impl AnimationSync {
    /// Creates the component around a local player.
    #[must_use]
    pub fn new(entity: EntityId, ctx: &SyncContext, player: impl AnimationPlayer + 'static) -> Self {
        Self {
            entity,
            owner: ctx.role.bus().register_owner(),
            ctx: ctx.clone(),
            player: Box::new(player),
            pending: Rc::new(RefCell::new(VecDeque::new())),
            active: false,
        }
    }

    /// Host only: plays `name` locally and tells every client to do the same.
    ///
    /// Returns false on a client, where the call is ignored.
    pub fn play(&mut self, name: &str) -> bool {
        if !self.ctx.role.is_host() {
            return false;
        }
        self.player.play(self.entity, name);
        let message = Message::StartAnimation { entity: self.entity, name: name.to_owned() };
        if let Err(e) = self.ctx.role.send(&message) {
            warn!(entity = %self.entity, error = %e, "animation broadcast failed");
        }
        true
    }
}

impl NetComponent for AnimationSync {
    fn entity(&self) -> EntityId {
        self.entity
    }

    fn activate(&mut self, scene: &Scene) -> Result<(), SetupError> {
        if self.active {
            return Err(SetupError::AlreadyActive(self.entity));
        }
        if !scene.contains(self.entity) {
            return Err(SetupError::UnknownEntity(self.entity));
        }
        if !self.ctx.role.is_host() {
            let pending = Rc::clone(&self.pending);
            self.ctx.role.bus().subscribe_owned(
                self.owner,
                Topic::StartAnimation(self.entity),
                move |message| {
                    if let Message::StartAnimation { name, .. } = message {
                        pending.borrow_mut().push_back(name.clone());
                    }
                },
            );
        }
        self.active = true;
        Ok(())
    }

    fn on_update(&mut self, _ctx: &mut UpdateContext<'_>) {
        let names: Vec<String> = self.pending.borrow_mut().drain(..).collect();
        for name in names {
            self.player.play(self.entity, &name);
        }
    }

    fn detach(&mut self) {
        self.ctx.role.bus().unsubscribe_owner(self.owner);
        self.pending.borrow_mut().clear();
        self.active = false;
    }
}

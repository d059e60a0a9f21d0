//! # Entity Synchronization
//!
//! Per-entity components that keep a remote entity in step with the host.
//!
//! ```text
//!             HOST                                   CLIENT
//!  on_fixed_update ─► sample pose ─► send ═══► bus handler ─► inbox
//!                                                              │
//!                                         on_update / on_fixed_update
//!                                                              ▼
//!                                                  scene / physics writes
//! ```
//!
//! Bus handlers never touch the scene. They queue what arrived, and the
//! component applies it during the next update, when it has exclusive access
//! to the scene and the physics world.

mod animation;
mod interpolation;
mod transform;

use kinesis_core::{EntityId, PhysicsWorld, Scene};

use crate::error::SetupError;
use crate::tick::Tick;

pub use animation::{AnimationPlayer, AnimationSync};
pub use interpolation::{InterpolationBuffer, TimedSnapshot};
pub use transform::{Cadence, TransformSync};

/// Mutable world access handed to components each update.
pub struct UpdateContext<'a> {
    /// Entity and component store.
    pub scene: &'a mut Scene,
    /// Physics engine.
    pub physics: &'a mut dyn PhysicsWorld,
    /// Session time in milliseconds.
    pub now_ms: f64,
    /// Current tick. Inside `on_fixed_update` this is the tick being run.
    pub tick: Tick,
    /// Fixed step length in milliseconds.
    pub tick_interval_ms: f64,
}

impl UpdateContext<'_> {
    /// Fixed step length in seconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn dt(&self) -> f32 {
        (self.tick_interval_ms / 1000.0) as f32
    }
}

/// A networked per-entity component driven by the session loop.
///
/// Both update hooks run on the main thread and never concurrently.
pub trait NetComponent {
    /// Entity this component belongs to.
    fn entity(&self) -> EntityId;

    /// Checks preconditions and registers bus listeners.
    ///
    /// # Errors
    ///
    /// [`SetupError`] when the entity lacks something this component needs,
    /// or when called twice.
    fn activate(&mut self, scene: &Scene) -> Result<(), SetupError>;

    /// Once per rendered frame.
    fn on_update(&mut self, _ctx: &mut UpdateContext<'_>) {}

    /// Once per fixed tick.
    fn on_fixed_update(&mut self, _ctx: &mut UpdateContext<'_>) {}

    /// Releases every bus registration and drops queued state.
    fn detach(&mut self);
}

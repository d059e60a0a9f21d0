//! # Physics Seam
//!
//! The sync layer never integrates motion itself. It talks to whatever engine
//! the game uses through [`PhysicsWorld`]: an opaque `simulate(dt, bodies)`
//! step plus pose and velocity accessors.
//!
//! [`KinematicWorld`] is a small explicit-Euler implementation used by tests and
//! the headless demo. It has no collision; bodies just move.

use serde::{Deserialize, Serialize};

use crate::math::{EulerRotation, Pose, Vec3};

/// Handle to a body owned by a [`PhysicsWorld`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

/// Interface the sync layer needs from a physics engine.
///
/// Setters on unknown handles are ignored; getters return `None`.
pub trait PhysicsWorld {
    /// Advances the listed bodies by `dt` seconds.
    fn simulate(&mut self, dt: f32, bodies: &[BodyHandle]);

    /// Current pose of a body.
    fn pose(&self, body: BodyHandle) -> Option<Pose>;

    /// Teleports a body.
    fn set_pose(&mut self, body: BodyHandle, pose: Pose);

    /// Linear velocity in world units per second.
    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3>;

    /// Overwrites the linear velocity.
    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3);

    /// Angular velocity in radians per second, per Euler axis.
    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3>;

    /// Overwrites the angular velocity.
    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3);

    /// Adds `impulse / mass` to the linear velocity.
    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) {
        if let Some(velocity) = self.linear_velocity(body) {
            self.set_linear_velocity(body, velocity + impulse);
        }
    }
}

/// State of one body in a [`KinematicWorld`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KinematicBody {
    /// Current pose.
    pub pose: Pose,
    /// Linear velocity (units/s).
    pub linear_velocity: Vec3,
    /// Angular velocity (rad/s per axis).
    pub angular_velocity: Vec3,
    /// Mass used by impulses. Must be positive.
    pub mass: f32,
}

impl KinematicBody {
    /// Body at rest at `pose` with unit mass.
    #[must_use]
    pub const fn at(pose: Pose) -> Self {
        Self {
            pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
        }
    }
}

/// Collision-free explicit-Euler integrator.
#[derive(Clone, Debug, Default)]
pub struct KinematicWorld {
    bodies: Vec<KinematicBody>,
    /// Fraction of linear velocity removed per second (0 = none).
    linear_damping: f32,
    /// Total `simulate` calls, for tests and stats.
    steps: u64,
}

impl KinematicWorld {
    /// Creates an empty world without damping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty world with linear damping (clamped to `0..=1`).
    #[must_use]
    pub fn with_damping(linear_damping: f32) -> Self {
        Self {
            linear_damping: linear_damping.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    /// Adds a body and returns its handle.
    pub fn add_body(&mut self, body: KinematicBody) -> BodyHandle {
        let handle = BodyHandle(u32::try_from(self.bodies.len()).unwrap_or(u32::MAX));
        self.bodies.push(body);
        handle
    }

    /// Direct access to a body.
    #[must_use]
    pub fn body(&self, handle: BodyHandle) -> Option<&KinematicBody> {
        self.bodies.get(handle.0 as usize)
    }

    /// Number of `simulate` calls so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut KinematicBody> {
        self.bodies.get_mut(handle.0 as usize)
    }
}

impl PhysicsWorld for KinematicWorld {
    fn simulate(&mut self, dt: f32, bodies: &[BodyHandle]) {
        self.steps += 1;
        let keep = 1.0 - self.linear_damping * dt;
        for handle in bodies {
            if let Some(body) = self.bodies.get_mut(handle.0 as usize) {
                body.pose.position += body.linear_velocity * dt;
                let spin = body.angular_velocity * dt;
                body.pose.rotation = EulerRotation::new(
                    body.pose.rotation.x + spin.x,
                    body.pose.rotation.y + spin.y,
                    body.pose.rotation.z + spin.z,
                );
                body.linear_velocity = body.linear_velocity * keep.max(0.0);
            }
        }
    }

    fn pose(&self, body: BodyHandle) -> Option<Pose> {
        self.body(body).map(|b| b.pose)
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) {
        if let Some(b) = self.body_mut(body) {
            b.pose = pose;
        }
    }

    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.body(body).map(|b| b.linear_velocity)
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.linear_velocity = velocity;
        }
    }

    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.body(body).map(|b| b.angular_velocity)
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.angular_velocity = velocity;
        }
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) {
        if let Some(b) = self.body_mut(body) {
            let inv_mass = if b.mass > 0.0 { 1.0 / b.mass } else { 0.0 };
            b.linear_velocity += impulse * inv_mass;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_moves_listed_bodies_only() {
        let mut world = KinematicWorld::new();
        let a = world.add_body(KinematicBody::at(Pose::IDENTITY));
        let b = world.add_body(KinematicBody::at(Pose::IDENTITY));
        world.set_linear_velocity(a, Vec3::new(0.0, 0.0, 5.0));
        world.set_linear_velocity(b, Vec3::new(1.0, 0.0, 0.0));

        world.simulate(0.5, &[a]);

        assert_eq!(world.pose(a).map(|p| p.position), Some(Vec3::new(0.0, 0.0, 2.5)));
        assert_eq!(world.pose(b).map(|p| p.position), Some(Vec3::ZERO));
        assert_eq!(world.steps(), 1);
    }

    #[test]
    fn test_impulse_respects_mass() {
        let mut world = KinematicWorld::new();
        let mut heavy = KinematicBody::at(Pose::IDENTITY);
        heavy.mass = 4.0;
        let h = world.add_body(heavy);

        world.apply_impulse(h, Vec3::new(8.0, 0.0, 0.0));
        assert_eq!(world.linear_velocity(h), Some(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_unknown_handle_is_ignored() {
        let mut world = KinematicWorld::new();
        world.set_linear_velocity(BodyHandle(9), Vec3::new(1.0, 1.0, 1.0));
        assert!(world.linear_velocity(BodyHandle(9)).is_none());
    }
}

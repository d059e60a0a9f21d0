//! Mathematical types shared by host and clients.
//!
//! These are the canonical representations used in snapshots and on the wire.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D Vector - position, velocity, direction
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Componentwise linear interpolation. `t = 0` yields `self`, `t = 1` yields `other`.
    #[inline]
    #[must_use]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self::new(
            lerp(self.x, other.x, t),
            lerp(self.y, other.y, t),
            lerp(self.z, other.z, t),
        )
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Orientation as Euler angles in radians, applied X then Y then Z.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct EulerRotation {
    /// Rotation about the X axis (pitch).
    pub x: f32,
    /// Rotation about the Y axis (yaw).
    pub y: f32,
    /// Rotation about the Z axis (roll).
    pub z: f32,
}

impl EulerRotation {
    /// No rotation.
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0);

    /// Creates a new rotation from per-axis angles.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Per-axis interpolation along the shortest arc.
    ///
    /// This is not a spherical interpolation; it is only meaningful for small
    /// deltas between consecutive snapshots.
    #[must_use]
    pub fn lerp_shortest(self, other: Self, t: f32) -> Self {
        Self::new(
            lerp_angle(self.x, other.x, t),
            lerp_angle(self.y, other.y, t),
            lerp_angle(self.z, other.z, t),
        )
    }
}

/// Position plus orientation of a mesh or body.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Pose {
    /// World-space position.
    pub position: Vec3,
    /// World-space orientation.
    pub rotation: EulerRotation,
}

impl Pose {
    /// Origin with no rotation.
    pub const IDENTITY: Self = Self::new(Vec3::ZERO, EulerRotation::IDENTITY);

    /// Creates a new pose.
    #[must_use]
    pub const fn new(position: Vec3, rotation: EulerRotation) -> Self {
        Self { position, rotation }
    }

    /// Pose at `position` with no rotation.
    #[must_use]
    pub const fn at(position: Vec3) -> Self {
        Self::new(position, EulerRotation::IDENTITY)
    }
}

/// Linear interpolation.
#[inline]
#[must_use]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Interpolates between two angles (radians) along the shorter way around.
#[inline]
fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let delta = (b - a + PI).rem_euclid(TAU) - PI;
    a + delta * t
}

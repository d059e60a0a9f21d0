//! # KINESIS Core
//!
//! The local, network-agnostic half of the engine:
//! - Math types every peer agrees on ([`Vec3`], [`EulerRotation`], [`Pose`])
//! - Entity identifiers and a typed per-entity component registry ([`Scene`])
//! - The seam to the physics engine ([`PhysicsWorld`])
//!
//! ## Example
//!
//! ```rust
//! use kinesis_core::{KinematicBody, KinematicWorld, Mesh, Pose, RigidBody, Scene};
//!
//! let mut scene = Scene::new();
//! let mut physics = KinematicWorld::new();
//!
//! let crate_box = scene.spawn();
//! let handle = physics.add_body(KinematicBody::at(Pose::IDENTITY));
//! scene.insert_mesh(crate_box, Mesh::default()).unwrap();
//! scene.insert_body(crate_box, RigidBody { handle }).unwrap();
//!
//! assert_eq!(scene.body(crate_box).unwrap().handle, handle);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod entity;
pub mod math;
pub mod physics;
pub mod scene;

pub use entity::{EntityAllocator, EntityId};
pub use math::{EulerRotation, Pose, Vec3};
pub use physics::{BodyHandle, KinematicBody, KinematicWorld, PhysicsWorld};
pub use scene::{ComponentKind, LookupError, Mesh, RigidBody, Scene};

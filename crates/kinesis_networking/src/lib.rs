//! # KINESIS Networking
//!
//! Host-authoritative state synchronization for peer-to-peer sessions.
//!
//! ## Architecture
//!
//! - **Transport**: ordered peer channels (in-process loopback, TCP) wrapped by
//!   a [`HostLink`] that accepts many clients and a [`ClientLink`] that dials one host
//! - **Protocol**: JSON envelopes `{type, data}` decoded into a closed [`Message`] union
//! - **Events**: a synchronous, reentrant [`EventBus`] per session
//! - **Interpolation**: remote transforms rendered one tick in the past
//! - **Prediction**: own body predicted locally, reconciled to host snapshots
//! - **Authority**: host state always wins
//!
//! ```text
//! CLIENT                                   HOST
//!   │── playerInput<id> [input, tick] ────►│  apply, simulate
//!   │◄── physicsUpdate<id> [state, tick] ──│
//!   │   snap, step, ack ≤ tick, replay     │
//!   │◄── meshTransformUpdate<id> [pose] ───│
//!   │   buffer, render at now - interval   │
//! ```
//!
//! Everything runs on one thread: the game calls [`Session::frame`] once per
//! rendered frame and the session polls the network, runs fixed ticks and
//! flushes.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use kinesis_core::{KinematicWorld, Mesh, Scene};
//! use kinesis_networking::{
//!     LoopbackNetwork, ManualClock, Session, SessionConfig, TransformSync,
//! };
//!
//! let net = LoopbackNetwork::new();
//! let clock = ManualClock::default();
//! let mut host = Session::host(net.listen("host").unwrap(), Rc::new(clock.clone()), SessionConfig::default());
//! let mut client = Session::client(net.connector("alice"), Rc::new(clock.clone()), SessionConfig::default());
//! client.connect_to_host("host").unwrap();
//!
//! let mut scene = Scene::new();
//! let mut physics = KinematicWorld::new();
//! let crate_box = scene.spawn();
//! scene.insert_mesh(crate_box, Mesh::default()).unwrap();
//!
//! let sync = TransformSync::new(crate_box, host.context());
//! host.attach(sync, &scene).unwrap();
//!
//! clock.advance(20.0);
//! host.frame(&mut scene, &mut physics);
//! client.frame(&mut scene, &mut physics);
//! assert_eq!(host.players().len(), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod events;
pub mod prediction;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod tick;
pub mod time;
pub mod transport;

pub use config::{RotationBlend, SessionConfig};
pub use error::{ConfigError, ProtocolError, SetupError, TransportError, TransportResult};
pub use events::{EventBus, HandlerId, OwnerId, Routable};
pub use prediction::{InputQueue, PendingInput, PhysicsSnapshot, PredictedBody, PredictionState, Reconciliation};
pub use protocol::{Envelope, InputState, Message, PhysicsUpdate, PlayerData, Topic, TransformUpdate};
pub use session::{ClientRole, FrameReport, HostRole, Role, RoleKind, Session, SyncContext};
pub use sync::{AnimationPlayer, AnimationSync, Cadence, InterpolationBuffer, NetComponent, TransformSync, UpdateContext};
pub use tick::{Tick, TickClock, TickStats};
pub use time::{ManualClock, SystemClock, TimeSource};
pub use transport::loopback::LoopbackNetwork;
pub use transport::tcp::{TcpConnector, TcpPeerListener};
pub use transport::{ClientHandle, ClientId, ClientLink, HostHandle, HostLink, PeerId};

/// Default fixed updates per second.
///
/// At 60Hz, each tick is ~16.67ms.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Default client ping cadence.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 1000;

/// Default cap on fixed updates run in a single frame.
pub const DEFAULT_MAX_CATCH_UP_TICKS: u32 = 5;

/// Default host slot limit.
pub const MAX_CLIENTS: usize = 16;

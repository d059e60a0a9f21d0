//! # Wire Protocol
//!
//! Every frame is one JSON envelope:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ { "type": "<topic>", "data": [ value, value, ... ] }         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `type` names the topic family, suffixed with the raw entity id for
//! per-entity topics (`meshTransformUpdate4294967296`). `data` carries the
//! positional payload for that family.
//!
//! | type                          | data                                  |
//! |-------------------------------|---------------------------------------|
//! | `meshTransformUpdate<id>`     | `[TransformUpdate]`                   |
//! | `physicsUpdate<id>`           | `[PhysicsUpdate, tick]`               |
//! | `startAnimation<id>`          | `[name]`                              |
//! | `playerInput<id>`             | `[InputState, tick]`                  |
//! | `player-joined`               | `[[PlayerData, ...]]`                 |
//! | `ping` / `pong`               | `[sendTimestamp, peerId]`             |
//!
//! Decoding turns an envelope into the closed [`Message`] union; from then on
//! nothing downstream handles strings.

mod envelope;
mod messages;

pub use envelope::Envelope;
pub use messages::{InputState, Message, PhysicsUpdate, PlayerData, Topic, TransformUpdate};

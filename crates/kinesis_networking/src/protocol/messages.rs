//! Typed payloads and the closed message union.

use kinesis_core::{EntityId, EulerRotation, Pose, Vec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Envelope;
use crate::error::ProtocolError;
use crate::events::Routable;
use crate::tick::Tick;
use crate::transport::{ClientId, PeerId};

const MESH_TRANSFORM: &str = "meshTransformUpdate";
const PHYSICS: &str = "physicsUpdate";
const START_ANIMATION: &str = "startAnimation";
const PLAYER_INPUT: &str = "playerInput";
const PLAYER_JOINED: &str = "player-joined";
const PING: &str = "ping";
const PONG: &str = "pong";

/// Pose of a mesh as broadcast by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformUpdate {
    /// World-space position.
    pub position: Vec3,
    /// Euler orientation.
    pub rotation: EulerRotation,
}

impl From<Pose> for TransformUpdate {
    fn from(pose: Pose) -> Self {
        Self { position: pose.position, rotation: pose.rotation }
    }
}

impl From<TransformUpdate> for Pose {
    fn from(update: TransformUpdate) -> Self {
        Self::new(update.position, update.rotation)
    }
}

/// Authoritative physics state of one body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsUpdate {
    /// Linear velocity at the snapshot tick.
    #[serde(rename = "linearVelocity")]
    pub linear_velocity: Vec3,
    /// Pose at the snapshot tick.
    pub transform: TransformUpdate,
}

/// One tick of player input.
///
/// The sync layer never interprets it; it is handed to the game's
/// `apply_input` callback on both sides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    /// Movement axes.
    pub axes: Vec3,
    /// Button bitmask.
    pub buttons: u32,
}

impl InputState {
    /// Input with only movement axes set.
    #[must_use]
    pub const fn moving(axes: Vec3) -> Self {
        Self { axes, buttons: 0 }
    }
}

/// One roster entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerData {
    /// Slot assigned by the host.
    pub id: ClientId,
    /// Rendezvous id of the peer in that slot.
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
}

/// Every message a session can route.
///
/// The last four variants are raised locally by the links and never cross
/// the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Host → clients: pose of a mesh.
    MeshTransformUpdate {
        /// Entity the pose belongs to.
        entity: EntityId,
        /// Sampled pose.
        update: TransformUpdate,
    },
    /// Host → clients: authoritative physics snapshot.
    PhysicsUpdate {
        /// Entity the snapshot belongs to.
        entity: EntityId,
        /// Body state.
        update: PhysicsUpdate,
        /// Newest client input tick the host had applied. 0 before any.
        tick: Tick,
    },
    /// Host → clients: play a named animation.
    StartAnimation {
        /// Entity to animate.
        entity: EntityId,
        /// Clip name.
        name: String,
    },
    /// Client → host: input for a predicted entity.
    PlayerInput {
        /// Entity the input drives.
        entity: EntityId,
        /// The input.
        input: InputState,
        /// Client tick that first simulates the input.
        tick: Tick,
    },
    /// Host → clients: full roster, sent on every join.
    PlayerJoined {
        /// Every connected player.
        players: Vec<PlayerData>,
    },
    /// Client → host: latency measurement request.
    Ping {
        /// Client clock when sent, in whole milliseconds.
        sent_at: u64,
        /// Sender.
        peer_id: PeerId,
    },
    /// Host → one client: echo of a `Ping`.
    Pong {
        /// Echoed `sent_at`.
        sent_at: u64,
        /// Original sender.
        peer_id: PeerId,
    },
    /// Local: the client's connection to the host opened.
    Connected {
        /// Host peer id.
        host: PeerId,
    },
    /// Local: the client's connection to the host closed.
    Disconnected {
        /// Host peer id.
        host: PeerId,
    },
    /// Local: the host assigned a slot to a new peer.
    PeerJoined {
        /// Assigned slot.
        client: ClientId,
        /// Peer in the slot.
        peer: PeerId,
    },
    /// Local: a peer's connection closed and its slot was freed.
    PeerLeft {
        /// Freed slot.
        client: ClientId,
        /// Peer that left.
        peer: PeerId,
    },
}

/// Routing key of a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `meshTransformUpdate<id>`
    MeshTransformUpdate(EntityId),
    /// `physicsUpdate<id>`
    PhysicsUpdate(EntityId),
    /// `startAnimation<id>`
    StartAnimation(EntityId),
    /// `playerInput<id>`
    PlayerInput(EntityId),
    /// `player-joined`
    PlayerJoined,
    /// `ping`
    Ping,
    /// `pong`
    Pong,
    /// `connected`, local only.
    Connected,
    /// Local only.
    Disconnected,
    /// Local only.
    PeerJoined,
    /// Local only.
    PeerLeft,
}

impl Topic {
    /// Wire string, or `None` for local-only topics.
    #[must_use]
    pub fn wire_name(self) -> Option<String> {
        let name = match self {
            Self::MeshTransformUpdate(e) => format!("{MESH_TRANSFORM}{}", e.to_raw()),
            Self::PhysicsUpdate(e) => format!("{PHYSICS}{}", e.to_raw()),
            Self::StartAnimation(e) => format!("{START_ANIMATION}{}", e.to_raw()),
            Self::PlayerInput(e) => format!("{PLAYER_INPUT}{}", e.to_raw()),
            Self::PlayerJoined => PLAYER_JOINED.to_owned(),
            Self::Ping => PING.to_owned(),
            Self::Pong => PONG.to_owned(),
            Self::Connected | Self::Disconnected | Self::PeerJoined | Self::PeerLeft => {
                return None
            }
        };
        Some(name)
    }

    /// Parses a wire string.
    ///
    /// # Errors
    ///
    /// `UnknownTopic` for anything that is not a wire topic.
    pub fn parse(kind: &str) -> Result<Self, ProtocolError> {
        match kind {
            PLAYER_JOINED => return Ok(Self::PlayerJoined),
            PING => return Ok(Self::Ping),
            PONG => return Ok(Self::Pong),
            _ => {}
        }
        let families: [(&str, fn(EntityId) -> Self); 4] = [
            (MESH_TRANSFORM, Self::MeshTransformUpdate),
            (PHYSICS, Self::PhysicsUpdate),
            (START_ANIMATION, Self::StartAnimation),
            (PLAYER_INPUT, Self::PlayerInput),
        ];
        for (prefix, make) in families {
            if let Some(raw) = kind.strip_prefix(prefix) {
                return raw
                    .parse::<u64>()
                    .map(|raw| make(EntityId::from_raw(raw)))
                    .map_err(|_| ProtocolError::UnknownTopic(kind.to_owned()));
            }
        }
        Err(ProtocolError::UnknownTopic(kind.to_owned()))
    }
}

impl Routable for Message {
    type Topic = Topic;

    fn topic(&self) -> Topic {
        match self {
            Self::MeshTransformUpdate { entity, .. } => Topic::MeshTransformUpdate(*entity),
            Self::PhysicsUpdate { entity, .. } => Topic::PhysicsUpdate(*entity),
            Self::StartAnimation { entity, .. } => Topic::StartAnimation(*entity),
            Self::PlayerInput { entity, .. } => Topic::PlayerInput(*entity),
            Self::PlayerJoined { .. } => Topic::PlayerJoined,
            Self::Ping { .. } => Topic::Ping,
            Self::Pong { .. } => Topic::Pong,
            Self::Connected { .. } => Topic::Connected,
            Self::Disconnected { .. } => Topic::Disconnected,
            Self::PeerJoined { .. } => Topic::PeerJoined,
            Self::PeerLeft { .. } => Topic::PeerLeft,
        }
    }
}

impl Message {
    /// True for messages raised by the links themselves.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Connected { .. }
                | Self::Disconnected { .. }
                | Self::PeerJoined { .. }
                | Self::PeerLeft { .. }
        )
    }

    /// Builds the wire envelope.
    ///
    /// # Errors
    ///
    /// `LocalOnly` for link events; `Json` if a payload fails to serialize.
    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let Some(kind) = self.topic().wire_name() else {
            return Err(ProtocolError::LocalOnly(self.local_name()));
        };
        let data = match self {
            Self::MeshTransformUpdate { update, .. } => vec![serde_json::to_value(update)?],
            Self::PhysicsUpdate { update, tick, .. } => {
                vec![serde_json::to_value(update)?, Value::from(*tick)]
            }
            Self::StartAnimation { name, .. } => vec![Value::from(name.as_str())],
            Self::PlayerInput { input, tick, .. } => {
                vec![serde_json::to_value(input)?, Value::from(*tick)]
            }
            Self::PlayerJoined { players } => vec![serde_json::to_value(players)?],
            Self::Ping { sent_at, peer_id } | Self::Pong { sent_at, peer_id } => {
                vec![Value::from(*sent_at), serde_json::to_value(peer_id)?]
            }
            Self::Connected { .. }
            | Self::Disconnected { .. }
            | Self::PeerJoined { .. }
            | Self::PeerLeft { .. } => Vec::new(),
        };
        Ok(Envelope::new(kind, data))
    }

    /// Decodes an envelope into a typed message.
    ///
    /// # Errors
    ///
    /// `UnknownTopic`, `BadArity` or `BadPayload`.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope { kind, data } = envelope;
        let message = match Topic::parse(&kind)? {
            Topic::MeshTransformUpdate(entity) => {
                let [update] = unpack(&kind, data)?;
                Self::MeshTransformUpdate { entity, update: field(&kind, update)? }
            }
            Topic::PhysicsUpdate(entity) => {
                let [update, tick] = unpack(&kind, data)?;
                Self::PhysicsUpdate {
                    entity,
                    update: field(&kind, update)?,
                    tick: field(&kind, tick)?,
                }
            }
            Topic::StartAnimation(entity) => {
                let [name] = unpack(&kind, data)?;
                Self::StartAnimation { entity, name: field(&kind, name)? }
            }
            Topic::PlayerInput(entity) => {
                let [input, tick] = unpack(&kind, data)?;
                Self::PlayerInput {
                    entity,
                    input: field(&kind, input)?,
                    tick: field(&kind, tick)?,
                }
            }
            Topic::PlayerJoined => {
                let [players] = unpack(&kind, data)?;
                Self::PlayerJoined { players: field(&kind, players)? }
            }
            Topic::Ping => {
                let [sent_at, peer_id] = unpack(&kind, data)?;
                Self::Ping { sent_at: field(&kind, sent_at)?, peer_id: field(&kind, peer_id)? }
            }
            Topic::Pong => {
                let [sent_at, peer_id] = unpack(&kind, data)?;
                Self::Pong { sent_at: field(&kind, sent_at)?, peer_id: field(&kind, peer_id)? }
            }
            Topic::Connected | Topic::Disconnected | Topic::PeerJoined | Topic::PeerLeft => {
                return Err(ProtocolError::UnknownTopic(kind))
            }
        };
        Ok(message)
    }

    /// Envelope bytes ready for a channel.
    ///
    /// # Errors
    ///
    /// See [`Message::to_envelope`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        self.to_envelope()?.encode()
    }

    /// Parses channel bytes.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_envelope(Envelope::decode(bytes)?)
    }

    fn local_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            _ => "wire",
        }
    }
}

fn unpack<const N: usize>(kind: &str, data: Vec<Value>) -> Result<[Value; N], ProtocolError> {
    <[Value; N]>::try_from(data).map_err(|data| ProtocolError::BadArity {
        topic: kind.to_owned(),
        expected: N,
        actual: data.len(),
    })
}

fn field<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::BadPayload {
        topic: kind.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity() -> EntityId {
        EntityId::new(7, 1)
    }

    #[test]
    fn test_entity_topics_carry_raw_id_suffix() {
        let e = entity();
        let name = Topic::PhysicsUpdate(e).wire_name().unwrap();
        assert_eq!(name, format!("physicsUpdate{}", e.to_raw()));
        assert_eq!(Topic::parse(&name).unwrap(), Topic::PhysicsUpdate(e));
        assert_eq!(Topic::Connected.wire_name(), None);
    }

    #[test]
    fn test_physics_update_wire_shape() {
        let msg = Message::PhysicsUpdate {
            entity: entity(),
            update: PhysicsUpdate {
                linear_velocity: Vec3::new(0.0, 0.0, 5.0),
                transform: TransformUpdate {
                    position: Vec3::new(1.0, 2.0, 3.0),
                    rotation: EulerRotation::IDENTITY,
                },
            },
            tick: 10,
        };
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.data[0]["linearVelocity"], json!({"x": 0.0, "y": 0.0, "z": 5.0}));
        assert_eq!(env.data[0]["transform"]["position"]["y"], json!(2.0));
        assert_eq!(env.data[1], json!(10));

        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_roster_uses_peer_id_key() {
        let msg = Message::PlayerJoined {
            players: vec![PlayerData { id: ClientId(0), peer_id: PeerId::from("alpha") }],
        };
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.data[0], json!([{"id": 0, "peerId": "alpha"}]));
    }

    #[test]
    fn test_ping_carries_integer_millis() {
        let msg = Message::Ping { sent_at: 1_250, peer_id: PeerId::from("alpha") };
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.data, vec![json!(1_250), json!("alpha")]);
        assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);

        let fractional = Envelope::new("pong", vec![json!(12.5), json!("alpha")]);
        assert!(matches!(
            Message::from_envelope(fractional),
            Err(ProtocolError::BadPayload { .. })
        ));
    }

    #[test]
    fn test_local_events_never_encode() {
        let msg = Message::Connected { host: PeerId::from("host") };
        assert!(msg.is_local());
        assert!(matches!(msg.encode(), Err(ProtocolError::LocalOnly("connected"))));
    }

    #[test]
    fn test_decode_errors() {
        let unknown = Envelope::new("explode", vec![]);
        assert!(matches!(Message::from_envelope(unknown), Err(ProtocolError::UnknownTopic(_))));

        let bad_suffix = Envelope::new("physicsUpdatexyz", vec![]);
        assert!(matches!(
            Message::from_envelope(bad_suffix),
            Err(ProtocolError::UnknownTopic(_))
        ));

        let arity = Envelope::new("ping", vec![json!(1.0)]);
        assert!(matches!(
            Message::from_envelope(arity),
            Err(ProtocolError::BadArity { expected: 2, actual: 1, .. })
        ));

        let shape = Envelope::new("startAnimation0", vec![json!(42)]);
        assert!(matches!(
            Message::from_envelope(shape),
            Err(ProtocolError::BadPayload { .. })
        ));
    }
}

//! # Networking Error Types
//!
//! Transport errors are logged and swallowed by the links; protocol and setup
//! errors are returned to the caller.

use std::io;

use kinesis_core::{ComponentKind, EntityId, LookupError};
use thiserror::Error;

use crate::transport::{ClientId, PeerId};

/// Errors raised by peer channels and links.
#[derive(Error, Debug)]
pub enum TransportError {
    /// `send_to_client` addressed a slot with no open connection.
    #[error("peer not found: client {0}")]
    PeerNotFound(ClientId),

    /// The rendezvous had no peer registered under the requested id.
    #[error("connection to {peer} failed: {reason}")]
    ConnectionFailed {
        /// Peer that was dialed.
        peer: PeerId,
        /// Why it failed.
        reason: String,
    },

    /// The other side hung up.
    #[error("channel to {0} is closed")]
    ChannelClosed(PeerId),

    /// The client link has no open connection.
    #[error("not connected to a host")]
    NotConnected,

    /// Only client sessions dial a host.
    #[error("a host session cannot connect to another host")]
    NotAClient,

    /// Socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// An outgoing message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),
}

/// Errors turning bytes into typed messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope type matches no known topic family.
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),

    /// The payload has the wrong number of values.
    #[error("topic `{topic}` expects {expected} values, got {actual}")]
    BadArity {
        /// Offending topic.
        topic: String,
        /// Values the topic carries.
        expected: usize,
        /// Values received.
        actual: usize,
    },

    /// A payload value has the wrong shape.
    #[error("bad payload for `{topic}`: {source}")]
    BadPayload {
        /// Offending topic.
        topic: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// The frame is not a JSON envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// Local-only messages never go on the wire.
    #[error("message `{0}` is local-only")]
    LocalOnly(&'static str),
}

/// Precondition violations caught when a component is activated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// A predicting body needs an `apply_input` callback.
    #[error("entity {0} predicts input but no apply_input handler is wired")]
    MissingInputHandler(EntityId),

    /// A required companion component is absent.
    #[error("entity {entity} is missing its {kind} component")]
    MissingComponent {
        /// Entity being activated.
        entity: EntityId,
        /// Component that was expected.
        kind: ComponentKind,
    },

    /// The entity does not exist in the scene.
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),

    /// `activate` was called twice.
    #[error("entity {0} is already active")]
    AlreadyActive(EntityId),
}

impl From<LookupError> for SetupError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::UnknownEntity(entity) => Self::UnknownEntity(entity),
            LookupError::Missing { entity, kind } => Self::MissingComponent { entity, kind },
        }
    }
}

/// Errors loading a [`SessionConfig`](crate::config::SessionConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),

    /// File is not valid TOML for the schema.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

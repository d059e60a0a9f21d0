//! Host and client roles.
//!
//! A session picks one role at start-up and hands it to every component, so
//! components never branch on a global "am I the host" flag.

use std::rc::Rc;

use crate::error::TransportResult;
use crate::events::EventBus;
use crate::protocol::Message;
use crate::transport::{ClientHandle, HostHandle, PeerId};

/// Which side of the session this peer plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    /// Authoritative simulation.
    Host,
    /// Predicts and reconciles against the host.
    Client,
}

/// Role-specific networking a component may use.
pub trait Role {
    /// Which side this is.
    fn kind(&self) -> RoleKind;

    /// Rendezvous id of the local peer.
    fn local_id(&self) -> &PeerId;

    /// Session bus.
    fn bus(&self) -> &Rc<EventBus<Message>>;

    /// Host: queues for every client. Client: queues for the host.
    ///
    /// # Errors
    ///
    /// `NotConnected` on a client without a host, `Codec` for local-only
    /// messages.
    fn send(&self, message: &Message) -> TransportResult<()>;

    /// Host handle, when this is the host.
    fn as_host(&self) -> Option<&HostHandle> {
        None
    }

    /// Client handle, when this is a client.
    fn as_client(&self) -> Option<&ClientHandle> {
        None
    }

    /// True on the host.
    fn is_host(&self) -> bool {
        self.kind() == RoleKind::Host
    }
}

/// The authoritative side.
#[derive(Clone)]
pub struct HostRole {
    handle: HostHandle,
}

impl HostRole {
    /// Wraps a host handle.
    #[must_use]
    pub const fn new(handle: HostHandle) -> Self {
        Self { handle }
    }
}

impl Role for HostRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Host
    }

    fn local_id(&self) -> &PeerId {
        self.handle.local_id()
    }

    fn bus(&self) -> &Rc<EventBus<Message>> {
        self.handle.bus()
    }

    fn send(&self, message: &Message) -> TransportResult<()> {
        self.handle.send_to_all_clients(message)
    }

    fn as_host(&self) -> Option<&HostHandle> {
        Some(&self.handle)
    }
}

/// The predicting side.
#[derive(Clone)]
pub struct ClientRole {
    handle: ClientHandle,
}

impl ClientRole {
    /// Wraps a client handle.
    #[must_use]
    pub const fn new(handle: ClientHandle) -> Self {
        Self { handle }
    }
}

impl Role for ClientRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Client
    }

    fn local_id(&self) -> &PeerId {
        self.handle.local_id()
    }

    fn bus(&self) -> &Rc<EventBus<Message>> {
        self.handle.bus()
    }

    fn send(&self, message: &Message) -> TransportResult<()> {
        self.handle.send_to_host(message)
    }

    fn as_client(&self) -> Option<&ClientHandle> {
        Some(&self.handle)
    }
}

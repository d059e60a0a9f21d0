//! # In-Process Rendezvous
//!
//! Stands in for the external signaling service: hosts register an id, clients
//! dial it, and each connection becomes a pair of unbounded crossbeam pipes.
//!
//! ```text
//! LoopbackNetwork ── "host" ──► pending-accept queue ──► LoopbackListener
//!        ▲
//!        └── LoopbackConnector::connect("host")
//!               client tx ─────────────► host rx
//!               client rx ◄───────────── host tx
//! ```
//!
//! The registry is shared behind a `parking_lot::Mutex`, so the host and its
//! clients may live on different threads.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::debug;

use super::{PeerChannel, PeerConnector, PeerId, PeerListener};
use crate::error::{TransportError, TransportResult};

type Frame = Vec<u8>;

/// Shared rendezvous registry.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    listeners: Arc<Mutex<HashMap<PeerId, Sender<LoopbackChannel>>>>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host under `id`.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the id is already taken.
    pub fn listen(&self, id: impl Into<PeerId>) -> TransportResult<LoopbackListener> {
        let id = id.into();
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(&id) {
            return Err(TransportError::ConnectionFailed {
                peer: id,
                reason: "id already registered".to_owned(),
            });
        }
        let (tx, rx) = unbounded();
        listeners.insert(id.clone(), tx);
        debug!(peer = %id, "loopback listener registered");
        Ok(LoopbackListener { id, pending: rx, network: self.clone() })
    }

    /// Creates a dialer that identifies itself as `id`.
    #[must_use]
    pub fn connector(&self, id: impl Into<PeerId>) -> LoopbackConnector {
        LoopbackConnector { id: id.into(), network: self.clone() }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Accept side of a registered id.
pub struct LoopbackListener {
    id: PeerId,
    pending: Receiver<LoopbackChannel>,
    network: LoopbackNetwork,
}

impl PeerListener for LoopbackListener {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn accept(&mut self) -> TransportResult<Option<Box<dyn PeerChannel>>> {
        match self.pending.try_recv() {
            Ok(channel) => Ok(Some(Box::new(channel))),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(None),
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.network.listeners.lock().remove(&self.id);
    }
}

/// Dial side.
pub struct LoopbackConnector {
    id: PeerId,
    network: LoopbackNetwork,
}

impl PeerConnector for LoopbackConnector {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn connect(&mut self, host: &PeerId) -> TransportResult<Box<dyn PeerChannel>> {
        let accept_queue = self
            .network
            .listeners
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionFailed {
                peer: host.clone(),
                reason: "no such peer".to_owned(),
            })?;

        let (up_tx, up_rx) = unbounded();
        let (down_tx, down_rx) = unbounded();
        let host_side = LoopbackChannel { remote: self.id.clone(), tx: down_tx, rx: up_rx };
        let client_side = LoopbackChannel { remote: host.clone(), tx: up_tx, rx: down_rx };

        accept_queue
            .send(host_side)
            .map_err(|_| TransportError::ConnectionFailed {
                peer: host.clone(),
                reason: "listener closed".to_owned(),
            })?;
        Ok(Box::new(client_side))
    }
}

/// One end of a loopback connection.
pub struct LoopbackChannel {
    remote: PeerId,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl PeerChannel for LoopbackChannel {
    fn remote(&self) -> &PeerId {
        &self.remote
    }

    fn send(&mut self, frame: &[u8]) -> TransportResult<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| TransportError::ChannelClosed(self.remote.clone()))
    }

    fn try_recv(&mut self) -> TransportResult<Option<Vec<u8>>> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::ChannelClosed(self.remote.clone())),
        }
    }
}

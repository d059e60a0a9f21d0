//! Host side of the transport: many connections, one slot each.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tracing::{info, trace, warn};

use super::{ChannelStats, ClientId, DelayLine, PeerConnection, PeerId, PeerListener};
use crate::error::{TransportError, TransportResult};
use crate::events::{EventBus, HandlerId, OwnerId, Routable};
use crate::protocol::{Message, PlayerData, Topic};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    All,
    Client(ClientId),
}

#[derive(Debug)]
struct Outgoing {
    target: Target,
    topic: Topic,
    frame: Vec<u8>,
}

struct HostShared {
    local: PeerId,
    bus: Rc<EventBus<Message>>,
    peers: RefCell<BTreeMap<ClientId, PeerId>>,
    outbox: RefCell<VecDeque<Outgoing>>,
}

/// Cloneable sending and listening handle to a [`HostLink`].
///
/// Components and bus handlers hold this; frames are queued and written
/// when the link is next flushed.
#[derive(Clone)]
pub struct HostHandle {
    shared: Rc<HostShared>,
}

impl HostHandle {
    /// Queues `message` for every open connection.
    ///
    /// # Errors
    ///
    /// `Codec` if the message cannot be encoded.
    pub fn send_to_all_clients(&self, message: &Message) -> TransportResult<()> {
        self.enqueue(Target::All, message)
    }

    /// Queues `message` for one client.
    ///
    /// # Errors
    ///
    /// `PeerNotFound` if no open connection holds that slot, `Codec` if the
    /// message cannot be encoded.
    pub fn send_to_client(&self, client: ClientId, message: &Message) -> TransportResult<()> {
        if !self.shared.peers.borrow().contains_key(&client) {
            return Err(TransportError::PeerNotFound(client));
        }
        self.enqueue(Target::Client(client), message)
    }

    /// Subscribes to a topic on the session bus.
    pub fn add_event_listener(&self, topic: Topic, handler: impl Fn(&Message) + 'static) -> HandlerId {
        self.shared.bus.subscribe(topic, handler)
    }

    /// Subscribes on behalf of a component.
    pub fn add_owned_listener(
        &self,
        owner: OwnerId,
        topic: Topic,
        handler: impl Fn(&Message) + 'static,
    ) -> HandlerId {
        self.shared.bus.subscribe_owned(owner, topic, handler)
    }

    /// Unsubscribes one handler.
    pub fn remove_event_listener(&self, topic: Topic, id: HandlerId) -> bool {
        self.shared.bus.unsubscribe(&topic, id)
    }

    /// Re-dispatches `message` to local listeners only.
    pub fn notify(&self, message: &Message) -> usize {
        self.shared.bus.notify(message)
    }

    /// Drops every listener on the bus.
    pub fn clear_event_listeners(&self) {
        self.shared.bus.clear();
    }

    /// Session bus.
    #[must_use]
    pub fn bus(&self) -> &Rc<EventBus<Message>> {
        &self.shared.bus
    }

    /// Rendezvous id of the host.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.shared.local
    }

    /// Slot held by `peer`, if connected.
    #[must_use]
    pub fn client_for(&self, peer: &PeerId) -> Option<ClientId> {
        self.shared
            .peers
            .borrow()
            .iter()
            .find_map(|(id, p)| (p == peer).then_some(*id))
    }

    /// Every connected player in slot order.
    #[must_use]
    pub fn roster(&self) -> Vec<PlayerData> {
        self.shared
            .peers
            .borrow()
            .iter()
            .map(|(id, peer)| PlayerData { id: *id, peer_id: peer.clone() })
            .collect()
    }

    /// Number of open connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.peers.borrow().len()
    }

    fn enqueue(&self, target: Target, message: &Message) -> TransportResult<()> {
        let frame = message.encode()?;
        self.shared.outbox.borrow_mut().push_back(Outgoing {
            target,
            topic: message.topic(),
            frame,
        });
        Ok(())
    }
}

/// Accepts client connections and routes their traffic through the bus.
pub struct HostLink {
    listener: Box<dyn PeerListener>,
    shared: Rc<HostShared>,
    connections: BTreeMap<ClientId, PeerConnection>,
    next_slot: u32,
    max_clients: usize,
    inbound: DelayLine<(ClientId, Message)>,
    outbound: DelayLine<Outgoing>,
    dead: Vec<ClientId>,
}

impl HostLink {
    /// Creates a host over `listener`, publishing on `bus`.
    #[must_use]
    pub fn new(listener: impl PeerListener + 'static, bus: Rc<EventBus<Message>>) -> Self {
        let local = listener.local_id().clone();
        Self {
            listener: Box::new(listener),
            shared: Rc::new(HostShared {
                local,
                bus,
                peers: RefCell::new(BTreeMap::new()),
                outbox: RefCell::new(VecDeque::new()),
            }),
            connections: BTreeMap::new(),
            next_slot: 0,
            max_clients: usize::MAX,
            inbound: DelayLine::new(0.0),
            outbound: DelayLine::new(0.0),
            dead: Vec::new(),
        }
    }

    /// Delays inbound dispatch and outbound writes by `delay_ms` each.
    #[must_use]
    pub fn with_latency(mut self, delay_ms: f64) -> Self {
        self.inbound = DelayLine::new(delay_ms);
        self.outbound = DelayLine::new(delay_ms);
        self
    }

    /// Refuses connections beyond `max` open slots.
    #[must_use]
    pub const fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Handle for components and listeners.
    #[must_use]
    pub fn handle(&self) -> HostHandle {
        HostHandle { shared: Rc::clone(&self.shared) }
    }

    /// Traffic counters of one connection.
    #[must_use]
    pub fn connection_stats(&self, client: ClientId) -> Option<ChannelStats> {
        self.connections.get(&client).map(|c| *c.stats())
    }

    /// Accepts, reads, dispatches and flushes.
    ///
    /// Returns the number of inbound messages dispatched.
    pub fn poll(&mut self, now_ms: f64) -> usize {
        self.accept_pending();

        for (client, connection) in &mut self.connections {
            let (frames, closed) = connection.drain();
            for frame in frames {
                match Message::decode(&frame) {
                    Ok(message) => self.inbound.push(now_ms, (*client, message)),
                    Err(e) => {
                        connection.record_decode_error();
                        warn!(client_id = %client, error = %e, "dropping undecodable frame");
                    }
                }
            }
            if let Some(e) = closed {
                info!(client_id = %client, reason = %e, "client connection closed");
                self.dead.push(*client);
            }
        }

        let released = self.inbound.release(now_ms);
        let dispatched = released.len();
        for (client, message) in released {
            trace!(client_id = %client, topic = ?message.topic(), "inbound");
            self.shared.bus.notify(&message);
        }

        self.reap();
        self.flush(now_ms);
        dispatched
    }

    /// Writes every queued frame that is due.
    pub fn flush(&mut self, now_ms: f64) {
        let queued: Vec<Outgoing> = self.shared.outbox.borrow_mut().drain(..).collect();
        for outgoing in queued {
            self.outbound.push(now_ms, outgoing);
        }

        for outgoing in self.outbound.release(now_ms) {
            match outgoing.target {
                Target::All => {
                    for (client, connection) in &mut self.connections {
                        trace!(client_id = %client, topic = ?outgoing.topic, "outbound");
                        if let Err(e) = connection.send(&outgoing.frame) {
                            warn!(client_id = %client, error = %e, "send failed, dropping client");
                            self.dead.push(*client);
                        }
                    }
                }
                Target::Client(client) => match self.connections.get_mut(&client) {
                    Some(connection) => {
                        trace!(client_id = %client, topic = ?outgoing.topic, "outbound");
                        if let Err(e) = connection.send(&outgoing.frame) {
                            warn!(client_id = %client, error = %e, "send failed, dropping client");
                            self.dead.push(client);
                        }
                    }
                    None => {
                        warn!(client_id = %client, topic = ?outgoing.topic, "client left before send");
                    }
                },
            }
        }

        self.reap();
    }

    fn accept_pending(&mut self) {
        loop {
            let channel = match self.listener.accept() {
                Ok(Some(channel)) => channel,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            };
            if self.connections.len() >= self.max_clients {
                warn!(peer = %channel.remote(), max = self.max_clients, "host full, refusing peer");
                continue;
            }

            let client = ClientId(self.next_slot);
            self.next_slot += 1;
            let connection = PeerConnection::new(channel);
            let peer = connection.peer().clone();
            info!(client_id = %client, peer = %peer, "client connected");

            self.shared.peers.borrow_mut().insert(client, peer.clone());
            self.connections.insert(client, connection);
            self.shared.bus.notify(&Message::PeerJoined { client, peer });
        }
    }

    fn reap(&mut self) {
        for client in std::mem::take(&mut self.dead) {
            if self.connections.remove(&client).is_none() {
                continue;
            }
            let Some(peer) = self.shared.peers.borrow_mut().remove(&client) else {
                continue;
            };
            info!(client_id = %client, peer = %peer, "client slot freed");
            self.shared.bus.notify(&Message::PeerLeft { client, peer });
        }
    }
}

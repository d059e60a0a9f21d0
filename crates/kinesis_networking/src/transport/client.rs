//! Client side of the transport: exactly one connection, to the host.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{info, trace, warn};

use super::{ChannelStats, DelayLine, PeerConnection, PeerConnector, PeerId};
use crate::error::{TransportError, TransportResult};
use crate::events::{EventBus, HandlerId, OwnerId, Routable};
use crate::protocol::{Message, Topic};

struct ClientShared {
    local: PeerId,
    bus: Rc<EventBus<Message>>,
    host: RefCell<Option<PeerId>>,
    /// Host hung up; frames already received are still being released.
    closing: Cell<bool>,
    outbox: RefCell<VecDeque<(Topic, Vec<u8>)>>,
}

/// Cloneable sending and listening handle to a [`ClientLink`].
#[derive(Clone)]
pub struct ClientHandle {
    shared: Rc<ClientShared>,
}

impl ClientHandle {
    /// Queues `message` for the host.
    ///
    /// # Errors
    ///
    /// `NotConnected` without an open connection, `Codec` if the message
    /// cannot be encoded.
    pub fn send_to_host(&self, message: &Message) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = message.encode()?;
        self.shared
            .outbox
            .borrow_mut()
            .push_back((message.topic(), frame));
        Ok(())
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

    /// Rendezvous id of this client.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.shared.local
    }

    /// Host this client is connected to.
    #[must_use]
    pub fn host(&self) -> Option<PeerId> {
        self.shared.host.borrow().clone()
    }

    /// True while a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.host.borrow().is_some() && !self.shared.closing.get()
    }
}

/// Connects to one host and routes its traffic through the bus.
pub struct ClientLink {
    connector: Box<dyn PeerConnector>,
    shared: Rc<ClientShared>,
    connection: Option<PeerConnection>,
    inbound: DelayLine<Message>,
    outbound: DelayLine<(Topic, Vec<u8>)>,
}

impl ClientLink {
    /// Creates a disconnected client over `connector`, publishing on `bus`.
    #[must_use]
    pub fn new(connector: impl PeerConnector + 'static, bus: Rc<EventBus<Message>>) -> Self {
        let local = connector.local_id().clone();
        Self {
            connector: Box::new(connector),
            shared: Rc::new(ClientShared {
                local,
                bus,
                host: RefCell::new(None),
                closing: Cell::new(false),
                outbox: RefCell::new(VecDeque::new()),
            }),
            connection: None,
            inbound: DelayLine::new(0.0),
            outbound: DelayLine::new(0.0),
        }
    }

    /// Delays inbound dispatch and outbound writes by `delay_ms` each.
    #[must_use]
    pub fn with_latency(mut self, delay_ms: f64) -> Self {
        self.inbound = DelayLine::new(delay_ms);
        self.outbound = DelayLine::new(delay_ms);
        self
    }

    /// Handle for components and listeners.
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        ClientHandle { shared: Rc::clone(&self.shared) }
    }

    /// Opens the connection to `host` and publishes `Connected`.
    ///
    /// An existing or closing connection is dropped first. There is no
    /// automatic retry; call again after `Disconnected` to reconnect.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the host cannot be reached. The failure is also
    /// logged.
    pub fn connect_to_host(&mut self, host: impl Into<PeerId>) -> TransportResult<()> {
        let host = host.into();
        let attached = self.shared.host.borrow().is_some();
        if attached {
            self.disconnect();
        }
        let channel = match self.connector.connect(&host) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(host = %host, error = %e, "connect failed");
                return Err(e);
            }
        };
        info!(host = %host, local = %self.shared.local, "connected to host");
        self.connection = Some(PeerConnection::new(channel));
        *self.shared.host.borrow_mut() = Some(host.clone());
        self.shared.bus.notify(&Message::Connected { host });
        Ok(())
    }

    /// Closes the connection, drops anything in flight and publishes
    /// `Disconnected`. No-op when not connected.
    ///
    /// A host that hangs up is handled by [`ClientLink::poll`] instead, which
    /// keeps releasing frames already received before publishing.
    pub fn disconnect(&mut self) {
        self.connection = None;
        self.shared.closing.set(false);
        let Some(host) = self.shared.host.borrow_mut().take() else {
            return;
        };
        self.shared.outbox.borrow_mut().clear();
        self.inbound = DelayLine::new(self.inbound.delay_ms());
        self.outbound = DelayLine::new(self.outbound.delay_ms());
        info!(host = %host, "disconnected from host");
        self.shared.bus.notify(&Message::Disconnected { host });
    }

    /// True while frames received before a hang-up are still held back.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.closing.get()
    }

    fn begin_close(&mut self) {
        self.connection = None;
        self.shared.closing.set(true);
        self.shared.outbox.borrow_mut().clear();
        self.outbound = DelayLine::new(self.outbound.delay_ms());
    }

    /// Traffic counters of the open connection.
    #[must_use]
    pub fn connection_stats(&self) -> Option<ChannelStats> {
        self.connection.as_ref().map(|c| *c.stats())
    }

    /// Reads, dispatches and flushes.
    ///
    /// Returns the number of inbound messages dispatched.
    pub fn poll(&mut self, now_ms: f64) -> usize {
        let mut closed = None;
        if let Some(connection) = self.connection.as_mut() {
            let (frames, error) = connection.drain();
            for frame in frames {
                match Message::decode(&frame) {
                    Ok(message) => self.inbound.push(now_ms, message),
                    Err(e) => {
                        connection.record_decode_error();
                        warn!(error = %e, "dropping undecodable frame");
                    }
                }
            }
            closed = error;
        }

        let released = self.inbound.release(now_ms);
        let dispatched = released.len();
        for message in released {
            trace!(topic = ?message.topic(), "inbound");
            self.shared.bus.notify(&message);
        }

        if let Some(e) = closed {
            info!(reason = %e, held = self.inbound.len(), "host connection closed");
            self.begin_close();
        }
        self.flush(now_ms);
        if self.shared.closing.get() && self.inbound.is_empty() {
            self.disconnect();
        }
        dispatched
    }

    /// Writes every queued frame that is due.
    pub fn flush(&mut self, now_ms: f64) {
        let queued: Vec<_> = self.shared.outbox.borrow_mut().drain(..).collect();
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        for item in queued {
            self.outbound.push(now_ms, item);
        }
        let mut failed = false;
        for (topic, frame) in self.outbound.release(now_ms) {
            trace!(topic = ?topic, "outbound");
            if let Err(e) = connection.send(&frame) {
                warn!(error = %e, "send to host failed");
                failed = true;
                break;
            }
        }
        if failed {
            self.begin_close();
        }
    }
}

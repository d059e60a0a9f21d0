//! Round-trip latency measurement.
//!
//! ```text
//! client                         host
//!   │── ping [T0, peerId] ───────►│
//!   │◄──────── pong [T0, peerId] ─│   (to the sender only)
//!   latency = now - T0
//! ```

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::events::OwnerId;
use crate::protocol::{Message, Topic};
use crate::time::{whole_millis, TimeSource};
use crate::transport::{ClientHandle, HostHandle};

/// Last measured round trip, shared with the bus handler.
#[derive(Debug, Default)]
struct Sample {
    latency_ms: Cell<Option<u64>>,
    pongs: Cell<u64>,
}

/// Client side: pings the host on a fixed cadence and records the echo.
pub struct PingMonitor {
    handle: ClientHandle,
    owner: OwnerId,
    interval_ms: f64,
    last_sent: Option<f64>,
    sample: Rc<Sample>,
}

impl PingMonitor {
    /// Listens for pongs addressed to this client.
    #[must_use]
    pub fn new(handle: ClientHandle, time: Rc<dyn TimeSource>, interval_ms: u64) -> Self {
        let owner = handle.bus().register_owner();
        let sample = Rc::new(Sample::default());

        let local = handle.local_id().clone();
        let shared = Rc::clone(&sample);
        handle.add_owned_listener(owner, Topic::Pong, move |message| {
            let Message::Pong { sent_at, peer_id } = message else {
                return;
            };
            if *peer_id != local {
                return;
            }
            let latency = time.now_millis().saturating_sub(*sent_at);
            shared.latency_ms.set(Some(latency));
            shared.pongs.set(shared.pongs.get() + 1);
            debug!(latency_ms = latency, "pong");
        });

        #[allow(clippy::cast_precision_loss)]
        let interval_ms = interval_ms as f64;
        Self { handle, owner, interval_ms, last_sent: None, sample }
    }

    /// Sends a ping if connected and the interval has elapsed.
    ///
    /// Returns true if one was queued.
    pub fn poll(&mut self, now_ms: f64) -> bool {
        if !self.handle.is_connected() {
            self.last_sent = None;
            return false;
        }
        if self.last_sent.is_some_and(|last| now_ms - last < self.interval_ms) {
            return false;
        }
        let ping = Message::Ping { sent_at: whole_millis(now_ms), peer_id: self.handle.local_id().clone() };
        match self.handle.send_to_host(&ping) {
            Ok(()) => {
                self.last_sent = Some(now_ms);
                true
            }
            Err(e) => {
                warn!(error = %e, "ping not sent");
                false
            }
        }
    }

    /// Most recent round trip in milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> Option<u64> {
        self.sample.latency_ms.get()
    }

    /// Pongs received so far.
    #[must_use]
    pub fn pongs(&self) -> u64 {
        self.sample.pongs.get()
    }

    /// Stops listening.
    pub fn detach(&mut self) {
        self.handle.bus().unsubscribe_owner(self.owner);
    }
}

/// Host side: echoes each ping back to the client that sent it.
pub struct PongResponder {
    handle: HostHandle,
    owner: OwnerId,
}

impl PongResponder {
    /// Starts echoing.
    #[must_use]
    pub fn new(handle: HostHandle) -> Self {
        let owner = handle.bus().register_owner();
        let replies = handle.clone();
        handle.add_owned_listener(owner, Topic::Ping, move |message| {
            let Message::Ping { sent_at, peer_id } = message else {
                return;
            };
            let Some(client) = replies.client_for(peer_id) else {
                warn!(peer = %peer_id, "ping from unknown peer");
                return;
            };
            let pong = Message::Pong { sent_at: *sent_at, peer_id: peer_id.clone() };
            if let Err(e) = replies.send_to_client(client, &pong) {
                warn!(client_id = %client, error = %e, "pong not sent");
            }
        });
        Self { handle, owner }
    }

    /// Stops echoing.
    pub fn detach(&mut self) {
        self.handle.bus().unsubscribe_owner(self.owner);
    }
}

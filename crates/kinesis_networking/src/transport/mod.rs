//! # Transport Layer
//!
//! Ordered peer channels carrying envelope frames, and the two links built on
//! them.
//!
//! ```text
//!   HostLink ◄──── PeerListener::accept ────  (slot 0) PeerConnection ◄──► ClientLink
//!      │                                      (slot 1) PeerConnection ◄──► ClientLink
//!      │ poll(now)
//!      ├─ accept, assign slots       ─► PeerJoined
//!      ├─ read frames, decode        ─► EventBus::notify
//!      ├─ flush outbox               ─► channel.send
//!      └─ reap closed connections    ─► PeerLeft
//! ```
//!
//! ## Design
//!
//! - Channels are non-blocking and polled from the main loop
//! - Frames on one channel arrive in send order; nothing is promised across channels
//! - Connection errors are logged and drop the connection; there is no retry

mod client;
mod host;
mod latency;
pub mod loopback;
pub mod tcp;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

pub use client::{ClientHandle, ClientLink};
pub use host::{HostHandle, HostLink};
pub use latency::DelayLine;

/// Rendezvous identity of a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Player slot assigned by the host, in connection order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One ordered, reliable, non-blocking frame channel to a remote peer.
pub trait PeerChannel {
    /// Peer on the other end.
    fn remote(&self) -> &PeerId;

    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the other side hung up, `Io` on socket failure.
    fn send(&mut self, frame: &[u8]) -> TransportResult<()>;

    /// Reads the next complete frame, if one has arrived.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the other side hung up and every frame it sent
    /// has been read.
    fn try_recv(&mut self) -> TransportResult<Option<Vec<u8>>>;
}

/// Accepts inbound channels on the host.
pub trait PeerListener {
    /// Id clients dial to reach this listener.
    fn local_id(&self) -> &PeerId;

    /// Returns a newly opened channel, if any is pending.
    ///
    /// # Errors
    ///
    /// Listener failure. The host logs it and keeps polling.
    fn accept(&mut self) -> TransportResult<Option<Box<dyn PeerChannel>>>;
}

/// Opens outbound channels on a client.
pub trait PeerConnector {
    /// Id this client registers as.
    fn local_id(&self) -> &PeerId;

    /// Dials `host`.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` when the host cannot be reached.
    fn connect(&mut self, host: &PeerId) -> TransportResult<Box<dyn PeerChannel>>;
}

/// Per-connection traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames sent.
    pub frames_sent: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
}

/// An open channel to one remote participant.
///
/// Created when the channel opens and dropped on close or error.
pub struct PeerConnection {
    channel: Box<dyn PeerChannel>,
    stats: ChannelStats,
}

impl PeerConnection {
    /// Wraps an open channel.
    #[must_use]
    pub fn new(channel: Box<dyn PeerChannel>) -> Self {
        Self { channel, stats: ChannelStats::default() }
    }

    /// Remote peer.
    #[must_use]
    pub fn peer(&self) -> &PeerId {
        self.channel.remote()
    }

    /// Writes one frame, counting it.
    ///
    /// # Errors
    ///
    /// Whatever the channel reports.
    pub fn send(&mut self, frame: &[u8]) -> TransportResult<()> {
        match self.channel.send(frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e)
            }
        }
    }

    /// Reads every frame that has arrived.
    ///
    /// Frames read before a close are still returned; the close is reported
    /// alongside them.
    pub fn drain(&mut self) -> (Vec<Vec<u8>>, Option<TransportError>) {
        let mut frames = Vec::new();
        loop {
            match self.channel.try_recv() {
                Ok(Some(frame)) => {
                    self.stats.frames_received += 1;
                    self.stats.bytes_received += frame.len() as u64;
                    frames.push(frame);
                }
                Ok(None) => return (frames, None),
                Err(e) => return (frames, Some(e)),
            }
        }
    }

    /// Records a frame that did not decode.
    pub fn record_decode_error(&mut self) {
        self.stats.decode_errors += 1;
    }

    /// Traffic counters.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer", self.peer())
            .field("stats", &self.stats)
            .finish()
    }
}

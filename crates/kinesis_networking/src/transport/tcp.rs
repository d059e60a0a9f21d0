//! # TCP Peer Channel
//!
//! Non-blocking std TCP with length-prefixed frames, for sessions that span
//! processes.
//!
//! ```text
//! ┌────────────────┬──────────────────────────────┐
//! │ length (u32 BE)│ payload (length bytes)       │
//! └────────────────┴──────────────────────────────┘
//! ```
//!
//! The first frame a client sends is its peer id. The listener holds a new
//! stream back from `accept` until that frame arrives. The host's peer id is
//! its socket address as text.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

use super::{PeerChannel, PeerConnector, PeerId, PeerListener};
use crate::error::{TransportError, TransportResult};

/// Largest accepted frame.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

const HEADER_LEN: usize = 4;
const READ_CHUNK: usize = 4096;

/// Framed, non-blocking TCP stream.
pub struct TcpChannel {
    remote: PeerId,
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    eof: bool,
}

impl TcpChannel {
    fn new(remote: PeerId, stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            remote,
            stream,
            read_buf: Vec::with_capacity(READ_CHUNK),
            write_buf: Vec::new(),
            eof: false,
        })
    }

    /// Pulls whatever the socket has into the read buffer.
    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Pushes as much of the write buffer as the socket takes.
    fn flush(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(header) = self.read_buf.get(..HEADER_LEN) else {
            return Ok(None);
        };
        let mut len_bytes = [0u8; HEADER_LEN];
        len_bytes.copy_from_slice(header);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
        if self.read_buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let frame = self.read_buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.read_buf.drain(..HEADER_LEN + len);
        Ok(Some(frame))
    }
}

impl PeerChannel for TcpChannel {
    fn remote(&self) -> &PeerId {
        &self.remote
    }

    fn send(&mut self, frame: &[u8]) -> TransportResult<()> {
        if self.eof {
            return Err(TransportError::ChannelClosed(self.remote.clone()));
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large").into());
        }
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(frame);
        self.flush()?;
        Ok(())
    }

    fn try_recv(&mut self) -> TransportResult<Option<Vec<u8>>> {
        self.flush()?;
        if let Some(frame) = self.next_frame()? {
            return Ok(Some(frame));
        }
        if !self.eof {
            self.fill()?;
            if let Some(frame) = self.next_frame()? {
                return Ok(Some(frame));
            }
        }
        if self.eof {
            return Err(TransportError::ChannelClosed(self.remote.clone()));
        }
        Ok(None)
    }
}

/// Accepts TCP clients and completes the peer-id handshake.
pub struct TcpPeerListener {
    id: PeerId,
    listener: TcpListener,
    handshaking: Vec<TcpChannel>,
}

impl TcpPeerListener {
    /// Binds a non-blocking listener.
    ///
    /// # Errors
    ///
    /// Bind failure.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let id = PeerId::new(listener.local_addr()?.to_string());
        Ok(Self { id, listener, handshaking: Vec::new() })
    }

    /// Bound address.
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl PeerListener for TcpPeerListener {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn accept(&mut self) -> TransportResult<Option<Box<dyn PeerChannel>>> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "tcp stream accepted, awaiting hello");
                    self.handshaking.push(TcpChannel::new(PeerId::new(addr.to_string()), stream)?);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        let mut index = 0;
        while index < self.handshaking.len() {
            match self.handshaking[index].try_recv() {
                Ok(Some(hello)) => {
                    let mut channel = self.handshaking.swap_remove(index);
                    channel.remote = PeerId::new(String::from_utf8_lossy(&hello).into_owned());
                    return Ok(Some(Box::new(channel)));
                }
                Ok(None) => index += 1,
                Err(e) => {
                    warn!(peer = %self.handshaking[index].remote, error = %e, "tcp handshake failed");
                    self.handshaking.swap_remove(index);
                }
            }
        }
        Ok(None)
    }
}

/// Dials TCP hosts by socket address.
pub struct TcpConnector {
    id: PeerId,
    timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector that introduces itself as `id`.
    #[must_use]
    pub fn new(id: impl Into<PeerId>) -> Self {
        Self { id: id.into(), timeout: Duration::from_secs(2) }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PeerConnector for TcpConnector {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn connect(&mut self, host: &PeerId) -> TransportResult<Box<dyn PeerChannel>> {
        let failed = |reason: String| TransportError::ConnectionFailed { peer: host.clone(), reason };
        let addr: SocketAddr = host.as_str().parse().map_err(|e| failed(format!("{e}")))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| failed(e.to_string()))?;
        let mut channel = TcpChannel::new(host.clone(), stream)?;
        channel.send(self.id.as_str().as_bytes())?;
        Ok(Box::new(channel))
    }
}

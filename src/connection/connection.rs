use std::fmt::{Debug, Formatter};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info_span, trace, Span};

use crate::connection::peer_socket::PeerSocket;
use crate::connection::readiness::ReadinessWatchers;
use crate::error::{ReplicationError, ReplicationResult};
use crate::peer::peer_config::PeerConfig;
use crate::protocol::frame_buffer::FrameBuffer;
use crate::protocol::messages::{DisconnectReason, PeerMessage};

/// Identifies a connection inside a peer. Ids are never reused.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionId(pub u64);

impl Debug for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// outbound connect in progress - messages are buffered until the socket is open
    Connecting,
    Open,
    /// a DISCONNECT is queued, the socket is released once it is flushed
    Closing,
    Closed,
}

/// whether the remote side is still sending after a read
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    Open,
    /// orderly end of stream
    Eof,
}

/// One socket to one remote peer, with a [FrameBuffer] per direction.
///
/// All I/O is non-blocking and happens on the reactor, triggered by readiness events. A 'would
///  block' condition just ends the current read or write.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: ConnectionState,
    span: Span,

    socket: Option<Arc<dyn PeerSocket>>,
    readiness: Option<ReadinessWatchers>,

    inbound: FrameBuffer,
    outbound: FrameBuffer,
    read_chunk: Vec<u8>,
    max_reads_per_event: usize,
    max_outbound_buffer: usize,
}

impl Connection {
    pub fn new(id: ConnectionId, peer_addr: SocketAddr, config: &PeerConfig) -> Connection {
        Connection {
            id,
            peer_addr,
            state: ConnectionState::Connecting,
            span: info_span!("connection", id = ?id, peer = %peer_addr),
            socket: None,
            readiness: None,
            inbound: FrameBuffer::new(config.max_frame_len),
            outbound: FrameBuffer::new(config.max_frame_len),
            read_chunk: vec![0u8; config.read_chunk_size],
            max_reads_per_event: config.max_reads_per_event,
            max_outbound_buffer: config.max_outbound_buffer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// the number of encoded bytes that were not accepted by the socket yet
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Attaches the socket once the connection is established (immediately for accepted
    ///  connections). Messages sent while connecting are flushed now.
    pub fn open(&mut self, socket: Arc<dyn PeerSocket>, readiness: ReadinessWatchers) {
        if self.state != ConnectionState::Connecting {
            debug!("{:?} was closed while connecting - discarding the socket", self.id);
            return;
        }

        self.state = ConnectionState::Open;
        if !self.outbound.is_empty() {
            readiness.want_write();
        }
        self.socket = Some(socket);
        self.readiness = Some(readiness);
    }

    /// Reads what the socket has available, up to `max_reads_per_event` chunks, and decodes all
    ///  complete frames into `messages`. If the socket still has data after that, the read watcher
    ///  is re-armed so the rest is read on a later readiness event.
    ///
    /// Messages decoded before a failure are still added to `messages`, so the caller can process
    ///  them before tearing down the connection.
    pub fn on_readable(&mut self, messages: &mut Vec<PeerMessage>) -> ReplicationResult<ReadOutcome> {
        let socket = match (&self.socket, self.state) {
            (Some(socket), ConnectionState::Open | ConnectionState::Closing) => socket.clone(),
            _ => return Ok(ReadOutcome::Open),
        };

        for _ in 0..self.max_reads_per_event {
            match socket.try_read(&mut self.read_chunk) {
                Ok(0) => {
                    debug!("{:?}: end of stream", self.id);
                    return Ok(ReadOutcome::Eof);
                }
                Ok(n) => {
                    trace!("{:?}: read {} bytes", self.id, n);
                    self.inbound.append(&self.read_chunk[..n]);
                    while let Some(msg) = self.inbound.try_read_frame()? {
                        messages.push(msg);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Some(readiness) = &self.readiness {
                        readiness.rearm_read();
                    }
                    return Ok(ReadOutcome::Open);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        trace!("{:?}: yielding after {} reads", self.id, self.max_reads_per_event);
        if let Some(readiness) = &self.readiness {
            readiness.rearm_read();
        }
        Ok(ReadOutcome::Open)
    }

    /// Flushes as many buffered bytes as the socket accepts. A connection that is closing is
    ///  closed when its buffer is drained.
    pub fn on_writable(&mut self) -> ReplicationResult<()> {
        let socket = match &self.socket {
            Some(socket) => socket.clone(),
            None => return Ok(()),
        };

        while !self.outbound.is_empty() {
            match socket.try_write(self.outbound.drainable()) {
                Ok(0) => return Err(ReplicationError::ConnectionClosed),
                Ok(n) => {
                    trace!("{:?}: wrote {} bytes", self.id, n);
                    self.outbound.confirm_sent(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Some(readiness) = &self.readiness {
                        readiness.want_write();
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        if self.state == ConnectionState::Closing {
            self.close();
        }
        Ok(())
    }

    /// Encodes a message into the outbound buffer. Messages are written to the socket in the
    ///  order they were sent.
    pub fn send(&mut self, msg: &PeerMessage) -> ReplicationResult<()> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {}
            ConnectionState::Closing | ConnectionState::Closed => return Err(ReplicationError::ConnectionClosed),
        }

        trace!("{:?}: sending message #{} for {:?}", self.id, msg.id(), msg.resource_name());
        self.outbound.write_frame(msg)?;

        if self.outbound.len() > self.max_outbound_buffer {
            return Err(ReplicationError::OutboundBufferFull { len: self.outbound.len(), max: self.max_outbound_buffer });
        }

        if let Some(readiness) = &self.readiness {
            readiness.want_write();
        }
        Ok(())
    }

    /// Orderly teardown: queues a DISCONNECT and closes the connection once it is flushed.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        match self.state {
            ConnectionState::Open => {
                if self.send(&PeerMessage::Disconnect { reason }).is_ok() {
                    self.state = ConnectionState::Closing;
                }
                else {
                    self.close();
                }
            }
            ConnectionState::Connecting => {
                self.close();
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }

    /// Releases the socket and stops the readiness watchers. Closing is idempotent, returning
    ///  `true` only for the call that actually closed the connection.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        debug!("{:?}: closed", self.id);
        self.state = ConnectionState::Closed;
        self.readiness = None;
        self.socket = None;
        self.inbound = FrameBuffer::new(0);
        self.outbound = FrameBuffer::new(0);
        true
    }
}

//! Per-connection state: transport, receive ring and outgoing queue

use std::{
    io::{self, IoSlice, Write},
    net::{Shutdown, SocketAddr},
    time::Instant,
};

use mio::net::TcpStream;

use crate::{
    error::{NetError, Result},
    message::{Internal, MessageAllocator, MessageQueue},
    pool::Handle,
    ringbuf::{classify, ByteRing, RecvOutcome, RingReader},
};

use super::frame::{self, Decoded};

#[cfg(feature = "tls")]
use super::tls::TlsSession;

/// Byte transport under a connection
#[derive(Debug)]
pub(crate) enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsSession>),
}

impl Transport {
    /// Socket to register with the poll
    pub(crate) fn socket_mut(&mut self) -> &mut TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            Transport::Tls(session) => session.socket_mut(),
        }
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            Transport::Tls(session) => session.socket(),
        }
    }

    fn write_frame(&mut self, header: &[u8], payload: &[u8]) -> io::Result<usize> {
        let bufs = [IoSlice::new(header), IoSlice::new(payload)];
        match self {
            Transport::Plain(stream) => stream.write_vectored(&bufs),
            #[cfg(feature = "tls")]
            Transport::Tls(session) => session.write_vectored(&bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(_) => Ok(()),
            #[cfg(feature = "tls")]
            Transport::Tls(session) => session.flush_tls(),
        }
    }

    fn close(&mut self) {
        #[cfg(feature = "tls")]
        {
            if let Transport::Tls(session) = self {
                session.close();
            }
        }
        if let Err(e) = self.socket().shutdown(Shutdown::Both) {
            log::trace!("shutdown: {}", e);
        }
    }
}

/// Lifecycle of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// Outgoing connect in flight, reported as failed after the deadline
    Connecting { deadline: Instant },
    /// Established
    Connected,
}

/// Result of writing the outgoing queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flush {
    /// Queue empty
    Idle,
    /// Socket full; resume on the next writable event
    Pending,
    /// A finishing disconnect reached the head of the queue
    Close,
}

/// Result of draining the socket into the receive ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Received {
    /// Bytes read from the socket
    pub bytes: usize,
    /// Messages delivered inbound
    pub messages: usize,
    /// Reading stopped with data left behind (ring full or budget exhausted)
    pub stalled: bool,
}

/// One TCP (or TLS) connection owned by the connection pool
#[derive(Debug)]
pub(crate) struct Connection {
    transport: Transport,
    peer: SocketAddr,
    raw: bool,
    state: ConnectionState,
    incoming: ByteRing,
    outgoing: MessageQueue,
    /// Bytes of the head frame already written
    write_offset: usize,
    /// Listener that accepted this connection
    listener: Option<Handle>,
    /// Data is waiting in the socket or ring without a readiness event
    stalled: bool,
}

impl Connection {
    pub(crate) fn new(
        transport: Transport,
        peer: SocketAddr,
        raw: bool,
        state: ConnectionState,
        incoming: ByteRing,
        listener: Option<Handle>,
    ) -> Self {
        Self {
            transport,
            peer,
            raw,
            state,
            incoming,
            outgoing: MessageQueue::new(),
            write_offset: 0,
            listener,
            stalled: false,
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_raw(&self) -> bool {
        self.raw
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn listener(&self) -> Option<Handle> {
        self.listener
    }

    pub(crate) fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub(crate) fn outgoing(&mut self) -> &mut MessageQueue {
        &mut self.outgoing
    }

    pub(crate) fn queued(&self) -> usize {
        self.outgoing.len()
    }

    /// Check whether an outgoing connect has completed
    ///
    /// `Ok(true)` once the socket is established, `Ok(false)` while the
    /// connect is still in flight.
    pub(crate) fn finish_connect(&mut self) -> Result<bool> {
        if self.state == ConnectionState::Connected {
            return Ok(true);
        }

        let socket = self.transport.socket();
        if let Some(err) = socket.take_error().map_err(NetError::transport)? {
            return Err(NetError::transport(err));
        }
        match socket.peer_addr() {
            Ok(_) => {
                self.state = ConnectionState::Connected;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(NetError::transport(e)),
        }
    }

    /// Drain the socket into the ring and the ring into inbound messages
    ///
    /// Reads until the socket would block, so edge-triggered readiness is
    /// fully consumed. Terminal conditions come back as errors.
    pub(crate) fn receive(
        &mut self,
        handle: Handle,
        messages: &mut MessageAllocator,
        inbound: &mut MessageQueue,
    ) -> Result<Received> {
        let capacity = self.incoming.capacity();
        let raw = self.raw;
        let (mut producer, mut reader) = self.incoming.split();
        let mut received = Received::default();

        // Frames left behind by an earlier starved pass
        let decoded = Self::decode(raw, capacity, &mut reader, handle, messages, inbound)?;
        received.messages += decoded.messages;
        let mut starved = decoded.starved;

        loop {
            let result = match &mut self.transport {
                Transport::Plain(stream) => producer.recv(stream),
                #[cfg(feature = "tls")]
                Transport::Tls(session) => producer.recv(session.as_mut()),
            };

            match classify(result) {
                RecvOutcome::Data(n) => {
                    received.bytes += n;
                    let decoded = Self::decode(raw, capacity, &mut reader, handle, messages, inbound)?;
                    received.messages += decoded.messages;
                    starved = decoded.starved;
                }
                RecvOutcome::WouldBlock => {
                    // A full ring means the socket was not drained
                    received.stalled = starved || producer.control().is_full();
                    break;
                }
                RecvOutcome::PeerClosed => return Err(NetError::PeerClosed),
                RecvOutcome::Failed(err) => return Err(err),
            }
        }

        self.stalled = received.stalled;
        Ok(received)
    }

    fn decode(
        raw: bool,
        capacity: usize,
        reader: &mut RingReader<'_>,
        handle: Handle,
        messages: &mut MessageAllocator,
        inbound: &mut MessageQueue,
    ) -> Result<Decoded> {
        if raw {
            Ok(frame::decode_raw(reader, handle, messages, inbound))
        } else {
            frame::decode_frames(reader, capacity, handle, messages, inbound)
        }
    }

    /// Write queued messages until the queue empties or the socket blocks
    ///
    /// Notify markers reaching the head are moved to `inbound`, so they are
    /// delivered only after everything queued before them was written.
    pub(crate) fn flush(&mut self, inbound: &mut MessageQueue) -> Result<(usize, Flush)> {
        if self.state != ConnectionState::Connected {
            return Ok((0, Flush::Pending));
        }

        let mut written = 0;
        loop {
            let Some(head) = self.outgoing.peek() else {
                break;
            };

            match head.internal() {
                Internal::Notify => {
                    if let Some(mut msg) = self.outgoing.pop() {
                        msg.set_incoming(true);
                        inbound.push(msg);
                    }
                    continue;
                }
                Internal::Disconnect => {
                    self.transport.flush().map_err(NetError::transport)?;
                    return Ok((written, Flush::Close));
                }
                Internal::None => {}
            }

            let frame = frame::pending_frame(head, self.raw, self.write_offset);
            if frame.is_empty() {
                self.outgoing.pop();
                self.write_offset = 0;
                continue;
            }

            match self.transport.write_frame(frame.header(), frame.payload()) {
                Ok(0) => return Ok((written, Flush::Pending)),
                Ok(n) => {
                    written += n;
                    self.write_offset += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((written, Flush::Pending)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(NetError::transport(e)),
            }
        }

        match self.transport.flush() {
            Ok(()) => Ok((written, Flush::Idle)),
            Err(e) => Err(NetError::transport(e)),
        }
    }

    /// Close the transport, dropping anything still queued
    pub(crate) fn close(&mut self) {
        let dropped = self.outgoing.drain().count();
        if dropped > 0 {
            log::debug!("{} queued messages to {} dropped on close", dropped, self.peer);
        }
        self.transport.close();
    }
}

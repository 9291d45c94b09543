//! The connection context: pools, queues and the readiness loop
//!
//! A [`Context`] is owned by one thread. Every socket is registered with a
//! `mio` poll; [`Context::update`] waits for readiness, drains sockets into
//! their receive rings, decodes inbound messages and writes outgoing queues.
//! Connection tokens are slot indices of the connection pool, listener tokens
//! are offset by [`LISTENER_TOKEN_BASE`].

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};

use crate::{
    allocators::{MemoryHooks, SystemHooks},
    config::ContextConfig,
    error::{NetError, Result},
    message::{Internal, Message, MessageAllocator, MessageId, MessageQueue, MessageStats},
    pool::{Handle, HandlePool, PoolStats},
    ringbuf::ByteRing,
};

use super::{
    connection::{Connection, ConnectionState, Flush, Transport},
    listener::Listener,
    stats::ContextStats,
    tls::ServerTls,
};

/// First token used for listen sockets
pub const LISTENER_TOKEN_BASE: usize = 1 << 16;

/// Owner of every connection, listener and message queue
pub struct Context {
    config: ContextConfig,
    poll: Poll,
    events: Events,
    connections: HandlePool<Connection>,
    /// `None` when the context was configured without listen sockets
    listeners: Option<HandlePool<Listener>>,
    messages: MessageAllocator,
    /// Messages waiting for the application
    inbound: MessageQueue,
    /// Hooks for pool blocks and receive rings; message bodies use them too
    hooks: Arc<dyn MemoryHooks>,
    stats: ContextStats,
}

impl Context {
    /// Create a context that allocates through the global allocator
    pub fn new(config: ContextConfig) -> Result<Self> {
        Self::with_hooks(config, Arc::new(SystemHooks))
    }

    /// Create a context whose pools, rings and message bodies come from `hooks`
    pub fn with_hooks(config: ContextConfig, hooks: Arc<dyn MemoryHooks>) -> Result<Self> {
        config.validate()?;

        let poll = Poll::new().map_err(|e| NetError::from_io(e, "creating poll"))?;
        let connections = HandlePool::with_hooks(config.max_connections, Arc::clone(&hooks))?;
        let listeners = match config.max_listen_sockets {
            0 => None,
            max => Some(HandlePool::with_hooks(max, Arc::clone(&hooks))?),
        };

        log::debug!(
            "context created: {} connections, {} listen sockets, {} byte receive rings",
            config.max_connections,
            config.max_listen_sockets,
            config.incoming_buffer_size
        );

        Ok(Self {
            events: Events::with_capacity(config.event_capacity),
            messages: MessageAllocator::with_hooks(config.message_budget, Arc::clone(&hooks)),
            inbound: MessageQueue::new(),
            poll,
            connections,
            listeners,
            hooks,
            stats: ContextStats::default(),
            config,
        })
    }

    // ---- message facade ----

    /// Allocate a message through the budgeted allocator
    pub fn ctx_alloc(&mut self, handle: Handle, size: u16, incoming: bool, internal: Internal) -> Option<Message> {
        self.messages.alloc(handle, size, incoming, internal)
    }

    /// Return a message's bytes to the allocator
    pub fn ctx_free(&mut self, msg: Message) {
        log::trace!("freeing {} byte message for {}", msg.len(), msg.handle());
        drop(msg);
    }

    /// Route a message: inbound to the application queue, outbound to its
    /// connection's send queue
    ///
    /// Outbound payloads on framed connections must fit a peer's receive
    /// ring of the same configuration.
    pub fn ctx_push(&mut self, msg: Message) -> Result<()> {
        if msg.is_incoming() {
            self.inbound.push(msg);
            return Ok(());
        }

        let handle = msg.handle();
        let conn = self
            .connections
            .get_mut(handle)
            .ok_or_else(|| NetError::stale_handle(handle.index(), handle.generation()))?;
        let max = self.config.max_frame_payload();
        if !conn.is_raw() && msg.len() > max {
            return Err(NetError::invalid_parameter(
                "msg",
                format!("{} byte payload exceeds the {} byte frame limit", msg.len(), max),
            ));
        }
        conn.outgoing().push(msg);
        self.stats.messages_sent += 1;
        self.flush(handle);
        Ok(())
    }

    /// Push a one-byte inbound message carrying `id`
    ///
    /// User ids below [`MessageId::USER_DEFINED`] would read back as library
    /// ids and are rejected.
    pub fn ctx_push_id(&mut self, handle: Handle, id: MessageId) -> Result<()> {
        if let MessageId::User(raw) = id {
            if raw < MessageId::USER_DEFINED {
                return Err(NetError::invalid_parameter(
                    "id",
                    format!("User ids start at {}", MessageId::USER_DEFINED),
                ));
            }
        }
        self.push_notice(handle, id, Internal::None);
        Ok(())
    }

    /// Register an accepted stream as a connection of listener `listen`
    ///
    /// The stream is closed when registration fails.
    pub fn ctx_accept(
        &mut self,
        listen: Handle,
        stream: TcpStream,
        addr: SocketAddr,
        raw: bool,
        tls: Option<ServerTls>,
    ) -> Result<Handle> {
        if self.connections.is_full() {
            return Err(NetError::exhausted("connections"));
        }
        if let Err(e) = stream.set_nodelay(true) {
            log::trace!("set_nodelay on {}: {}", addr, e);
        }

        let transport = match tls {
            None => Transport::Plain(stream),
            #[cfg(feature = "tls")]
            Some(tls) => Transport::Tls(Box::new(tls.session(stream)?)),
            #[cfg(not(feature = "tls"))]
            Some(tls) => match tls {},
        };

        let incoming = ByteRing::with_hooks(self.config.incoming_buffer_size, Arc::clone(&self.hooks))?;
        let handle = self.connections.create(Connection::new(
            transport,
            addr,
            raw,
            ConnectionState::Connected,
            incoming,
            Some(listen),
        ))?;
        self.register(handle)?;

        self.stats.accepted += 1;
        log::debug!("accepted {} from {} on listener {}", handle, addr, listen);
        Ok(handle)
    }

    // ---- library surface ----

    /// Bind a listen socket; accepted connections inherit `raw` and `tls`
    pub fn listen(&mut self, addr: SocketAddr, raw: bool, tls: Option<ServerTls>) -> Result<Handle> {
        let listeners = self
            .listeners
            .as_mut()
            .ok_or_else(|| NetError::exhausted("listen sockets"))?;
        if listeners.is_full() {
            return Err(NetError::exhausted("listen sockets"));
        }

        let socket = TcpListener::bind(addr).map_err(|e| NetError::from_io(e, &format!("binding {}", addr)))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetError::from_io(e, "reading local address"))?;
        let handle = listeners.create(Listener::new(socket, local_addr, raw, tls))?;

        let token = Token(LISTENER_TOKEN_BASE + handle.index() as usize);
        let registered = match listeners.get_mut(handle) {
            Some(listener) => self
                .poll
                .registry()
                .register(listener.socket_mut(), token, Interest::READABLE),
            None => Ok(()),
        };
        if let Err(e) = registered {
            if let Err(destroyed) = listeners.destroy(handle) {
                log::trace!("releasing listener {}: {}", handle, destroyed);
            }
            return Err(NetError::from_io(e, "registering listener"));
        }

        log::debug!("listening on {} as {}", local_addr, handle);
        Ok(handle)
    }

    /// Address a listener is bound to
    pub fn local_addr(&self, listen: Handle) -> Result<SocketAddr> {
        self.listeners
            .as_ref()
            .and_then(|listeners| listeners.get(listen))
            .map(|listener| listener.local_addr())
            .ok_or_else(|| NetError::stale_handle(listen.index(), listen.generation()))
    }

    /// Close a listen socket; established connections stay open
    pub fn stop(&mut self, listen: Handle) -> Result<()> {
        let listeners = self
            .listeners
            .as_mut()
            .ok_or_else(|| NetError::stale_handle(listen.index(), listen.generation()))?;
        let mut listener = listeners.take(listen)?;

        if let Err(e) = self.poll.registry().deregister(listener.socket_mut()) {
            log::trace!("deregistering listener {}: {}", listen, e);
        }
        log::debug!("stopped listening on {}", listener.local_addr());
        Ok(())
    }

    /// Start an outgoing connection
    ///
    /// The handle is usable at once; messages sent before the connect
    /// completes are queued. A connect that does not complete within
    /// `connect_timeout` produces an inbound `ConnectFailed` message.
    pub fn connect(&mut self, addr: SocketAddr, raw: bool, secure: bool) -> Result<Handle> {
        if self.connections.is_full() {
            return Err(NetError::exhausted("connections"));
        }

        let stream = TcpStream::connect(addr).map_err(NetError::transport)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::trace!("set_nodelay on {}: {}", addr, e);
        }
        let transport = self.client_transport(stream, addr, secure)?;

        let incoming = ByteRing::with_hooks(self.config.incoming_buffer_size, Arc::clone(&self.hooks))?;
        let deadline = Instant::now() + self.config.connect_timeout;
        let handle = self.connections.create(Connection::new(
            transport,
            addr,
            raw,
            ConnectionState::Connecting { deadline },
            incoming,
            None,
        ))?;
        self.register(handle)?;

        log::debug!("connecting {} to {}", handle, addr);
        Ok(handle)
    }

    #[cfg(feature = "tls")]
    fn client_transport(&self, stream: TcpStream, addr: SocketAddr, secure: bool) -> Result<Transport> {
        if !secure {
            return Ok(Transport::Plain(stream));
        }
        match &self.config.client_tls {
            Some(tls) => Ok(Transport::Tls(Box::new(tls.session(stream, addr.ip())?))),
            None => Err(NetError::tls("secure connect without client TLS settings")),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn client_transport(&self, stream: TcpStream, addr: SocketAddr, secure: bool) -> Result<Transport> {
        if secure {
            log::warn!("built without TLS support, connecting to {} in plain text", addr);
        }
        Ok(Transport::Plain(stream))
    }

    /// Close a connection
    ///
    /// With `finish`, messages already queued are written first. Either way
    /// the application receives one `LostConnection` message for the handle.
    pub fn disconnect(&mut self, handle: Handle, finish: bool) -> Result<()> {
        if !self.connections.contains(handle) {
            return Err(NetError::stale_handle(handle.index(), handle.generation()));
        }

        if finish {
            let mut marker = self
                .messages
                .notice(handle, MessageId::LostConnection, Internal::Disconnect, &[])
                .ok_or_else(|| NetError::out_of_memory(1))?;
            marker.set_incoming(false);
            self.queue(handle, marker)?;
        } else {
            self.close(handle, MessageId::LostConnection);
        }
        Ok(())
    }

    /// Queue a `Notify` message carrying `user_data` behind the connection's
    /// outgoing traffic; it comes back inbound once that traffic is written
    pub fn notify(&mut self, handle: Handle, user_data: u64) -> Result<()> {
        let mut marker = self
            .messages
            .notice(handle, MessageId::Notify, Internal::Notify, &user_data.to_le_bytes())
            .ok_or_else(|| NetError::out_of_memory(9))?;
        marker.set_incoming(false);
        self.queue(handle, marker)
    }

    fn queue(&mut self, handle: Handle, msg: Message) -> Result<()> {
        let conn = self
            .connections
            .get_mut(handle)
            .ok_or_else(|| NetError::stale_handle(handle.index(), handle.generation()))?;
        conn.outgoing().push(msg);
        self.flush(handle);
        Ok(())
    }

    /// Allocate an outgoing message of `size` payload bytes for `handle`
    pub fn alloc(&mut self, handle: Handle, size: u16) -> Option<Message> {
        self.ctx_alloc(handle, size, false, Internal::None)
    }

    /// Give a message back without sending it
    pub fn release(&mut self, msg: Message) {
        self.ctx_free(msg)
    }

    /// Queue an outgoing message on its connection
    pub fn send(&mut self, msg: Message) -> Result<()> {
        if msg.is_incoming() {
            return Err(NetError::invalid_parameter("msg", "Cannot send an incoming message"));
        }
        self.ctx_push(msg)
    }

    /// Next message for the application, if one is waiting
    pub fn recv(&mut self) -> Option<Message> {
        self.inbound.pop()
    }

    /// Run the readiness loop until a message is available or `timeout` passes
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.inbound.pop() {
                return Ok(Some(msg));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.update(deadline - now)?;
        }
    }

    /// Wait up to `timeout` for readiness and process it
    pub fn update(&mut self, timeout: Duration) -> Result<()> {
        let timeout = self.next_deadline().map_or(timeout, |deadline| {
            deadline.saturating_duration_since(Instant::now()).min(timeout)
        });

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(NetError::from_io(e, "polling")),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                let failed = event.is_error();
                (
                    event.token(),
                    event.is_readable() || event.is_read_closed() || failed,
                    event.is_writable() || event.is_write_closed() || failed,
                )
            })
            .collect();

        for (token, readable, writable) in ready {
            if token.0 >= LISTENER_TOKEN_BASE {
                self.accept_pending((token.0 - LISTENER_TOKEN_BASE) as u16);
                continue;
            }
            if let Some(handle) = self.connections.handle_at(token.0 as u16) {
                self.connection_ready(handle, readable, writable);
            }
        }

        self.resume_stalled();
        self.expire_connects();
        Ok(())
    }

    // ---- queries ----

    /// Check whether `handle` is an established connection
    pub fn is_connected(&self, handle: Handle) -> bool {
        self.connections
            .get(handle)
            .is_some_and(|conn| conn.state() == ConnectionState::Connected)
    }

    /// Remote address of a connection
    pub fn peer_addr(&self, handle: Handle) -> Option<SocketAddr> {
        self.connections.get(handle).map(|conn| conn.peer())
    }

    /// Listener that accepted a connection (`None` for outgoing ones)
    pub fn listener_of(&self, handle: Handle) -> Option<Handle> {
        self.connections.get(handle).and_then(|conn| conn.listener())
    }

    /// Check whether a connection delivers raw chunks instead of frames
    pub fn is_raw(&self, handle: Handle) -> Option<bool> {
        self.connections.get(handle).map(|conn| conn.is_raw())
    }

    /// Messages queued for sending on a connection
    pub fn queued(&self, handle: Handle) -> usize {
        self.connections.get(handle).map_or(0, |conn| conn.queued())
    }

    /// Handles of every open connection
    pub fn connections(&self) -> Vec<Handle> {
        self.connections.handles()
    }

    /// Messages waiting for the application
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Active configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Traffic counters
    pub fn stats(&self) -> &ContextStats {
        &self.stats
    }

    /// Connection pool usage
    pub fn connection_stats(&self) -> PoolStats {
        self.connections.stats()
    }

    /// Message allocator counters
    pub fn message_stats(&self) -> &MessageStats {
        self.messages.stats()
    }

    /// Payload bytes held by live messages
    pub fn message_bytes(&self) -> usize {
        self.messages.used()
    }

    // ---- event handling ----

    fn register(&mut self, handle: Handle) -> Result<()> {
        let token = Token(handle.index() as usize);
        let registered = match self.connections.get_mut(handle) {
            Some(conn) => self.poll.registry().register(
                conn.transport_mut().socket_mut(),
                token,
                Interest::READABLE | Interest::WRITABLE,
            ),
            None => return Err(NetError::stale_handle(handle.index(), handle.generation())),
        };

        if let Err(e) = registered {
            if let Err(destroyed) = self.connections.destroy(handle) {
                log::trace!("releasing {}: {}", handle, destroyed);
            }
            return Err(NetError::from_io(e, "registering connection"));
        }
        Ok(())
    }

    fn accept_pending(&mut self, index: u16) {
        let Some(listen) = self.listeners.as_ref().and_then(|listeners| listeners.handle_at(index)) else {
            return;
        };

        loop {
            let Some(listener) = self.listeners.as_ref().and_then(|listeners| listeners.get(listen)) else {
                return;
            };
            let raw = listener.is_raw();
            let tls = listener.tls().cloned();

            let (stream, addr) = match listener.socket().accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("accept on {} failed: {}", listen, e);
                    return;
                }
            };

            if let Err(err) = self.ctx_accept(listen, stream, addr, raw, tls) {
                log::warn!("connection from {} refused: {}", addr, err);
                self.stats.accept_failures += 1;
                self.push_notice(listen, MessageId::AcceptFailed, Internal::Notify);
            }
        }
    }

    fn connection_ready(&mut self, handle: Handle, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(handle) else {
            return;
        };

        if let ConnectionState::Connecting { .. } = conn.state() {
            match conn.finish_connect() {
                Ok(true) => {
                    self.stats.connected += 1;
                    log::debug!("connected {} to {}", handle, conn.peer());
                }
                Ok(false) => return,
                Err(err) => {
                    log::debug!("connect {} failed: {}", handle, err);
                    self.close(handle, MessageId::ConnectFailed);
                    return;
                }
            }
        }

        if readable {
            self.receive(handle);
        }
        if writable || readable {
            self.flush(handle);
        }
    }

    fn receive(&mut self, handle: Handle) {
        let Some(conn) = self.connections.get_mut(handle) else {
            return;
        };

        match conn.receive(handle, &mut self.messages, &mut self.inbound) {
            Ok(received) => {
                self.stats.bytes_received += received.bytes as u64;
                self.stats.messages_received += received.messages as u64;
                if received.stalled {
                    log::trace!("{} stalled with a full receive ring", handle);
                }
            }
            Err(err) => self.lost(handle, err),
        }
    }

    fn flush(&mut self, handle: Handle) {
        let Some(conn) = self.connections.get_mut(handle) else {
            return;
        };

        match conn.flush(&mut self.inbound) {
            Ok((written, state)) => {
                self.stats.bytes_sent += written as u64;
                if state == Flush::Close {
                    log::debug!("{} finished sending, closing", handle);
                    self.close(handle, MessageId::LostConnection);
                }
            }
            Err(err) => self.lost(handle, err),
        }
    }

    fn lost(&mut self, handle: Handle, err: NetError) {
        match err {
            NetError::PeerClosed => log::debug!("{} closed by peer", handle),
            err => log::warn!("{} lost: {}", handle, err),
        }
        self.close(handle, MessageId::LostConnection);
    }

    /// Tear a connection down and report it with exactly one terminal message
    fn close(&mut self, handle: Handle, id: MessageId) {
        let Ok(mut conn) = self.connections.take(handle) else {
            return;
        };

        if let Err(e) = self.poll.registry().deregister(conn.transport_mut().socket_mut()) {
            log::trace!("deregistering {}: {}", handle, e);
        }
        conn.close();
        drop(conn);

        match id {
            MessageId::ConnectFailed => self.stats.connect_failures += 1,
            _ => self.stats.disconnected += 1,
        }
        self.push_notice(handle, id, Internal::Disconnect);
    }

    fn push_notice(&mut self, handle: Handle, id: MessageId, internal: Internal) {
        match self.messages.notice(handle, id, internal, &[]) {
            Some(msg) => self.inbound.push(msg),
            None => log::warn!("dropped {:?} notice for {}", id, handle),
        }
    }

    /// Retry connections whose data could not be delivered earlier
    fn resume_stalled(&mut self) {
        let stalled: Vec<Handle> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_stalled())
            .map(|(handle, _)| handle)
            .collect();
        for handle in stalled {
            self.receive(handle);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .iter()
            .filter_map(|(_, conn)| match conn.state() {
                ConnectionState::Connecting { deadline } => Some(deadline),
                ConnectionState::Connected => None,
            })
            .min()
    }

    fn expire_connects(&mut self) {
        let now = Instant::now();
        let expired: Vec<Handle> = self
            .connections
            .iter()
            .filter(|(_, conn)| {
                matches!(conn.state(), ConnectionState::Connecting { deadline } if deadline <= now)
            })
            .map(|(handle, _)| handle)
            .collect();

        for handle in expired {
            log::debug!("connect {} timed out", handle);
            self.close(handle, MessageId::ConnectFailed);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("connections", &self.connections.len())
            .field("pending", &self.inbound.len())
            .field("message_bytes", &self.messages.used())
            .field("stats", &self.stats)
            .finish()
    }
}

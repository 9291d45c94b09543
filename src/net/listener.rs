//! Listen sockets owned by the listener pool

use std::net::SocketAddr;

use mio::net::TcpListener;

use super::tls::ServerTls;

/// A bound listen socket and the settings its connections inherit
#[derive(Debug)]
pub(crate) struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    raw: bool,
    tls: Option<ServerTls>,
}

impl Listener {
    pub(crate) fn new(socket: TcpListener, local_addr: SocketAddr, raw: bool, tls: Option<ServerTls>) -> Self {
        Self {
            socket,
            local_addr,
            raw,
            tls,
        }
    }

    pub(crate) fn socket(&self) -> &TcpListener {
        &self.socket
    }

    pub(crate) fn socket_mut(&mut self) -> &mut TcpListener {
        &mut self.socket
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn is_raw(&self) -> bool {
        self.raw
    }

    pub(crate) fn tls(&self) -> Option<&ServerTls> {
        self.tls.as_ref()
    }
}

//! Byte sources feeding receive rings, and classification of their results

use std::io::{self, Read};

use crate::error::NetError;

/// Anything the receive ring can drain bytes from
///
/// The contract matches a non-blocking `recv`: `Ok(n)` with `n > 0` bytes
/// read, `Ok(0)` on orderly shutdown, `Err` with `WouldBlock` when nothing is
/// ready, any other `Err` on failure. Every [`Read`] is a source, which
/// covers plain sockets, in-memory slices and TLS sessions alike.
pub trait ByteSource {
    /// Read at most `buf.len()` bytes into `buf`
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read + ?Sized> ByteSource for R {
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Raw I/O result mapped onto the connection-level error taxonomy
#[derive(Debug)]
pub enum RecvOutcome {
    /// Bytes were transferred
    Data(usize),
    /// Not ready; no state changed, retry on the next readiness event
    WouldBlock,
    /// Orderly shutdown by the peer; the connection is terminal
    PeerClosed,
    /// Transport or TLS failure; the connection is terminal
    Failed(NetError),
}

impl RecvOutcome {
    /// True when the connection must be torn down
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PeerClosed | Self::Failed(_))
    }
}

/// Classify the raw return of a receive or send primitive
pub fn classify(result: io::Result<usize>) -> RecvOutcome {
    match result {
        Ok(0) => RecvOutcome::PeerClosed,
        Ok(bytes) => RecvOutcome::Data(bytes),
        Err(err) => match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => RecvOutcome::WouldBlock,
            // TLS sessions report a peer that vanished without close_notify this way
            io::ErrorKind::UnexpectedEof => RecvOutcome::PeerClosed,
            // ...and record-layer or handshake failures this way
            io::ErrorKind::InvalidData => RecvOutcome::Failed(NetError::tls(err.to_string())),
            _ => RecvOutcome::Failed(NetError::transport(err)),
        },
    }
}

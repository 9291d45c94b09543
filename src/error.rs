//! Error types and handling for tidewire

use std::io;

/// Result type alias for tidewire operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Error kinds produced by pools, rings and the connection context
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A fixed-capacity pool or allocator has no free slot left
    #[error("Exhausted: {what}")]
    Exhausted { what: String },

    /// The memory hooks refused an allocation
    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Non-blocking I/O is not ready; retry later
    #[error("Operation would block")]
    WouldBlock,

    /// Zero-length read, the peer closed the connection
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Any other terminal transport failure
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// TLS handshake or record layer failure
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// A handle whose slot has been destroyed (and possibly reused)
    #[error("Stale handle: index {index}, generation {generation}")]
    StaleHandle { index: u16, generation: u16 },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// I/O errors outside the per-connection read/write path
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl NetError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an exhausted error
    pub fn exhausted(what: impl Into<String>) -> Self {
        Self::Exhausted { what: what.into() }
    }

    /// Create an out of memory error
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Create a transport error wrapping the failing I/O error
    pub fn transport(source: io::Error) -> Self {
        Self::Transport {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create a stale handle error
    pub fn stale_handle(index: u16, generation: u16) -> Self {
        Self::StaleHandle { index, generation }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// True for errors after which a connection cannot be used again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PeerClosed | Self::Transport { .. } | Self::Tls { .. }
        )
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            _ => Self::from_io(err, "I/O operation failed"),
        }
    }
}

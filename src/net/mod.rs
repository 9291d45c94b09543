//! Connections, listeners and the readiness-driven context

pub mod context;
pub mod frame;
pub mod stats;
pub mod tls;

mod connection;
mod listener;

pub use context::{Context, LISTENER_TOKEN_BASE};
pub use frame::{encode_header, FRAME_HEADER_SIZE};
pub use stats::ContextStats;
pub use tls::{ClientTls, ServerTls};

#[cfg(feature = "tls")]
pub use tls::TlsSession;

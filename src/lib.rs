//! # Tidewire - Embeddable TCP/TLS Message Transport
//!
//! Tidewire multiplexes many TCP connections (optionally wrapped in TLS) on
//! one thread and hands length-prefixed messages to and from the
//! application. It is built from three fixed-capacity primitives:
//!
//! - **Handle pools**: typed object pools addressed by 16-bit handles
//! - **Receive rings**: single-producer/single-consumer byte rings that a
//!   socket drains into without intermediate copies
//! - **Message queues**: ordered queues of owned messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    Context                      │
//! │  listen / connect / send / recv / notify        │
//! ├─────────────────────────────────────────────────┤
//! │  HandlePool<Connection> │  MessageAllocator     │
//! │  - ByteRing (incoming)  │  - byte budget        │
//! │  - MessageQueue (out)   │  MessageQueue (in)    │
//! └─────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐    ┌─────────────────────────┐
//! │  mio readiness  │    │  MemoryHooks            │
//! │  (+ rustls)     │    │  (pool blocks, rings)   │
//! └─────────────────┘    └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tidewire::{Context, ContextConfig};
//!
//! let mut ctx = Context::new(ContextConfig::default())?;
//! let server = ctx.listen("127.0.0.1:7000".parse().unwrap(), false, None)?;
//! let client = ctx.connect(ctx.local_addr(server)?, false, false)?;
//!
//! let mut msg = ctx.alloc(client, 5).expect("message budget");
//! msg.data_mut().copy_from_slice(b"hello");
//! ctx.send(msg)?;
//!
//! while let Some(msg) = ctx.wait(Duration::from_millis(100))? {
//!     println!("{} sent {} bytes", msg.handle(), msg.len());
//! }
//! # Ok::<(), tidewire::NetError>(())
//! ```

pub mod allocators;
pub mod config;
pub mod error;
pub mod message;
pub mod net;
pub mod pool;
pub mod ringbuf;

pub use allocators::{BudgetHooks, MemoryHooks, SystemHooks};
pub use config::{ContextConfig, CONNECT_TIMEOUT_SECONDS, MAX_INCOMING_BUFFER_SIZE};
pub use error::{NetError, Result};
pub use message::{Internal, Message, MessageAllocator, MessageId, MessageQueue};
pub use net::{ClientTls, Context, ContextStats, ServerTls};
pub use pool::{Handle, HandlePool, PoolStats};
pub use ringbuf::{classify, ByteRing, ByteSource, RecvOutcome, RecvRingBuffer, RingBufferControl, RingReader};

#[cfg(feature = "tls")]
pub use net::TlsSession;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// True when built with the `tls` feature
pub const TLS_ENABLED: bool = cfg!(feature = "tls");

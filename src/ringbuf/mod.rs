//! Receive-side byte rings
//!
//! A [`RingBufferControl`] holds the cursors, a [`RecvRingBuffer`] is the
//! producer that drains a [`ByteSource`] into the ring, and a [`RingReader`]
//! is the consumer. [`ByteRing`] owns storage and control together.

pub mod control;
pub mod recv;
pub mod source;
pub mod storage;


pub use control::{RingBufferControl, RESERVE_MAX};
pub use recv::RecvRingBuffer;
pub use source::{classify, ByteSource, RecvOutcome};
pub use storage::{ByteRing, RingReader};

//! Messages, the message allocator and message queues

pub mod alloc;
pub mod message;
pub mod queue;


pub use alloc::{MessageAllocator, MessageStats};
pub use message::{Internal, Message, MessageId};
pub use queue::MessageQueue;

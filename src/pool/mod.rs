//! Fixed-capacity object pools with stable 16-bit handles
//!
//! Handles are how connections, listeners and messages refer to each other
//! across subsystem boundaries (including the wire) without exposing
//! pointers.

pub mod handle;
pub mod handle_pool;
pub mod stats;


pub use handle::Handle;
pub use handle_pool::HandlePool;
pub use stats::PoolStats;

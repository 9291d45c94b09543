//! Memory hooks and the slot allocator underneath the handle pools

pub mod block;
pub mod hooks;

pub use block::{BlockAllocator, MAX_SLOTS, MIN_ELEMENT_ALIGN, MIN_ELEMENT_SIZE};
pub use hooks::{BudgetHooks, MemoryHooks, SystemHooks};

//! Process-wide memory hooks
//!
//! Every bulk allocation made by the library (pool blocks, receive rings,
//! message bodies) goes through a [`MemoryHooks`] implementation. Embedders who need their own
//! memory policy hand one to the pools and the context explicitly.

use std::{
    alloc::Layout,
    ptr::NonNull,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// `realloc`/`free` style allocation hooks
pub trait MemoryHooks: Send + Sync + std::fmt::Debug {
    /// Create (`ptr == None`) or resize a block.
    ///
    /// `old` is the layout the block was created with and must be `Some`
    /// whenever `ptr` is. Returns `None` when the request is refused; the
    /// original block is then still owned by the caller.
    fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old: Option<Layout>,
        new: Layout,
    ) -> Option<NonNull<u8>>;

    /// Release a block created by [`MemoryHooks::realloc`]
    fn free(&self, ptr: NonNull<u8>, layout: Layout);

    /// Allocate a fresh block
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.realloc(None, None, layout)
    }

    /// Get hooks type name for debugging
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Hooks backed by the Rust global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHooks;

impl MemoryHooks for SystemHooks {
    fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old: Option<Layout>,
        new: Layout,
    ) -> Option<NonNull<u8>> {
        if new.size() == 0 {
            return None;
        }

        match (ptr, old) {
            (Some(ptr), Some(old)) => {
                if old.align() != new.align() {
                    return None;
                }
                // Safety: ptr was produced by this allocator with layout `old`
                NonNull::new(unsafe { std::alloc::realloc(ptr.as_ptr(), old, new.size()) })
            }
            (None, _) => NonNull::new(unsafe { std::alloc::alloc(new) }),
            (Some(_), None) => None,
        }
    }

    fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: ptr was produced by `realloc` with this layout
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Hooks that refuse to hand out more than a fixed number of bytes
///
/// Accepted requests are forwarded to an inner set of hooks.
#[derive(Debug)]
pub struct BudgetHooks {
    /// Maximum number of bytes outstanding at once
    limit: usize,
    /// Bytes currently outstanding
    used: AtomicUsize,
    inner: Arc<dyn MemoryHooks>,
}

impl BudgetHooks {
    /// Create hooks with a byte budget over the global allocator
    pub fn new(limit: usize) -> Self {
        Self::with_inner(limit, Arc::new(SystemHooks))
    }

    /// Create hooks with a byte budget over `inner`
    pub fn with_inner(limit: usize, inner: Arc<dyn MemoryHooks>) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            inner,
        }
    }

    /// Bytes currently handed out
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Configured budget
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn try_charge(&self, release: usize, charge: usize) -> bool {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(release) + charge;
            if next > self.limit {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl MemoryHooks for BudgetHooks {
    fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old: Option<Layout>,
        new: Layout,
    ) -> Option<NonNull<u8>> {
        let release = old.map(|layout| layout.size()).unwrap_or(0);
        if !self.try_charge(release, new.size()) {
            log::debug!(
                "memory budget refused {} bytes ({} of {} in use)",
                new.size(),
                self.used(),
                self.limit
            );
            return None;
        }

        let block = self.inner.realloc(ptr, old, new);
        if block.is_none() {
            // Undo the charge, the old block (if any) is still live
            self.used.fetch_sub(new.size(), Ordering::AcqRel);
            self.used.fetch_add(release, Ordering::AcqRel);
        }
        block
    }

    fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        self.inner.free(ptr, layout);
        self.used.fetch_sub(layout.size(), Ordering::AcqRel);
    }
}

//! Typed fixed-capacity pool with in-place construction

use std::{alloc::Layout, fmt, marker::PhantomData, ptr::NonNull, sync::Arc};

use crate::{
    allocators::{BlockAllocator, MemoryHooks, SystemHooks, MIN_ELEMENT_ALIGN},
    error::{NetError, Result},
};

use super::{handle::Handle, stats::PoolStats};

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    generation: u16,
    live: bool,
}

/// Fixed-capacity pool of `T` addressed by [`Handle`]s
///
/// All slots live in one memory block obtained from the [`MemoryHooks`] at
/// construction time; the pool never grows. Objects are written straight
/// into their slot and dropped in place on [`HandlePool::destroy`].
pub struct HandlePool<T> {
    /// Memory block holding every slot
    block: NonNull<u8>,
    /// Layout the block was allocated with
    layout: Layout,
    /// Free-list allocator over the block
    allocator: BlockAllocator,
    /// Liveness and generation per slot
    slots: Vec<SlotState>,
    /// Hooks that own the block
    hooks: Arc<dyn MemoryHooks>,
    stats: PoolStats,
    _marker: PhantomData<T>,
}

impl<T> HandlePool<T> {
    /// Create a pool for up to `max` objects using the global allocator
    pub fn new(max: u16) -> Result<Self> {
        Self::with_hooks(max, Arc::new(SystemHooks))
    }

    /// Create a pool for up to `max` objects whose block comes from `hooks`
    pub fn with_hooks(max: u16, hooks: Arc<dyn MemoryHooks>) -> Result<Self> {
        if max == 0 {
            return Err(NetError::invalid_parameter(
                "max",
                "Pool capacity must be greater than 0",
            ));
        }

        let align = std::mem::align_of::<T>().max(MIN_ELEMENT_ALIGN);
        let slot_size = BlockAllocator::slot_size_for(std::mem::size_of::<T>(), align);
        let layout = Layout::from_size_align(slot_size * max as usize, align)
            .map_err(|_| NetError::invalid_parameter("max", "Pool block layout overflow"))?;

        let block = hooks
            .alloc(layout)
            .ok_or_else(|| NetError::out_of_memory(layout.size()))?;

        // Safety: the block is `max * slot_size` bytes aligned to `align`
        let allocator = match unsafe { BlockAllocator::from_raw(block, max as usize, slot_size) } {
            Ok(allocator) => allocator,
            Err(err) => {
                hooks.free(block, layout);
                return Err(err);
            }
        };

        log::debug!(
            "handle pool for {} created: {} slots of {} bytes",
            std::any::type_name::<T>(),
            max,
            slot_size
        );

        Ok(Self {
            block,
            layout,
            allocator,
            slots: vec![SlotState::default(); max as usize],
            hooks,
            stats: PoolStats::new(max as usize),
            _marker: PhantomData,
        })
    }

    /// Construct an object in a free slot from `init` and return its handle
    ///
    /// `init` is only called when a slot is available, so a full pool never
    /// runs the constructor.
    pub fn create_with<F>(&mut self, init: F) -> Result<Handle>
    where
        F: FnOnce() -> T,
    {
        if self.allocator.is_full() {
            self.stats.record_exhausted();
            return Err(NetError::exhausted(std::any::type_name::<T>()));
        }

        let value = init();
        let slot = self
            .allocator
            .alloc()
            .ok_or_else(|| NetError::exhausted(std::any::type_name::<T>()))?;
        let index = self.allocator.index_of(slot);

        // Safety: the slot is free, sized and aligned for T
        unsafe { slot.cast::<T>().as_ptr().write(value) };

        let state = &mut self.slots[index as usize];
        state.live = true;
        self.stats.record_create();

        Ok(Handle::new(index, state.generation))
    }

    /// Move `value` into a free slot and return its handle
    pub fn create(&mut self, value: T) -> Result<Handle> {
        self.create_with(move || value)
    }

    /// Construct `T::default()` in a free slot
    pub fn create_default(&mut self) -> Result<Handle>
    where
        T: Default,
    {
        self.create_with(T::default)
    }

    fn live_slot(&self, handle: Handle) -> Result<NonNull<T>> {
        match self.slots.get(handle.index() as usize) {
            Some(state) if state.live && state.generation == handle.generation() => {
                Ok(self.allocator.from_index(handle.index()).cast::<T>())
            }
            _ => Err(NetError::stale_handle(handle.index(), handle.generation())),
        }
    }

    /// Mark a slot dead and advance its generation
    fn retire(&mut self, index: u16) {
        let state = &mut self.slots[index as usize];
        state.live = false;
        state.generation = state.generation.wrapping_add(1);
        self.stats.record_destroy();
    }

    /// Drop the object in place and return its slot to the pool
    pub fn destroy(&mut self, handle: Handle) -> Result<()> {
        let ptr = self.live_slot(handle)?;
        self.retire(handle.index());

        // Safety: the slot held a live T, which is now unreachable through the pool
        unsafe { std::ptr::drop_in_place(ptr.as_ptr()) };
        self.allocator.free(ptr.cast::<u8>())
    }

    /// Move the object out and return its slot to the pool
    pub fn take(&mut self, handle: Handle) -> Result<T> {
        let ptr = self.live_slot(handle)?;
        self.retire(handle.index());

        // Safety: as in destroy; the value is moved out exactly once
        let value = unsafe { ptr.as_ptr().read() };
        self.allocator.free(ptr.cast::<u8>())?;
        Ok(value)
    }

    /// Generation-checked shared access
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.live_slot(handle)
            .ok()
            .map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Generation-checked exclusive access
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.live_slot(handle)
            .ok()
            .map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    /// Check whether a handle still refers to a live object
    pub fn contains(&self, handle: Handle) -> bool {
        self.live_slot(handle).is_ok()
    }

    /// Slot index of an object stored in this pool. Constant time.
    pub fn index_of(&self, obj: &T) -> u16 {
        self.allocator.index_of(NonNull::from(obj).cast::<u8>())
    }

    /// Full handle of an object stored in this pool
    pub fn handle_of(&self, obj: &T) -> Handle {
        let index = self.index_of(obj);
        Handle::new(index, self.slots[index as usize].generation)
    }

    /// Object currently living in slot `index`, if any
    pub fn from_index(&self, index: u16) -> Option<&T> {
        self.handle_at(index).and_then(|handle| self.get(handle))
    }

    /// Exclusive access to the object living in slot `index`, if any
    pub fn from_index_mut(&mut self, index: u16) -> Option<&mut T> {
        match self.handle_at(index) {
            Some(handle) => self.get_mut(handle),
            None => None,
        }
    }

    /// Upgrade a wire index to the handle of the object living there
    pub fn handle_at(&self, index: u16) -> Option<Handle> {
        self.slots
            .get(index as usize)
            .filter(|state| state.live)
            .map(|state| Handle::new(index, state.generation))
    }

    /// Iterate over live objects in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, state)| state.live)
            .map(move |(index, state)| {
                let ptr = self.allocator.from_index(index as u16).cast::<T>();
                (Handle::new(index as u16, state.generation), unsafe {
                    &*ptr.as_ptr()
                })
            })
    }

    /// Handles of every live object, in slot order
    pub fn handles(&self) -> Vec<Handle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.allocator.allocated()
    }

    /// Check if no object is alive
    pub fn is_empty(&self) -> bool {
        self.allocator.is_empty()
    }

    /// Check if every slot is taken
    pub fn is_full(&self) -> bool {
        self.allocator.is_full()
    }

    /// Maximum number of objects
    pub fn capacity(&self) -> usize {
        self.allocator.total_slots()
    }

    /// Bytes per slot
    pub fn slot_size(&self) -> usize {
        self.allocator.slot_size()
    }

    /// Usage statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.clone()
    }
}

impl<T> Drop for HandlePool<T> {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::debug!(
                "dropping handle pool for {} with {} live objects",
                std::any::type_name::<T>(),
                self.len()
            );
        }

        for (index, state) in self.slots.iter().enumerate() {
            if state.live {
                let ptr = self.allocator.from_index(index as u16).cast::<T>();
                // Safety: live slots hold an initialised T that nobody else can reach
                unsafe { std::ptr::drop_in_place(ptr.as_ptr()) };
            }
        }

        self.hooks.free(self.block, self.layout);
    }
}

impl<T> fmt::Debug for HandlePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlePool")
            .field("type", &std::any::type_name::<T>())
            .field("capacity", &self.capacity())
            .field("live", &self.len())
            .field("slot_size", &self.slot_size())
            .field("hooks", &self.hooks.type_name())
            .finish()
    }
}

unsafe impl<T: Send> Send for HandlePool<T> {}

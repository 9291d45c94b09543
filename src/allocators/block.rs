//! Block allocator - fixed-size slots addressed by 16-bit indices

use std::ptr::NonNull;

use crate::error::{NetError, Result};

/// Free-list terminator; also the reason a block holds at most 65535 slots
const END_OF_LIST: u16 = u16::MAX;

/// Smallest slot the allocator hands out. A free slot stores the index of the
/// next free slot in its first bytes.
pub const MIN_ELEMENT_SIZE: usize = std::mem::size_of::<u16>();

/// Alignment every slot satisfies at minimum
pub const MIN_ELEMENT_ALIGN: usize = std::mem::align_of::<u16>();

/// Largest number of slots a single allocator can manage
pub const MAX_SLOTS: usize = END_OF_LIST as usize;

/// Slab allocator over an externally owned memory block
///
/// Slots are uniformly sized and the free list is threaded through the
/// free slots themselves, so the allocator needs no memory of its own.
/// It is single-threaded: the owner serialises every call.
#[derive(Debug)]
pub struct BlockAllocator {
    /// Base pointer to the memory block
    base_ptr: NonNull<u8>,
    /// Size of each slot
    slot_size: usize,
    /// Total number of slots
    total_slots: u16,
    /// Index of the first free slot
    free_head: u16,
    /// Number of slots handed out
    allocated: u16,
}

impl BlockAllocator {
    /// Compute the slot size for elements of `size` bytes with `align` alignment
    pub fn slot_size_for(size: usize, align: usize) -> usize {
        let align = align.max(MIN_ELEMENT_ALIGN);
        align_up(size.max(MIN_ELEMENT_SIZE), align)
    }

    /// Create an allocator over `total_slots * slot_size` bytes at `ptr`
    ///
    /// # Safety
    /// - `ptr` must be valid for reads and writes for `total_slots * slot_size` bytes
    /// - `ptr` and `slot_size` must both be multiples of [`MIN_ELEMENT_ALIGN`]
    /// - The memory block must outlive the allocator
    pub unsafe fn from_raw(ptr: NonNull<u8>, total_slots: usize, slot_size: usize) -> Result<Self> {
        if total_slots == 0 || total_slots > MAX_SLOTS {
            return Err(NetError::invalid_parameter(
                "total_slots",
                format!("Slot count must be between 1 and {}", MAX_SLOTS),
            ));
        }

        if slot_size < MIN_ELEMENT_SIZE || slot_size % MIN_ELEMENT_ALIGN != 0 {
            return Err(NetError::invalid_parameter(
                "slot_size",
                "Slot size too small or misaligned for the free list",
            ));
        }

        let mut allocator = Self {
            base_ptr: ptr,
            slot_size,
            total_slots: total_slots as u16,
            free_head: 0,
            allocated: 0,
        };
        allocator.initialize_free_list();

        Ok(allocator)
    }

    /// Link every slot into the free list in address order
    fn initialize_free_list(&mut self) {
        for index in 0..self.total_slots {
            let next = if index + 1 == self.total_slots {
                END_OF_LIST
            } else {
                index + 1
            };
            self.write_link(index, next);
        }
        self.free_head = 0;
        self.allocated = 0;
    }

    fn slot_ptr(&self, index: u16) -> *mut u8 {
        // Safety: callers only pass indices below total_slots
        unsafe { self.base_ptr.as_ptr().add(index as usize * self.slot_size) }
    }

    fn write_link(&mut self, index: u16, next: u16) {
        unsafe { (self.slot_ptr(index) as *mut u16).write(next) }
    }

    fn read_link(&self, index: u16) -> u16 {
        unsafe { (self.slot_ptr(index) as *const u16).read() }
    }

    /// Take one unused slot, or `None` when every slot is handed out
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let head = self.free_head;
        if head == END_OF_LIST {
            return None;
        }

        self.free_head = self.read_link(head);
        self.allocated += 1;
        NonNull::new(self.slot_ptr(head))
    }

    /// Return a slot to the free list
    ///
    /// The slot contents are overwritten; any value stored there must already
    /// have been dropped or moved out.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        if !self.owns(ptr) {
            return Err(NetError::invalid_parameter(
                "ptr",
                "Pointer not owned by this allocator or not on a slot boundary",
            ));
        }

        let index = self.index_of(ptr);
        self.write_link(index, self.free_head);
        self.free_head = index;
        self.allocated -= 1;
        Ok(())
    }

    /// Slot index of a pointer handed out by [`BlockAllocator::alloc`]
    pub fn index_of(&self, ptr: NonNull<u8>) -> u16 {
        debug_assert!(self.owns(ptr), "pointer outside of the block");
        let offset = ptr.as_ptr() as usize - self.base_ptr.as_ptr() as usize;
        (offset / self.slot_size) as u16
    }

    /// Pointer to the slot with the given index
    pub fn from_index(&self, index: u16) -> NonNull<u8> {
        debug_assert!(index < self.total_slots, "slot index {} out of range", index);
        // Safety: slot pointers are derived from a non-null base
        unsafe { NonNull::new_unchecked(self.slot_ptr(index)) }
    }

    /// Check if a pointer is the start of one of this allocator's slots
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let base = self.base_ptr.as_ptr() as usize;
        let end = base + self.total_slots as usize * self.slot_size;
        addr >= base && addr < end && (addr - base) % self.slot_size == 0
    }

    /// Get slot size
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Get total number of slots
    pub fn total_slots(&self) -> usize {
        self.total_slots as usize
    }

    /// Number of slots handed out
    pub fn allocated(&self) -> usize {
        self.allocated as usize
    }

    /// Number of slots still free
    pub fn free_slots(&self) -> usize {
        (self.total_slots - self.allocated) as usize
    }

    /// Check if allocator is full
    pub fn is_full(&self) -> bool {
        self.free_head == END_OF_LIST
    }

    /// Check if allocator is empty
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }
}

/// Align a value up to the given power-of-two alignment
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

unsafe impl Send for BlockAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_block<R>(slots: usize, slot_size: usize, f: impl FnOnce(BlockAllocator) -> R) -> R {
        let mut memory = vec![0u64; (slots * slot_size + 7) / 8];
        let ptr = NonNull::new(memory.as_mut_ptr() as *mut u8).unwrap();
        let allocator = unsafe { BlockAllocator::from_raw(ptr, slots, slot_size).unwrap() };
        f(allocator)
    }

    #[test]
    fn test_slot_size_rounding() {
        assert_eq!(BlockAllocator::slot_size_for(1, 1), MIN_ELEMENT_SIZE);
        assert_eq!(BlockAllocator::slot_size_for(0, 1), MIN_ELEMENT_SIZE);
        assert_eq!(BlockAllocator::slot_size_for(12, 8), 16);
        assert_eq!(BlockAllocator::slot_size_for(24, 8), 24);
    }

    #[test]
    fn test_alloc_until_full() {
        with_block(3, 8, |mut allocator| {
            let a = allocator.alloc().unwrap();
            let b = allocator.alloc().unwrap();
            let c = allocator.alloc().unwrap();
            assert!(allocator.is_full());
            assert!(allocator.alloc().is_none());

            assert_eq!(allocator.index_of(a), 0);
            assert_eq!(allocator.index_of(b), 1);
            assert_eq!(allocator.index_of(c), 2);
            assert_eq!(allocator.from_index(1), b);
        });
    }

    #[test]
    fn test_free_reuses_last_freed_slot() {
        with_block(4, 8, |mut allocator| {
            let _a = allocator.alloc().unwrap();
            let b = allocator.alloc().unwrap();
            allocator.free(b).unwrap();
            assert_eq!(allocator.allocated(), 1);

            let again = allocator.alloc().unwrap();
            assert_eq!(again, b);
        });
    }

    #[test]
    fn test_free_rejects_foreign_pointer() {
        with_block(2, 8, |mut allocator| {
            let a = allocator.alloc().unwrap();
            let inside = NonNull::new(unsafe { a.as_ptr().add(1) }).unwrap();
            assert!(allocator.free(inside).is_err());

            let mut other = 0u64;
            let foreign = NonNull::new(&mut other as *mut u64 as *mut u8).unwrap();
            assert!(allocator.free(foreign).is_err());
        });
    }

    #[test]
    fn test_invalid_construction() {
        let mut memory = [0u16; 4];
        let ptr = NonNull::new(memory.as_mut_ptr() as *mut u8).unwrap();
        assert!(unsafe { BlockAllocator::from_raw(ptr, 0, 2) }.is_err());
        assert!(unsafe { BlockAllocator::from_raw(ptr, 2, 1) }.is_err());
        assert!(unsafe { BlockAllocator::from_raw(ptr, MAX_SLOTS + 1, 2) }.is_err());
    }
}

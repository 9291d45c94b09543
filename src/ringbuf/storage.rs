//! Owned byte ring: storage plus control, split into producer and consumer

use std::{alloc::Layout, fmt, marker::PhantomData, ptr::NonNull, sync::Arc};

use crate::{
    allocators::{MemoryHooks, SystemHooks},
    error::{NetError, Result},
};

use super::{control::RingBufferControl, recv::RecvRingBuffer};

/// Byte ring that owns its storage and control record
pub struct ByteRing {
    /// Backing storage of `control.size()` bytes
    storage: NonNull<u8>,
    layout: Layout,
    hooks: Arc<dyn MemoryHooks>,
    control: RingBufferControl,
}

impl ByteRing {
    /// Create a ring of `capacity` bytes from the global allocator
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_hooks(capacity, Arc::new(SystemHooks))
    }

    /// Create a ring of `capacity` bytes whose storage comes from `hooks`
    pub fn with_hooks(capacity: usize, hooks: Arc<dyn MemoryHooks>) -> Result<Self> {
        let control = RingBufferControl::new(capacity)?;
        let layout = Layout::array::<u8>(capacity)
            .map_err(|_| NetError::invalid_parameter("capacity", "Ring layout overflow"))?;

        let storage = hooks
            .alloc(layout)
            .ok_or_else(|| NetError::out_of_memory(capacity))?;
        // Sources receive `&mut [u8]` views, so the bytes must be initialised
        unsafe { std::ptr::write_bytes(storage.as_ptr(), 0, capacity) };

        Ok(Self {
            storage,
            layout,
            hooks,
            control,
        })
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.control.size()
    }

    /// The shared cursor record
    pub fn control(&self) -> &RingBufferControl {
        &self.control
    }

    /// Committed bytes waiting for the consumer
    pub fn available(&self) -> usize {
        self.control.available()
    }

    /// Split into the single producer and the single consumer
    pub fn split(&mut self) -> (RecvRingBuffer<'_>, RingReader<'_>) {
        // Safety: storage spans control.size() bytes and the exclusive borrow
        // guarantees these are the only two halves
        let producer = unsafe { RecvRingBuffer::from_raw_parts(&self.control, self.storage) };
        let consumer = RingReader {
            control: &self.control,
            buffer: self.storage,
            _marker: PhantomData,
        };
        (producer, consumer)
    }

    /// Consumer half only
    pub fn reader(&mut self) -> RingReader<'_> {
        RingReader {
            control: &self.control,
            buffer: self.storage,
            _marker: PhantomData,
        }
    }
}

impl Drop for ByteRing {
    fn drop(&mut self) {
        self.hooks.free(self.storage, self.layout);
    }
}

impl fmt::Debug for ByteRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteRing")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("control", &self.control)
            .finish()
    }
}

unsafe impl Send for ByteRing {}

/// Consumer side of a byte ring
#[derive(Debug)]
pub struct RingReader<'a> {
    control: &'a RingBufferControl,
    buffer: NonNull<u8>,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> RingReader<'a> {
    /// Committed bytes not consumed yet
    pub fn available(&self) -> usize {
        self.control.available()
    }

    /// Committed bytes as at most two slices (second one after the wrap)
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let size = self.control.size();
        let available = self.control.available();
        let start = self.control.read_position();
        let first_len = available.min(size - start);

        // Safety: [read, read + available) is committed and the producer
        // does not write it until it is consumed
        unsafe {
            let first = std::slice::from_raw_parts(self.buffer.as_ptr().add(start), first_len);
            let second = std::slice::from_raw_parts(self.buffer.as_ptr(), available - first_len);
            (first, second)
        }
    }

    /// Copy up to `out.len()` committed bytes without consuming them
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let (first, second) = self.as_slices();
        let from_first = first.len().min(out.len());
        out[..from_first].copy_from_slice(&first[..from_first]);

        let from_second = second.len().min(out.len() - from_first);
        out[from_first..from_first + from_second].copy_from_slice(&second[..from_second]);
        from_first + from_second
    }

    /// Copy up to `out.len()` committed bytes and consume them
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let copied = self.peek_into(out);
        self.control.consume(copied)
    }

    /// Release `size` bytes back to the producer without copying
    pub fn consume(&mut self, size: usize) -> usize {
        self.control.consume(size)
    }
}

unsafe impl Send for RingReader<'_> {}

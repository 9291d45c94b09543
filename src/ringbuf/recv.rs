//! Producer side of a receive ring

use std::{io, marker::PhantomData, ptr::NonNull};

use super::{
    control::{RingBufferControl, RESERVE_MAX},
    source::ByteSource,
};

/// Drains a [`ByteSource`] straight into the free region of a byte ring
///
/// The local `write` and `reserved` counters are the producer's view; the
/// control record only learns about new bytes at commit time. One
/// [`RecvRingBuffer::recv`] performs at most one contiguous read, so reading
/// across the physical end of the buffer takes a second call.
#[derive(Debug)]
pub struct RecvRingBuffer<'a> {
    control: &'a RingBufferControl,
    buffer: NonNull<u8>,
    /// Buffer position of the next byte to write
    write: usize,
    /// Bytes reserved from the control record and not yet written
    reserved: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> RecvRingBuffer<'a> {
    /// Build a producer over `control` and its backing storage
    ///
    /// # Safety
    /// - `buffer` must be valid for reads and writes of `control.size()` bytes
    ///   for `'a`
    /// - No other producer may use `control` while this one exists
    pub unsafe fn from_raw_parts(control: &'a RingBufferControl, buffer: NonNull<u8>) -> Self {
        Self {
            control,
            buffer,
            write: control.current_position(),
            reserved: 0,
            _marker: PhantomData,
        }
    }

    /// Buffer position of the next byte to write
    pub fn write_position(&self) -> usize {
        self.write
    }

    /// Bytes reserved and not yet written
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// The control record this producer drives
    pub fn control(&self) -> &RingBufferControl {
        self.control
    }

    /// Read once from `source` into the ring
    ///
    /// Returns the source's result verbatim. On `Ok(n)` with `n > 0` the bytes
    /// are committed to the consumer; `Ok(0)` and errors leave the ring
    /// untouched. A ring with no free space reports `WouldBlock` without
    /// touching the source, so a full ring is never mistaken for a closed peer.
    pub fn recv<S>(&mut self, source: &mut S) -> io::Result<usize>
    where
        S: ByteSource + ?Sized,
    {
        let size = self.control.size();
        self.reserved += self.control.reserve(RESERVE_MAX);

        // Stop at the physical end of the buffer; the rest waits for the next call
        let span = self.reserved.min(size - self.write);
        if span == 0 {
            log::trace!("receive ring full ({} bytes)", size);
            return Err(io::ErrorKind::WouldBlock.into());
        }

        // Safety: [write, write + span) lies inside the buffer and inside the
        // reserved region, which the consumer never reads
        let to = unsafe { std::slice::from_raw_parts_mut(self.buffer.as_ptr().add(self.write), span) };

        let result = source.read_into(to);
        if let Ok(bytes) = result {
            if bytes > 0 {
                debug_assert!(bytes <= span, "source overran its buffer");
                self.write = (self.write + bytes) % size;
                self.reserved -= bytes;

                let committed = self.control.commit(bytes);
                debug_assert_eq!(committed, bytes);
                log::trace!(
                    "received {} bytes, write position {}, {} reserved",
                    bytes,
                    self.write,
                    self.reserved
                );
            }
        }

        result
    }
}

impl Drop for RecvRingBuffer<'_> {
    fn drop(&mut self) {
        // The next producer over this control starts with nothing reserved
        self.control.cancel(self.reserved);
    }
}

unsafe impl Send for RecvRingBuffer<'_> {}

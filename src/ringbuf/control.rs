//! Ring buffer control record - the cursors shared by producer and consumer

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{NetError, Result};

/// Reservation request meaning "as much as the ring can give"
pub const RESERVE_MAX: usize = usize::MAX;

/// Cursor record for a byte ring of fixed capacity
///
/// Cursors are free-running counters; a cursor's position in the buffer is
/// `cursor & mask`. Bytes move through three regions:
///
/// ```text
///   read ........ current ........ write ........ read + size
///   | committed   | reserved       | free         |
/// ```
///
/// The producer owns `write` and `current`, the consumer owns `read`.
/// The whole capacity is usable: a full ring has `write - read == size`.
#[derive(Debug)]
pub struct RingBufferControl {
    /// Capacity in bytes (power of two)
    size: usize,
    /// Mask for fast modulo operation
    mask: usize,
    /// Committed producer cursor, visible to the consumer
    current: AtomicUsize,
    /// Reservation cursor
    write: AtomicUsize,
    /// Consumer cursor
    read: AtomicUsize,
}

impl RingBufferControl {
    /// Create a control record for a ring of `size` bytes
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(NetError::invalid_parameter(
                "size",
                "Capacity must be a power of 2 and greater than 0",
            ));
        }

        Ok(Self {
            size,
            mask: size - 1,
            current: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        })
    }

    /// Total capacity in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Buffer position of the committed producer cursor
    pub fn current_position(&self) -> usize {
        self.current.load(Ordering::Acquire) & self.mask
    }

    /// Buffer position of the consumer cursor
    pub fn read_position(&self) -> usize {
        self.read.load(Ordering::Acquire) & self.mask
    }

    /// Buffer position of the reservation cursor
    pub fn write_position(&self) -> usize {
        self.write.load(Ordering::Acquire) & self.mask
    }

    /// Reserve up to `size` free bytes, returning how many were granted
    ///
    /// Pass [`RESERVE_MAX`] to take everything the consumer has released.
    /// The grant is a byte count, not a contiguous span; producers split it
    /// at the physical end of the buffer themselves.
    pub fn reserve(&self, size: usize) -> usize {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let free = self.size - write.wrapping_sub(read);
        let granted = size.min(free);

        self.write
            .store(write.wrapping_add(granted), Ordering::Release);
        granted
    }

    /// Reserve exactly `size` bytes or nothing
    pub fn reserve_exact(&self, size: usize) -> bool {
        if self.free_space() < size {
            return false;
        }
        self.reserve(size) == size
    }

    /// Publish up to `size` reserved bytes to the consumer
    pub fn commit(&self, size: usize) -> usize {
        let current = self.current.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Relaxed);
        let committed = size.min(write.wrapping_sub(current));

        self.current
            .store(current.wrapping_add(committed), Ordering::Release);
        committed
    }

    /// Hand back up to `size` reserved bytes that will not be written
    pub fn cancel(&self, size: usize) -> usize {
        let write = self.write.load(Ordering::Relaxed);
        let current = self.current.load(Ordering::Relaxed);
        let cancelled = size.min(write.wrapping_sub(current));

        self.write
            .store(write.wrapping_sub(cancelled), Ordering::Release);
        cancelled
    }

    /// Release up to `size` committed bytes back to the producer
    pub fn consume(&self, size: usize) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let current = self.current.load(Ordering::Acquire);
        let consumed = size.min(current.wrapping_sub(read));

        self.read
            .store(read.wrapping_add(consumed), Ordering::Release);
        consumed
    }

    /// Committed bytes the consumer has not released yet
    pub fn available(&self) -> usize {
        let current = self.current.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        current.wrapping_sub(read)
    }

    /// Reserved bytes not committed yet
    pub fn reserved(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let current = self.current.load(Ordering::Acquire);
        write.wrapping_sub(current)
    }

    /// Bytes neither reserved nor waiting for the consumer
    pub fn free_space(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        self.size - write.wrapping_sub(read)
    }

    /// Check if nothing is committed
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Check if nothing can be reserved
    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }

    /// Reset every cursor to zero (requires exclusive access)
    pub fn reset(&mut self) {
        *self.current.get_mut() = 0;
        *self.write.get_mut() = 0;
        *self.read.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_capacity() {
        assert!(RingBufferControl::new(0).is_err());
        assert!(RingBufferControl::new(12).is_err());
        assert!(RingBufferControl::new(16).is_ok());
    }

    #[test]
    fn test_reserve_max_takes_full_capacity() {
        let control = RingBufferControl::new(8).unwrap();
        assert_eq!(control.reserve(RESERVE_MAX), 8);
        assert!(control.is_full());
        assert_eq!(control.reserve(RESERVE_MAX), 0);
    }

    #[test]
    fn test_commit_bounded_by_reservation() {
        let control = RingBufferControl::new(8).unwrap();
        assert_eq!(control.reserve(3), 3);
        assert_eq!(control.commit(5), 3);
        assert_eq!(control.available(), 3);
        assert_eq!(control.reserved(), 0);
    }

    #[test]
    fn test_consume_bounded_by_commits() {
        let control = RingBufferControl::new(8).unwrap();
        control.reserve(6);
        control.commit(4);
        assert_eq!(control.consume(10), 4);
        assert_eq!(control.read_position(), 4);
        assert_eq!(control.free_space(), 6);
    }

    #[test]
    fn test_positions_wrap() {
        let control = RingBufferControl::new(8).unwrap();
        control.reserve(6);
        control.commit(6);
        control.consume(6);

        assert_eq!(control.reserve(RESERVE_MAX), 8);
        assert_eq!(control.write_position(), 6);
        control.commit(5);
        assert_eq!(control.current_position(), 3);
        assert_eq!(control.available(), 5);
    }

    #[test]
    fn test_cancel_returns_reservation() {
        let control = RingBufferControl::new(8).unwrap();
        control.reserve(RESERVE_MAX);
        control.commit(3);
        assert_eq!(control.cancel(10), 5);
        assert_eq!(control.reserved(), 0);
        assert_eq!(control.free_space(), 5);
    }

    #[test]
    fn test_reserve_exact() {
        let control = RingBufferControl::new(4).unwrap();
        assert!(control.reserve_exact(3));
        assert!(!control.reserve_exact(2));
        assert_eq!(control.reserved(), 3);
        assert!(control.reserve_exact(1));
    }

    #[test]
    fn test_reset() {
        let mut control = RingBufferControl::new(4).unwrap();
        control.reserve(4);
        control.commit(2);
        control.reset();
        assert!(control.is_empty());
        assert_eq!(control.free_space(), 4);
    }
}

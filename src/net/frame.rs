//! Wire framing between the receive ring and inbound messages
//!
//! Framed connections carry `[u16 little-endian length][payload]`; raw
//! connections deliver every chunk the ring holds as one message.

use std::io;

use crate::{
    error::{NetError, Result},
    message::{Internal, Message, MessageAllocator, MessageQueue},
    pool::Handle,
    ringbuf::RingReader,
};

/// Size of the length prefix on framed connections
pub const FRAME_HEADER_SIZE: usize = 2;

/// Length prefix for a payload
pub fn encode_header(len: u16) -> [u8; FRAME_HEADER_SIZE] {
    len.to_le_bytes()
}

/// Outcome of one decoding pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decoded {
    /// Messages pushed to the inbound queue
    pub messages: usize,
    /// Payload bytes delivered
    pub bytes: usize,
    /// Decoding stopped because the message budget was exhausted
    pub starved: bool,
}

/// Turn the complete frames in `reader` into inbound messages
///
/// Partial frames stay in the ring. A declared length that can never fit in
/// a ring of `capacity` bytes, or in the message budget, is a protocol
/// violation.
pub fn decode_frames(
    reader: &mut RingReader<'_>,
    capacity: usize,
    handle: Handle,
    messages: &mut MessageAllocator,
    inbound: &mut MessageQueue,
) -> Result<Decoded> {
    let mut decoded = Decoded::default();
    loop {
        let available = reader.available();
        if available < FRAME_HEADER_SIZE {
            return Ok(decoded);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        reader.peek_into(&mut header);
        let len = u16::from_le_bytes(header);
        if len as usize + FRAME_HEADER_SIZE > capacity {
            return Err(NetError::transport(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds the {} byte receive ring", len, capacity),
            )));
        }
        if len as usize > messages.budget() {
            return Err(NetError::transport(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds the {} byte message budget", len, messages.budget()),
            )));
        }
        if available < FRAME_HEADER_SIZE + len as usize {
            return Ok(decoded);
        }

        let Some(mut msg) = messages.alloc(handle, len, true, Internal::None) else {
            decoded.starved = true;
            return Ok(decoded);
        };
        reader.consume(FRAME_HEADER_SIZE);
        let copied = reader.read_into(msg.data_mut());
        debug_assert_eq!(copied, len as usize);

        inbound.push(msg);
        decoded.messages += 1;
        decoded.bytes += len as usize;
    }
}

/// Deliver everything in `reader` as raw chunks, one message per chunk
pub fn decode_raw(
    reader: &mut RingReader<'_>,
    handle: Handle,
    messages: &mut MessageAllocator,
    inbound: &mut MessageQueue,
) -> Decoded {
    let mut decoded = Decoded::default();
    loop {
        let len = reader
            .available()
            .min(messages.budget().max(1))
            .min(u16::MAX as usize);
        if len == 0 {
            return decoded;
        }

        let Some(mut msg) = messages.alloc(handle, len as u16, true, Internal::None) else {
            decoded.starved = true;
            return decoded;
        };
        reader.read_into(msg.data_mut());

        inbound.push(msg);
        decoded.messages += 1;
        decoded.bytes += len;
    }
}

/// Bytes of an outgoing frame not written yet
#[derive(Debug)]
pub struct PendingFrame<'a> {
    header: [u8; FRAME_HEADER_SIZE],
    /// Header bytes still to write (taken from the end of `header`)
    header_left: usize,
    payload: &'a [u8],
}

impl<'a> PendingFrame<'a> {
    /// Remaining header bytes
    pub fn header(&self) -> &[u8] {
        &self.header[FRAME_HEADER_SIZE - self.header_left..]
    }

    /// Remaining payload bytes
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Total bytes still to write
    pub fn len(&self) -> usize {
        self.header_left + self.payload.len()
    }

    /// Check if the frame is fully written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Part of `msg` still to be written after `offset` bytes of its frame
pub fn pending_frame(msg: &Message, raw: bool, offset: usize) -> PendingFrame<'_> {
    let header_size = if raw { 0 } else { FRAME_HEADER_SIZE };
    let payload_offset = offset.saturating_sub(header_size).min(msg.len());
    PendingFrame {
        header: encode_header(msg.len() as u16),
        header_left: header_size.saturating_sub(offset),
        payload: &msg.data()[payload_offset..],
    }
}

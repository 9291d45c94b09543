//! Message records handed between the I/O layer and the application

use std::{alloc::Layout, fmt, ptr::NonNull, sync::Arc};

use crate::{allocators::MemoryHooks, pool::Handle};

/// Library-internal tag distinguishing library-originated messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Internal {
    /// Ordinary application traffic
    None,
    /// Terminal message for a connection that is gone
    Disconnect,
    /// Library-originated signal: a `notify` coming back or a refused accept
    Notify,
}

/// Message id stored in the first payload byte of library messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// A `notify` request reached the head of the outgoing queue
    Notify,
    /// An incoming connection could not be registered
    AcceptFailed,
    /// An outgoing connection could not be established in time
    ConnectFailed,
    /// An established connection was closed
    LostConnection,
    /// Application-defined id (at least [`MessageId::USER_DEFINED`])
    ///
    /// Smaller values encode to a library id and decode as that id.
    User(u8),
}

impl MessageId {
    /// First id available to applications
    pub const USER_DEFINED: u8 = 4;

    /// Wire value of the id
    pub fn as_u8(self) -> u8 {
        match self {
            MessageId::Notify => 0,
            MessageId::AcceptFailed => 1,
            MessageId::ConnectFailed => 2,
            MessageId::LostConnection => 3,
            MessageId::User(id) => id,
        }
    }

    /// Parse a wire value
    pub fn from_u8(id: u8) -> Self {
        match id {
            0 => MessageId::Notify,
            1 => MessageId::AcceptFailed,
            2 => MessageId::ConnectFailed,
            3 => MessageId::LostConnection,
            other => MessageId::User(other),
        }
    }
}

/// Owned message: connection handle, tags and payload bytes
///
/// Payload bytes are allocated through the [`MemoryHooks`] of the allocator
/// that created the message and returned to them when the message is
/// dropped, so a message is freed exactly once by construction.
pub struct Message {
    handle: Handle,
    internal: Internal,
    incoming: bool,
    data: NonNull<u8>,
    size: u16,
    /// Owner of `data`; `None` for empty payloads
    hooks: Option<Arc<dyn MemoryHooks>>,
}

impl Message {
    /// Allocate a zeroed message of `size` payload bytes through `hooks`
    pub(crate) fn allocate(
        hooks: &Arc<dyn MemoryHooks>,
        handle: Handle,
        size: u16,
        incoming: bool,
        internal: Internal,
    ) -> Option<Self> {
        let (data, hooks) = if size == 0 {
            (NonNull::dangling(), None)
        } else {
            let layout = Self::layout(size);
            let data = hooks.alloc(layout)?;
            unsafe { std::ptr::write_bytes(data.as_ptr(), 0, size as usize) };
            (data, Some(Arc::clone(hooks)))
        };

        Some(Self {
            handle,
            internal,
            incoming,
            data,
            size,
            hooks,
        })
    }

    fn layout(size: u16) -> Layout {
        // A u8 array layout of at most 65535 bytes cannot overflow
        Layout::from_size_align(size as usize, 1).unwrap_or_else(|_| Layout::new::<u8>())
    }

    /// Connection the message belongs to
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Library-internal tag
    pub fn internal(&self) -> Internal {
        self.internal
    }

    /// True for messages travelling toward the application
    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    pub(crate) fn set_incoming(&mut self, incoming: bool) {
        self.incoming = incoming;
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// Check for an empty payload
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        // Safety: data spans `size` initialised bytes (or is dangling with size 0)
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.size as usize) }
    }

    /// Mutable payload bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.size as usize) }
    }

    /// Id carried in the first payload byte, if any
    pub fn id(&self) -> Option<MessageId> {
        self.data().first().map(|id| MessageId::from_u8(*id))
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.take() {
            hooks.free(self.data, Self::layout(self.size));
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("handle", &self.handle)
            .field("internal", &self.internal)
            .field("incoming", &self.incoming)
            .field("size", &self.size)
            .finish()
    }
}

unsafe impl Send for Message {}
unsafe impl Sync for Message {}

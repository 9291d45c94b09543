//! FIFO queue of owned messages

use std::collections::VecDeque;

use super::message::Message;

/// Ordered queue of messages; the queue owns what it holds
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<Message>,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn push(&mut self, msg: Message) {
        self.items.push_back(msg);
    }

    /// Head of the queue without removing it
    pub fn peek(&self) -> Option<&Message> {
        self.items.front()
    }

    /// Mutable head of the queue
    pub fn peek_mut(&mut self) -> Option<&mut Message> {
        self.items.front_mut()
    }

    /// Remove and return the head
    pub fn pop(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every message, head first
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.items.drain(..)
    }

    /// Iterate head to tail
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }
}

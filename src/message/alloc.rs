//! Message allocator with a byte budget

use std::sync::Arc;

use crate::{
    allocators::{BudgetHooks, MemoryHooks, SystemHooks},
    pool::Handle,
};

use super::message::{Internal, Message, MessageId};

/// Counters kept by a [`MessageAllocator`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStats {
    /// Messages handed out through the budget
    pub allocated: u64,
    /// Requests refused because the budget was exhausted
    pub refused: u64,
    /// Library notices created outside the budget
    pub notices: u64,
}

/// Creates messages whose payloads are charged against a byte budget
///
/// Payload bytes come from the allocator's hooks and return to the budget
/// when a message is dropped. Library notices (disconnect and failure ids)
/// use the same hooks but bypass the budget, so a starved budget cannot
/// swallow them.
#[derive(Debug)]
pub struct MessageAllocator {
    budget: Arc<BudgetHooks>,
    hooks: Arc<dyn MemoryHooks>,
    notices: Arc<dyn MemoryHooks>,
    stats: MessageStats,
}

impl MessageAllocator {
    /// Create an allocator that keeps at most `budget` payload bytes alive
    pub fn new(budget: usize) -> Self {
        Self::with_hooks(budget, Arc::new(SystemHooks))
    }

    /// Like [`MessageAllocator::new`], with payload bytes taken from `hooks`
    pub fn with_hooks(budget: usize, hooks: Arc<dyn MemoryHooks>) -> Self {
        let budget = Arc::new(BudgetHooks::with_inner(budget, Arc::clone(&hooks)));
        Self {
            hooks: budget.clone(),
            budget,
            notices: hooks,
            stats: MessageStats::default(),
        }
    }

    /// Allocate a zeroed message, `None` when the budget is exhausted
    pub fn alloc(&mut self, handle: Handle, size: u16, incoming: bool, internal: Internal) -> Option<Message> {
        match Message::allocate(&self.hooks, handle, size, incoming, internal) {
            Some(msg) => {
                self.stats.allocated += 1;
                Some(msg)
            }
            None => {
                self.stats.refused += 1;
                log::debug!(
                    "message budget exhausted: {} bytes requested for {}, {} of {} in use",
                    size,
                    handle,
                    self.budget.used(),
                    self.budget.limit()
                );
                None
            }
        }
    }

    /// Build an incoming library message outside the budget
    ///
    /// The payload is `id` followed by `extra`.
    pub fn notice(&mut self, handle: Handle, id: MessageId, internal: Internal, extra: &[u8]) -> Option<Message> {
        let size = u16::try_from(extra.len() + 1).ok()?;
        let mut msg = Message::allocate(&self.notices, handle, size, true, internal)?;
        let data = msg.data_mut();
        data[0] = id.as_u8();
        data[1..].copy_from_slice(extra);
        self.stats.notices += 1;
        Some(msg)
    }

    /// Payload bytes currently alive
    pub fn used(&self) -> usize {
        self.budget.used()
    }

    /// Configured payload budget
    pub fn budget(&self) -> usize {
        self.budget.limit()
    }

    /// Allocation counters
    pub fn stats(&self) -> &MessageStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_refusal_and_recovery() {
        let mut messages = MessageAllocator::new(100);
        let handle = Handle::new(0, 0);

        let first = messages.alloc(handle, 80, false, Internal::None).unwrap();
        assert!(messages.alloc(handle, 30, false, Internal::None).is_none());
        assert_eq!(messages.stats().refused, 1);

        drop(first);
        assert_eq!(messages.used(), 0);
        assert!(messages.alloc(handle, 30, false, Internal::None).is_some());
        assert_eq!(messages.stats().allocated, 2);
    }

    #[test]
    fn test_notice_ignores_budget() {
        let mut messages = MessageAllocator::new(4);
        let handle = Handle::new(2, 1);
        let _hog = messages.alloc(handle, 4, false, Internal::None).unwrap();

        let notice = messages
            .notice(handle, MessageId::LostConnection, Internal::Disconnect, &[])
            .unwrap();
        assert!(notice.is_incoming());
        assert_eq!(notice.internal(), Internal::Disconnect);
        assert_eq!(notice.id(), Some(MessageId::LostConnection));
        assert_eq!(messages.used(), 4);
        assert_eq!(messages.stats().notices, 1);
    }

    #[test]
    fn test_payloads_and_notices_use_given_hooks() {
        let outer = Arc::new(BudgetHooks::new(1 << 20));
        let mut messages = MessageAllocator::with_hooks(64, outer.clone());
        let handle = Handle::new(0, 0);

        let msg = messages.alloc(handle, 10, false, Internal::None).unwrap();
        assert_eq!(outer.used(), 10);
        assert_eq!(messages.used(), 10);

        let notice = messages
            .notice(handle, MessageId::ConnectFailed, Internal::Disconnect, &[])
            .unwrap();
        assert_eq!(outer.used(), 11);
        assert_eq!(messages.used(), 10);

        drop(msg);
        drop(notice);
        assert_eq!(outer.used(), 0);
    }

    #[test]
    fn test_notice_payload() {
        let mut messages = MessageAllocator::new(0);
        let notice = messages
            .notice(Handle::new(0, 0), MessageId::Notify, Internal::Notify, &42u64.to_le_bytes())
            .unwrap();
        assert_eq!(notice.len(), 9);
        assert_eq!(notice.id(), Some(MessageId::Notify));
        assert_eq!(&notice.data()[1..], &42u64.to_le_bytes());
    }
}

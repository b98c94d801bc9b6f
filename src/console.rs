//! Console input queue.
//!
//! The keyboard interrupt handler pushes key codes; reader threads sleep
//! until one arrives. Lock order: key buffer, then the reader channel.

use crate::config::CONSOLE_QUEUE_DEPTH;
use crate::sched::{LockContext, ThreadContext};
use crate::sync::{Spinlock, WaitChannel};
use heapless::Deque;
use log::trace;
use portable_atomic::{AtomicUsize, Ordering};

/// Bounded FIFO of key codes shared by interrupt handlers and readers.
pub struct InputQueue {
    keys: Spinlock<Deque<u8, CONSOLE_QUEUE_DEPTH>>,
    readers: WaitChannel,
    dropped: AtomicUsize,
}

impl InputQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            keys: Spinlock::new_irqsafe("console_keys", Deque::new()),
            readers: WaitChannel::new("console_readers"),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Append a key and wake readers.
    ///
    /// Returns `false`, dropping the key, when the queue is full.
    pub fn push<C: LockContext + ?Sized>(&self, ctx: &C, key: u8) -> bool {
        let mut keys = self.keys.lock(ctx);
        if keys.push_back(key).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("console: queue full, key {:#04x} dropped", key);
            return false;
        }
        self.readers.wake(ctx);
        true
    }

    /// Take the oldest key, if any.
    pub fn try_read<C: LockContext + ?Sized>(&self, ctx: &C) -> Option<u8> {
        self.keys.lock(ctx).pop_front()
    }

    /// Take the oldest key, sleeping until one arrives.
    ///
    /// # Panics
    ///
    /// Panics if the caller holds a spinlock.
    pub fn read(&self, ctx: &mut ThreadContext<'_>) -> u8 {
        ctx.assert_may_block("console read");
        let ctx = &*ctx;

        let mut keys = self.keys.lock(ctx);
        loop {
            if let Some(key) = keys.pop_front() {
                return key;
            }
            self.readers.sleep_on(ctx, keys);
            keys = self.keys.lock(ctx);
        }
    }

    /// Keys waiting to be read.
    pub fn len<C: LockContext + ?Sized>(&self, ctx: &C) -> usize {
        self.keys.lock(ctx).len()
    }

    /// Whether no key is waiting.
    pub fn is_empty<C: LockContext + ?Sized>(&self, ctx: &C) -> bool {
        self.keys.lock(ctx).is_empty()
    }

    /// Keys lost to a full queue.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

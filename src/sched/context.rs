//! Execution-context capabilities.
//!
//! Code never asks "which thread is current on this CPU" through a global.
//! A kernel thread is handed a [`ThreadContext`] by its scheduler and an
//! interrupt handler is handed an [`InterruptContext`] by the interrupt
//! table. Both can take spinlocks. Only a `ThreadContext` can block.
//! Spinlock guards borrow their context shared and the sleeping locks take it
//! `&mut`, so the borrow checker rejects `Mutex::lock` while any spinlock
//! guard is alive. Wait channel sleeps run under their own spinlock and check
//! for any other one at run time.

use super::cpu::Cpu;
use super::trait_def::Scheduler;
use crate::thread::{Thread, ThreadId};
use core::marker::PhantomData;

/// Anything that may acquire a spinlock.
pub trait LockContext {
    /// The CPU this context runs on.
    fn cpu(&self) -> &Cpu;

    /// The scheduler threads are woken through.
    fn scheduler(&self) -> &dyn Scheduler;

    /// Whether this is interrupt context.
    fn in_interrupt(&self) -> bool {
        self.cpu().in_interrupt()
    }
}

/// Capability of a running kernel thread.
///
/// Not `Send`: it belongs to the thread it was created for.
pub struct ThreadContext<'k> {
    scheduler: &'k dyn Scheduler,
    thread: Thread,
    _not_send: PhantomData<*const ()>,
}

impl<'k> ThreadContext<'k> {
    /// Create the context for `thread`.
    ///
    /// # Safety
    ///
    /// `thread` must be the thread currently running on the calling CPU of
    /// `scheduler`, the context must only be used from that thread, and no
    /// other context may exist for it.
    pub unsafe fn new(scheduler: &'k dyn Scheduler, thread: Thread) -> Self {
        Self {
            scheduler,
            thread,
            _not_send: PhantomData,
        }
    }

    /// The calling thread.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Identifier of the calling thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    /// The scheduler running this thread.
    pub fn scheduler(&self) -> &'k dyn Scheduler {
        self.scheduler
    }

    /// The CPU the thread is running on right now.
    ///
    /// Stable while the thread holds a spinlock; may change across a sleep or
    /// a yield.
    pub fn cpu(&self) -> &'k Cpu {
        self.scheduler.cpu(self.thread.cpu_id())
    }

    /// Spinlocks held on the current CPU.
    pub fn critical_depth(&self) -> usize {
        self.cpu().critical_depth()
    }

    /// Panic unless the caller may block here.
    ///
    /// Blocking with a spinlock held can deadlock the CPU, and interrupt
    /// context has no thread to deschedule.
    pub fn assert_may_block(&self, operation: &str) {
        let cpu = self.cpu();
        assert!(
            !cpu.in_interrupt(),
            "{}: blocking call from interrupt context on cpu {}",
            operation,
            cpu.id()
        );
        assert_eq!(
            cpu.critical_depth(),
            0,
            "{}: blocking call with {} spinlock(s) held on cpu {}",
            operation,
            cpu.critical_depth(),
            cpu.id()
        );
    }

    /// Give up the CPU, staying runnable.
    pub fn yield_now(&mut self) {
        self.assert_may_block("yield_now");
        self.scheduler.yield_now(&self.thread);
    }

    /// Second handle for the same thread, kept by mutex guards to release
    /// the lock on drop. Never used to block.
    pub(crate) fn handle(&self) -> ThreadContext<'k> {
        ThreadContext {
            scheduler: self.scheduler,
            thread: self.thread.clone(),
            _not_send: PhantomData,
        }
    }
}

impl LockContext for ThreadContext<'_> {
    fn cpu(&self) -> &Cpu {
        ThreadContext::cpu(self)
    }

    fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler
    }
}

impl core::fmt::Debug for ThreadContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("thread", &self.thread)
            .finish()
    }
}

/// Capability of an interrupt handler.
///
/// Can take interrupt-safe spinlocks and wake threads. It has no thread to
/// put to sleep, so nothing that blocks accepts it.
pub struct InterruptContext<'a> {
    scheduler: &'a dyn Scheduler,
    cpu: &'a Cpu,
    irq: u32,
    _not_send: PhantomData<*const ()>,
}

impl<'a> InterruptContext<'a> {
    pub(crate) fn new(scheduler: &'a dyn Scheduler, cpu: &'a Cpu, irq: u32) -> Self {
        Self {
            scheduler,
            cpu,
            irq,
            _not_send: PhantomData,
        }
    }

    /// Interrupt line being serviced.
    pub fn irq(&self) -> u32 {
        self.irq
    }
}

impl LockContext for InterruptContext<'_> {
    fn cpu(&self) -> &Cpu {
        self.cpu
    }

    fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler
    }

    fn in_interrupt(&self) -> bool {
        true
    }
}

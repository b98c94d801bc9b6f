//! Per-CPU state consumed by the synchronization core.

use crate::arch::{Arch, DefaultArch};
use crate::thread::Thread;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

/// CPU identifier type.
pub type CpuId = usize;

/// State the core keeps for one CPU.
///
/// Every field is only written by code running on this CPU, except the
/// current-thread slot which the scheduler updates while dispatching.
pub struct Cpu {
    id: CpuId,
    /// Number of spinlocks currently held on this CPU.
    critical_depth: AtomicUsize,
    /// Interrupt state saved when the depth went from 0 to 1.
    irq_was_enabled: AtomicBool,
    /// Nested interrupt handlers currently running on this CPU.
    irq_nesting: AtomicUsize,
    current: spin::Mutex<Option<Thread>>,
}

impl Cpu {
    /// Create the record for CPU `id`, idle and outside any critical section.
    pub const fn new(id: CpuId) -> Self {
        Self {
            id,
            critical_depth: AtomicUsize::new(0),
            irq_was_enabled: AtomicBool::new(false),
            irq_nesting: AtomicUsize::new(0),
            current: spin::Mutex::new(None),
        }
    }

    /// This CPU's identifier.
    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Number of spinlocks held on this CPU.
    ///
    /// Blocking is only legal at depth zero.
    pub fn critical_depth(&self) -> usize {
        self.critical_depth.load(Ordering::Acquire)
    }

    /// Whether an interrupt handler is running on this CPU.
    pub fn in_interrupt(&self) -> bool {
        self.irq_nesting.load(Ordering::Acquire) > 0
    }

    /// The thread running on this CPU, if any.
    pub fn current_thread(&self) -> Option<Thread> {
        self.current.lock().clone()
    }

    /// Replace the current-thread slot, returning the previous occupant.
    ///
    /// Called by the scheduler when it dispatches or deschedules a thread.
    pub fn set_current(&self, thread: Option<Thread>) -> Option<Thread> {
        core::mem::replace(&mut *self.current.lock(), thread)
    }

    /// Enter a critical section: mask interrupts, then raise the depth.
    pub(crate) fn push_critical(&self) {
        let was_enabled = DefaultArch::interrupts_enabled();
        DefaultArch::disable_interrupts();
        if self.critical_depth.fetch_add(1, Ordering::AcqRel) == 0 {
            self.irq_was_enabled.store(was_enabled, Ordering::Relaxed);
        }
    }

    /// Leave a critical section; interrupts come back when the outermost
    /// section ends, and only if they were on when it started.
    pub(crate) fn pop_critical(&self) {
        let prev = self.critical_depth.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "cpu {}: critical section underflow", self.id);
        if prev == 1 && self.irq_was_enabled.load(Ordering::Relaxed) {
            DefaultArch::enable_interrupts();
        }
    }

    pub(crate) fn enter_interrupt(&self) {
        self.irq_nesting.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn exit_interrupt(&self) {
        let prev = self.irq_nesting.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "cpu {}: interrupt exit without entry", self.id);
    }

    /// Drop whatever critical state a dead thread left behind.
    #[cfg(any(test, feature = "std-shim"))]
    pub(crate) fn reset_critical(&self) {
        self.critical_depth.store(0, Ordering::Release);
    }
}

impl core::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cpu")
            .field("id", &self.id)
            .field("critical_depth", &self.critical_depth())
            .field("in_interrupt", &self.in_interrupt())
            .finish()
    }
}

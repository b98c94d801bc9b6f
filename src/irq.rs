//! Interrupt handler table and dispatch.
//!
//! Handlers are plain functions taking an [`InterruptContext`] and an opaque
//! word chosen at registration. Several handlers may share a line; they run
//! in registration order.

use crate::arch::{Arch, DefaultArch};
use crate::config::{IRQ_HANDLERS_PER_LINE, MAX_IRQS};
use crate::errors::{IrqError, SyncResult};
use crate::sched::{CpuId, InterruptContext, LockContext, Scheduler};
use crate::sync::Spinlock;
use heapless::Vec;
use log::{debug, trace};
use portable_atomic::{AtomicUsize, Ordering};

extern crate alloc;
use alloc::collections::BTreeMap;

/// Interrupt handler entry point.
pub type IrqHandler = fn(&InterruptContext<'_>, usize);

#[derive(Clone, Copy)]
struct Handler {
    id: usize,
    func: IrqHandler,
    arg: usize,
}

type Line = Vec<Handler, IRQ_HANDLERS_PER_LINE>;

/// Proof of a registration, consumed by [`IrqTable::unregister`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the registration is needed to unregister the handler"]
pub struct IrqRegistration {
    irq: u32,
    id: usize,
}

impl IrqRegistration {
    /// The line the handler was registered on.
    pub fn irq(&self) -> u32 {
        self.irq
    }
}

/// Table of interrupt handlers, indexed by line.
pub struct IrqTable {
    lines: Spinlock<BTreeMap<u32, Line>>,
    next_id: AtomicUsize,
    spurious: AtomicUsize,
}

impl IrqTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            lines: Spinlock::new_irqsafe("irq_table", BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            spurious: AtomicUsize::new(0),
        }
    }

    /// Add `func` to line `irq`; it will be called with `arg`.
    ///
    /// # Errors
    ///
    /// [`IrqError::InvalidIrq`] for a line past [`MAX_IRQS`] and
    /// [`IrqError::LineFull`] when the line has no free handler slot.
    pub fn register<C: LockContext + ?Sized>(
        &self,
        ctx: &C,
        irq: u32,
        func: IrqHandler,
        arg: usize,
    ) -> SyncResult<IrqRegistration> {
        if irq >= MAX_IRQS {
            return Err(IrqError::InvalidIrq(irq).into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut lines = self.lines.lock(ctx);
        lines
            .entry(irq)
            .or_insert_with(Vec::new)
            .push(Handler { id, func, arg })
            .map_err(|_| IrqError::LineFull(irq))?;
        drop(lines);

        debug!("irq {}: handler {} registered", irq, id);
        Ok(IrqRegistration { irq, id })
    }

    /// Remove a handler.
    ///
    /// # Errors
    ///
    /// [`IrqError::NotRegistered`] if the handler is no longer on its line.
    pub fn unregister<C: LockContext + ?Sized>(
        &self,
        ctx: &C,
        registration: IrqRegistration,
    ) -> SyncResult<()> {
        let IrqRegistration { irq, id } = registration;
        let mut lines = self.lines.lock(ctx);
        let line = lines
            .get_mut(&irq)
            .ok_or(IrqError::NotRegistered(irq))?;
        let index = line
            .iter()
            .position(|h| h.id == id)
            .ok_or(IrqError::NotRegistered(irq))?;
        line.remove(index);
        if line.is_empty() {
            lines.remove(&irq);
        }
        drop(lines);

        debug!("irq {}: handler {} unregistered", irq, id);
        Ok(())
    }

    /// Number of handlers on line `irq`.
    pub fn handler_count<C: LockContext + ?Sized>(&self, ctx: &C, irq: u32) -> usize {
        self.lines.lock(ctx).get(&irq).map_or(0, |line| line.len())
    }

    /// Interrupts that arrived on a line with no handler.
    pub fn spurious(&self) -> usize {
        self.spurious.load(Ordering::Relaxed)
    }

    /// Service interrupt `irq` on `cpu`.
    ///
    /// Called from the low-level vector with local interrupts masked. Marks
    /// the CPU as in interrupt context for the duration, so blocking calls
    /// and normal spinlocks are refused inside handlers. Returns the number
    /// of handlers run.
    pub fn dispatch(&self, scheduler: &dyn Scheduler, cpu: CpuId, irq: u32) -> usize {
        let cpu = scheduler.cpu(cpu);
        let was_enabled = DefaultArch::interrupts_enabled();
        DefaultArch::disable_interrupts();
        cpu.enter_interrupt();

        let ctx = InterruptContext::new(scheduler, cpu, irq);
        // Handlers run without the table lock so they may take other locks.
        let handlers: Line = self
            .lines
            .lock(&ctx)
            .get(&irq)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            trace!("irq {}: spurious on cpu {}", irq, cpu.id());
        }
        for handler in &handlers {
            (handler.func)(&ctx, handler.arg);
        }

        cpu.exit_interrupt();
        if was_enabled {
            DefaultArch::enable_interrupts();
        }
        handlers.len()
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

//! The contract a scheduler must satisfy for the synchronization core.

use super::cpu::{Cpu, CpuId};
use crate::thread::Thread;

/// Scheduler interface consumed by wait channels and mutexes.
///
/// The core never picks which thread runs next. It only asks the scheduler to
/// take a thread off its CPU until woken, and to make a woken thread runnable.
pub trait Scheduler: Send + Sync {
    /// Per-CPU records, indexed by [`CpuId`].
    fn cpus(&self) -> &[Cpu];

    /// Record for one CPU.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a CPU of this scheduler.
    fn cpu(&self, id: CpuId) -> &Cpu {
        &self.cpus()[id]
    }

    /// Deschedule the calling thread until it is woken.
    ///
    /// Called on the thread's own CPU after the core has marked it
    /// [`Blocked`](crate::thread::ThreadState::Blocked) and released every
    /// spinlock. Must yield the CPU to another runnable thread and return only
    /// once the thread has been made `Ready` and dispatched again.
    ///
    /// A wake may land between the core releasing its lock and this call. If
    /// the thread is no longer `Blocked` on entry, return without sleeping.
    fn block(&self, current: &Thread);

    /// Make a blocked thread runnable.
    ///
    /// Transitions `thread` from `Blocked` to `Ready` (see
    /// [`Thread::unblock`]) and queues it for a CPU. It does not have to run
    /// immediately. May be called from interrupt context and with spinlocks
    /// held, so it must not block.
    fn wake(&self, thread: &Thread);

    /// Handle a thread yielding the CPU voluntarily.
    ///
    /// The thread stays runnable. Default: keep running.
    fn yield_now(&self, current: &Thread) {
        let _ = current;
    }
}

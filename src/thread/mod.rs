//! Kernel thread handles as seen by the synchronization core.
//!
//! Threads are created and destroyed by the scheduler. The core only holds
//! cheap reference-counted handles, reads their state, and drives the
//! Running → Blocked → Ready transitions around a sleep.

use crate::sched::CpuId;
use core::fmt;
use core::num::NonZeroUsize;
use portable_atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;

/// Unique identifier for threads.
///
/// Thread IDs are never reused and are guaranteed to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a thread ID, or `None` for zero.
    pub const fn new(id: usize) -> Option<Self> {
        match NonZeroUsize::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Runnable, waiting for a CPU
    Ready = 0,
    /// Currently running on a CPU
    Running = 1,
    /// Parked on a wait channel until woken
    Blocked = 2,
    /// Entry point returned
    Finished = 3,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ThreadState::Ready,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Finished,
        }
    }
}

/// Reference-counted handle to a kernel thread.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    id: ThreadId,
    name: String,
    state: AtomicU8,
    /// CPU the thread is running on, or last ran on.
    cpu: AtomicUsize,
    /// Set while the thread sits in some wait channel's queue.
    queued: AtomicBool,
}

impl Thread {
    /// Create a new thread handle in the `Ready` state.
    pub fn new(id: ThreadId, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                name: name.into(),
                state: AtomicU8::new(ThreadState::Ready as u8),
                cpu: AtomicUsize::new(0),
                queued: AtomicBool::new(false),
            }),
        }
    }

    /// Get the thread's unique identifier.
    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Get the thread name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the thread's current state.
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Set the thread's state.
    ///
    /// Reserved for schedulers; the core only moves threads between
    /// `Running`, `Blocked` and `Ready` through [`prepare_block`] and
    /// [`unblock`].
    ///
    /// [`prepare_block`]: Thread::prepare_block
    /// [`unblock`]: Thread::unblock
    pub fn set_state(&self, new_state: ThreadState) {
        self.inner.state.store(new_state as u8, Ordering::Release);
    }

    /// Check if this thread is runnable (ready or running).
    pub fn is_runnable(&self) -> bool {
        matches!(self.state(), ThreadState::Ready | ThreadState::Running)
    }

    /// CPU the thread runs on, or last ran on.
    pub fn cpu_id(&self) -> CpuId {
        self.inner.cpu.load(Ordering::Acquire)
    }

    /// Record the CPU the scheduler dispatched this thread to.
    pub fn set_cpu(&self, cpu: CpuId) {
        self.inner.cpu.store(cpu, Ordering::Release);
    }

    /// Mark the running thread `Blocked` ahead of a sleep.
    ///
    /// Done while the wait channel lock is held, so a wake that lands between
    /// releasing that lock and descheduling sees `Blocked` and is not lost.
    pub fn prepare_block(&self) {
        let prev = self.inner.state.swap(ThreadState::Blocked as u8, Ordering::AcqRel);
        assert_eq!(
            ThreadState::from_u8(prev),
            ThreadState::Running,
            "thread {} ({}) blocked while not running",
            self.id(),
            self.name()
        );
    }

    /// `Blocked` → `Ready`. Returns `false` if the thread was not blocked.
    pub fn unblock(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                ThreadState::Blocked as u8,
                ThreadState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether both handles refer to the same thread.
    pub fn ptr_eq(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn enter_wait_queue(&self) {
        let was_queued = self.inner.queued.swap(true, Ordering::AcqRel);
        assert!(
            !was_queued,
            "thread {} ({}) is already parked on a wait channel",
            self.id(),
            self.name()
        );
    }

    pub(crate) fn leave_wait_queue(&self) {
        self.inner.queued.store(false, Ordering::Release);
    }

    /// Whether the thread is parked in a wait channel queue.
    pub fn is_queued(&self) -> bool {
        self.inner.queued.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("cpu", &self.cpu_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(id: usize) -> Thread {
        Thread::new(ThreadId::new(id).unwrap(), "test")
    }

    #[test]
    fn test_thread_id_rejects_zero() {
        assert!(ThreadId::new(0).is_none());
        assert_eq!(ThreadId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn test_thread_state_transitions() {
        let t = thread(1);
        assert_eq!(t.state(), ThreadState::Ready);
        assert!(t.is_runnable());

        t.set_state(ThreadState::Running);
        t.prepare_block();
        assert_eq!(t.state(), ThreadState::Blocked);
        assert!(!t.is_runnable());

        assert!(t.unblock());
        assert_eq!(t.state(), ThreadState::Ready);
        // A second wake is a no-op.
        assert!(!t.unblock());
    }

    #[test]
    #[should_panic(expected = "blocked while not running")]
    fn test_block_requires_running() {
        thread(2).prepare_block();
    }

    #[test]
    #[should_panic(expected = "already parked")]
    fn test_single_wait_queue_membership() {
        let t = thread(3);
        t.enter_wait_queue();
        t.enter_wait_queue();
    }

    #[test]
    fn test_clone_shares_state() {
        let t = thread(4);
        let other = t.clone();
        other.set_cpu(3);
        assert_eq!(t.cpu_id(), 3);
        assert!(t.ptr_eq(&other));
        assert!(!t.ptr_eq(&thread(4)));
    }
}

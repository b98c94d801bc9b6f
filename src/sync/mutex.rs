//! Sleeping mutual exclusion.
//!
//! A [`Mutex`] is a status word and owner, protected by an internal
//! [`Spinlock`], plus a [`WaitChannel`] that contenders sleep on. Lock order
//! inside the mutex is fixed: state spinlock first, channel lock second.
//!
//! Acquiring a mutex may block, so [`Mutex::lock`] needs the caller's
//! `&mut ThreadContext`. While any spinlock guard borrows the context, that
//! borrow is unavailable:
//!
//! ```compile_fail
//! use kernel_sync::{Mutex, Spinlock, ThreadContext};
//!
//! fn broken(ctx: &mut ThreadContext<'_>, spin: &Spinlock<u32>, mutex: &Mutex<u32>) {
//!     let guard = spin.lock(&*ctx);
//!     let _held = mutex.lock(ctx);
//!     drop(guard);
//! }
//! ```
//!
//! The mutex is not reentrant: a thread that locks a mutex it already owns
//! sleeps forever.

use super::spinlock::Spinlock;
use super::wait_channel::WaitChannel;
use crate::errors::{SyncError, SyncResult};
use crate::sched::ThreadContext;
use crate::thread::ThreadId;
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use log::{debug, trace, warn};

/// Lock status of a [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexStatus {
    /// Free
    Unlocked,
    /// Held by a thread
    Locked,
}

struct MutexState {
    status: MutexStatus,
    owner: Option<ThreadId>,
}

/// A blocking lock protecting a value of type `T`.
pub struct Mutex<T: ?Sized> {
    name: &'static str,
    state: Spinlock<MutexState>,
    chan: WaitChannel,
    data: UnsafeCell<T>,
}

// SAFETY: the data is only reachable through the single outstanding guard.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create an unlocked mutex.
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            state: Spinlock::new(
                name,
                MutexState {
                    status: MutexStatus::Unlocked,
                    owner: None,
                },
            ),
            chan: WaitChannel::new(name),
            data: UnsafeCell::new(value),
        }
    }

    /// Tear the mutex down and return the protected value.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is locked or threads are waiting on it.
    pub fn destroy(self) -> T {
        let Mutex {
            name,
            state,
            chan,
            data,
        } = self;

        let state = state.destroy();
        if state.status == MutexStatus::Locked {
            match state.owner {
                Some(owner) => panic!("mutex {}: destroyed while locked by thread {}", name, owner),
                None => panic!("mutex {}: destroyed while locked", name),
            }
        }
        chan.destroy();
        debug!("mutex {}: destroyed", name);
        data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the mutex, sleeping while another thread holds it.
    ///
    /// # Panics
    ///
    /// Panics if the caller holds a spinlock or runs in interrupt context.
    pub fn lock<'a, 'k: 'a>(&'a self, ctx: &mut ThreadContext<'k>) -> MutexGuard<'a, T> {
        ctx.assert_may_block(self.name);
        let ctx = &*ctx;

        let mut state = self.state.lock(ctx);
        if state.status == MutexStatus::Locked && state.owner == Some(ctx.thread_id()) {
            warn!(
                "mutex {}: thread {} relocking a mutex it owns",
                self.name,
                ctx.thread_id()
            );
        }
        while state.status == MutexStatus::Locked {
            trace!("mutex {}: thread {} contended", self.name, ctx.thread_id());
            self.chan.sleep_on(ctx, state);
            state = self.state.lock(ctx);
        }
        state.status = MutexStatus::Locked;
        state.owner = Some(ctx.thread_id());
        drop(state);

        MutexGuard {
            mutex: self,
            owner: ctx.handle(),
        }
    }

    /// Acquire the mutex only if it is free.
    ///
    /// Never blocks. The check and the claim happen under the state spinlock,
    /// so two threads cannot both succeed.
    ///
    /// # Errors
    ///
    /// [`SyncError::Busy`] if the mutex is held, including by the caller.
    pub fn try_lock<'a, 'k: 'a>(&'a self, ctx: &ThreadContext<'k>) -> SyncResult<MutexGuard<'a, T>> {
        let mut state = self.state.lock(ctx);
        if state.status == MutexStatus::Locked {
            return Err(SyncError::Busy);
        }
        state.status = MutexStatus::Locked;
        state.owner = Some(ctx.thread_id());
        drop(state);

        Ok(MutexGuard {
            mutex: self,
            owner: ctx.handle(),
        })
    }

    /// Release a mutex whose guard was forgotten.
    ///
    /// # Safety
    ///
    /// The caller must own the mutex and no guard for it may still be live:
    /// a live guard would unlock it a second time on drop.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not the owner.
    pub unsafe fn force_unlock(&self, ctx: &ThreadContext<'_>) {
        self.release(ctx);
    }

    /// Whether some thread holds the mutex.
    pub fn is_locked(&self, ctx: &ThreadContext<'_>) -> bool {
        self.state.lock(ctx).status == MutexStatus::Locked
    }

    /// The owning thread, if any.
    pub fn owner(&self, ctx: &ThreadContext<'_>) -> Option<ThreadId> {
        self.state.lock(ctx).owner
    }

    /// Threads sleeping on the mutex.
    pub fn waiters(&self, ctx: &ThreadContext<'_>) -> usize {
        self.chan.waiter_count(ctx)
    }

    /// Mutable access without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release(&self, ctx: &ThreadContext<'_>) {
        let mut state = self.state.lock(ctx);
        if state.owner != Some(ctx.thread_id()) {
            match state.owner {
                Some(owner) => panic!(
                    "mutex {}: unlocked by thread {} but owned by thread {}",
                    self.name,
                    ctx.thread_id(),
                    owner
                ),
                None => panic!(
                    "mutex {}: unlocked by thread {} but not locked",
                    self.name,
                    ctx.thread_id()
                ),
            }
        }
        state.status = MutexStatus::Unlocked;
        state.owner = None;
        self.chan.wake(ctx);
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A held mutex. Dropping it unlocks and wakes every waiter.
///
/// Not `Send`: only the owning thread may unlock.
#[must_use = "dropping the guard unlocks the mutex immediately"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    owner: ThreadContext<'a>,
}

impl<T: ?Sized> MutexGuard<'_, T> {
    /// Release the mutex. Same as dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is the mutex's only owner.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard is the mutex's only owner.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release(&self.owner);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

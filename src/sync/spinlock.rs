//! Busy-waiting mutual exclusion.
//!
//! A spinlock never suspends its caller. Acquiring one raises the CPU's
//! critical-section depth and masks local interrupts *before* spinning, so
//! neither an interrupt handler nor the scheduler can run on that CPU while
//! the lock is held or being waited for. Hold times must be short and must
//! not contain anything that blocks.
//!
//! Spinlocks are not reentrant. A CPU that re-acquires a lock it already
//! holds spins forever; with [`SPIN_DEBUG`] on, the owner tag catches it and
//! panics instead.

use crate::arch::{Arch, DefaultArch};
use crate::config::SPIN_DEBUG;
use crate::sched::{Cpu, CpuId, LockContext};
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use log::debug;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

const NO_OWNER: usize = usize::MAX;

/// Where a spinlock may be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinlockKind {
    /// Thread context only. Taking it in an interrupt handler is fatal.
    Normal,
    /// Thread or interrupt context.
    IrqSafe,
}

/// A named spinlock protecting a value of type `T`.
///
/// The value is only reachable through the guard returned by [`lock`] or
/// [`try_lock`]; dropping the guard is the unlock.
///
/// [`lock`]: Spinlock::lock
/// [`try_lock`]: Spinlock::try_lock
pub struct Spinlock<T: ?Sized> {
    name: &'static str,
    kind: SpinlockKind,
    locked: AtomicBool,
    /// CPU holding the lock, or `NO_OWNER`.
    owner: AtomicUsize,
    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out at most one guard at a time, so `T` is only ever
// touched by one CPU at once.
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    /// Create a [`SpinlockKind::Normal`] spinlock.
    pub const fn new(name: &'static str, value: T) -> Self {
        Self::with_kind(name, SpinlockKind::Normal, value)
    }

    /// Create a spinlock that interrupt handlers may take.
    pub const fn new_irqsafe(name: &'static str, value: T) -> Self {
        Self::with_kind(name, SpinlockKind::IrqSafe, value)
    }

    const fn with_kind(name: &'static str, kind: SpinlockKind, value: T) -> Self {
        Self {
            name,
            kind,
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
            data: UnsafeCell::new(value),
        }
    }

    /// Tear the lock down and return the protected value.
    ///
    /// # Panics
    ///
    /// Panics if the lock is still held (a guard was leaked).
    pub fn destroy(self) -> T {
        assert!(
            !self.locked.load(Ordering::Acquire),
            "spinlock {}: destroyed while held by cpu {}",
            self.name,
            self.owner.load(Ordering::Relaxed)
        );
        debug!("spinlock {}: destroyed", self.name);
        self.data.into_inner()
    }
}

impl<T: ?Sized> Spinlock<T> {
    /// Diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Normal or interrupt-safe.
    pub fn kind(&self) -> SpinlockKind {
        self.kind
    }

    /// Whether some CPU holds the lock right now.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// CPU holding the lock, for diagnostics.
    pub fn holder(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Relaxed) {
            NO_OWNER => None,
            cpu => Some(cpu),
        }
    }

    /// Acquire the lock, spinning until it is free.
    ///
    /// The guard borrows `ctx`, so a `&mut ThreadContext` (needed by anything
    /// that blocks) is unavailable until the guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if a [`Normal`](SpinlockKind::Normal) lock is taken in
    /// interrupt context, or (with [`SPIN_DEBUG`]) if this CPU already holds
    /// the lock.
    pub fn lock<'a, C: LockContext + ?Sized>(&'a self, ctx: &'a C) -> SpinlockGuard<'a, T> {
        let cpu = ctx.cpu();
        self.check_context(ctx, cpu);
        if SPIN_DEBUG && self.owner.load(Ordering::Relaxed) == cpu.id() {
            panic!(
                "spinlock {}: recursive acquire on cpu {}",
                self.name,
                cpu.id()
            );
        }

        cpu.push_critical();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                DefaultArch::cpu_relax();
            }
        }
        self.owner.store(cpu.id(), Ordering::Relaxed);

        SpinlockGuard::new(self, cpu)
    }

    /// Try once to acquire the lock, without spinning.
    ///
    /// Returns `None` if any CPU, including this one, holds it.
    pub fn try_lock<'a, C: LockContext + ?Sized>(
        &'a self,
        ctx: &'a C,
    ) -> Option<SpinlockGuard<'a, T>> {
        let cpu = ctx.cpu();
        self.check_context(ctx, cpu);

        cpu.push_critical();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(cpu.id(), Ordering::Relaxed);
            Some(SpinlockGuard::new(self, cpu))
        } else {
            cpu.pop_critical();
            None
        }
    }

    /// Mutable access without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn check_context<C: LockContext + ?Sized>(&self, ctx: &C, cpu: &Cpu) {
        if self.kind == SpinlockKind::Normal && ctx.in_interrupt() {
            panic!(
                "spinlock {}: normal spinlock taken in interrupt context on cpu {}",
                self.name,
                cpu.id()
            );
        }
    }
}

impl<T: ?Sized> fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("holder", &self.holder())
            .finish_non_exhaustive()
    }
}

/// A held spinlock.
///
/// Not `Send`: it must be released on the CPU that acquired it.
#[must_use = "dropping the guard releases the spinlock immediately"]
pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
    cpu: &'a Cpu,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> SpinlockGuard<'a, T> {
    fn new(lock: &'a Spinlock<T>, cpu: &'a Cpu) -> Self {
        Self {
            lock,
            cpu,
            _not_send: PhantomData,
        }
    }

    /// Release the lock. Same as dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }

    /// The CPU holding the lock.
    pub fn cpu(&self) -> &'a Cpu {
        self.cpu
    }

    /// Name of the held lock.
    pub fn lock_name(&self) -> &'static str {
        self.lock.name
    }
}

impl<T: ?Sized> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        let owner = self.lock.owner.load(Ordering::Relaxed);
        if owner != self.cpu.id() {
            panic!(
                "spinlock {}: released by cpu {} but held by cpu {}",
                self.lock.name,
                self.cpu.id(),
                owner
            );
        }
        self.lock.owner.store(NO_OWNER, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
        self.cpu.pop_critical();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{HostScheduler, Scheduler};
    use crate::tests::helpers::{run, run_irq};
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    #[test]
    fn test_lock_raises_critical_depth() {
        run(1, |ctx| {
            let lock = Spinlock::new("depth", 0u32);
            assert_eq!(ctx.critical_depth(), 0);
            {
                let mut guard = lock.lock(&*ctx);
                *guard += 1;
                assert_eq!(ctx.critical_depth(), 1);
                assert_eq!(lock.holder(), Some(ctx.cpu().id()));
                assert!(lock.is_locked());
            }
            assert_eq!(ctx.critical_depth(), 0);
            assert_eq!(lock.holder(), None);
            assert_eq!(lock.destroy(), 1);
        });
    }

    #[test]
    fn test_nested_locks() {
        run(1, |ctx| {
            let ctx = &*ctx;
            let outer = Spinlock::new("outer", ());
            let inner = Spinlock::new("inner", ());
            let a = outer.lock(ctx);
            let b = inner.lock(ctx);
            assert_eq!(ctx.critical_depth(), 2);
            drop(a);
            assert_eq!(ctx.critical_depth(), 1);
            b.unlock();
            assert_eq!(ctx.critical_depth(), 0);
        });
    }

    #[test]
    fn test_try_lock_never_spins() {
        run(1, |ctx| {
            let ctx = &*ctx;
            let lock = Spinlock::new("try", 5);
            let guard = lock.try_lock(ctx).expect("free lock");
            assert_eq!(*guard, 5);
            // Held by this very CPU: fails instead of deadlocking.
            assert!(lock.try_lock(ctx).is_none());
            assert_eq!(ctx.critical_depth(), 1);
            drop(guard);
            assert!(lock.try_lock(ctx).is_some());
            assert_eq!(ctx.critical_depth(), 0);
        });
    }

    #[test]
    fn test_try_lock_from_other_cpu_fails_while_held() {
        let sched = HostScheduler::new(2).unwrap();
        let lock = Arc::new(Spinlock::new("shared", ()));
        let held = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));

        let holder = {
            let (lock, held, release) = (lock.clone(), held.clone(), release.clone());
            sched.spawn("holder", move |ctx| {
                let _guard = lock.lock(&*ctx);
                held.store(true, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    core::hint::spin_loop();
                }
            })
        };
        while !held.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }

        let contender = {
            let lock = lock.clone();
            sched.spawn("contender", move |ctx| lock.try_lock(&*ctx).is_some())
        };
        assert!(!contender.join().unwrap());

        release.store(true, Ordering::SeqCst);
        holder.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_mutual_exclusion_across_cpus() {
        let sched = HostScheduler::new(4).unwrap();
        let counter = Arc::new(Spinlock::new("counter", 0u64));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                sched.spawn("spinner", move |ctx| {
                    for _ in 0..1000 {
                        let mut guard = counter.lock(&*ctx);
                        let v = *guard;
                        core::hint::spin_loop();
                        *guard = v + 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counter = Arc::try_unwrap(counter).ok().unwrap();
        assert_eq!(counter.destroy(), 4000);
    }

    #[test]
    fn test_irqsafe_lock_in_interrupt() {
        run_irq(|ictx| {
            let lock = Spinlock::new_irqsafe("irq", 0);
            *lock.lock(ictx) += 1;
            assert_eq!(lock.kind(), SpinlockKind::IrqSafe);
        });
    }

    #[test]
    #[should_panic(expected = "normal spinlock taken in interrupt context")]
    fn test_normal_lock_in_interrupt_is_fatal() {
        run_irq(|ictx| {
            let lock = Spinlock::new("thread-only", ());
            let _guard = lock.lock(ictx);
        });
    }

    #[test]
    #[should_panic(expected = "destroyed while held")]
    fn test_destroy_held_is_fatal() {
        run(1, |ctx| {
            let lock = Spinlock::new("leaked", ());
            core::mem::forget(lock.lock(&*ctx));
            lock.destroy();
        });
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "recursive acquire")]
    fn test_recursive_acquire_detected() {
        run(1, |ctx| {
            let lock = Spinlock::new("recursive", ());
            let _first = lock.lock(&*ctx);
            let _second = lock.lock(&*ctx);
        });
    }

    #[test]
    fn test_scheduler_cpu_lookup() {
        let sched = HostScheduler::new(2).unwrap();
        assert_eq!(sched.cpu(1).id(), 1);
    }
}

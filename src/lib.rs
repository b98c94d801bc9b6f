#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Kernel synchronization core: spinlocks, wait channels and sleeping mutexes.
//!
//! The crate provides the two-tier locking layer of a small multiprocessor
//! kernel. Spinlocks busy-wait with interrupts masked and are safe in
//! interrupt handlers; mutexes put contending threads to sleep on a wait
//! channel and may only be taken from thread context.
//!
//! # Features
//!
//! - `std-shim`: Expose the host scheduler (kernel threads on std threads,
//!   simulated CPUs) outside of tests
//! - `spin-debug`: Detect recursive spinlock acquisition in release builds
//!
//! # Quick Start
//!
//! ```ignore
//! use kernel_sync::{Mutex, Spinlock, ThreadContext};
//!
//! static TICKS: Spinlock<u64> = Spinlock::new_irqsafe("ticks", 0);
//! static TABLE: Mutex<[u8; 64]> = Mutex::new("table", [0; 64]);
//!
//! fn worker(ctx: &mut ThreadContext<'_>) {
//!     *TICKS.lock(&*ctx) += 1;
//!
//!     let mut table = TABLE.lock(ctx);
//!     table[0] = 1;
//! }
//! ```
//!
//! # Architecture
//!
//! - Execution contexts are capabilities: a [`ThreadContext`] may block, an
//!   [`InterruptContext`] may not, and both may take spinlocks
//! - Spinlock guards borrow the context shared while [`Mutex::lock`] and
//!   [`InputQueue::read`] need it `&mut`, so calling them under a spinlock
//!   does not compile
//! - [`WaitChannel::sleep_on`] releases the caller's spinlock and sleeps with
//!   no window for a lost wakeup. It has to run with that spinlock held, so
//!   holding any other one is caught at run time instead
//! - Schedulers plug in through the [`Scheduler`] trait

// Core modules
pub mod arch;
pub mod config;
pub mod console;
pub mod errors;
pub mod irq;
pub mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
mod tests;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

extern crate alloc;

// Panic handler for bare-metal
#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    // Mask interrupts so nothing else runs on this CPU, then park it.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("msr daifset, #0xf", options(nomem, nostack));
    }
    loop {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "aarch64"))]
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, DefaultArch};

// Locks
pub use sync::{
    Mutex, MutexGuard, MutexStatus, Spinlock, SpinlockGuard, SpinlockKind, WaitChannel,
    WaitChannelGuard,
};

// Scheduler interface
pub use sched::{Cpu, CpuId, InterruptContext, LockContext, Scheduler, ThreadContext};

#[cfg(any(test, feature = "std-shim"))]
pub use sched::{HostScheduler, JoinHandle};

// Threads
pub use thread::{Thread, ThreadId, ThreadState};

// Interrupts and console
pub use console::InputQueue;
pub use irq::{IrqHandler, IrqRegistration, IrqTable};

// Errors
pub use errors::{IrqError, ScheduleError, SyncError, SyncResult};

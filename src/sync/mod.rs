//! Synchronization primitives.
//!
//! Two tiers:
//! - [`Spinlock`]: busy-waits with interrupts masked; never sleeps.
//! - [`Mutex`]: sleeps on a [`WaitChannel`] while contended; only usable
//!   from thread context with no spinlock held.

pub mod mutex;
pub mod spinlock;
pub mod wait_channel;

pub use mutex::{Mutex, MutexGuard, MutexStatus};
pub use spinlock::{Spinlock, SpinlockGuard, SpinlockKind};
pub use wait_channel::{WaitChannel, WaitChannelGuard};

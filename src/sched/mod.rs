//! Scheduler interface consumed by the synchronization core.
//!
//! Scheduling policy lives elsewhere. This module defines what the core needs
//! from a scheduler: per-CPU records, block, wake, and the execution-context
//! capabilities handed to threads and interrupt handlers.

pub mod context;
pub mod cpu;
pub mod trait_def;

#[cfg(any(test, feature = "std-shim"))]
pub mod host;

pub use context::{InterruptContext, LockContext, ThreadContext};
pub use cpu::{Cpu, CpuId};
pub use trait_def::Scheduler;

#[cfg(any(test, feature = "std-shim"))]
pub use host::{HostScheduler, JoinHandle};

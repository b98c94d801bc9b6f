//! Recoverable error types for the synchronization layer.
//!
//! Only expected outcomes live here. Programming errors (blocking while a
//! spinlock is held, releasing a lock the caller does not own, tearing down a
//! held lock) are fatal and panic instead of returning an error.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Top-level error type for all recoverable outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The lock is held by someone else; the caller did not block.
    Busy,
    /// Interrupt table errors
    Irq(IrqError),
    /// Scheduler setup errors
    Schedule(ScheduleError),
}

/// Errors from the interrupt handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Interrupt line outside the table
    InvalidIrq(u32),
    /// No matching handler is registered on the line
    NotRegistered(u32),
    /// The line already has as many handlers as it can hold
    LineFull(u32),
}

/// Errors from building a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// A scheduler needs at least one CPU
    NoCpus,
    /// More CPUs requested than the kernel supports
    TooManyCpus(usize),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Busy => write!(f, "Resource busy"),
            SyncError::Irq(e) => write!(f, "Interrupt error: {}", e),
            SyncError::Schedule(e) => write!(f, "Scheduling error: {}", e),
        }
    }
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqError::InvalidIrq(irq) => write!(f, "Invalid interrupt line: {}", irq),
            IrqError::NotRegistered(irq) => write!(f, "No handler registered on line {}", irq),
            IrqError::LineFull(irq) => write!(f, "Too many handlers on line {}", irq),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::NoCpus => write!(f, "Scheduler needs at least one CPU"),
            ScheduleError::TooManyCpus(n) => {
                write!(f, "Too many CPUs: {} (max {})", n, crate::config::MAX_CPUS)
            }
        }
    }
}

impl From<IrqError> for SyncError {
    fn from(error: IrqError) -> Self {
        SyncError::Irq(error)
    }
}

impl From<ScheduleError> for SyncError {
    fn from(error: ScheduleError) -> Self {
        SyncError::Schedule(error)
    }
}

impl SyncError {
    /// Whether this is the `Busy` outcome of a try-lock.
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncError::Busy)
    }
}

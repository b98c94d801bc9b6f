//! Compile-time limits.

/// Maximum number of CPUs a scheduler may expose.
pub const MAX_CPUS: usize = 64;

/// Number of interrupt lines in an [`IrqTable`](crate::irq::IrqTable).
pub const MAX_IRQS: u32 = 256;

/// Threads one wait channel can hold. The queue is a fixed ring so that
/// sleeping never allocates with the channel lock held.
pub const WAIT_QUEUE_DEPTH: usize = 64;

/// Handlers that may share one interrupt line.
pub const IRQ_HANDLERS_PER_LINE: usize = 4;

/// Capacity of the console input queue, in key codes.
pub const CONSOLE_QUEUE_DEPTH: usize = 128;

/// Whether spinlocks check their owner tag for recursive acquisition.
///
/// On in debug builds and with the `spin-debug` feature. Without it a CPU that
/// re-acquires a spinlock it holds spins forever.
pub const SPIN_DEBUG: bool = cfg!(any(debug_assertions, feature = "spin-debug"));
